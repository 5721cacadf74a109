use dragndrop::error::{Error, TargetError};
use dragndrop::{FlashHal, FlashIntf};

/// NOR flash kept in memory, programming only clears bits
pub struct RamFlash {
    pub base: u32,
    pub memory: Vec<u8>,
    pub page_size: u32,
    pub sector_size: u32,
}

impl RamFlash {
    pub fn new(base: u32, size: usize, page_size: u32, sector_size: u32) -> Self {
        Self { base, memory: vec![0xFF; size], page_size, sector_size }
    }

    fn range(&self, address: u32, size: usize) -> Option<std::ops::Range<usize>> {
        let start = address.checked_sub(self.base)? as usize;
        let end = start + size;
        (end <= self.memory.len()).then_some(start..end)
    }

    /// Trailing erased bytes are dropped
    pub fn used(&self) -> &[u8] {
        let end = self.memory.iter().rposition(|&b| b != 0xFF).map_or(0, |i| i + 1);
        &self.memory[..end]
    }
}

impl FlashIntf for RamFlash {
    fn init(&mut self) -> Result<(), Error> {
        debug!("Target flash init");
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), Error> {
        debug!("Target flash uninit");
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        let range = self.range(address, data.len()).ok_or(TargetError::Write)?;
        self.memory[range].iter_mut().zip(data).for_each(|(dst, src)| *dst &= *src);
        Ok(())
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        let range = self.range(address, self.sector_size as usize).ok_or(TargetError::EraseSector)?;
        self.memory[range].fill(0xFF);
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<(), Error> {
        self.memory.fill(0xFF);
        Ok(())
    }

    fn program_page_min_size(&self, _: u32) -> u32 {
        self.page_size
    }

    fn erase_sector_size(&self, _: u32) -> u32 {
        self.sector_size
    }
}

#[derive(Debug)]
pub struct OutOfRange(pub u32);

impl FlashHal for RamFlash {
    type Error = OutOfRange;

    fn init(&mut self) -> Result<(), OutOfRange> {
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), OutOfRange> {
        Ok(())
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), OutOfRange> {
        let range = self.range(address, self.sector_size as usize).ok_or(OutOfRange(address))?;
        self.memory[range].fill(0xFF);
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), OutOfRange> {
        let range = self.range(address, data.len()).ok_or(OutOfRange(address))?;
        self.memory[range].iter_mut().zip(data).for_each(|(dst, src)| *dst &= *src);
        Ok(())
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), OutOfRange> {
        let range = self.range(address, buf.len()).ok_or(OutOfRange(address))?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    fn update_committed(&mut self) {
        info!("Probe firmware update committed");
    }
}
