use crate::error::Error;

use super::FlashIntf;

pub const MAX_PAGE_SIZE: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    Error,
}

/// Assembles arbitrary writes into whole pages, erasing every sector once when first entered
pub struct FlashManager {
    state: State,
    page: [u8; MAX_PAGE_SIZE],
    page_address: u32,
    page_size: u32,
    /// Page buffer holds data not yet programmed
    page_dirty: bool,
    page_set: bool,
    sector_address: u32,
    sector_size: u32,
    sector_set: bool,
}

impl Default for FlashManager {
    fn default() -> Self {
        Self {
            state: State::Closed,
            page: [0xFF; MAX_PAGE_SIZE],
            page_address: 0,
            page_size: 0,
            page_dirty: false,
            page_set: false,
            sector_address: 0,
            sector_size: 0,
            sector_set: false,
        }
    }
}

impl FlashManager {
    pub fn init(&mut self, intf: &mut dyn FlashIntf) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::Internal);
        }
        *self = Self::default();
        intf.init()?;
        self.state = State::Open;
        Ok(())
    }

    fn check<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if result.is_err() {
            self.state = State::Error;
        }
        result
    }

    fn flush_page(&mut self, intf: &mut dyn FlashIntf) -> Result<(), Error> {
        if !self.page_dirty {
            return Ok(());
        }
        self.page_dirty = false;
        let size = self.page_size as usize;
        trace!("Program page {:#x} size {}", self.page_address, size);
        intf.program_page(self.page_address, &self.page[..size])
    }

    fn setup_page(&mut self, intf: &mut dyn FlashIntf, address: u32) -> Result<(), Error> {
        let page_size = intf.program_page_min_size(address);
        if page_size == 0 || page_size as usize > MAX_PAGE_SIZE {
            return Err(Error::Internal);
        }
        let sector_size = intf.erase_sector_size(address);
        if sector_size == 0 {
            return Err(Error::Internal);
        }
        let sector_address = address - address % sector_size;
        if !self.sector_set || sector_address != self.sector_address {
            debug!("Erase sector {:#x} size {}", sector_address, sector_size);
            intf.erase_sector(sector_address)?;
            self.sector_set = true;
            self.sector_address = sector_address;
            self.sector_size = sector_size;
        }
        self.page_address = address - address % page_size;
        self.page_size = page_size;
        self.page_set = true;
        self.page[..page_size as usize].fill(0xFF);
        Ok(())
    }

    fn write_data(&mut self, intf: &mut dyn FlashIntf, mut address: u32, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let page_end = self.page_address + self.page_size;
            if !self.page_set || address < self.page_address || address >= page_end {
                self.flush_page(intf)?;
                self.setup_page(intf, address)?;
            }
            let offset = (address - self.page_address) as usize;
            let size = data.len().min(self.page_size as usize - offset);
            self.page[offset..offset + size].copy_from_slice(&data[..size]);
            self.page_dirty = true;
            address += size as u32;
            data = &data[size..];
            if offset + size == self.page_size as usize {
                self.flush_page(intf)?;
            }
        }
        Ok(())
    }

    pub fn data(&mut self, intf: &mut dyn FlashIntf, address: u32, data: &[u8]) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Internal);
        }
        let result = self.write_data(intf, address, data);
        self.check(result)
    }

    /// Program the partially filled page padded with 0xFF, then release the backend
    pub fn uninit(&mut self, intf: &mut dyn FlashIntf) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::Internal);
        }
        let flushed = match self.state {
            State::Open => self.flush_page(intf),
            _ => Ok(()),
        };
        self.state = State::Closed;
        let released = intf.uninit();
        flushed.and(released)
    }
}
