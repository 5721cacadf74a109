//! In-application programming backend for the probe's own flash.
//!
//! Writes must be sequential, page aligned, confined to the update staging
//! region and never touch the running application. When the interface build
//! updates the bootloader, the first sector of the staged image (its vector
//! table) is held back in RAM and only programmed once the trailing CRC32 of
//! the complete image has been verified, so an interrupted update always
//! leaves a bootable image behind.

use core::ops::Range;

use crc32fast::Hasher;

use crate::config::Role;
use crate::error::{Error, FlashError};

use super::manager::MAX_PAGE_SIZE;
use super::{FlashHal, FlashIntf};

pub const MAX_SECTOR_SIZE: usize = 4096;
const CRC_SIZE: u32 = 4;

#[derive(Clone, Debug)]
pub struct Layout {
    /// Running application, never erased or programmed
    pub app: Range<u32>,
    /// Staging region of the image being updated
    pub update: Range<u32>,
    pub sector_size: u32,
    pub min_write_size: u32,
    pub role: Role,
    /// Vector table parked in the first update sector while it is being replaced
    pub fallback_vector_table: Option<u32>,
}

impl Layout {
    /// Geometry the staging logic can work with
    pub fn is_valid(&self) -> bool {
        let (sector_size, min_write_size) = (self.sector_size, self.min_write_size);
        if sector_size == 0 || sector_size as usize > MAX_SECTOR_SIZE {
            return false;
        }
        if min_write_size < CRC_SIZE || min_write_size as usize > MAX_PAGE_SIZE || sector_size % min_write_size != 0 {
            return false;
        }
        let bounds = [self.update.start, self.update.end, self.app.start, self.app.end];
        bounds.iter().all(|bound| bound % sector_size == 0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    Error,
}

pub struct ProtectedFlash<H> {
    hal: H,
    layout: Layout,
    state: State,
    update_complete: bool,
    mass_erase_performed: bool,
    current_sector: Option<(u32, u32)>,
    current_page: Option<(u32, u32)>,
    crc: Hasher,
    shadow: [u8; MAX_SECTOR_SIZE],
}

impl<H: FlashHal> ProtectedFlash<H> {
    pub fn new(hal: H, layout: Layout) -> Self {
        Self {
            hal,
            layout,
            state: State::Closed,
            update_complete: false,
            mass_erase_performed: false,
            current_sector: None,
            current_page: None,
            crc: Hasher::new(),
            shadow: [0xFF; MAX_SECTOR_SIZE],
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn into_hal(self) -> H {
        self.hal
    }

    fn fail<E: Into<Error>>(&mut self, error: E) -> Error {
        self.state = State::Error;
        error.into()
    }

    fn intercepting(&self) -> bool {
        self.layout.role == Role::Interface
    }

    fn first_sector(&self) -> Range<u32> {
        self.layout.update.start..self.layout.update.start + self.layout.sector_size
    }

    /// Returns whether the write was fully handled
    fn intercept_page_write(&mut self, address: u32, data: &[u8]) -> Result<bool, Error> {
        let update = self.layout.update.clone();
        if !update.contains(&address) {
            return Err(FlashError::OutOfBounds.into());
        }
        if !self.intercepting() {
            return Ok(false);
        }

        let crc_size = (data.len() as u32).min((update.end - address).saturating_sub(CRC_SIZE));
        self.crc.update(&data[..crc_size as usize]);

        if self.first_sector().contains(&address) {
            let offset = (address - update.start) as usize;
            self.shadow[offset..offset + data.len()].copy_from_slice(data);
            trace!("Staged {} bytes of first sector at {:#x}", data.len(), address);
            return Ok(true);
        }

        if address + data.len() as u32 != update.end {
            return Ok(false);
        }

        let mut stored = [0u8; CRC_SIZE as usize];
        stored.copy_from_slice(&data[data.len() - CRC_SIZE as usize..]);
        let stored = u32::from_le_bytes(stored);
        let computed = self.crc.clone().finalize();
        if computed != stored {
            warn!("Update CRC mismatch, computed {:#010x} stored {:#010x}", computed, stored);
            return Err(FlashError::BadCrc.into());
        }
        self.hal.program_page(address, data).map_err(|_| FlashError::Write)?;
        // Vector table goes live last
        let first = self.first_sector();
        self.hal.erase_sector(first.start).map_err(|_| FlashError::Write)?;
        let size = self.layout.sector_size as usize;
        self.hal.program_page(first.start, &self.shadow[..size]).map_err(|_| FlashError::Write)?;
        self.hal.update_committed();
        self.update_complete = true;
        info!("Update committed, CRC {:#010x}", computed);
        Ok(true)
    }

    fn intercept_sector_erase(&mut self, address: u32) -> Result<bool, Error> {
        if !self.layout.update.contains(&address) {
            return Err(FlashError::OutOfBounds.into());
        }
        if !self.intercepting() || address != self.layout.update.start {
            return Ok(false);
        }
        let fallback = match self.layout.fallback_vector_table {
            Some(fallback) => fallback,
            None => return Ok(true),
        };
        let size = self.layout.min_write_size as usize;
        let mut table = [0u8; MAX_PAGE_SIZE];
        self.hal.read(fallback, &mut table[..size]).map_err(|_| FlashError::EraseSector)?;
        self.hal.erase_sector(address).map_err(|_| FlashError::EraseSector)?;
        self.hal.program_page(address, &table[..size]).map_err(|_| FlashError::EraseSector)?;
        debug!("Parked vector table from {:#x} at {:#x}", fallback, address);
        Ok(true)
    }

    fn page_program_allowed(&self, address: u32, size: u32) -> bool {
        address >= self.layout.app.end || address + size <= self.layout.app.start
    }
}

impl<H: FlashHal> FlashIntf for ProtectedFlash<H> {
    fn init(&mut self) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::Internal);
        }
        if self.layout.update.is_empty() {
            return Err(FlashError::UpdateNotSupported.into());
        }
        if !self.layout.is_valid() {
            warn!("Invalid layout {:?}", self.layout);
            return Err(Error::Internal);
        }
        self.hal.init().map_err(|_| FlashError::Init)?;
        self.update_complete = false;
        self.mass_erase_performed = false;
        self.current_sector = None;
        self.current_page = None;
        self.crc = Hasher::new();
        self.shadow.fill(0xFF);
        self.state = State::Open;
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::Internal);
        }
        self.state = State::Closed;
        self.hal.uninit().map_err(|_| FlashError::Uninit)?;
        if !self.update_complete {
            return Err(FlashError::UpdateIncomplete.into());
        }
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Internal);
        }
        let size = data.len() as u32;
        let min_size = self.program_page_min_size(address);
        let sector_size = self.erase_sector_size(address);
        if address % min_size != 0 || size < min_size || size % min_size != 0 {
            warn!("Misaligned page {:#x} size {}", address, size);
            return Err(self.fail(FlashError::Sequence));
        }
        if address % sector_size + size > sector_size {
            warn!("Page {:#x} size {} crosses a sector", address, size);
            return Err(self.fail(FlashError::Sequence));
        }
        if !self.mass_erase_performed {
            match self.current_sector {
                Some((start, size)) if (start..start + size).contains(&address) => (),
                _ => {
                    warn!("Page {:#x} not in an erased sector", address);
                    return Err(self.fail(FlashError::Sequence));
                }
            }
        }
        if let Some((page, page_size)) = self.current_page {
            if address != page + page_size {
                warn!("Page {:#x} not sequential", address);
                return Err(self.fail(FlashError::Sequence));
            }
        }
        if !self.page_program_allowed(address, size) {
            return Err(self.fail(FlashError::Write));
        }
        self.current_page = Some((address, size));

        match self.intercept_page_write(address, data) {
            Ok(true) => return Ok(()),
            Ok(false) => (),
            Err(error) => return Err(self.fail(error)),
        }
        if self.hal.program_page(address, data).is_err() {
            return Err(self.fail(FlashError::Write));
        }
        if address + size >= self.layout.update.end {
            self.update_complete = true;
        }
        Ok(())
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Internal);
        }
        let sector_size = self.erase_sector_size(address);
        if address % sector_size != 0 {
            return Err(self.fail(FlashError::Sequence));
        }
        if let Some((sector, size)) = self.current_sector {
            if address != sector + size {
                warn!("Sector {:#x} not sequential", address);
                return Err(self.fail(FlashError::Sequence));
            }
        }
        if self.layout.app.contains(&address) {
            return Err(self.fail(FlashError::EraseSector));
        }
        self.current_sector = Some((address, sector_size));

        match self.intercept_sector_erase(address) {
            Ok(true) => return Ok(()),
            Ok(false) => (),
            Err(error) => return Err(self.fail(error)),
        }
        if self.hal.erase_sector(address).is_err() {
            return Err(self.fail(FlashError::EraseSector));
        }
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Internal);
        }
        if self.mass_erase_performed {
            return Err(self.fail(FlashError::Sequence));
        }
        let update = self.layout.update.clone();
        for address in update.step_by(self.layout.sector_size as usize) {
            if self.erase_sector(address).is_err() {
                return Err(self.fail(FlashError::EraseAll));
            }
        }
        self.mass_erase_performed = true;
        Ok(())
    }

    fn program_page_min_size(&self, _: u32) -> u32 {
        self.layout.min_write_size
    }

    fn erase_sector_size(&self, _: u32) -> u32 {
        self.layout.sector_size
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::vec::Vec;

    use super::{Layout, ProtectedFlash};
    use crate::config::Role;
    use crate::error::{Error, FlashError};
    use crate::flash::{FlashHal, FlashIntf};

    /// NOR flash in RAM, programming can only clear bits
    pub struct RamHal {
        pub memory: Vec<u8>,
        pub committed: bool,
    }

    impl RamHal {
        pub fn new(size: usize) -> Self {
            Self { memory: vec![0xFF; size], committed: false }
        }
    }

    impl FlashHal for RamHal {
        type Error = ();

        fn init(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn uninit(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn erase_sector(&mut self, address: u32) -> Result<(), ()> {
            let start = address as usize;
            self.memory.get_mut(start..start + SECTOR as usize).ok_or(())?.fill(0xFF);
            Ok(())
        }

        fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), ()> {
            let start = address as usize;
            let target = self.memory.get_mut(start..start + data.len()).ok_or(())?;
            target.iter_mut().zip(data).for_each(|(dst, src)| *dst &= *src);
            Ok(())
        }

        fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), ()> {
            let start = address as usize;
            buf.copy_from_slice(self.memory.get(start..start + buf.len()).ok_or(())?);
            Ok(())
        }

        fn update_committed(&mut self) {
            self.committed = true;
        }
    }

    pub const SECTOR: u32 = 0x400;
    const PAGE: u32 = 0x100;
    const UPDATE_SIZE: usize = 0x1000;

    pub fn layout(role: Role) -> Layout {
        Layout {
            app: 0x2000..0x4000,
            update: 0..UPDATE_SIZE as u32,
            sector_size: SECTOR,
            min_write_size: PAGE,
            role,
            fallback_vector_table: None,
        }
    }

    /// Image of the update region size ending with its CRC32
    pub fn image(seed: u8) -> Vec<u8> {
        let mut image: Vec<u8> = (0..UPDATE_SIZE).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect();
        let crc = crc32fast::hash(&image[..UPDATE_SIZE - 4]);
        image[UPDATE_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        image
    }

    fn old_flash() -> RamHal {
        let mut hal = RamHal::new(0x4000);
        hal.memory[..UPDATE_SIZE].fill(0x11);
        hal
    }

    fn program(flash: &mut ProtectedFlash<RamHal>, image: &[u8]) -> Result<(), Error> {
        for (index, sector) in image.chunks(SECTOR as usize).enumerate() {
            let sector_address = index as u32 * SECTOR;
            flash.erase_sector(sector_address)?;
            for (index, page) in sector.chunks(PAGE as usize).enumerate() {
                flash.program_page(sector_address + index as u32 * PAGE, page)?;
            }
        }
        Ok(())
    }

    #[test]
    fn test_update_committed() {
        let mut flash = ProtectedFlash::new(old_flash(), layout(Role::Interface));
        let image = image(3);
        flash.init().unwrap();
        program(&mut flash, &image).unwrap();
        flash.uninit().unwrap();
        let hal = flash.into_hal();
        assert!(hal.committed);
        assert_eq!(&hal.memory[..UPDATE_SIZE], &image[..]);
    }

    #[test]
    fn test_bad_crc() {
        let mut flash = ProtectedFlash::new(old_flash(), layout(Role::Interface));
        let mut image = image(3);
        image[UPDATE_SIZE - 1] ^= 0xFF;
        flash.init().unwrap();
        assert_eq!(program(&mut flash, &image), Err(FlashError::BadCrc.into()));
        // Rejected from now on
        assert_eq!(flash.program_page(0, &image[..PAGE as usize]), Err(Error::Internal));
        assert_eq!(flash.uninit(), Err(FlashError::UpdateIncomplete.into()));
        let hal = flash.into_hal();
        assert!(!hal.committed);
        assert!(hal.memory[..SECTOR as usize].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_fallback_vector_table() {
        let mut layout = layout(Role::Interface);
        layout.fallback_vector_table = Some(0x2000);
        let mut hal = old_flash();
        hal.memory[0x2000..0x2100].fill(0x42);
        let mut flash = ProtectedFlash::new(hal, layout);
        flash.init().unwrap();
        flash.erase_sector(0).unwrap();
        assert!(flash.hal().memory[..PAGE as usize].iter().all(|&b| b == 0x42));
        assert!(flash.hal().memory[PAGE as usize..SECTOR as usize].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_bootloader_role_programs_directly() {
        let mut flash = ProtectedFlash::new(old_flash(), layout(Role::Bootloader));
        let mut image = image(5);
        // No CRC check for interface images
        image[UPDATE_SIZE - 1] ^= 0xFF;
        flash.init().unwrap();
        program(&mut flash, &image).unwrap();
        flash.uninit().unwrap();
        assert_eq!(&flash.into_hal().memory[..UPDATE_SIZE], &image[..]);
    }

    #[test]
    fn test_ordering_rules() {
        let page = [0u8; PAGE as usize];
        let mut flash = ProtectedFlash::new(old_flash(), layout(Role::Bootloader));
        flash.init().unwrap();
        // Not erased yet
        assert_eq!(flash.program_page(0, &page), Err(FlashError::Sequence.into()));
        flash.uninit().ok();

        flash.init().unwrap();
        flash.erase_sector(0).unwrap();
        assert_eq!(flash.erase_sector(2 * SECTOR), Err(FlashError::Sequence.into()));
        flash.uninit().ok();

        flash.init().unwrap();
        flash.erase_sector(0).unwrap();
        flash.program_page(0, &page).unwrap();
        assert_eq!(flash.program_page(2 * PAGE, &page), Err(FlashError::Sequence.into()));
        flash.uninit().ok();

        flash.init().unwrap();
        flash.erase_sector(0).unwrap();
        assert_eq!(flash.program_page(PAGE / 2, &page), Err(FlashError::Sequence.into()));
        flash.uninit().ok();

        flash.init().unwrap();
        flash.erase_chip().unwrap();
        flash.program_page(0, &page).unwrap();
        assert_eq!(flash.erase_chip(), Err(FlashError::Sequence.into()));
    }

    #[test]
    fn test_application_protected() {
        let mut layout = layout(Role::Bootloader);
        layout.update = 0..0x3000;
        let mut flash = ProtectedFlash::new(old_flash(), layout);
        flash.init().unwrap();
        for sector in (0..0x2000).step_by(SECTOR as usize) {
            flash.erase_sector(sector).unwrap();
        }
        assert_eq!(flash.erase_sector(0x2000), Err(FlashError::EraseSector.into()));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut layout = layout(Role::Bootloader);
        layout.app = 0x3000..0x4000;
        let mut flash = ProtectedFlash::new(old_flash(), layout);
        flash.init().unwrap();
        for sector in (0..UPDATE_SIZE as u32).step_by(SECTOR as usize) {
            flash.erase_sector(sector).unwrap();
        }
        assert_eq!(flash.erase_sector(UPDATE_SIZE as u32), Err(FlashError::OutOfBounds.into()));
    }

    #[test]
    fn test_update_not_supported() {
        let mut layout = layout(Role::Interface);
        layout.update = 0..0;
        let mut flash = ProtectedFlash::new(old_flash(), layout);
        assert_eq!(flash.init(), Err(FlashError::UpdateNotSupported.into()));
    }

    #[test]
    fn test_invalid_layout() {
        let cases: [fn(&mut Layout); 7] = [
            |layout| layout.sector_size = 0,
            |layout| layout.sector_size = 0x2000,
            |layout| layout.min_write_size = 2,
            |layout| layout.min_write_size = 0x300,
            |layout| layout.update = 0x100..UPDATE_SIZE as u32,
            |layout| layout.update = 0..UPDATE_SIZE as u32 - 0x100,
            |layout| layout.app = 0x2000..0x3F00,
        ];
        for modify in cases {
            let mut layout = layout(Role::Interface);
            modify(&mut layout);
            assert!(!layout.is_valid());
            let mut flash = ProtectedFlash::new(old_flash(), layout);
            assert_eq!(flash.init(), Err(Error::Internal));
            // Nothing reaches the flash
            assert_eq!(flash.erase_sector(0), Err(Error::Internal));
            assert_eq!(flash.program_page(0, &[0; PAGE as usize]), Err(Error::Internal));
        }
        assert!(layout(Role::Interface).is_valid());
    }
}
