//! Flash programming pipeline.
//!
//! Data flows from a content stream into the [`decoder::FlashDecoder`], which
//! classifies the image and feeds the [`manager::FlashManager`] page
//! assembler, which in turn drives a [`FlashIntf`] backend: the external
//! target programmer or the [`protected::ProtectedFlash`] in-application
//! programming backend.

use core::fmt::Debug;

use crate::error::Error;

pub mod decoder;
pub mod manager;
pub mod protected;
pub mod validation;

/// Flash backend driven by the page assembler
pub trait FlashIntf {
    fn init(&mut self) -> Result<(), Error>;
    fn uninit(&mut self) -> Result<(), Error>;
    /// `data` is a non-zero multiple of [`FlashIntf::program_page_min_size`]
    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error>;
    fn erase_sector(&mut self, address: u32) -> Result<(), Error>;
    fn erase_chip(&mut self) -> Result<(), Error>;
    fn program_page_min_size(&self, address: u32) -> u32;
    /// Geometry may be non-uniform
    fn erase_sector_size(&self, address: u32) -> u32;
}

impl<F: FlashIntf + ?Sized> FlashIntf for &mut F {
    fn init(&mut self) -> Result<(), Error> {
        (**self).init()
    }

    fn uninit(&mut self) -> Result<(), Error> {
        (**self).uninit()
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        (**self).program_page(address, data)
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        (**self).erase_sector(address)
    }

    fn erase_chip(&mut self) -> Result<(), Error> {
        (**self).erase_chip()
    }

    fn program_page_min_size(&self, address: u32) -> u32 {
        (**self).program_page_min_size(address)
    }

    fn erase_sector_size(&self, address: u32) -> u32 {
        (**self).erase_sector_size(address)
    }
}

/// Raw on-chip flash primitives of the probe itself
pub trait FlashHal {
    type Error: Debug;

    fn init(&mut self) -> Result<(), Self::Error>;
    fn uninit(&mut self) -> Result<(), Self::Error>;
    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error>;
    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    /// Called once a self update became live, e.g. to recompute image CRCs
    fn update_committed(&mut self) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageType {
    Unknown,
    /// Application for the target MCU
    Target,
    /// Probe interface firmware
    Interface,
    /// Probe bootloader
    Bootloader,
}
