use crate::types::SectorID;

pub const SECTOR_SIZE: usize = 512;
pub type Sector = [u8; SECTOR_SIZE];

pub(crate) fn flatten(sectors: &[Sector]) -> &[u8] {
    sectors.as_flattened()
}

pub(crate) fn flatten_mut(sectors: &mut [Sector]) -> &mut [u8] {
    sectors.as_flattened_mut()
}

/// Read access to device memory, e.g. target flash or RAM over the debug port
pub trait MemoryWindow {
    /// Returns false when the memory could not be read
    fn read_memory(&self, address: u32, buf: &mut [u8]) -> bool;
}

/// Backing storage of a writable file region.
///
/// Offsets are region relative sector indexes, buffers always cover whole sectors.
pub trait SectorSink {
    /// Returns number of bytes produced, the remain of `buf` stays zero
    fn read(&self, offset: u32, buf: &mut [u8]) -> usize;
    fn write(&self, offset: u32, data: &[u8]);
}

/// Sector level entry points exposed to the mass storage class driver
pub trait BlockDevice {
    fn num_sectors(&self) -> u32;
    fn read(&mut self, id: SectorID, sectors: &mut [Sector]);
    fn write(&mut self, id: SectorID, sectors: &[Sector]);
}
