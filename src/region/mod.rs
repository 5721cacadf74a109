/// Boot sector, volume geometry derived from the configured capacity
/// 1 sector
pub mod boot;

/// FAT region, two copies of [`boot::BootSector::sectors_per_fat`] sectors each,
/// both mirroring the same in-memory table
pub mod fat;

/// Root directory region, 2 sectors of which only the first one is retained
pub mod directory;
