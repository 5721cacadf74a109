use crate::endian;
use crate::error::VolumeError;
use crate::io::{SECTOR_SIZE, Sector};
use crate::types::ClusterID;

use super::boot::FatType;

/// First FAT sector, later sectors of the table are never referenced
pub struct AllocationTable {
    fat_type: FatType,
    sector: Sector,
    cursor: ClusterID,
}

impl AllocationTable {
    pub fn new(fat_type: FatType) -> Self {
        let mut table = Self { fat_type, sector: [0; SECTOR_SIZE], cursor: ClusterID::FIRST };
        let (media, reserved) = match fat_type {
            FatType::FAT12 => (0xFF8, 0xFFF),
            FatType::FAT16 => (0xFFF8, 0xFFFF),
        };
        table.set(0, media);
        table.set(1, reserved);
        table
    }

    fn end_of_chain(&self) -> u16 {
        match self.fat_type {
            FatType::FAT12 => 0xFFF,
            FatType::FAT16 => 0xFFFF,
        }
    }

    fn capacity(&self) -> u32 {
        match self.fat_type {
            FatType::FAT12 => SECTOR_SIZE as u32 * 2 / 3,
            FatType::FAT16 => SECTOR_SIZE as u32 / 2,
        }
    }

    pub fn as_sector(&self) -> &Sector {
        &self.sector
    }

    pub fn get(&self, index: u32) -> u16 {
        let index = index as usize;
        match self.fat_type {
            FatType::FAT12 => {
                let offset = index * 3 / 2;
                let value: u16 = endian::read(&self.sector, offset);
                match index & 1 {
                    0 => value & 0xFFF,
                    _ => value >> 4,
                }
            }
            FatType::FAT16 => endian::read(&self.sector, index * 2),
        }
    }

    fn set(&mut self, index: u32, value: u16) {
        let index = index as usize;
        match self.fat_type {
            FatType::FAT12 => {
                let (low, high) = (index * 3 / 2, index * 3 / 2 + 1);
                if index & 1 == 1 {
                    // Odd entry shares its low nibble with the previous entry
                    self.sector[low] = (self.sector[low] & 0x0F) | ((value << 4) as u8 & 0xF0);
                    self.sector[high] = (value >> 4) as u8;
                } else {
                    self.sector[low] = value as u8;
                    self.sector[high] = (self.sector[high] & 0xF0) | ((value >> 8) as u8 & 0x0F);
                }
            }
            FatType::FAT16 => endian::write(&mut self.sector, index * 2, value),
        }
    }

    /// Allocate a contiguous chain right after the last allocated cluster
    pub fn allocate(&mut self, num_clusters: u32) -> Result<ClusterID, VolumeError> {
        let first = self.cursor;
        let last = u32::from(first) + num_clusters - 1;
        if num_clusters == 0 || last >= self.capacity() {
            return Err(VolumeError::AllocationTableFull);
        }
        for index in u32::from(first)..last {
            self.set(index, (index + 1) as u16);
        }
        self.set(last, self.end_of_chain());
        self.cursor = ClusterID::from(last + 1);
        trace!("Allocated clusters {}..={}", first, last);
        Ok(first)
    }
}

#[cfg(test)]
mod test {
    use super::AllocationTable;
    use crate::error::VolumeError;
    use crate::region::boot::FatType;

    #[test]
    fn test_fat12() {
        let mut fat = AllocationTable::new(FatType::FAT12);
        assert_eq!(&fat.as_sector()[..3], &hex!("F8 FF FF"));
        assert_eq!(u32::from(fat.allocate(2).unwrap()), 2);
        assert_eq!(u32::from(fat.allocate(1).unwrap()), 4);
        assert_eq!(&fat.as_sector()[..8], &hex!("F8 FF FF 03 F0 FF FF 0F"));
        assert_eq!(fat.get(2), 3);
        assert_eq!(fat.get(3), 0xFFF);
        assert_eq!(fat.get(4), 0xFFF);
    }

    #[test]
    fn test_fat16() {
        let mut fat = AllocationTable::new(FatType::FAT16);
        assert_eq!(u32::from(fat.allocate(3).unwrap()), 2);
        assert_eq!(&fat.as_sector()[..12], &hex!("F8 FF FF FF 03 00 04 00 FF FF 00 00"));
    }

    #[test]
    fn test_exhausted() {
        let mut fat = AllocationTable::new(FatType::FAT16);
        assert_eq!(fat.allocate(254).map(u32::from), Ok(2));
        assert_eq!(fat.allocate(1), Err(VolumeError::AllocationTableFull));
        let mut fat = AllocationTable::new(FatType::FAT12);
        assert_eq!(fat.allocate(339).map(u32::from), Ok(2));
        assert_eq!(fat.allocate(1), Err(VolumeError::AllocationTableFull));
    }
}
