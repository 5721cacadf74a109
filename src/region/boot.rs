// Boot sector with BIOS parameter block

use crate::endian;
use crate::io::{SECTOR_SIZE, Sector};
use crate::types::{ClusterID, SectorID};

use super::directory::Filename;

pub const SECTORS_PER_CLUSTER: u8 = 8;
pub const CLUSTER_SIZE: u32 = SECTOR_SIZE as u32 * SECTORS_PER_CLUSTER as u32;
pub const NUM_FATS: u8 = 2;
/// Two sectors of root directory, only the first one is backed by memory
pub const ROOT_ENTRIES: u16 = 32;
/// Extra space on top of the requested capacity, leaves room for FAT and root directory
const RESERVE: u32 = 64 * 1024;
const FAT12_MAX_CLUSTERS: u32 = 4085;

// Field offsets
const JUMP_BOOT: usize = 0;
const OEM_NAME: usize = 3;
const BYTES_PER_SECTOR: usize = 11;
const SECTORS_PER_CLUSTER_OFFSET: usize = 13;
const RESERVED_SECTORS: usize = 14;
const NUM_FATS_OFFSET: usize = 16;
const ROOT_ENTRIES_OFFSET: usize = 17;
const TOTAL_SECTORS_16: usize = 19;
const MEDIA_DESCRIPTOR: usize = 21;
const SECTORS_PER_FAT: usize = 22;
const SECTORS_PER_TRACK: usize = 24;
const HEADS: usize = 26;
const HIDDEN_SECTORS: usize = 28;
const TOTAL_SECTORS_32: usize = 32;
const DRIVE_NUMBER: usize = 36;
const BOOT_SIGNATURE: usize = 38;
const VOLUME_ID: usize = 39;
const VOLUME_LABEL: usize = 43;
const FILESYSTEM_TYPE: usize = 54;
const SIGNATURE: usize = 510;

const MEDIA_FIXED: u8 = 0xF8;
const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
const SERIAL_NUMBER: u32 = 0x27021974;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FatType {
    FAT12,
    FAT16,
}

impl FatType {
    fn name(self) -> &'static [u8; 8] {
        match self {
            Self::FAT12 => b"FAT12   ",
            Self::FAT16 => b"FAT16   ",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    pub sectors_per_fat: u16,
    pub volume_id: u32,
    pub volume_label: Filename,
    pub fat_type: FatType,
}

impl BootSector {
    /// Derive geometry from the requested capacity in bytes
    pub fn new(capacity: u32, label: Filename) -> Self {
        let total_sectors = (capacity + RESERVE) / SECTOR_SIZE as u32;
        let num_clusters = total_sectors / SECTORS_PER_CLUSTER as u32;
        let (fat_type, sectors_per_fat) = if num_clusters < FAT12_MAX_CLUSTERS {
            (FatType::FAT12, 3 * num_clusters.div_ceil(1024))
        } else {
            let bytes = (num_clusters + 2) * 2;
            (FatType::FAT16, bytes.div_ceil(SECTOR_SIZE as u32))
        };
        Self {
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            reserved_sectors: 1,
            num_fats: NUM_FATS,
            root_entries: ROOT_ENTRIES,
            total_sectors,
            sectors_per_fat: sectors_per_fat as u16,
            volume_id: SERIAL_NUMBER,
            volume_label: label,
            fat_type,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_sectors as u64 * self.bytes_per_sector as u64
    }

    pub fn serialize(&self, sector: &mut Sector) {
        sector.fill(0);
        sector[JUMP_BOOT..JUMP_BOOT + 3].copy_from_slice(&hex!("EB 3C 90"));
        sector[OEM_NAME..OEM_NAME + 8].copy_from_slice(b"MSD0S4.1");
        endian::write(sector, BYTES_PER_SECTOR, self.bytes_per_sector);
        sector[SECTORS_PER_CLUSTER_OFFSET] = self.sectors_per_cluster;
        endian::write(sector, RESERVED_SECTORS, self.reserved_sectors);
        sector[NUM_FATS_OFFSET] = self.num_fats;
        endian::write(sector, ROOT_ENTRIES_OFFSET, self.root_entries);
        if self.total_sectors <= u16::MAX as u32 {
            endian::write(sector, TOTAL_SECTORS_16, self.total_sectors as u16);
        } else {
            endian::write(sector, TOTAL_SECTORS_32, self.total_sectors);
        }
        sector[MEDIA_DESCRIPTOR] = MEDIA_FIXED;
        endian::write(sector, SECTORS_PER_FAT, self.sectors_per_fat);
        endian::write(sector, SECTORS_PER_TRACK, 1u16);
        endian::write(sector, HEADS, 1u16);
        endian::write(sector, HIDDEN_SECTORS, 0u32);
        sector[DRIVE_NUMBER] = 0;
        sector[BOOT_SIGNATURE] = EXTENDED_BOOT_SIGNATURE;
        endian::write(sector, VOLUME_ID, self.volume_id);
        sector[VOLUME_LABEL..VOLUME_LABEL + 11].copy_from_slice(&self.volume_label.0);
        sector[FILESYSTEM_TYPE..FILESYSTEM_TYPE + 8].copy_from_slice(self.fat_type.name());
        sector[SIGNATURE..SIGNATURE + 2].copy_from_slice(&hex!("55 AA"));
    }

    pub fn parse(sector: &Sector) -> Option<Self> {
        if sector[SIGNATURE..SIGNATURE + 2] != hex!("55 AA") {
            return None;
        }
        let bytes_per_sector: u16 = endian::read(sector, BYTES_PER_SECTOR);
        if bytes_per_sector as usize != SECTOR_SIZE || sector[SECTORS_PER_CLUSTER_OFFSET] == 0 {
            return None;
        }
        let total_sectors = match endian::read::<u16>(sector, TOTAL_SECTORS_16) {
            0 => endian::read::<u32>(sector, TOTAL_SECTORS_32),
            sectors => sectors as u32,
        };
        let fat_type = match &sector[FILESYSTEM_TYPE..FILESYSTEM_TYPE + 8] {
            b"FAT12   " => FatType::FAT12,
            b"FAT16   " => FatType::FAT16,
            _ => return None,
        };
        let mut label = [0u8; 11];
        label.copy_from_slice(&sector[VOLUME_LABEL..VOLUME_LABEL + 11]);
        Some(Self {
            bytes_per_sector,
            sectors_per_cluster: sector[SECTORS_PER_CLUSTER_OFFSET],
            reserved_sectors: endian::read(sector, RESERVED_SECTORS),
            num_fats: sector[NUM_FATS_OFFSET],
            root_entries: endian::read(sector, ROOT_ENTRIES_OFFSET),
            total_sectors,
            sectors_per_fat: endian::read(sector, SECTORS_PER_FAT),
            volume_id: endian::read(sector, VOLUME_ID),
            volume_label: Filename(label),
            fat_type,
        })
    }

    pub fn geometry(&self) -> Geometry {
        let root_sectors = self.root_entries as u32 * 32 / self.bytes_per_sector as u32;
        let fat_sectors = self.num_fats as u32 * self.sectors_per_fat as u32;
        Geometry {
            sectors_per_cluster: self.sectors_per_cluster,
            fat_offset: SectorID::from(self.reserved_sectors as u32),
            root_offset: SectorID::from(self.reserved_sectors as u32 + fat_sectors),
            data_offset: SectorID::from(self.reserved_sectors as u32 + fat_sectors + root_sectors),
        }
    }
}

/// Sector layout derived from the boot sector
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub sectors_per_cluster: u8,
    pub fat_offset: SectorID,
    pub root_offset: SectorID,
    pub data_offset: SectorID,
}

impl Geometry {
    pub fn cluster_to_sector(&self, cluster_id: ClusterID) -> SectorID {
        self.data_offset + cluster_id.offset() * self.sectors_per_cluster as u32
    }
}

#[cfg(test)]
mod test {
    use super::{BootSector, FatType};
    use crate::region::directory::Filename;

    const LABEL: Filename = Filename(*b"DAPLINK    ");

    #[test]
    fn test_geometry() {
        let boot = BootSector::new(8 * 1024 * 1024, LABEL);
        assert_eq!(boot.total_sectors, 16512);
        assert_eq!(boot.fat_type, FatType::FAT12);
        // 2064 clusters
        assert_eq!(boot.sectors_per_fat, 9);
        let geometry = boot.geometry();
        assert_eq!(u32::from(geometry.fat_offset), 1);
        assert_eq!(u32::from(geometry.root_offset), 19);
        assert_eq!(u32::from(geometry.data_offset), 21);
        assert_eq!(u32::from(geometry.cluster_to_sector(2.into())), 21);
        assert_eq!(u32::from(geometry.cluster_to_sector(4.into())), 37);
    }

    #[test]
    fn test_fat16() {
        let boot = BootSector::new(64 * 1024 * 1024, LABEL);
        assert_eq!(boot.fat_type, FatType::FAT16);
        assert_eq!(boot.total_sectors, 131200);
        assert_eq!(boot.sectors_per_fat, 65);
        let mut sector = [0u8; 512];
        boot.serialize(&mut sector);
        assert_eq!(&sector[19..21], &[0, 0]);
        assert_eq!(BootSector::parse(&sector), Some(boot));
    }

    #[test]
    fn test_serialize() {
        let boot = BootSector::new(8 * 1024 * 1024, LABEL);
        let mut sector = [0u8; 512];
        boot.serialize(&mut sector);
        assert_eq!(&sector[0..3], &hex!("EB 3C 90"));
        assert_eq!(&sector[11..24], &hex!("00 02 08 01 00 02 20 00 80 40 F8 09 00"));
        assert_eq!(&sector[39..43], &hex!("74 19 02 27"));
        assert_eq!(&sector[43..54], b"DAPLINK    ");
        assert_eq!(&sector[54..62], b"FAT12   ");
        assert_eq!(&sector[510..512], &hex!("55 AA"));
        assert_eq!(BootSector::parse(&sector), Some(boot));
    }
}
