//! Virtual FAT volume assembled from fixed-length sector regions.
//!
//! The address space is laid out as boot sector, two FAT copies, two root
//! directory sectors (the second always empty), followed by one region per
//! file in registration order. Every region is backed by in-memory state or a
//! [`FileContent`] capability, nothing is stored on a real medium.

use core::cmp::min;

use heapless::Vec;

use crate::error::VolumeError;
use crate::io::{self, MemoryWindow, SECTOR_SIZE, Sector, SectorSink};
use crate::region::boot::{BootSector, CLUSTER_SIZE, Geometry};
use crate::region::directory::{Attributes, DirectoryEntry, FileChange, Filename, NUM_SLOTS, RootDirectory};
use crate::region::fat::AllocationTable;
use crate::types::{ClusterID, FileID, SectorID};

const FIXED_REGIONS: usize = 5;
pub const MAX_FILES: usize = NUM_SLOTS - 1;
const MAX_REGIONS: usize = FIXED_REGIONS + MAX_FILES;

/// Content source of a file region
pub enum FileContent<'a> {
    /// Reads as zero, writes are dropped
    Zero,
    /// Generated content of at most one sector
    Buffer(Vec<u8, SECTOR_SIZE>),
    /// Window onto device memory starting at `address`
    Memory { window: &'a dyn MemoryWindow, address: u32, length: u32 },
    /// Serves reads and receives region relative writes
    Stream(&'a dyn SectorSink),
}

impl<'a> FileContent<'a> {
    pub fn buffer(bytes: &[u8]) -> Self {
        let mut buffer = Vec::new();
        let size = min(bytes.len(), SECTOR_SIZE);
        // Cannot fail, length clipped to capacity
        let _ = buffer.extend_from_slice(&bytes[..size]);
        Self::Buffer(buffer)
    }

    fn read(&self, offset: u32, sectors: &mut [Sector]) {
        let buf = io::flatten_mut(sectors);
        match self {
            Self::Zero => (),
            Self::Buffer(bytes) => {
                if offset == 0 {
                    buf[..bytes.len()].copy_from_slice(bytes);
                }
            }
            Self::Memory { window, address, length } => {
                let start = offset.checked_mul(SECTOR_SIZE as u32).and_then(|offset| address.checked_add(offset));
                let (start, end) = match (start, address.checked_add(*length)) {
                    (Some(start), Some(end)) if start < end => (start, end),
                    _ => return,
                };
                let size = min(buf.len(), (end - start) as usize);
                if !window.read_memory(start, &mut buf[..size]) {
                    buf[..size].fill(0);
                }
            }
            Self::Stream(sink) => {
                sink.read(offset, buf);
            }
        }
    }

    fn write(&self, offset: u32, sectors: &[Sector]) {
        if let Self::Stream(sink) = self {
            sink.write(offset, io::flatten(sectors));
        }
    }
}

enum Content<'a> {
    Boot,
    Fat,
    RootDirectory,
    Zero,
    File(FileContent<'a>),
}

struct Region<'a> {
    content: Content<'a>,
    num_sectors: u32,
}

pub struct VirtualVolume<'a> {
    boot: BootSector,
    fat: AllocationTable,
    root: RootDirectory,
    regions: Vec<Region<'a>, MAX_REGIONS>,
    next_slot: usize,
}

impl<'a> VirtualVolume<'a> {
    pub fn new(label: Filename, capacity: u32) -> Self {
        let boot = BootSector::new(capacity, label);
        let fat_sectors = boot.sectors_per_fat as u32;
        let mut regions = Vec::new();
        let fixed = [
            (Content::Boot, 1),
            (Content::Fat, fat_sectors),
            (Content::Fat, fat_sectors),
            (Content::RootDirectory, 1),
            (Content::Zero, 1),
        ];
        for (content, num_sectors) in fixed {
            regions.push(Region { content, num_sectors }).ok();
        }
        debug!(
            "Volume {} with {} sectors, {:?} {} sectors per FAT",
            label, boot.total_sectors, boot.fat_type, boot.sectors_per_fat
        );
        Self {
            fat: AllocationTable::new(boot.fat_type),
            root: RootDirectory::new(label),
            boot,
            regions,
            next_slot: 1,
        }
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub fn geometry(&self) -> Geometry {
        self.boot.geometry()
    }

    pub fn num_sectors(&self) -> u32 {
        self.boot.total_sectors
    }

    pub fn total_size(&self) -> u64 {
        self.boot.total_size()
    }

    /// Register a file, must happen before any sector traffic.
    ///
    /// A contiguous cluster chain covering `size` bytes is allocated, a zero
    /// sized file gets no cluster at all.
    pub fn add_file(
        &mut self,
        name: Filename,
        attributes: Attributes,
        content: FileContent<'a>,
        size: u32,
    ) -> Result<FileID, VolumeError> {
        if !name.is_valid() {
            return Err(VolumeError::InvalidFilename);
        }
        if self.next_slot >= NUM_SLOTS {
            return Err(VolumeError::DirectoryFull);
        }
        if self.regions.is_full() {
            return Err(VolumeError::RegionTableFull);
        }
        if let FileContent::Memory { address, length, .. } = &content {
            if address.checked_add(*length).is_none() {
                return Err(VolumeError::MemoryWindow);
            }
        }
        let num_clusters = size.div_ceil(CLUSTER_SIZE);
        let first_cluster = match num_clusters {
            0 => ClusterID::default(),
            _ => self.fat.allocate(num_clusters)?,
        };
        let mut entry = DirectoryEntry::file(name, first_cluster, size);
        entry.attributes = attributes;
        let file = FileID(self.next_slot as u8);
        self.root.set_entry(file.slot(), &entry);
        self.next_slot += 1;

        let num_sectors = num_clusters * self.boot.sectors_per_cluster as u32;
        let region = Region { content: Content::File(content), num_sectors };
        self.regions.push(region).map_err(|_| VolumeError::RegionTableFull)?;
        debug!("File {} size {} on cluster {}", name, size, first_cluster);
        Ok(file)
    }

    pub fn set_attributes(&mut self, file: FileID, attributes: Attributes) {
        let mut entry = self.root.entry(file.slot());
        entry.attributes = attributes;
        self.root.set_entry(file.slot(), &entry);
    }

    pub fn entry(&self, file: FileID) -> DirectoryEntry {
        self.root.entry(file.slot())
    }

    pub fn find(&self, name: &Filename) -> Option<FileID> {
        self.root.find(name)
    }

    /// Files currently present in the root directory snapshot
    pub fn files(&self) -> impl Iterator<Item = (FileID, DirectoryEntry)> + '_ {
        (1..NUM_SLOTS).map(|slot| (FileID(slot as u8), self.root.entry(slot))).filter(|(_, entry)| {
            !entry.name.is_free() && !entry.name.is_deleted() && !entry.attributes.volume_label()
        })
    }

    /// First sector of the file data, none for an empty file
    pub fn start_sector(&self, entry: &DirectoryEntry) -> Option<SectorID> {
        let cluster = entry.first_cluster();
        if entry.size == 0 || !cluster.valid() {
            return None;
        }
        Some(self.geometry().cluster_to_sector(cluster))
    }

    pub fn read(&self, id: SectorID, sectors: &mut [Sector]) {
        trace!("Read sector {} count {}", id, sectors.len());
        sectors.iter_mut().for_each(|sector| sector.fill(0));
        let mut requested = u32::from(id);
        let mut remaining = sectors;
        let mut start = 0;
        for region in self.regions.iter() {
            if remaining.is_empty() {
                break;
            }
            let end = start + region.num_sectors;
            if requested >= start && requested < end {
                let count = min(end - requested, remaining.len() as u32);
                let (chunk, rest) = core::mem::take(&mut remaining).split_at_mut(count as usize);
                let offset = requested - start;
                match &region.content {
                    Content::Boot if offset == 0 => self.boot.serialize(&mut chunk[0]),
                    Content::Fat if offset == 0 => chunk[0].copy_from_slice(self.fat.as_sector()),
                    Content::RootDirectory if offset == 0 => chunk[0].copy_from_slice(self.root.as_sector()),
                    Content::File(content) => content.read(offset, chunk),
                    _ => (),
                }
                requested += count;
                remaining = rest;
            }
            start = end;
        }
    }

    /// Dispatch a sector write, root directory changes are reported through `on_change`
    pub fn write<F: FnMut(&FileChange)>(&mut self, id: SectorID, sectors: &[Sector], mut on_change: F) {
        trace!("Write sector {} count {}", id, sectors.len());
        let mut requested = u32::from(id);
        let mut remaining = sectors;
        let mut start = 0;
        for region in self.regions.iter() {
            if remaining.is_empty() {
                break;
            }
            let end = start + region.num_sectors;
            if requested >= start && requested < end {
                let count = min(end - requested, remaining.len() as u32);
                let (chunk, rest) = remaining.split_at(count as usize);
                let offset = requested - start;
                match &region.content {
                    Content::RootDirectory if offset == 0 => self.root.update(&chunk[0], &mut on_change),
                    Content::File(content) => content.write(offset, chunk),
                    _ => (),
                }
                requested += count;
                remaining = rest;
            }
            start = end;
        }
    }
}
