use core::fmt::{self, Display, Write};

use bitfield::bitfield;
#[cfg(feature = "chrono")]
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use derive_more::Into;

use crate::endian;
use crate::io::{SECTOR_SIZE, Sector};
use crate::types::{ClusterID, FileID};

pub const ENTRY_SIZE: usize = 32;
/// Entries backed by memory, the second root directory sector always reads as zero
pub const NUM_SLOTS: usize = SECTOR_SIZE / ENTRY_SIZE;

const DELETED: u8 = 0xE5;
const KANJI_E5: u8 = 0x05;
const INVALID_CHARS: [u8; 16] = hex!("22 2A 2B 2C 2E 2F 3A 3B 3C 3D 3E 3F 5B 5C 5D 7C");

bitfield! {
    #[derive(Copy, Clone, Default, Debug, Into, PartialEq, Eq)]
    pub struct Attributes(u8);
    pub read_only, set_read_only: 0;
    pub hidden, set_hidden: 1;
    pub system, set_system: 2;
    pub volume_label, set_volume_label: 3;
    pub directory, set_directory: 4;
    pub archive, set_archive: 5;
}

impl Attributes {
    pub const READ_ONLY: Self = Self(0x01);
    pub const HIDDEN: Self = Self(0x02);
    pub const SYSTEM: Self = Self(0x04);
    pub const VOLUME_LABEL: Self = Self(0x08);
    pub const DIRECTORY: Self = Self(0x10);
    pub const ARCHIVE: Self = Self(0x20);
}

impl core::ops::BitOr for Attributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, Debug, Into, PartialEq, Eq)]
    pub struct DosDate(u16);
    year_offset, set_year_offset: 15, 9;
    pub month, set_month: 8, 5;
    pub day, set_day: 4, 0;
}

impl DosDate {
    pub fn year(&self) -> u16 {
        self.year_offset() + 1980
    }

    pub fn set_year(&mut self, year: u16) {
        self.set_year_offset(year.saturating_sub(1980))
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, Debug, Into, PartialEq, Eq)]
    pub struct DosTime(u16);
    pub hour, set_hour: 15, 11;
    pub minute, set_minute: 10, 5;
    pub double_second, set_double_second: 4, 0;
}

impl DosTime {
    pub fn second(&self) -> u16 {
        self.double_second() * 2
    }

    pub fn set_second(&mut self, second: u16) {
        self.set_double_second(second / 2)
    }
}

#[cfg(feature = "chrono")]
pub fn to_datetime(date: DosDate, time: DosTime) -> Option<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(date.year() as i32, date.month() as u32, date.day() as u32)?;
    let (hour, minute, second) = (time.hour() as u32, time.minute() as u32, time.second() as u32);
    Some(NaiveDateTime::new(date, NaiveTime::from_hms_opt(hour, minute, second)?))
}

#[cfg(feature = "chrono")]
pub fn from_datetime(datetime: NaiveDateTime) -> (DosDate, DosTime) {
    let mut date = DosDate::default();
    date.set_year(datetime.year() as u16);
    date.set_month(datetime.month() as u16);
    date.set_day(datetime.day() as u16);
    let mut time = DosTime::default();
    time.set_hour(datetime.hour() as u16);
    time.set_minute(datetime.minute() as u16);
    time.set_second(datetime.second() as u16);
    (date, time)
}

/// Raw 8.3 name, 8 bytes of base name followed by 3 bytes of extension, space padded
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filename(pub [u8; 11]);

impl Filename {
    pub const fn new(bytes: &[u8; 11]) -> Self {
        Self(*bytes)
    }

    /// Convert `name.ext` into an 8.3 name, lowercase letters are uppercased
    pub fn parse(name: &str) -> Option<Self> {
        let (base, extension) = match name.rsplit_once('.') {
            Some((base, extension)) => (base, extension),
            None => (name, ""),
        };
        if base.is_empty() || base.len() > 8 || extension.len() > 3 {
            return None;
        }
        let mut bytes = [b' '; 11];
        for (dst, src) in bytes[..8].iter_mut().zip(base.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        for (dst, src) in bytes[8..].iter_mut().zip(extension.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        let filename = Self(bytes);
        filename.is_valid().then_some(filename)
    }

    pub fn base(&self) -> &[u8] {
        &self.0[..8]
    }

    pub fn extension(&self) -> &[u8] {
        &self.0[8..]
    }

    pub fn is_deleted(&self) -> bool {
        self.0[0] == DELETED
    }

    pub fn is_free(&self) -> bool {
        self.0[0] == 0
    }

    /// Whether the name would be accepted by a FAT driver as a short name
    pub fn is_valid(&self) -> bool {
        if matches!(self.0[0], DELETED | 0x00 | b' ') {
            return false;
        }
        self.0.iter().all(|&byte| valid_character(byte))
    }
}

fn valid_character(byte: u8) -> bool {
    if byte.is_ascii_lowercase() {
        return false;
    }
    if byte < 0x20 && byte != KANJI_E5 {
        return false;
    }
    !INVALID_CHARS.contains(&byte)
}

impl Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trim = |bytes: &[u8]| bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        let base = &self.0[..trim(self.base())];
        let extension = &self.extension()[..trim(self.extension())];
        for &byte in base {
            f.write_char(char::from(byte))?;
        }
        if !extension.is_empty() {
            f.write_char('.')?;
            for &byte in extension {
                f.write_char(char::from(byte))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: Filename,
    pub attributes: Attributes,
    pub reserved: u8,
    pub creation_time_ms: u8,
    pub creation_time: DosTime,
    pub creation_date: DosDate,
    pub access_date: DosDate,
    pub first_cluster_high: u16,
    pub modified_time: DosTime,
    pub modified_date: DosDate,
    pub first_cluster_low: u16,
    pub size: u32,
}

impl DirectoryEntry {
    pub fn volume_label(name: Filename) -> Self {
        Self {
            name,
            attributes: Attributes::VOLUME_LABEL | Attributes::ARCHIVE,
            modified_time: DosTime(0x8E41),
            modified_date: DosDate(0x32BB),
            ..Default::default()
        }
    }

    pub fn file(name: Filename, first_cluster: ClusterID, size: u32) -> Self {
        let mut entry = Self {
            name,
            attributes: Attributes::READ_ONLY,
            access_date: DosDate(0xBB32),
            modified_time: DosTime(0x83DC),
            modified_date: DosDate(0x34BB),
            size,
            ..Default::default()
        };
        entry.set_first_cluster(first_cluster);
        entry
    }

    pub fn first_cluster(&self) -> ClusterID {
        ClusterID::from((self.first_cluster_high as u32) << 16 | self.first_cluster_low as u32)
    }

    pub fn set_first_cluster(&mut self, cluster_id: ClusterID) {
        let cluster = u32::from(cluster_id);
        self.first_cluster_high = (cluster >> 16) as u16;
        self.first_cluster_low = cluster as u16;
    }

    #[cfg(feature = "chrono")]
    pub fn modified(&self) -> Option<NaiveDateTime> {
        to_datetime(self.modified_date, self.modified_time)
    }

    pub fn parse(bytes: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&bytes[..11]);
        Self {
            name: Filename(name),
            attributes: Attributes(bytes[11]),
            reserved: bytes[12],
            creation_time_ms: bytes[13],
            creation_time: DosTime(endian::read(bytes, 14)),
            creation_date: DosDate(endian::read(bytes, 16)),
            access_date: DosDate(endian::read(bytes, 18)),
            first_cluster_high: endian::read(bytes, 20),
            modified_time: DosTime(endian::read(bytes, 22)),
            modified_date: DosDate(endian::read(bytes, 24)),
            first_cluster_low: endian::read(bytes, 26),
            size: endian::read(bytes, 28),
        }
    }

    pub fn serialize(&self, bytes: &mut [u8]) {
        bytes[..11].copy_from_slice(&self.name.0);
        bytes[11] = self.attributes.0;
        bytes[12] = self.reserved;
        bytes[13] = self.creation_time_ms;
        endian::write(bytes, 14, self.creation_time.0);
        endian::write(bytes, 16, self.creation_date.0);
        endian::write(bytes, 18, self.access_date.0);
        endian::write(bytes, 20, self.first_cluster_high);
        endian::write(bytes, 22, self.modified_time.0);
        endian::write(bytes, 24, self.modified_date.0);
        endian::write(bytes, 26, self.first_cluster_low);
        endian::write(bytes, 28, self.size);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

/// Directory entry change detected on a root directory write
#[derive(Copy, Clone, Debug)]
pub struct FileChange {
    pub name: Filename,
    pub kind: ChangeKind,
    pub file: FileID,
    pub old: DirectoryEntry,
    pub new: DirectoryEntry,
}

/// In-memory snapshot of the first root directory sector, slot 0 holds the volume label
pub struct RootDirectory {
    sector: Sector,
}

impl RootDirectory {
    pub fn new(label: Filename) -> Self {
        let mut root = Self { sector: [0; SECTOR_SIZE] };
        root.set_entry(0, &DirectoryEntry::volume_label(label));
        root
    }

    pub fn as_sector(&self) -> &Sector {
        &self.sector
    }

    pub fn entry(&self, slot: usize) -> DirectoryEntry {
        DirectoryEntry::parse(&self.sector[slot * ENTRY_SIZE..])
    }

    pub(crate) fn set_entry(&mut self, slot: usize, entry: &DirectoryEntry) {
        entry.serialize(&mut self.sector[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE])
    }

    pub fn find(&self, name: &Filename) -> Option<FileID> {
        (1..NUM_SLOTS).find(|&slot| self.entry(slot).name == *name).map(|slot| FileID(slot as u8))
    }

    /// Compare an incoming directory sector against the snapshot slot by slot,
    /// reporting every difference, then adopt the incoming sector as is.
    pub fn update<F: FnMut(&FileChange)>(&mut self, sector: &Sector, mut on_change: F) {
        for slot in 1..NUM_SLOTS {
            let range = slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE;
            if self.sector[range.clone()] == sector[range.clone()] {
                continue;
            }
            let old = DirectoryEntry::parse(&self.sector[range.clone()]);
            let new = DirectoryEntry::parse(&sector[range]);
            trace!("Slot {} name {} attributes {:?} size {}", slot, new.name, new.attributes, new.size);
            let file = FileID(slot as u8);
            let mut change = FileChange { name: new.name, kind: ChangeKind::Changed, file, old, new };
            on_change(&change);

            if new.name.is_deleted() {
                change.name = old.name;
                change.kind = ChangeKind::Deleted;
                on_change(&change);
                continue;
            }

            if old.name != new.name && new.name.is_valid() {
                change.kind = ChangeKind::Created;
                on_change(&change);
            }
        }
        self.sector.copy_from_slice(sector);
    }
}
