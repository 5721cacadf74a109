use std::fs;

use chrono::Local;
use derive_more::Display;
use dragndrop::io::{SECTOR_SIZE, Sector};
use dragndrop::region::boot::CLUSTER_SIZE;
use dragndrop::region::directory::{Attributes, DirectoryEntry, ENTRY_SIZE, NUM_SLOTS, from_datetime};
use dragndrop::session::files::FAIL;
use dragndrop::types::ClusterID;
use dragndrop::{BlockDevice, Connection, Control, Filename};

use super::Error;
use crate::list;
use crate::probe::{self, SimSession};

const TICK_MS: u32 = 100;
/// Longest remount including the reconnect delay
const MAX_TICKS: usize = 100;

#[derive(Copy, Clone, Debug, Display)]
enum Outcome {
    #[display("programmed")]
    Programmed,
    #[display("failed")]
    Failed,
}

pub struct Options<'a> {
    pub path: &'a str,
    pub directory_first: bool,
    pub output: Option<&'a str>,
}

/// First cluster after every file already on the drive
fn free_cluster(session: &SimSession) -> ClusterID {
    let next = session.volume().files().map(|(_, entry)| {
        let first = u32::from(entry.first_cluster());
        first + entry.size.div_ceil(CLUSTER_SIZE)
    });
    ClusterID::from(next.max().unwrap_or(2).max(2))
}

fn write_entry(session: &mut SimSession, entry: &DirectoryEntry) -> Result<(), Error> {
    let root_id = session.volume().geometry().root_offset;
    let mut root: [Sector; 1] = [[0; SECTOR_SIZE]];
    session.read(root_id, &mut root);
    let slot = (1..NUM_SLOTS).find(|&slot| root[0][slot * ENTRY_SIZE] == 0).ok_or(Error::DirectoryFull)?;
    entry.serialize(&mut root[0][slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE]);
    session.write(root_id, &root);
    Ok(())
}

fn write_data(session: &mut SimSession, cluster: ClusterID, bytes: &[u8]) {
    let start = session.volume().geometry().cluster_to_sector(cluster);
    for (index, chunk) in bytes.chunks(SECTOR_SIZE).enumerate() {
        let mut sector: [Sector; 1] = [[0; SECTOR_SIZE]];
        sector[0][..chunk.len()].copy_from_slice(chunk);
        session.write(start + index as u32, &sector);
    }
}

/// Wait for the drive to detach and attach again
fn remount(session: &mut SimSession, control: &Control) -> Result<(), Error> {
    let mut detached = false;
    for _ in 0..MAX_TICKS {
        session.periodic(TICK_MS);
        detached |= !session.is_media_ready();
        if detached && control.connection() == Connection::Connected {
            return Ok(());
        }
    }
    Err(Error::NoRemount)
}

pub fn drop(control: &Control, mut session: SimSession, options: Options) -> Result<(), Error> {
    let bytes = fs::read(options.path)?;
    let name = std::path::Path::new(options.path).file_name().and_then(|name| name.to_str()).unwrap_or_default();
    let filename = Filename::parse(name).ok_or_else(|| Error::InvalidName(name.into()))?;
    let size = u32::try_from(bytes.len()).map_err(|_| Error::TooLarge)?;
    if size as u64 > session.volume().total_size() {
        return Err(Error::TooLarge);
    }

    let cluster = free_cluster(&session);
    let mut entry = DirectoryEntry::file(filename, cluster, size);
    entry.attributes = Attributes::ARCHIVE;
    let (date, time) = from_datetime(Local::now().naive_local());
    entry.modified_date = date;
    entry.modified_time = time;
    info!("Drop {} size {} on cluster {}", filename, size, cluster);

    if options.directory_first {
        write_entry(&mut session, &entry)?;
        write_data(&mut session, cluster, &bytes);
    } else {
        write_data(&mut session, cluster, &bytes);
        write_entry(&mut session, &entry)?;
    }
    remount(&mut session, control)?;

    let outcome = match session.result() {
        Ok(()) => Outcome::Programmed,
        Err(_) => Outcome::Failed,
    };
    println!("{} {}", filename, outcome);
    list::print(session.volume());
    if let Some(file) = session.volume().find(&FAIL) {
        let entry = session.volume().entry(file);
        print!("{}", String::from_utf8_lossy(&probe::read_sectors(&mut session, &entry)));
    }

    let (stream, board) = session.into_parts();
    debug!("{} system resets", board.resets);
    let (target, protected) = stream.into_decoder().into_parts();
    let probe_image = protected.hal().used();
    if !probe_image.is_empty() {
        debug!("Probe flash holds {} bytes", probe_image.len());
    }
    if let Some(output) = options.output {
        fs::write(output, target.used())?;
        info!("Target flash written to {}", output);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use dragndrop::region::directory::DirectoryEntry;
    use dragndrop::{Control, Filename, Role, Settings};

    use super::{free_cluster, remount, write_data, write_entry};
    use crate::hex::test::record;
    use crate::probe;

    /// Vector table followed by a few instructions
    fn firmware() -> Vec<u8> {
        let mut image = vec![0x00, 0x00, 0x03, 0x20, 0xC1, 0x04, 0x00, 0x00];
        image.extend_from_slice(&[0x15, 0x05, 0x00, 0x00, 0x17, 0x05, 0x00, 0x00]);
        image.extend((0..80).map(|i| i as u8));
        image
    }

    #[test]
    fn test_hex_file_programs_target() {
        let image = firmware();
        let mut text = String::new();
        for (index, chunk) in image.chunks(16).enumerate() {
            text += &record(0, index as u16 * 16, chunk);
        }
        text += &record(1, 0, &[]);

        let config = probe::config(Role::Interface);
        let control = Control::new(&config);
        let mut session = probe::session(&control, config, Settings::default());
        let cluster = free_cluster(&session);
        let entry = DirectoryEntry::file(Filename::new(b"FIRMWAREHEX"), cluster, text.len() as u32);
        write_entry(&mut session, &entry).unwrap();
        write_data(&mut session, cluster, text.as_bytes());
        remount(&mut session, &control).unwrap();

        assert_eq!(session.result(), Ok(()));
        assert!(session.volume().find(&super::FAIL).is_none());
        let (stream, board) = session.into_parts();
        assert_eq!(board.resets, 0);
        let (target, _) = stream.into_decoder().into_parts();
        assert_eq!(target.used(), &image[..]);
    }
}
