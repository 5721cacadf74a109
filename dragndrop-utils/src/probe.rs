use dragndrop::config::text;
use dragndrop::io::{SECTOR_SIZE, Sector};
use dragndrop::region::directory::DirectoryEntry;
use dragndrop::{BlockDevice, Config, Control, DeviceInfo, FileStream, FlashDecoder, Layout, Platform};
use dragndrop::{ProtectedFlash, Role, Session, Settings};

use crate::hex::IntelHex;
use crate::ram::RamFlash;

/// Probe firmware area, bootloader below the interface
const PROBE_FLASH_SIZE: usize = 0x40000;
const PROBE_SECTOR_SIZE: u32 = 0x400;
const TARGET_PAGE_SIZE: u32 = 0x400;
const TARGET_SECTOR_SIZE: u32 = 0x1000;

/// Board actions are only logged
#[derive(Default)]
pub struct Board {
    pub resets: usize,
}

impl<'a> Platform<'a> for Board {
    fn system_reset(&mut self) {
        info!("System reset");
        self.resets += 1;
    }

    fn resume_target(&mut self) {
        info!("Resume target");
    }

    fn auto_reset_changed(&mut self, auto_reset: bool) {
        info!("Auto reset {}", auto_reset);
    }
}

pub type Stream = FileStream<RamFlash, ProtectedFlash<RamFlash>, IntelHex>;
pub type SimSession<'a> = Session<'a, Stream, Board>;

pub fn config(role: Role) -> Config {
    Config::new(role)
}

fn layout(config: &Config) -> Layout {
    let bootloader = config.identity.bootloader_start..config.identity.interface_start;
    let interface = config.identity.interface_start..PROBE_FLASH_SIZE as u32;
    let (app, update) = match config.role {
        Role::Interface => (interface, bootloader),
        Role::Bootloader => (bootloader, interface),
    };
    Layout {
        app,
        update,
        sector_size: PROBE_SECTOR_SIZE,
        min_write_size: PROBE_SECTOR_SIZE,
        role: config.role,
        fallback_vector_table: None,
    }
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        unique_id: text("0240000032044e4500257009997b00386781000097969900"),
        hdk_id: text("0240"),
        board_id: text("0240"),
        target_id: text("0240000032044e45"),
        version: text("0254"),
        bootloader_version: Some(254),
        interface_crc: 0,
        ..Default::default()
    }
}

/// Attached drive backed by RAM flash
pub fn session(control: &Control, config: Config, settings: Settings) -> SimSession<'_> {
    let target = &config.target;
    let flash_size = (target.flash_end - target.flash_start) as usize;
    let target = RamFlash::new(target.flash_start, flash_size, TARGET_PAGE_SIZE, TARGET_SECTOR_SIZE);
    let hal = RamFlash::new(0, PROBE_FLASH_SIZE, PROBE_SECTOR_SIZE, PROBE_SECTOR_SIZE);
    let probe = ProtectedFlash::new(hal, layout(&config));
    let stream = FileStream::new(FlashDecoder::new(target, probe, config), IntelHex::default());
    let mut session = Session::new(control, config, device_info(), settings, stream, Board::default());
    session.init(true);
    session
}

pub fn read_sectors(session: &mut SimSession, entry: &DirectoryEntry) -> Vec<u8> {
    let start = match session.volume().start_sector(entry) {
        Some(start) => start,
        None => return Vec::new(),
    };
    let num_sectors = (entry.size as usize).div_ceil(SECTOR_SIZE);
    let mut sectors: Vec<Sector> = vec![[0; SECTOR_SIZE]; num_sectors];
    session.read(start, &mut sectors);
    let mut bytes: Vec<u8> = sectors.into_iter().flatten().collect();
    bytes.truncate(entry.size as usize);
    bytes
}
