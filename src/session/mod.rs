//! Mount session of the virtual drive.
//!
//! A [`Session`] owns the [`VirtualVolume`] together with the [`Transfer`]
//! tracker and rebuilds both wholesale whenever the drive is (re)attached.
//! Directory entry changes and raw sector writes reported by the volume drive
//! the transfer, which is completed by remounting the drive: the regenerated
//! drive is the only way of telling the host about the result.

pub mod control;
pub mod files;
pub mod transfer;

use heapless::Vec;

use crate::config::{AssertRecord, Config, DeviceInfo, Role, Settings};
use crate::error::{Error, VolumeError};
use crate::io::{self, BlockDevice, Sector};
use crate::region::directory::{Attributes, ChangeKind, FileChange, Filename, NUM_SLOTS};
use crate::stream::{Stream, StreamType};
use crate::types::SectorID;
use crate::volume::{FileContent, VirtualVolume};

pub use control::{Connection, Control};
pub use transfer::Transfer;

const AUTO_RESET: Filename = Filename::new(b"AUTO_RSTCFG");
const HARD_RESET: Filename = Filename::new(b"HARD_RSTCFG");
const ASSERT_ACTION: Filename = Filename::new(b"ASSERT  ACT");
const REFRESH_ACTION: Filename = Filename::new(b"REFRESH ACT");

/// Board actions and board specific files
pub trait Platform<'a> {
    fn system_reset(&mut self);
    fn resume_target(&mut self) {}
    /// Add board specific files after the informational ones
    fn build_filesystem(&mut self, _volume: &mut VirtualVolume<'a>) -> Result<(), VolumeError> {
        Ok(())
    }
    /// Persist the auto reset setting
    fn auto_reset_changed(&mut self, _auto_reset: bool) {}
}

pub struct Session<'a, S, P> {
    control: &'a Control,
    config: Config,
    info: DeviceInfo,
    settings: Settings,
    volume: VirtualVolume<'a>,
    transfer: Transfer,
    stream: S,
    platform: P,
    result: Result<(), Error>,
    media_ready: bool,
}

impl<'a, S: Stream, P: Platform<'a>> Session<'a, S, P> {
    /// Drive starts detached, see [`Session::init`]
    pub fn new(control: &'a Control, config: Config, info: DeviceInfo, settings: Settings, stream: S, platform: P) -> Self {
        let volume = VirtualVolume::new(config.drive_name, config.disk_size);
        let mut session = Self {
            control,
            config,
            info,
            settings,
            volume,
            transfer: Transfer::default(),
            stream,
            platform,
            result: Ok(()),
            media_ready: false,
        };
        session.build_filesystem();
        control.force(Connection::Disconnected);
        session
    }

    /// Attach or detach immediately, without delay
    pub fn init(&mut self, enable: bool) {
        self.build_filesystem();
        let connection = match enable {
            true => Connection::Connected,
            false => Connection::Disconnected,
        };
        self.control.force(connection);
        self.media_ready = enable;
    }

    pub fn volume(&self) -> &VirtualVolume<'a> {
        &self.volume
    }

    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// Result of the last transfer, shown as `FAIL.TXT` when failed
    pub fn result(&self) -> Result<(), Error> {
        self.result
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn is_media_ready(&self) -> bool {
        self.media_ready
    }

    pub fn into_parts(self) -> (S, P) {
        (self.stream, self.platform)
    }

    /// Record a firmware assertion, shown as `ASSERT.TXT` from the next mount on
    pub fn record_assert(&mut self, file: &str, line: u32) {
        warn!("Assertion at {}:{}", file, line);
        self.settings.assert = Some(AssertRecord::new(file, line));
    }

    fn populate(&mut self, volume: &mut VirtualVolume<'a>) -> Result<(), VolumeError> {
        let read_only = Attributes::READ_ONLY;
        let add = |volume: &mut VirtualVolume<'a>, name, content: files::Content| {
            let size = content.len() as u32;
            volume.add_file(name, read_only, FileContent::Buffer(content), size).map(|_| ())
        };
        add(volume, self.config.url_file_name, files::redirect_page(&self.info, self.config.target_url))?;
        add(volume, files::DETAILS, files::details(&self.info, &self.config, &self.settings))?;
        if let Err(error) = &self.result {
            add(volume, files::FAIL, files::failure(error))?;
        }
        if let Some(record) = &self.settings.assert {
            add(volume, files::ASSERT, files::assertion(record))?;
        }
        self.platform.build_filesystem(volume)
    }

    fn build_filesystem(&mut self) {
        self.transfer = Transfer::default();
        let mut volume = VirtualVolume::new(self.config.drive_name, self.config.disk_size);
        if let Err(error) = self.populate(&mut volume) {
            warn!("Incomplete volume: {}", error);
        }
        self.volume = volume;
    }

    /// Adopt a new transfer result, any update restarts the remount countdown
    fn apply(&mut self, outcome: Option<Result<(), Error>>) {
        if let Some(result) = outcome {
            self.result = result;
        }
        self.control.remount();
    }

    fn file_changed(&mut self, change: &FileChange) {
        trace!("{:?} {}", change.kind, change.name);
        match change.kind {
            ChangeKind::Changed => {
                if self.transfer.file() != Some(change.file) {
                    return;
                }
                let sector = self.volume.start_sector(&change.new);
                let stream_type = StreamType::from_name(&change.name);
                let outcome = self.transfer.update_file_info(change.file, sector, change.new.size, stream_type);
                self.apply(outcome);
            }
            ChangeKind::Created => match change.name {
                name if name == self.config.mode_file() => {
                    if self.config.role == Role::Interface {
                        self.settings.hold_in_bootloader = true;
                    }
                    self.control.remount();
                }
                AUTO_RESET | HARD_RESET => {
                    let auto_reset = change.name == AUTO_RESET;
                    self.settings.auto_reset = auto_reset;
                    self.platform.auto_reset_changed(auto_reset);
                    self.control.remount();
                }
                ASSERT_ACTION => self.record_assert(file!(), line!()),
                REFRESH_ACTION => self.control.remount(),
                name => {
                    if let Some(stream_type) = StreamType::from_name(&name) {
                        let sector = self.volume.start_sector(&change.new);
                        let size = change.new.size;
                        let outcome = self.transfer.update_file_info(change.file, sector, size, Some(stream_type));
                        self.apply(outcome);
                    }
                }
            },
            ChangeKind::Deleted => {
                if change.name == files::ASSERT {
                    self.settings.assert = None;
                }
            }
        }
    }

    fn file_data(&mut self, id: SectorID, sectors: &[Sector]) {
        let data = io::flatten(sectors);
        if !self.transfer.is_stream_open() {
            if let Some(stream_type) = self.stream.identify(data) {
                let result = self.stream.open(stream_type);
                let outcome = self.transfer.update_stream_open(stream_type, id, result);
                self.apply(outcome);
            }
        }
        if !self.transfer.accepts(id) {
            if self.transfer.is_stream_open() && !self.transfer.is_finished() {
                trace!("Sector {} dropped", id);
            }
            return;
        }
        let result = self.stream.write(data);
        let outcome = self.transfer.update_stream_data(id, sectors.len() as u32, result);
        self.apply(outcome);
    }

    /// Drive the connection timers, to be called periodically from the USB context
    pub fn periodic(&mut self, elapsed_ms: u32) {
        let (previous, current) = match self.control.tick(elapsed_ms) {
            Some(transition) => transition,
            None => return,
        };

        if previous == Connection::Connected {
            if self.transfer.close_stream() {
                let result = self.stream.close();
                if self.result.is_ok() {
                    self.result = result;
                }
                debug!("Stream closed, result {:?}", self.result);
            }
            if self.config.role == Role::Bootloader && self.result.is_ok() {
                self.platform.system_reset();
            }
            if self.config.role == Role::Interface && self.settings.hold_in_bootloader {
                self.platform.system_reset();
            }
            if self.settings.auto_reset {
                self.platform.resume_target();
            }
        }

        self.media_ready = current == Connection::Connected;
        if self.media_ready {
            self.build_filesystem();
        }
    }
}

impl<'a, S: Stream, P: Platform<'a>> BlockDevice for Session<'a, S, P> {
    fn num_sectors(&self) -> u32 {
        self.volume.num_sectors()
    }

    fn read(&mut self, id: SectorID, sectors: &mut [Sector]) {
        if !self.media_ready {
            return;
        }
        self.volume.read(id, sectors);
    }

    fn write(&mut self, id: SectorID, sectors: &[Sector]) {
        if !self.media_ready {
            return;
        }
        // Keep the drive attached while data is flowing
        self.control.restart_disconnect_delay();
        if self.transfer.is_finished() {
            return;
        }
        let mut changes: Vec<FileChange, { NUM_SLOTS * 2 }> = Vec::new();
        self.volume.write(id, sectors, |change| {
            changes.push(*change).ok();
        });
        for change in changes.iter() {
            self.file_changed(change);
        }
        self.file_data(id, sectors);
    }
}
