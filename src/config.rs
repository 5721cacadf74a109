use core::ops::Range;

use heapless::String;

use crate::region::directory::Filename;

pub const MIB: u32 = 1024 * 1024;
/// Re-enumeration needs the drive to stay detached for longer than this
const MIN_RECONNECT_DELAY_MS: u32 = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Probe firmware serving the target, may update the bootloader
    Interface,
    /// Probe bootloader, may update the interface firmware
    Bootloader,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Self::Interface => "Interface",
            Self::Bootloader => "Bootloader",
        }
    }

    /// Dropping a file with this name switches to the other role
    pub fn mode_file(self) -> Filename {
        match self {
            Self::Interface => Filename::new(b"START_BLACT"),
            Self::Bootloader => Filename::new(b"START_IFACT"),
        }
    }
}

/// Build identity embedded in probe firmware images at [`Identity::INFO_OFFSET`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub hdk_id: u32,
    pub build_key_interface: u32,
    pub build_key_bootloader: u32,
    /// Where a bootloader image must be placed
    pub bootloader_start: u32,
    /// Where an interface image must be placed
    pub interface_start: u32,
}

impl Identity {
    pub const INFO_OFFSET: usize = 0x20;
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            hdk_id: 0x646C_0000,
            build_key_interface: 0x9B93_9E8F,
            build_key_bootloader: 0x9B93_9D93,
            bootloader_start: 0x0000_0000,
            interface_start: 0x0000_5000,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetMemory {
    pub flash_start: u32,
    pub flash_end: u32,
    pub ram_start: u32,
    pub ram_end: u32,
}

impl TargetMemory {
    pub fn flash(&self) -> Range<u32> {
        self.flash_start..self.flash_end
    }

    pub fn ram(&self) -> Range<u32> {
        self.ram_start..self.ram_end
    }
}

impl Default for TargetMemory {
    fn default() -> Self {
        Self { flash_start: 0, flash_end: 0x10_0000, ram_start: 0x1FFF_0000, ram_end: 0x2003_0000 }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub drive_name: Filename,
    /// Capacity of the virtual drive, at least 4 times the largest target flash so hex files fit
    pub disk_size: u32,
    pub url_file_name: Filename,
    /// Redirect target, `@`-tokens are expanded
    pub target_url: &'static str,
    pub connect_delay_ms: u32,
    pub disconnect_delay_ms: u32,
    reconnect_delay_ms: u32,
    pub role: Role,
    pub identity: Identity,
    pub target: TargetMemory,
}

impl Config {
    /// Defaults for a build running as `role`
    pub fn new(role: Role) -> Self {
        Self { role, ..Default::default() }
    }

    pub fn reconnect_delay_ms(&self) -> u32 {
        self.reconnect_delay_ms
    }

    pub fn set_reconnect_delay_ms(&mut self, delay_ms: u32) {
        self.reconnect_delay_ms = delay_ms.max(MIN_RECONNECT_DELAY_MS + 1);
    }

    pub fn mode_file(&self) -> Filename {
        self.role.mode_file()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drive_name: Filename::new(b"DAPLINK    "),
            disk_size: 8 * MIB,
            url_file_name: Filename::new(b"MBED    HTM"),
            target_url: "https://mbed.org/device/?code=@U?version=@V?target_id=@T",
            connect_delay_ms: 0,
            disconnect_delay_ms: 500,
            reconnect_delay_ms: 1100,
            role: Role::Interface,
            identity: Identity::default(),
            target: TargetMemory::default(),
        }
    }
}

pub type Text = String<48>;

/// Truncating conversion, device strings never fail to render
pub fn text(value: &str) -> Text {
    let mut text = Text::new();
    for ch in value.chars() {
        if text.push(ch).is_err() {
            break;
        }
    }
    text
}

/// Strings and versions rendered into the informational files
#[derive(Clone, Debug, Default)]
pub struct DeviceInfo {
    pub unique_id: Text,
    pub hdk_id: Text,
    pub board_id: Text,
    pub host_id: Text,
    pub target_id: Text,
    pub mac: Text,
    pub version: Text,
    pub bootloader_version: Option<u32>,
    pub interface_version: Option<u32>,
    pub bootloader_crc: Option<u32>,
    pub interface_crc: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertRecord {
    pub file: String<64>,
    pub line: u16,
}

impl AssertRecord {
    pub fn new(file: &str, line: u32) -> Self {
        let mut record = Self { file: String::new(), line: line as u16 };
        // Keep the tail, it carries the file name
        let skip = file.len().saturating_sub(record.file.capacity());
        let tail = file.get(skip..).unwrap_or_default();
        for ch in tail.chars() {
            if record.file.push(ch).is_err() {
                break;
            }
        }
        record
    }
}

/// Runtime settings surviving remounts
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub auto_reset: bool,
    pub hold_in_bootloader: bool,
    pub assert: Option<AssertRecord>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reconnect_delay() {
        let mut config = Config::default();
        assert_eq!(config.reconnect_delay_ms(), 1100);
        config.set_reconnect_delay_ms(200);
        assert_eq!(config.reconnect_delay_ms(), 1001);
    }

    #[test]
    fn test_new() {
        let config = Config::new(Role::Bootloader);
        assert_eq!(config.role, Role::Bootloader);
        assert_eq!(config.reconnect_delay_ms(), 1100);
        assert_eq!(config.mode_file(), Filename::new(b"START_IFACT"));
    }

    #[test]
    fn test_assert_record() {
        let record = AssertRecord::new("src/session/mod.rs", 42);
        assert_eq!(record.file.as_str(), "src/session/mod.rs");
        let long = "a/".repeat(40) + "file.rs";
        let record = AssertRecord::new(&long, 7);
        assert_eq!(record.file.len(), 64);
        assert!(record.file.ends_with("file.rs"));
    }

    #[test]
    fn test_text() {
        assert_eq!(text("0240").as_str(), "0240");
        assert_eq!(text(&"x".repeat(100)).len(), 48);
    }
}
