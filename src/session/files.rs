//! Read-only informational files regenerated on every mount.

use core::fmt::{self, Write};

use heapless::Vec;

use crate::config::{AssertRecord, Config, DeviceInfo, Role, Settings};
use crate::error::Error;
use crate::io::SECTOR_SIZE;
use crate::region::directory::Filename;

pub const DETAILS: Filename = Filename::new(b"DETAILS TXT");
pub const FAIL: Filename = Filename::new(b"FAIL    TXT");
pub const ASSERT: Filename = Filename::new(b"ASSERT  TXT");

pub const REDIRECT_TEMPLATE: &str = concat!(
    "<!doctype html>\r\n",
    "<!-- mbed Platform Website and Authentication Shortcut -->\r\n",
    "<html>\r\n",
    "<head>\r\n",
    "<meta charset=\"utf-8\">\r\n",
    "<title>mbed Website Shortcut</title>\r\n",
    "</head>\r\n",
    "<body>\r\n",
    "<script>\r\n",
    "window.location.replace(\"@R\");\r\n",
    "</script>\r\n",
    "</body>\r\n",
    "</html>\r\n",
);

/// File content of at most one sector
pub type Content = Vec<u8, SECTOR_SIZE>;

/// Truncates silently once the sector is full
struct Writer(Content);

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if self.0.push(byte).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn render(template: &str, info: &DeviceInfo, url: &str, nested: bool, writer: &mut Writer) {
    let mut chars = template.chars();
    while let Some(ch) = chars.next() {
        if ch != '@' {
            writer.write_char(ch).ok();
            continue;
        }
        let value = match chars.next().map(|ch| ch.to_ascii_uppercase()) {
            Some('M') => info.mac.as_str(),
            Some('U') => info.unique_id.as_str(),
            Some('B') => info.board_id.as_str(),
            Some('H') => info.host_id.as_str(),
            Some('T') => info.target_id.as_str(),
            Some('D') => info.hdk_id.as_str(),
            Some('V') => info.version.as_str(),
            // The URL carries tokens of its own
            Some('R') if !nested => {
                render(url, info, url, true, writer);
                continue;
            }
            _ => "ERROR",
        };
        writer.write_str(value).ok();
    }
}

/// Redirect page with `@`-tokens substituted
pub fn redirect_page(info: &DeviceInfo, url: &str) -> Content {
    let mut writer = Writer(Content::new());
    render(REDIRECT_TEMPLATE, info, url, false, &mut writer);
    writer.0
}

pub fn details(info: &DeviceInfo, config: &Config, settings: &Settings) -> Content {
    let mut w = Writer(Content::new());
    let mode = config.role.name();
    write!(w, "# DAPLink Firmware - see https://mbed.com/daplink\r\n").ok();
    write!(w, "Unique ID: {}\r\n", info.unique_id).ok();
    write!(w, "HDK ID: {}\r\n", info.hdk_id).ok();
    write!(w, "Auto Reset: {}\r\n", settings.auto_reset as u8).ok();
    write!(w, "Daplink Mode: {}\r\n", mode).ok();
    write!(w, "{} Version: {}\r\n", mode, info.version).ok();
    if let (Role::Interface, Some(version)) = (config.role, info.bootloader_version) {
        write!(w, "Bootloader Version: {:04}\r\n", version).ok();
    }
    if let (Role::Bootloader, Some(version)) = (config.role, info.interface_version) {
        write!(w, "Interface Version: {:04}\r\n", version).ok();
    }
    if let Some(crc) = info.bootloader_crc {
        write!(w, "Bootloader CRC: 0x{:08x}\r\n", crc).ok();
    }
    write!(w, "Interface CRC: 0x{:08x}\r\n", info.interface_crc).ok();
    w.0
}

pub fn failure(error: &Error) -> Content {
    let mut writer = Writer(Content::new());
    write!(writer, "{}\r\n", error).ok();
    writer.0
}

pub fn assertion(record: &AssertRecord) -> Content {
    let mut writer = Writer(Content::new());
    write!(writer, "Assert\r\nFile: {}\r\nLine: {}\r\n", record.file, record.line).ok();
    writer.0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::text;
    use crate::error::FlashError;

    fn info() -> DeviceInfo {
        DeviceInfo {
            unique_id: text("0240000032044e4500257009997b00386781000097969900"),
            hdk_id: text("0240"),
            board_id: text("0240"),
            version: text("0254"),
            target_id: text("0240000032044e45"),
            interface_crc: 0x1234ABCD,
            bootloader_version: Some(242),
            bootloader_crc: Some(0xDEADBEEF),
            ..Default::default()
        }
    }

    #[test]
    fn test_redirect_page() {
        let config = Config::default();
        let page = redirect_page(&info(), config.target_url);
        let page = core::str::from_utf8(&page).unwrap();
        let expected = concat!(
            "window.location.replace(\"https://mbed.org/device/",
            "?code=0240000032044e4500257009997b00386781000097969900",
            "?version=0254?target_id=0240000032044e45\");"
        );
        assert!(page.contains(expected));
        assert!(page.starts_with("<!doctype html>\r\n"));
        assert!(page.ends_with("</html>\r\n"));
    }

    #[test]
    fn test_redirect_tokens() {
        let mut writer = Writer(Content::new());
        render("@b-@h-@x-@R-@", &info(), "@r", false, &mut writer);
        assert_eq!(&writer.0[..], b"0240--ERROR-ERROR-ERROR");
    }

    #[test]
    fn test_truncated() {
        let url = "x".repeat(600);
        let page = redirect_page(&info(), &url);
        assert_eq!(page.len(), SECTOR_SIZE);
    }

    #[test]
    fn test_details() {
        let settings = Settings { auto_reset: true, ..Default::default() };
        let details = details(&info(), &Config::default(), &settings);
        let expected = concat!(
            "# DAPLink Firmware - see https://mbed.com/daplink\r\n",
            "Unique ID: 0240000032044e4500257009997b00386781000097969900\r\n",
            "HDK ID: 0240\r\n",
            "Auto Reset: 1\r\n",
            "Daplink Mode: Interface\r\n",
            "Interface Version: 0254\r\n",
            "Bootloader Version: 0242\r\n",
            "Bootloader CRC: 0xdeadbeef\r\n",
            "Interface CRC: 0x1234abcd\r\n",
        );
        assert_eq!(core::str::from_utf8(&details), Ok(expected));
    }

    #[test]
    fn test_failure() {
        let content = failure(&FlashError::BadCrc.into());
        assert_eq!(&content[..], b"The bootloader CRC did not pass.\r\n");
    }

    #[test]
    fn test_assertion() {
        let content = assertion(&AssertRecord::new("session.rs", 12));
        assert_eq!(&content[..], b"Assert\r\nFile: session.rs\r\nLine: 12\r\n");
    }
}
