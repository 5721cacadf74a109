use crate::config::{Identity, TargetMemory};
use crate::endian;

use super::ImageType;

/// Vector table sanity check: initial stack pointer inside target RAM,
/// reset, NMI and HardFault handlers inside target flash. Bounds are inclusive,
/// the initial stack pointer usually equals the end of RAM.
pub fn valid_vector_table(data: &[u8], target: &TargetMemory) -> bool {
    if data.len() < 16 {
        return false;
    }
    let stack_pointer: u32 = endian::read(data, 0);
    if stack_pointer < target.ram_start || stack_pointer > target.ram_end {
        return false;
    }
    (4..16).step_by(4).all(|offset| {
        let vector: u32 = endian::read(data, offset);
        vector >= target.flash_start && vector <= target.flash_end
    })
}

/// Classify by the build identity header, none if the header belongs to another board
pub fn identify_image(data: &[u8], identity: &Identity) -> Option<ImageType> {
    let offset = Identity::INFO_OFFSET;
    if data.len() < offset + 8 {
        return None;
    }
    let build_key: u32 = endian::read(data, offset);
    let hdk_id: u32 = endian::read(data, offset + 4);
    if hdk_id != identity.hdk_id {
        return None;
    }
    Some(match build_key {
        key if key == identity.build_key_interface => ImageType::Interface,
        key if key == identity.build_key_bootloader => ImageType::Bootloader,
        _ => ImageType::Unknown,
    })
}

/// Intel HEX record start: a colon, a hex encoded record header and a known record type
pub fn valid_hex_start(data: &[u8]) -> bool {
    if data.len() < 9 || data[0] != b':' {
        return false;
    }
    if !data[1..9].iter().all(u8::is_ascii_hexdigit) {
        return false;
    }
    data[7] == b'0' && matches!(data[8], b'0' | b'2'..=b'5')
}

#[cfg(test)]
mod test {
    use super::*;

    const TARGET: TargetMemory =
        TargetMemory { flash_start: 0, flash_end: 0x10_0000, ram_start: 0x1FFF_0000, ram_end: 0x2003_0000 };

    #[test]
    fn test_vector_table() {
        let table = hex!("00 00 03 20 C1 04 00 00 15 05 00 00 17 05 00 00");
        assert!(valid_vector_table(&table, &TARGET));
        let table = hex!("00 00 03 20 C1 04 00 00 15 05 00 00 FF FF FF FF");
        assert!(!valid_vector_table(&table, &TARGET));
        let table = hex!("FF FF FF FF C1 04 00 00 15 05 00 00 17 05 00 00");
        assert!(!valid_vector_table(&table, &TARGET));
        assert!(!valid_vector_table(&[0xFF; 64], &TARGET));
    }

    #[test]
    fn test_identify_image() {
        let identity = Identity::default();
        let mut image = [0u8; 64];
        image[0x20..0x28].copy_from_slice(&hex!("8F 9E 93 9B 00 00 6C 64"));
        assert_eq!(identify_image(&image, &identity), Some(ImageType::Interface));
        image[0x20..0x24].copy_from_slice(&hex!("93 9D 93 9B"));
        assert_eq!(identify_image(&image, &identity), Some(ImageType::Bootloader));
        image[0x20..0x24].copy_from_slice(&hex!("00 00 00 00"));
        assert_eq!(identify_image(&image, &identity), Some(ImageType::Unknown));
        image[0x24] = 1;
        assert_eq!(identify_image(&image, &identity), None);
    }

    #[test]
    fn test_hex_start() {
        assert!(valid_hex_start(b":020000040000FA\r\n"));
        assert!(valid_hex_start(b":10000000000003200D0100000F0100000F01000042\r\n"));
        assert!(!valid_hex_start(b":10000006"));
        assert!(!valid_hex_start(b";020000040000FA"));
        assert!(!valid_hex_start(b":0200"));
    }
}
