use dragndrop::stream::{HexBlock, HexParser, HexStatus};

/// `:` + count, address, type, 255 data bytes and checksum as hex digits
const MAX_RECORD_CHARS: usize = (1 + 2 + 1 + 255 + 1) * 2;

struct Record {
    kind: u8,
    offset: u32,
    data: Vec<u8>,
}

fn nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

fn decode(chars: &[u8]) -> Result<Record, HexStatus> {
    if chars.len() % 2 != 0 {
        return Err(HexStatus::Failure);
    }
    let mut bytes = Vec::with_capacity(chars.len() / 2);
    for pair in chars.chunks(2) {
        let high = nibble(pair[0]).ok_or(HexStatus::Failure)?;
        let low = nibble(pair[1]).ok_or(HexStatus::Failure)?;
        bytes.push(high << 4 | low);
    }
    if bytes.len() < 5 || bytes.len() != bytes[0] as usize + 5 {
        return Err(HexStatus::Failure);
    }
    if bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte)) != 0 {
        return Err(HexStatus::ChecksumFail);
    }
    let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
    let data = bytes[4..bytes.len() - 1].to_vec();
    Ok(Record { kind: bytes[3], offset, data })
}

/// Intel HEX decoder keeping partial records across sectors
#[derive(Default)]
pub struct IntelHex {
    chars: Vec<u8>,
    in_record: bool,
    base: u32,
    eof: bool,
    /// Data record that did not fit into the previous block
    pending: Option<(u32, Vec<u8>)>,
}

impl HexParser for IntelHex {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn parse(&mut self, data: &[u8], bin: &mut [u8]) -> HexBlock {
        let mut block = HexBlock { status: HexStatus::Ok, consumed: 0, address: 0, written: 0 };
        if self.eof {
            block.status = HexStatus::Eof;
            return block;
        }
        if let Some((address, bytes)) = self.pending.take() {
            bin[..bytes.len()].copy_from_slice(&bytes);
            block.address = address;
            block.written = bytes.len();
        }
        for (index, &ch) in data.iter().enumerate() {
            block.consumed = index + 1;
            match ch {
                b':' => {
                    self.chars.clear();
                    self.in_record = true;
                }
                b'\r' | b'\n' if self.in_record => {
                    self.in_record = false;
                    let record = match decode(&self.chars) {
                        Ok(record) => record,
                        Err(status) => {
                            block.status = status;
                            return block;
                        }
                    };
                    match record.kind {
                        0x00 => {
                            let address = self.base.wrapping_add(record.offset);
                            if block.written == 0 {
                                block.address = address;
                            }
                            let end = block.written + record.data.len();
                            if address != block.address + block.written as u32 || end > bin.len() {
                                self.pending = Some((address, record.data));
                                block.status = HexStatus::Unaligned;
                                return block;
                            }
                            bin[block.written..end].copy_from_slice(&record.data);
                            block.written = end;
                        }
                        0x01 => {
                            self.eof = true;
                            block.status = HexStatus::Eof;
                            return block;
                        }
                        0x02 | 0x04 if record.data.len() == 2 => {
                            let value = u16::from_be_bytes([record.data[0], record.data[1]]) as u32;
                            self.base = match record.kind {
                                0x02 => value << 4,
                                _ => value << 16,
                            };
                        }
                        // Start addresses are meaningless for flash programming
                        0x03 | 0x05 => (),
                        _ => {
                            block.status = HexStatus::Failure;
                            return block;
                        }
                    }
                }
                _ if self.in_record => {
                    if self.chars.len() >= MAX_RECORD_CHARS {
                        block.status = HexStatus::Failure;
                        return block;
                    }
                    self.chars.push(ch);
                }
                _ => (),
            }
        }
        block
    }
}

#[cfg(test)]
pub(crate) mod test {
    use dragndrop::stream::{HexParser, HexStatus};

    use super::IntelHex;

    /// One record line with its checksum
    pub fn record(kind: u8, offset: u16, data: &[u8]) -> String {
        let mut bytes = vec![data.len() as u8];
        bytes.extend_from_slice(&offset.to_be_bytes());
        bytes.push(kind);
        bytes.extend_from_slice(data);
        let sum = bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
        bytes.push(sum.wrapping_neg());
        let digits: String = bytes.iter().map(|byte| format!("{:02X}", byte)).collect();
        format!(":{}\r\n", digits)
    }

    #[test]
    fn test_contiguous_records() {
        let text = record(0, 0, &[1; 16]) + &record(0, 0x10, &[2; 16]);
        let mut parser = IntelHex::default();
        let mut bin = [0u8; 256];
        let block = parser.parse(text.as_bytes(), &mut bin);
        assert_eq!(block.status, HexStatus::Ok);
        assert_eq!(block.consumed, text.len());
        assert_eq!(block.address, 0);
        assert_eq!(block.written, 32);
        assert_eq!(&bin[..16], &[1; 16]);
        assert_eq!(&bin[16..32], &[2; 16]);
    }

    #[test]
    fn test_record_split() {
        let text = record(0, 0x20, &[0x5A; 8]);
        let (head, tail) = text.as_bytes().split_at(7);
        let mut parser = IntelHex::default();
        let mut bin = [0u8; 256];
        let block = parser.parse(head, &mut bin);
        assert_eq!((block.status, block.consumed, block.written), (HexStatus::Ok, 7, 0));
        let block = parser.parse(tail, &mut bin);
        assert_eq!((block.status, block.address, block.written), (HexStatus::Ok, 0x20, 8));
        assert_eq!(&bin[..8], &[0x5A; 8]);
    }

    #[test]
    fn test_discontinuity() {
        let first = record(0, 0, &[1; 16]);
        let text = first.clone() + &record(0, 0x100, &[2; 16]) + &record(0, 0x110, &[3; 16]);
        let mut parser = IntelHex::default();
        let mut bin = [0u8; 256];
        let block = parser.parse(text.as_bytes(), &mut bin);
        assert_eq!(block.status, HexStatus::Unaligned);
        assert_eq!((block.address, block.written), (0, 16));
        assert_eq!(block.consumed, first.len() * 2);

        let block = parser.parse(&text.as_bytes()[block.consumed..], &mut bin);
        assert_eq!(block.status, HexStatus::Ok);
        assert_eq!((block.address, block.written), (0x100, 32));
        assert_eq!(&bin[..16], &[2; 16]);
        assert_eq!(&bin[16..32], &[3; 16]);
    }

    #[test]
    fn test_extended_address() {
        let text = record(4, 0, &[0x08, 0x00]) + &record(0, 0x0400, &[7; 4]) + &record(2, 0, &[0x10, 0x00]);
        let text = text + &record(0, 0x0010, &[9; 4]);
        let mut parser = IntelHex::default();
        let mut bin = [0u8; 256];
        let block = parser.parse(text.as_bytes(), &mut bin);
        assert_eq!(block.status, HexStatus::Unaligned);
        assert_eq!((block.address, block.written), (0x0800_0400, 4));
        let block = parser.parse(&text.as_bytes()[block.consumed..], &mut bin);
        assert_eq!((block.status, block.address, block.written), (HexStatus::Ok, 0x1_0010, 4));
    }

    #[test]
    fn test_end_of_file() {
        let text = record(0, 0, &[1; 4]) + &record(5, 0, &[0, 0, 1, 0]) + &record(1, 0, &[]);
        let mut parser = IntelHex::default();
        let mut bin = [0u8; 256];
        let block = parser.parse(text.as_bytes(), &mut bin);
        assert_eq!((block.status, block.written), (HexStatus::Eof, 4));
        assert_eq!(parser.parse(b":00000001FF\r\n", &mut bin).status, HexStatus::Eof);
        parser.reset();
        assert_eq!(parser.parse(b"", &mut bin).status, HexStatus::Ok);
    }

    #[test]
    fn test_bad_records() {
        let mut bin = [0u8; 256];
        let mut text = record(0, 0, &[1; 4]);
        text.replace_range(text.len() - 4..text.len() - 2, "00");
        assert_eq!(IntelHex::default().parse(text.as_bytes(), &mut bin).status, HexStatus::ChecksumFail);

        let text = record(6, 0, &[1; 4]);
        assert_eq!(IntelHex::default().parse(text.as_bytes(), &mut bin).status, HexStatus::Failure);
        assert_eq!(IntelHex::default().parse(b":0G\r\n", &mut bin).status, HexStatus::Failure);
    }
}
