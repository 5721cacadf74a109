//! Content decoders between raw file sectors and the flash decoder.

use crate::config::Config;
use crate::error::{Error, StreamError};
use crate::flash::decoder::{FlashDecoder, detect_type};
use crate::flash::validation::valid_hex_start;
use crate::flash::{FlashIntf, ImageType};
use crate::region::directory::Filename;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamType {
    Bin,
    Hex,
}

impl StreamType {
    pub fn from_name(name: &Filename) -> Option<Self> {
        match name.extension() {
            b"BIN" => Some(Self::Bin),
            b"HEX" => Some(Self::Hex),
            _ => None,
        }
    }
}

/// Successful outcome of a stream write
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    InProgress,
    /// End of stream reached
    Done,
    /// End of stream cannot be told, any point could be the end
    DoneOrContinue,
}

/// Content decoder contract consumed by the transfer session
pub trait Stream {
    /// Recognize the start of a stream from its first bytes
    fn identify(&self, data: &[u8]) -> Option<StreamType>;
    fn open(&mut self, stream_type: StreamType) -> Result<(), Error>;
    fn write(&mut self, data: &[u8]) -> Result<Progress, Error>;
    fn close(&mut self) -> Result<(), Error>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HexStatus {
    /// Whole input decoded
    Ok,
    /// Binary buffer filled or address discontinuity, parse the rest again
    Unaligned,
    /// End of file record reached
    Eof,
    ChecksumFail,
    Failure,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HexBlock {
    pub status: HexStatus,
    /// Input bytes consumed
    pub consumed: usize,
    /// Address of the first decoded byte
    pub address: u32,
    /// Decoded bytes placed into the binary buffer
    pub written: usize,
}

/// Incremental Intel HEX decoder, state carries over between calls
pub trait HexParser {
    fn reset(&mut self);
    fn parse(&mut self, data: &[u8], bin: &mut [u8]) -> HexBlock;
}

impl<H: HexParser + ?Sized> HexParser for &mut H {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn parse(&mut self, data: &[u8], bin: &mut [u8]) -> HexBlock {
        (**self).parse(data, bin)
    }
}

/// Identify by image content first, then by a leading hex record
pub fn identify(data: &[u8], config: &Config) -> Option<StreamType> {
    if detect_type(data, None, config) != ImageType::Unknown {
        return Some(StreamType::Bin);
    }
    match valid_hex_start(data) {
        true => Some(StreamType::Hex),
        false => None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    Error,
}

const BIN_BUFFER_SIZE: usize = 256;

/// Bin and hex streams feeding a [`FlashDecoder`]
pub struct FileStream<T, P, X> {
    decoder: FlashDecoder<T, P>,
    parser: X,
    state: State,
    stream_type: StreamType,
    bin: [u8; BIN_BUFFER_SIZE],
}

impl<T: FlashIntf, P: FlashIntf, X: HexParser> FileStream<T, P, X> {
    pub fn new(decoder: FlashDecoder<T, P>, parser: X) -> Self {
        Self { decoder, parser, state: State::Closed, stream_type: StreamType::Bin, bin: [0; BIN_BUFFER_SIZE] }
    }

    pub fn decoder(&self) -> &FlashDecoder<T, P> {
        &self.decoder
    }

    pub fn into_decoder(self) -> FlashDecoder<T, P> {
        self.decoder
    }

    fn write_bin(&mut self, data: &[u8]) -> Result<Progress, Error> {
        self.decoder.write(None, data)?;
        Ok(Progress::DoneOrContinue)
    }

    fn write_hex(&mut self, mut data: &[u8]) -> Result<Progress, Error> {
        loop {
            let block = self.parser.parse(data, &mut self.bin);
            let written = block.written.min(BIN_BUFFER_SIZE);
            if written > 0 && matches!(block.status, HexStatus::Ok | HexStatus::Unaligned | HexStatus::Eof) {
                trace!("Hex block {:#x} size {}", block.address, written);
                self.decoder.write(Some(block.address), &self.bin[..written])?;
            }
            match block.status {
                HexStatus::Ok => return Ok(Progress::InProgress),
                HexStatus::Eof => return Ok(Progress::Done),
                HexStatus::ChecksumFail => return Err(StreamError::HexChecksum.into()),
                HexStatus::Failure => return Err(StreamError::HexParser.into()),
                HexStatus::Unaligned => {
                    if block.consumed == 0 && written == 0 {
                        return Err(StreamError::HexParser.into());
                    }
                    data = data.get(block.consumed..).unwrap_or_default();
                }
            }
        }
    }
}

impl<T: FlashIntf, P: FlashIntf, X: HexParser> Stream for FileStream<T, P, X> {
    fn identify(&self, data: &[u8]) -> Option<StreamType> {
        identify(data, self.decoder.config())
    }

    fn open(&mut self, stream_type: StreamType) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::Internal);
        }
        if stream_type == StreamType::Hex {
            self.parser.reset();
        }
        self.bin.fill(0);
        self.decoder.open()?;
        debug!("Open {:?} stream", stream_type);
        self.stream_type = stream_type;
        self.state = State::Open;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<Progress, Error> {
        if self.state != State::Open {
            return Err(Error::Internal);
        }
        let result = match self.stream_type {
            StreamType::Bin => self.write_bin(data),
            StreamType::Hex => self.write_hex(data),
        };
        match result {
            Ok(Progress::InProgress | Progress::DoneOrContinue) => (),
            _ => self.state = State::Error,
        }
        result
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::Internal);
        }
        self.state = State::Closed;
        self.decoder.close()
    }
}
