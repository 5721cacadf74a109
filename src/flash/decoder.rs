use crate::config::{Config, Role};
use crate::error::{DecoderError, Error};

use super::manager::FlashManager;
use super::validation::{identify_image, valid_vector_table};
use super::{FlashIntf, ImageType};

/// Bytes buffered before an image can be classified
pub const MIN_SIZE: usize = 0x40;

/// Classification in priority order: build identity header, target vector table,
/// then any image carrying an explicit address is taken as a target image
pub fn detect_type(data: &[u8], address: Option<u32>, config: &Config) -> ImageType {
    if let Some(image_type) = identify_image(data, &config.identity) {
        return image_type;
    }
    if valid_vector_table(data, &config.target) {
        return ImageType::Target;
    }
    match address {
        Some(_) => ImageType::Target,
        None => ImageType::Unknown,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Backend {
    Target,
    Probe,
}

/// Resolve backend and base address for an image type
fn select_backend(image_type: ImageType, address: Option<u32>, config: &Config) -> Result<(u32, Backend), Error> {
    let identity = &config.identity;
    let (start, error) = match (image_type, config.role) {
        (ImageType::Target, _) => return Ok((config.target.flash_start, Backend::Target)),
        (ImageType::Bootloader, Role::Interface) => (identity.bootloader_start, DecoderError::BootloaderAddress),
        (ImageType::Interface, Role::Bootloader) => (identity.interface_start, DecoderError::InterfaceAddress),
        _ => return Err(DecoderError::UnsupportedUpdate.into()),
    };
    match address {
        Some(address) if address != start => Err(error.into()),
        _ => Ok((start, Backend::Probe)),
    }
}

/// Classifies an inbound image and routes it to the target or probe flash
pub struct FlashDecoder<T, P> {
    target: T,
    probe: P,
    config: Config,
    manager: FlashManager,
    state: State,
    buffer: [u8; MIN_SIZE],
    buffered: usize,
    initial_address: Option<u32>,
    current_address: u32,
    /// Addresses supplied by the caller are absolute, otherwise stream offsets
    absolute: bool,
    next_offset: u32,
    backend: Option<Backend>,
    base: u32,
}

impl<T: FlashIntf, P: FlashIntf> FlashDecoder<T, P> {
    pub fn new(target: T, probe: P, config: Config) -> Self {
        Self {
            target,
            probe,
            config,
            manager: FlashManager::default(),
            state: State::Closed,
            buffer: [0xFF; MIN_SIZE],
            buffered: 0,
            initial_address: None,
            current_address: 0,
            absolute: false,
            next_offset: 0,
            backend: None,
            base: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn into_parts(self) -> (T, P) {
        (self.target, self.probe)
    }

    pub fn open(&mut self) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::Internal);
        }
        self.buffer.fill(0xFF);
        self.buffered = 0;
        self.initial_address = None;
        self.current_address = 0;
        self.absolute = false;
        self.next_offset = 0;
        self.backend = None;
        self.base = 0;
        self.state = State::Open;
        Ok(())
    }

    fn physical(&self, address: u32) -> u32 {
        match self.absolute {
            true => address,
            false => self.base + address,
        }
    }

    fn manager_data(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        let address = self.physical(address);
        let intf: &mut dyn FlashIntf = match self.backend {
            Some(Backend::Target) => &mut self.target,
            Some(Backend::Probe) => &mut self.probe,
            None => return Err(Error::Internal),
        };
        self.manager.data(intf, address, data)
    }

    /// Select the backend, initialize it and flush the buffered prefix
    fn start(&mut self, image_type: ImageType) -> Result<(), Error> {
        let initial = self.initial_address.unwrap_or_default();
        let address = self.absolute.then_some(initial);
        let (base, backend) = select_backend(image_type, address, &self.config)?;
        debug!("Image type {:?} base {:#x} backend {:?}", image_type, base, backend);
        self.base = base;
        let intf: &mut dyn FlashIntf = match backend {
            Backend::Target => &mut self.target,
            Backend::Probe => &mut self.probe,
        };
        self.manager.init(intf)?;
        self.backend = Some(backend);
        let buffer = self.buffer;
        self.manager_data(initial, &buffer[..self.buffered])
    }

    fn write_data(&mut self, mut address: u32, mut data: &[u8]) -> Result<(), Error> {
        if self.initial_address.is_none() {
            trace!("Initial address {:#x}", address);
            self.initial_address = Some(address);
            self.current_address = address;
        }

        if self.backend.is_none() {
            let sequential = address == self.current_address;
            self.current_address = self.current_address.wrapping_add(data.len() as u32);
            let image_type = match sequential {
                true => {
                    let size = data.len().min(MIN_SIZE - self.buffered);
                    self.buffer[self.buffered..self.buffered + size].copy_from_slice(&data[..size]);
                    self.buffered += size;
                    data = &data[size..];
                    address += size as u32;
                    match self.buffered == MIN_SIZE {
                        true => {
                            let initial = self.absolute.then_some(self.initial_address.unwrap_or_default());
                            Some(detect_type(&self.buffer, initial, &self.config))
                        }
                        false => None,
                    }
                }
                false => {
                    debug!("Non sequential address {:#x}, assuming target image", address);
                    Some(ImageType::Target)
                }
            };
            match image_type {
                Some(image_type) => self.start(image_type)?,
                None => return Ok(()),
            }
        }

        if data.is_empty() {
            return Ok(());
        }
        self.manager_data(address, data)
    }

    /// Stream offsets are used when `address` is none
    pub fn write(&mut self, address: Option<u32>, data: &[u8]) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Internal);
        }
        let address = match address {
            Some(address) => {
                if self.initial_address.is_none() {
                    self.absolute = true;
                }
                address
            }
            None => {
                let offset = self.next_offset;
                self.next_offset += data.len() as u32;
                offset
            }
        };
        let result = self.write_data(address, data);
        if result.is_err() {
            self.state = State::Error;
        }
        result
    }

    /// Releases the backend, whose completion contract decides the result.
    /// An image shorter than the classification prefix is classified padded with 0xFF.
    pub fn close(&mut self) -> Result<(), Error> {
        let state = self.state;
        if state == State::Closed {
            return Err(Error::Internal);
        }
        self.state = State::Closed;
        if self.backend.is_none() && state == State::Open && self.buffered > 0 {
            let initial = self.absolute.then_some(self.initial_address.unwrap_or_default());
            let image_type = detect_type(&self.buffer, initial, &self.config);
            debug!("Short image of {} bytes classified as {:?}", self.buffered, image_type);
            if let Err(error) = self.start(image_type) {
                self.release().ok();
                return Err(error);
            }
        }
        self.release()
    }

    fn release(&mut self) -> Result<(), Error> {
        let intf: &mut dyn FlashIntf = match self.backend {
            Some(Backend::Target) => &mut self.target,
            Some(Backend::Probe) => &mut self.probe,
            None => return Ok(()),
        };
        self.manager.uninit(intf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Config, Role};
    use crate::error::{DecoderError, Error};
    use crate::flash::manager::test::{Op, Recorder};

    fn vector_table() -> [u8; MIN_SIZE] {
        let mut image = [0u8; MIN_SIZE];
        image[..16].copy_from_slice(&hex!("00 00 03 20 C1 04 00 00 15 05 00 00 17 05 00 00"));
        image
    }

    fn identity_image(build_key: [u8; 4]) -> [u8; MIN_SIZE] {
        let mut image = [0x5Au8; MIN_SIZE];
        image[0x20..0x24].copy_from_slice(&build_key);
        image[0x24..0x28].copy_from_slice(&hex!("00 00 6C 64"));
        image
    }

    fn decoder(role: Role) -> FlashDecoder<Recorder, Recorder> {
        let config = Config::new(role);
        FlashDecoder::new(Recorder::new(0x40, 0x400), Recorder::new(0x40, 0x400), config)
    }

    #[test]
    fn test_detect_type() {
        let config = Config::default();
        assert_eq!(detect_type(&vector_table(), None, &config), ImageType::Target);
        let image = identity_image(hex!("8F 9E 93 9B"));
        assert_eq!(detect_type(&image, None, &config), ImageType::Interface);
        let image = identity_image(hex!("93 9D 93 9B"));
        assert_eq!(detect_type(&image, None, &config), ImageType::Bootloader);
        let image = identity_image(hex!("01 02 03 04"));
        assert_eq!(detect_type(&image, Some(0), &config), ImageType::Unknown);
        assert_eq!(detect_type(&[0xFF; MIN_SIZE], None, &config), ImageType::Unknown);
        assert_eq!(detect_type(&[0xFF; MIN_SIZE], Some(0x8000), &config), ImageType::Target);
    }

    #[test]
    fn test_buffer_then_flush() {
        let mut decoder = decoder(Role::Interface);
        let image = vector_table();
        decoder.open().unwrap();
        decoder.write(None, &image[..0x20]).unwrap();
        assert!(decoder.target().ops.is_empty());
        decoder.write(None, &image[0x20..]).unwrap();
        decoder.write(None, &[0xAB; 0x40]).unwrap();
        decoder.close().unwrap();
        let expected = [
            Op::Init,
            Op::Erase(0),
            Op::Program(0, image.to_vec()),
            Op::Program(0x40, vec![0xAB; 0x40]),
            Op::Uninit,
        ];
        assert_eq!(decoder.target().ops, expected);
        assert!(decoder.probe().ops.is_empty());
    }

    #[test]
    fn test_non_sequential_is_target() {
        let mut decoder = decoder(Role::Interface);
        decoder.open().unwrap();
        decoder.write(Some(0x1000), &[1, 2, 3, 4]).unwrap();
        decoder.write(Some(0x2000), &[5, 6]).unwrap();
        decoder.close().unwrap();
        let mut first = vec![0xFF; 0x40];
        first[..4].copy_from_slice(&[1, 2, 3, 4]);
        let mut second = vec![0xFF; 0x40];
        second[..2].copy_from_slice(&[5, 6]);
        let expected = [
            Op::Init,
            Op::Erase(0x1000),
            Op::Program(0x1000, first),
            Op::Erase(0x2000),
            Op::Program(0x2000, second),
            Op::Uninit,
        ];
        assert_eq!(decoder.target().ops, expected);
    }

    #[test]
    fn test_bootloader_update() {
        let mut decoder = decoder(Role::Interface);
        let image = identity_image(hex!("93 9D 93 9B"));
        decoder.open().unwrap();
        decoder.write(None, &image).unwrap();
        decoder.close().unwrap();
        assert!(decoder.target().ops.is_empty());
        assert_eq!(decoder.probe().ops[2], Op::Program(0, image.to_vec()));
    }

    #[test]
    fn test_interface_update_address() {
        let image = identity_image(hex!("8F 9E 93 9B"));
        let mut decoder = decoder(Role::Bootloader);
        decoder.open().unwrap();
        decoder.write(Some(0x5000), &image).unwrap();
        decoder.close().unwrap();
        assert_eq!(decoder.probe().ops[1], Op::Erase(0x5000));

        let mut decoder = self::decoder(Role::Bootloader);
        decoder.open().unwrap();
        let result = decoder.write(Some(0x6000), &image);
        assert_eq!(result, Err(DecoderError::InterfaceAddress.into()));
        assert_eq!(decoder.write(Some(0x6040), &image), Err(Error::Internal));
        assert_eq!(decoder.close(), Ok(()));
    }

    #[test]
    fn test_unsupported_update() {
        // Interface images cannot be written by the interface itself
        let image = identity_image(hex!("8F 9E 93 9B"));
        let mut decoder = decoder(Role::Interface);
        decoder.open().unwrap();
        assert_eq!(decoder.write(None, &image), Err(DecoderError::UnsupportedUpdate.into()));
        assert!(decoder.probe().ops.is_empty());

        let mut decoder = self::decoder(Role::Interface);
        decoder.open().unwrap();
        assert_eq!(decoder.write(None, &[0xFF; MIN_SIZE]), Err(DecoderError::UnsupportedUpdate.into()));
    }

    #[test]
    fn test_short_image() {
        let mut decoder = decoder(Role::Interface);
        decoder.open().unwrap();
        decoder.write(Some(0x800), &[1, 2, 3]).unwrap();
        decoder.close().unwrap();
        let mut page = vec![0xFF; 0x40];
        page[..3].copy_from_slice(&[1, 2, 3]);
        let expected = [Op::Init, Op::Erase(0x800), Op::Program(0x800, page), Op::Uninit];
        assert_eq!(decoder.target().ops, expected);

        let mut decoder = self::decoder(Role::Interface);
        decoder.open().unwrap();
        decoder.write(None, &[1, 2, 3]).unwrap();
        assert_eq!(decoder.close(), Err(DecoderError::UnsupportedUpdate.into()));
    }

    #[test]
    fn test_state() {
        let mut decoder = decoder(Role::Interface);
        assert_eq!(decoder.write(None, &[0]), Err(Error::Internal));
        assert_eq!(decoder.close(), Err(Error::Internal));
        decoder.open().unwrap();
        assert_eq!(decoder.open(), Err(Error::Internal));
        assert_eq!(decoder.close(), Ok(()));
    }
}
