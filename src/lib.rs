#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate hex_literal;
extern crate heapless;
#[macro_use]
extern crate log;

pub mod config;
mod endian;
pub mod error;
pub mod flash;
pub mod io;
pub mod region;
pub mod session;
pub mod stream;
pub(crate) mod sync;
pub mod types;
pub mod volume;

pub use config::{Config, DeviceInfo, Role, Settings};
pub use error::Error;
pub use flash::decoder::FlashDecoder;
pub use flash::protected::{Layout, ProtectedFlash};
pub use flash::{FlashHal, FlashIntf};
pub use io::BlockDevice;
pub use region::directory::Filename;
pub use session::{Connection, Control, Platform, Session};
pub use stream::{FileStream, HexParser, Stream, StreamType};
pub use volume::{FileContent, VirtualVolume};
