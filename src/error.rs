//! Failure domains of the drag-and-drop pipeline.
//!
//! The display text of every user visible error is what ends up in `FAIL.TXT`.

use displaydoc::Display;
use thiserror::Error as ThisError;

#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum TransferError {
    /// An error occurred during the transfer
    Inconsistent,
    /// The transfer timed out.
    Timeout,
}

/// Failures reported by the target side flash backend
#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum TargetError {
    /// Flash algorithm erase sector command FAILURE
    EraseSector,
    /// Flash algorithm write command FAILURE
    Write,
}

#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum StreamError {
    /// The hex file cannot be decoded. Checksum calculation failure occurred.
    HexChecksum,
    /// The hex file cannot be decoded. Parser logic failure occurred.
    HexParser,
}

#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum DecoderError {
    /// The starting address for the bootloader update is wrong.
    BootloaderAddress,
    /// The starting address for the interface update is wrong.
    InterfaceAddress,
    /// The application file format is unknown and cannot be parsed and/or processed.
    UnsupportedUpdate,
}

/// In application programming failures
#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum FlashError {
    /// In application programming initialization failed.
    Init,
    /// In application programming uninit failed.
    Uninit,
    /// In application programming write failed.
    Write,
    /// In application programming sector erase failed.
    EraseSector,
    /// In application programming mass erase failed.
    EraseAll,
    /// In application programming aborted due to an out of bounds address.
    OutOfBounds,
    /// In application programming not supported on this device.
    UpdateNotSupported,
    /// In application programming failed because the update sent was incomplete.
    UpdateIncomplete,
    /// In application programming aborted due to a misaligned or out of order access.
    Sequence,
    /// The bootloader CRC did not pass.
    BadCrc,
}

/// Volume build failures, never shown to the user
#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum VolumeError {
    /// Filename is not a valid 8.3 name
    InvalidFilename,
    /// No free root directory slot
    DirectoryFull,
    /// No free region slot
    RegionTableFull,
    /// File does not fit into the in-memory allocation table
    AllocationTableFull,
    /// Memory window exceeds the 32-bit address space
    MemoryWindow,
}

#[derive(Copy, Clone, Debug, Display, ThisError, PartialEq, Eq)]
pub enum Error {
    /// An internal error has occurred
    Internal,
    /// {0}
    Transfer(#[from] TransferError),
    /// {0}
    Target(#[from] TargetError),
    /// {0}
    Stream(#[from] StreamError),
    /// {0}
    Decoder(#[from] DecoderError),
    /// {0}
    Flash(#[from] FlashError),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        use std::string::ToString;

        let error: Error = FlashError::BadCrc.into();
        assert_eq!(error.to_string(), "The bootloader CRC did not pass.");
        let error: Error = TransferError::Timeout.into();
        assert_eq!(error.to_string(), "The transfer timed out.");
        assert_eq!(Error::Internal.to_string(), "An internal error has occurred");
        let error: Error = FlashError::Sequence.into();
        assert!(error.to_string().starts_with("In application programming aborted"));
    }
}
