use crate::error::{Error, TransferError};
use crate::io::SECTOR_SIZE;
use crate::stream::{Progress, StreamType};
use crate::types::{FileID, SectorID};

/// Tracks the single file being programmed during one mount session.
///
/// Information arrives from two directions: directory entry changes declare
/// the file, its start sector and size, while raw sector writes carry the
/// content. Either may come first, later updates must agree with what is
/// already known.
#[derive(Clone, Debug)]
pub struct Transfer {
    file: Option<FileID>,
    start_sector: Option<SectorID>,
    next_sector: Option<SectorID>,
    size_processed: u32,
    file_size: u32,
    status: Result<Progress, Error>,
    finished: bool,
    stream_open: bool,
    stream_type: Option<StreamType>,
}

impl Default for Transfer {
    fn default() -> Self {
        Self {
            file: None,
            start_sector: None,
            next_sector: None,
            size_processed: 0,
            file_size: 0,
            status: Ok(Progress::InProgress),
            finished: false,
            stream_open: false,
            stream_type: None,
        }
    }
}

impl Transfer {
    pub fn file(&self) -> Option<FileID> {
        self.file
    }

    pub fn start_sector(&self) -> Option<SectorID> {
        self.start_sector
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn size_processed(&self) -> u32 {
        self.size_processed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_stream_open(&self) -> bool {
        self.stream_open
    }

    /// Only the exact next sector of an open, unfinished transfer is taken
    pub fn accepts(&self, sector: SectorID) -> bool {
        if !self.stream_open || self.finished {
            return false;
        }
        match self.start_sector {
            Some(start) if sector < start => return false,
            _ => (),
        }
        self.next_sector == Some(sector)
    }

    /// Returns whether a stream was open
    pub(crate) fn close_stream(&mut self) -> bool {
        core::mem::replace(&mut self.stream_open, false)
    }

    fn inconsistent(&mut self) {
        self.status = Err(TransferError::Inconsistent.into());
    }

    /// Directory entry information about the file
    pub fn update_file_info(
        &mut self,
        file: FileID,
        start_sector: Option<SectorID>,
        size: u32,
        stream_type: Option<StreamType>,
    ) -> Option<Result<(), Error>> {
        debug!("File {} start sector {:?} size {}", file, start_sector, size);
        if self.file.is_none() {
            self.file = Some(file);
        }
        if self.start_sector.is_none() {
            self.start_sector = start_sector;
        }
        if self.stream_type.is_none() {
            self.stream_type = stream_type;
        }

        if size < self.file_size {
            warn!("File size changed from {} to {}", self.file_size, size);
            self.inconsistent();
        }
        if start_sector.is_some() && start_sector != self.start_sector {
            warn!("Start sector changed from {:?} to {:?}", self.start_sector, start_sector);
            self.inconsistent();
        }
        if stream_type != self.stream_type {
            warn!("Stream type changed from {:?} to {:?}", self.stream_type, stream_type);
            self.inconsistent();
        }
        self.file_size = self.file_size.max(size);
        self.check_for_completion()
    }

    /// A stream was recognized at `start_sector` and opened with `result`
    pub fn update_stream_open(
        &mut self,
        stream_type: StreamType,
        start_sector: SectorID,
        result: Result<(), Error>,
    ) -> Option<Result<(), Error>> {
        debug!("Stream {:?} opened at sector {}", stream_type, start_sector);
        if self.start_sector.is_none() {
            self.start_sector = Some(start_sector);
        }
        if self.stream_type.is_none() {
            self.stream_type = Some(stream_type);
        }

        if self.start_sector != Some(start_sector) {
            warn!("Start sector changed from {:?} to {}", self.start_sector, start_sector);
            self.inconsistent();
        }
        if self.stream_type != Some(stream_type) {
            warn!("Stream type changed from {:?} to {:?}", self.stream_type, stream_type);
            self.inconsistent();
        }
        if self.status.is_ok() {
            self.status = result.map(|_| Progress::InProgress);
        }
        if result.is_ok() {
            self.next_sector = Some(start_sector);
            self.stream_open = true;
        }
        self.check_for_completion()
    }

    /// `num_sectors` starting at `sector` were written to the stream
    pub fn update_stream_data(
        &mut self,
        sector: SectorID,
        num_sectors: u32,
        result: Result<Progress, Error>,
    ) -> Option<Result<(), Error>> {
        let next_sector = u32::from(sector).checked_add(num_sectors).map(SectorID::from);
        let size = num_sectors.checked_mul(SECTOR_SIZE as u32);
        let size_processed = size.and_then(|size| self.size_processed.checked_add(size));
        match (next_sector, size_processed) {
            (Some(next_sector), Some(size_processed)) => {
                self.next_sector = Some(next_sector);
                self.size_processed = size_processed;
                self.status = result;
            }
            _ => {
                warn!("Sector {} count {} out of range", sector, num_sectors);
                self.inconsistent();
            }
        }
        self.check_for_completion()
    }

    /// New transfer result, none once the transfer already finished
    fn check_for_completion(&mut self) -> Option<Result<(), Error>> {
        if self.finished {
            return None;
        }
        let complete = self.size_processed >= self.file_size && self.file_size > 0;
        let result = match self.status {
            Ok(Progress::Done) if complete => {
                debug!("Transfer finished, {} bytes", self.size_processed);
                self.finished = true;
                Ok(())
            }
            // Success until the idle timeout tells otherwise
            Ok(Progress::DoneOrContinue) if complete => Ok(()),
            Ok(_) => Err(TransferError::Timeout.into()),
            Err(error) => {
                warn!("Transfer failed: {}", error);
                self.finished = true;
                Err(error)
            }
        };
        Some(result)
    }
}
