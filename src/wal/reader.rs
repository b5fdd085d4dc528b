//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{CellarError, Result};

use super::{WalEntry, HEADER_SIZE};

/// Upper bound on a single entry's data section (guards against garbage lengths)
const MAX_ENTRY_SIZE: u32 = 1 << 30;

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,

    /// Offset just past the last entry that decoded cleanly
    valid_offset: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            valid_offset: 0,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file. A torn or corrupt entry
    /// yields `WalCorruption`; the reader must not be used after that.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = self.read_full(&mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(CellarError::WalCorruption(format!(
                "torn header at offset {}: {} of {} bytes",
                self.valid_offset, read, HEADER_SIZE
            )));
        }

        let (lsn, crc, len) = WalEntry::parse_header(&header)?;
        if len > MAX_ENTRY_SIZE {
            return Err(CellarError::WalCorruption(format!(
                "entry {} claims {} data bytes",
                lsn, len
            )));
        }

        let mut data = vec![0u8; len as usize];
        let read = self.read_full(&mut data)?;
        if read < data.len() {
            return Err(CellarError::WalCorruption(format!(
                "torn entry {} at offset {}: {} of {} data bytes",
                lsn, self.valid_offset, read, len
            )));
        }

        let entry = WalEntry::from_parts(lsn, crc, len, &data)?;
        self.valid_offset += (HEADER_SIZE + data.len()) as u64;
        Ok(Some(entry))
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Offset just past the last cleanly decoded entry
    pub fn valid_offset(&self) -> u64 {
        self.valid_offset
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Iterator over WAL entries; stops after the first error
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
