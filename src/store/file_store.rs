//! Append-only file of fixed-size header records.
//!
//! The record for height `h` sits at byte offset `80 * (h - forkpoint)`. The file length
//! is kept a multiple of 80: a failed append is rolled back, and a trailing partial
//! record left by a crash is cut off (and logged) the next time the file is opened.
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    header::{Header, HEADER_SIZE},
};

const RECORD: u64 = HEADER_SIZE as u64;

/// One chain's header records on disk.
///
/// Reads take `&self`; the file handle sits behind a mutex so concurrent readers do
/// not race on the shared cursor.
#[derive(Debug)]
pub struct HeaderFile {
    path: PathBuf,
    file: Mutex<File>,
    forkpoint: u32,
    len: u32,
    discarded_bytes: u64,
    #[cfg(test)]
    pub(crate) fail_next_append: bool,
}

impl HeaderFile {
    /// Open (creating if missing) the file at `path` whose first record is at `forkpoint`.
    pub fn open(path: impl Into<PathBuf>, forkpoint: u32) -> Result<Self, StoreError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        let size = file
            .metadata()
            .map_err(|e| StoreError::io(&path, e))?
            .len();

        let discarded_bytes = size % RECORD;
        if discarded_bytes != 0 {
            warn!(
                path = %path.display(),
                discarded_bytes,
                "truncating partial trailing header record"
            );
            file.set_len(size - discarded_bytes)
                .and_then(|_| file.sync_data())
                .map_err(|e| StoreError::io(&path, e))?;
        }
        let len = u32::try_from(size / RECORD).map_err(|_| StoreError::Corrupt {
            path: path.clone(),
            reason: format!("{size} bytes exceeds the addressable height range"),
        })?;

        debug!(path = %path.display(), forkpoint, len, "opened header file");
        Ok(Self {
            path,
            file: Mutex::new(file),
            forkpoint,
            len,
            discarded_bytes,
            #[cfg(test)]
            fail_next_append: false,
        })
    }

    /// Atomically create `path` holding `records`: write a temporary sibling, sync it,
    /// then rename over `path`.
    pub fn create_with(
        path: impl Into<PathBuf>,
        forkpoint: u32,
        records: &[u8],
    ) -> Result<Self, StoreError> {
        let path = path.into();
        if records.len() % HEADER_SIZE != 0 {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("{} bytes is not a whole number of records", records.len()),
            });
        }
        let tmp = path.with_extension("tmp");
        {
            let mut f = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            f.write_all(records)
                .and_then(|_| f.sync_all())
                .map_err(|e| StoreError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
        Self::open(path, forkpoint)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Height of the first record.
    pub fn forkpoint(&self) -> u32 {
        self.forkpoint
    }

    /// Number of records.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the file holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes cut off the end when the file was opened.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Height of the last record.
    pub fn tip_height(&self) -> Option<u32> {
        self.len.checked_sub(1).map(|n| self.forkpoint + n)
    }

    /// Height the next [`append`](Self::append) must carry.
    pub fn next_height(&self) -> u32 {
        self.forkpoint + self.len
    }

    /// Whether a record for `height` is stored here.
    pub fn contains_height(&self, height: u32) -> bool {
        height >= self.forkpoint && height < self.next_height()
    }

    /// Append the immediate successor of the current tip and sync it to disk.
    pub fn append(&mut self, header: &Header) -> Result<(), StoreError> {
        let expected = self.next_height();
        if header.height != expected {
            return Err(StoreError::OutOfOrder {
                expected,
                got: header.height,
            });
        }
        self.append_raw(&header.encode())
    }

    /// Append whole records verbatim; used when moving a branch between files.
    pub(crate) fn append_raw(&mut self, records: &[u8]) -> Result<(), StoreError> {
        if records.len() % HEADER_SIZE != 0 {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("{} bytes is not a whole number of records", records.len()),
            });
        }
        if records.is_empty() {
            return Ok(());
        }
        let added = (records.len() / HEADER_SIZE) as u32;
        let end = u64::from(self.len) * RECORD;
        let file = self.file.get_mut();
        let written = file
            .seek(SeekFrom::Start(end))
            .and_then(|_| file.write_all(records))
            .and_then(|_| file.sync_data());
        #[cfg(test)]
        let written = if std::mem::take(&mut self.fail_next_append) {
            written.and(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )))
        } else {
            written
        };
        if let Err(e) = written {
            // Leave the file record-aligned at the previous tip.
            if let Err(rollback) = file.set_len(end) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "could not cut failed append back to the previous tip"
                );
            }
            return Err(StoreError::io(&self.path, e));
        }
        self.len += added;
        Ok(())
    }

    /// Record at `height`, `None` outside this file's range.
    pub fn read(&self, height: u32) -> Result<Option<Header>, StoreError> {
        if !self.contains_height(height) {
            return Ok(None);
        }
        let mut buf = [0u8; HEADER_SIZE];
        self.read_at(height, &mut buf)?;
        let header = Header::decode(&buf, height).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(header))
    }

    /// Last record.
    pub fn read_tip(&self) -> Result<Option<Header>, StoreError> {
        match self.tip_height() {
            Some(tip) => self.read(tip),
            None => Ok(None),
        }
    }

    /// Raw records from `height` (clamped to the forkpoint) through the tip.
    pub fn read_raw_from(&self, height: u32) -> Result<Vec<u8>, StoreError> {
        let start = height.max(self.forkpoint);
        if start >= self.next_height() {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; (self.next_height() - start) as usize * HEADER_SIZE];
        self.read_at(start, &mut buf)?;
        Ok(buf)
    }

    /// Discard every record at `height` and above.
    pub fn truncate_from(&mut self, height: u32) -> Result<(), StoreError> {
        let keep = height.saturating_sub(self.forkpoint).min(self.len);
        if keep == self.len {
            return Ok(());
        }
        let file = self.file.get_mut();
        file.set_len(u64::from(keep) * RECORD)
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::io(&self.path, e))?;
        debug!(path = %self.path.display(), from = height, dropped = self.len - keep, "truncated");
        self.len = keep;
        Ok(())
    }

    /// All records in height order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Header, StoreError>> + '_ {
        (self.forkpoint..self.next_height()).filter_map(move |h| self.read(h).transpose())
    }

    /// Delete the backing file.
    pub fn remove(self) -> Result<(), StoreError> {
        let Self { path, file, .. } = self;
        drop(file);
        fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))
    }

    fn read_at(&self, height: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        let offset = u64::from(height - self.forkpoint) * RECORD;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| StoreError::io(&self.path, e))
    }
}
