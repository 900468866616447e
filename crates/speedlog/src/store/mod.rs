//! Append-only speed log backed by a line-delimited text file.
//!
//! A [`DataStore`] holds the records of one log file in memory, in
//! chronological order, and remembers how many of them are already on disk.
//! Records are appended to memory with [`DataStore::insert`] and written out
//! by [`DataStore::update`], which first copies the current file to
//! `<path>.old`.
//!
//! Read accessors never touch the disk. A store obtained from
//! [`DataStore::open`] starts empty; call [`DataStore::load`] before relying
//! on [`DataStore::records`] to reflect the file.

mod record;

pub use record::{HEADER, MeasurementRecord, TIMESTAMP_FORMAT};

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Suffix appended to the log path for the pre-flush backup copy.
pub const BACKUP_SUFFIX: &str = ".old";

/// Errors raised by [`DataStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log file already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("log file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("log path is not a regular file: {}", .path.display())]
    NotAFile { path: PathBuf },

    #[error("corrupt record at {}:{line}: {reason}", .path.display())]
    CorruptRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid {field} {value:?}: must be non-empty and contain no whitespace")]
    InvalidField { field: &'static str, value: String },

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Wrap an IO error with operation and path context. A missing file is
    /// reported as [`StoreError::NotFound`].
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound {
                path: path.to_path_buf(),
            };
        }
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// In-memory record buffer for one log file.
///
/// Records at `[0, flushed_count)` match the file after a successful
/// [`update`](Self::update); records after that exist only in memory.
#[derive(Debug)]
pub struct DataStore {
    path: PathBuf,
    records: Vec<MeasurementRecord>,
    flushed: usize,
    loaded: bool,
}

impl DataStore {
    /// Create a new log file containing only the header line.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if anything exists at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StoreError::AlreadyExists { path: path.clone() }
                } else {
                    StoreError::io("creating log file", &path, e)
                }
            })?;

        writeln!(file, "{HEADER}")
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io("writing header to", &path, e))?;

        debug!(path = %path.display(), "Created log file");

        Ok(Self {
            path,
            records: Vec::new(),
            flushed: 0,
            loaded: true,
        })
    }

    /// Open an existing log file without reading it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let metadata =
            fs::metadata(&path).map_err(|e| StoreError::io("opening log file", &path, e))?;
        if !metadata.is_file() {
            return Err(StoreError::NotAFile { path });
        }

        Ok(Self {
            path,
            records: Vec::new(),
            flushed: 0,
            loaded: false,
        })
    }

    /// Read the file and merge its records in front of the unflushed tail.
    ///
    /// After a successful load the buffer is: every record on disk, followed by
    /// every record inserted since the last successful `update`. Nothing is
    /// dropped or duplicated, however often `load` is called. A first line
    /// other than [`HEADER`] is a [`StoreError::CorruptRecord`] at line 1. On
    /// error the buffer is left unchanged.
    ///
    /// Returns the number of records read from disk.
    pub fn load(&mut self) -> Result<usize, StoreError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::io("reading log file", &self.path, e))?;

        let mut lines = content.lines().enumerate();
        if let Some((_, first)) = lines.next() {
            if first.trim_end_matches('\r') != HEADER {
                return Err(StoreError::CorruptRecord {
                    path: self.path.clone(),
                    line: 1,
                    reason: format!("expected header {HEADER:?}, found {first:?}"),
                });
            }
        }

        let on_disk = lines
            .map(|(index, line)| {
                MeasurementRecord::parse_line(line).map_err(|reason| StoreError::CorruptRecord {
                    path: self.path.clone(),
                    line: index + 1,
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let disk_count = on_disk.len();
        let unflushed = self.records.split_off(self.flushed);
        self.records = on_disk;
        self.records.extend(unflushed);
        self.flushed = disk_count;
        self.loaded = true;

        debug!(
            path = %self.path.display(),
            on_disk = disk_count,
            buffered = self.records.len() - disk_count,
            "Loaded log file"
        );

        Ok(disk_count)
    }

    /// Append records to the in-memory tail. No IO.
    pub fn insert<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = MeasurementRecord>,
    {
        self.records.extend(records);
    }

    /// Write every unflushed record to the file.
    ///
    /// When there is nothing to write this is a no-op: no backup is made and
    /// the file is not touched. Otherwise the current file is first copied to
    /// [`backup_path`](Self::backup_path), replacing any earlier backup, and
    /// the records are then appended. `flushed_count` only advances once the
    /// append has fully succeeded; a failed append is truncated back to the
    /// original length where possible.
    ///
    /// Returns the number of records written.
    pub fn update(&mut self) -> Result<usize, StoreError> {
        let original_len = fs::metadata(&self.path)
            .map_err(|e| StoreError::io("checking log file", &self.path, e))?
            .len();

        let pending = &self.records[self.flushed..];
        if pending.is_empty() {
            return Ok(0);
        }

        self.write_backup()?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io("opening log file for append", &self.path, e))?;

        // The first new line must start on a line of its own. An empty file
        // also gets its missing header back.
        let mut payload = String::new();
        if original_len == 0 {
            payload.push_str(HEADER);
            payload.push('\n');
        } else if !ends_with_newline(&mut file, original_len)
            .map_err(|e| StoreError::io("reading log file", &self.path, e))?
        {
            payload.push('\n');
        }
        for record in pending {
            payload.push_str(&record.to_line());
            payload.push('\n');
        }

        if let Err(e) = file
            .write_all(payload.as_bytes())
            .and_then(|()| file.sync_data())
        {
            if let Err(truncate_err) = file.set_len(original_len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to roll back partial append"
                );
            }
            return Err(StoreError::io("appending to log file", &self.path, e));
        }

        let written = pending.len();
        self.flushed = self.records.len();
        debug!(path = %self.path.display(), written, "Flushed records");
        Ok(written)
    }

    /// Copy the log file to its backup path via a temporary file, so an
    /// interrupted copy never leaves a truncated backup behind.
    fn write_backup(&self) -> Result<(), StoreError> {
        let backup = self.backup_path();
        let mut staging = backup.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let result = fs::copy(&self.path, &staging)
            .and_then(|_| File::open(&staging)?.sync_all())
            .and_then(|()| fs::rename(&staging, &backup));

        if let Err(e) = result {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::io("backing up log file", &self.path, e));
        }
        Ok(())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the backup written before each flush: `<path>.old`.
    pub fn backup_path(&self) -> PathBuf {
        backup_path_for(&self.path)
    }

    /// Whether the buffer reflects the file (created here, or loaded).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of leading records known to be on disk.
    pub fn flushed_count(&self) -> usize {
        self.flushed
    }

    /// Records inserted but not yet written.
    pub fn unflushed(&self) -> &[MeasurementRecord] {
        &self.records[self.flushed..]
    }

    pub fn get(&self, index: usize) -> Option<&MeasurementRecord> {
        self.records.get(index)
    }

    /// Records in `range`, or `None` if the range is out of bounds.
    pub fn range<R>(&self, range: R) -> Option<&[MeasurementRecord]>
    where
        R: RangeBounds<usize>,
    {
        let start = match range.start_bound() {
            std::ops::Bound::Included(&s) => s,
            std::ops::Bound::Excluded(&s) => s.checked_add(1)?,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(&e) => e.checked_add(1)?,
            std::ops::Bound::Excluded(&e) => e,
            std::ops::Bound::Unbounded => self.records.len(),
        };
        self.records.get(start..end)
    }

    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// `<path>.old`, keeping the original extension.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut backup: OsString = path.as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    PathBuf::from(backup)
}
