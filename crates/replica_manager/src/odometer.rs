//! Persistent usage accounting of a replica store.
//!
//! The odometer is a small text file of `key=value` lines:
//!
//! ```text
//! count=2
//! storesize=2048
//! uploaded=4096
//! downloaded=1024
//! modified=1714564800000
//! ```
//!
//! It is read completely when loaded and rewritten completely on every save.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use humansize::{format_size, DECIMAL};
use thiserror::Error;

const COUNT: &str = "count";
const STORE_SIZE: &str = "storesize";
const UPLOADED: &str = "uploaded";
const DOWNLOADED: &str = "downloaded";
const MODIFIED: &str = "modified";

/// An error that occurred while reading or writing an odometer.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum OdometerError {
    #[error("failed to access the odometer file")]
    IoError(#[from] std::io::Error),

    #[error("{path}: malformed odometer line '{line}'")]
    MalformedLine { path: PathBuf, line: String },
}

/// The values of an odometer at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OdometerReading {
    /// The number of objects in the store.
    pub count: u64,
    /// The total size of all objects in the store in bytes.
    pub store_size: u64,
    /// The total number of bytes ever uploaded.
    pub uploaded: u64,
    /// The total number of bytes ever downloaded.
    pub downloaded: u64,
    /// When the odometer was last saved, in milliseconds since the Unix epoch. `0` if never.
    pub modified: u64,
}

impl OdometerReading {
    /// When the odometer was last saved.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        if self.modified == 0 {
            return None;
        }
        i64::try_from(self.modified)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, OdometerError> {
        let mut reading = Self::default();
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = || OdometerError::MalformedLine {
                path: path.to_path_buf(),
                line: line.to_string(),
            };
            let (key, value) = line.split_once('=').ok_or_else(malformed)?;
            let value: u64 = value.trim().parse().map_err(|_| malformed())?;
            match key.trim() {
                COUNT => reading.count = value,
                STORE_SIZE => reading.store_size = value,
                UPLOADED => reading.uploaded = value,
                DOWNLOADED => reading.downloaded = value,
                MODIFIED => reading.modified = value,
                other => tracing::debug!("ignoring unknown odometer key '{other}'"),
            }
        }
        Ok(reading)
    }

    fn serialize(&self) -> String {
        format!(
            "{COUNT}={}\n{STORE_SIZE}={}\n{UPLOADED}={}\n{DOWNLOADED}={}\n{MODIFIED}={}\n",
            self.count, self.store_size, self.uploaded, self.downloaded, self.modified
        )
    }
}

impl Display for OdometerReading {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} objects, {} stored, {} uploaded, {} downloaded",
            self.count,
            format_size(self.store_size, DECIMAL),
            format_size(self.uploaded, DECIMAL),
            format_size(self.downloaded, DECIMAL)
        )
    }
}

/// A writable odometer backed by a file.
#[derive(Debug)]
pub struct Odometer {
    path: PathBuf,
    reading: OdometerReading,
}

impl Odometer {
    /// Loads the odometer stored at `path`. A missing file is an odometer that reads zero
    /// everywhere; it is created by the first [`Odometer::save`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, OdometerError> {
        let path = path.into();
        let reading = Self::read_snapshot(&path)?;
        Ok(Self { path, reading })
    }

    /// Reads the odometer stored at `path` without taking ownership of it.
    pub fn read_snapshot(path: &Path) -> Result<OdometerReading, OdometerError> {
        match fs::read_to_string(path) {
            Ok(contents) => OdometerReading::parse(path, &contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(OdometerReading::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The file the odometer is saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current values.
    pub fn reading(&self) -> OdometerReading {
        self.reading
    }

    /// Adds `delta` to the object count, saturating at zero.
    pub fn adjust_count(&mut self, delta: i64) {
        self.reading.count = self.reading.count.saturating_add_signed(delta);
    }

    /// Adds `delta` to the stored size, saturating at zero.
    pub fn adjust_store_size(&mut self, delta: i64) {
        self.reading.store_size = self.reading.store_size.saturating_add_signed(delta);
    }

    /// Counts `bytes` as uploaded.
    pub fn add_uploaded(&mut self, bytes: u64) {
        self.reading.uploaded = self.reading.uploaded.saturating_add(bytes);
    }

    /// Counts `bytes` as downloaded.
    pub fn add_downloaded(&mut self, bytes: u64) {
        self.reading.downloaded = self.reading.downloaded.saturating_add(bytes);
    }

    /// Stamps the odometer with the current time and rewrites its file.
    pub fn save(&mut self) -> Result<(), OdometerError> {
        self.reading.modified = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut staged = self.path.clone().into_os_string();
        staged.push(".new");
        let staged = PathBuf::from(staged);
        fs::write(&staged, self.reading.serialize())?;
        fs::rename(&staged, &self.path)?;
        Ok(())
    }
}
