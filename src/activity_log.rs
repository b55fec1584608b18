//! Activity log - the shared, human-readable record of client activity
//!
//! One line per event: `<track> <MM-dd-yy::HH:mm:ss> <message>`. Lines are
//! flushed as they are written so operators can tail the file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::core_types::TrackingNumber;
use crate::entity::request::punch_clock;
use crate::error::QarsError;

pub struct ActivityLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ActivityLog {
    /// Open the log for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QarsError> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QarsError::persistence(&name, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| QarsError::persistence(name, e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line
    pub fn write_line(&self, track: TrackingNumber, message: &str) -> io::Result<()> {
        let line = format!("{} {} {}\n", track, punch_clock(), message);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Append one line; failures are reported but never propagated
    pub fn record(&self, track: TrackingNumber, message: &str) {
        if let Err(e) = self.write_line(track, message) {
            warn!(track, error = %e, path = %self.path.display(), "Activity log write failed");
        }
    }
}
