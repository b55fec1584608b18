//! Transfer instruction marker
//!
//! The marker file holds the release instructions for the execution agent.
//! Its existence alone means a transfer batch is outstanding.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::QarsError;

#[derive(Debug, Clone)]
pub struct InstructionMarker {
    path: PathBuf,
}

impl InstructionMarker {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the marker with `contents`. Fails if it already exists.
    pub fn create(&self, contents: &str) -> Result<(), QarsError> {
        let name = self.path.display().to_string();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| QarsError::persistence(&name, e))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(QarsError::Conflict(format!("instruction marker {} already exists", name)));
            }
            Err(e) => return Err(QarsError::persistence(name, e)),
        };
        if let Err(e) = file.write_all(contents.as_bytes()).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&self.path);
            return Err(QarsError::persistence(name, e));
        }
        Ok(())
    }

    /// Delete the marker. Returns false if it was not there.
    pub fn remove(&self) -> Result<bool, QarsError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(QarsError::persistence(self.path.display().to_string(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_lifecycle() {
        let dir = format!("target/test_marker_{}", std::process::id());
        let _ = fs::remove_dir_all(&dir);
        let marker = InstructionMarker::new(Path::new(&dir).join("qa_rel"));

        assert!(!marker.exists());
        marker.create("TRACKING: 10001\n").unwrap();
        assert!(marker.exists());
        assert_eq!(fs::read_to_string(marker.path()).unwrap(), "TRACKING: 10001\n");

        let err = marker.create("again").unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        assert!(marker.remove().unwrap());
        assert!(!marker.remove().unwrap());
        assert!(!marker.exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
