//! Tracking number counter
//!
//! The tracking file holds the next number to hand out, as plain decimal
//! text. The server takes the stored value as its own tracking id and starts
//! assigning from the one after it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core_types::TrackingNumber;
use crate::error::QarsError;

#[derive(Debug)]
pub struct TrackingCounter {
    path: PathBuf,
    server_track: TrackingNumber,
    next: TrackingNumber,
}

impl TrackingCounter {
    /// Read the tracking file. A missing file starts from `default`; an
    /// unreadable one is fatal.
    pub fn load(path: impl AsRef<Path>, default: TrackingNumber) -> Result<Self, QarsError> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        let stored = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .parse::<TrackingNumber>()
                .map_err(|e| QarsError::corrupt(&name, format!("tracking number unreadable: {}", e)))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => default,
            Err(e) => return Err(QarsError::persistence(name, e)),
        };
        let next = successor(stored, &name)?;
        Ok(Self {
            path,
            server_track: stored,
            next,
        })
    }

    /// Tracking id of the server process itself
    pub fn server_track(&self) -> TrackingNumber {
        self.server_track
    }

    /// Take the next number. Never returns the same number twice.
    pub fn allocate(&mut self) -> Result<TrackingNumber, QarsError> {
        let track = self.next;
        self.next = successor(track, &self.path.display().to_string())?;
        Ok(track)
    }

    /// Most recently handed out number
    pub fn last_assigned(&self) -> TrackingNumber {
        self.next - 1
    }

    pub fn peek_next(&self) -> TrackingNumber {
        self.next
    }

    /// Move past `track` if it was handed out before the file was last saved
    pub fn ensure_after(&mut self, track: TrackingNumber) -> Result<bool, QarsError> {
        if track < self.next {
            return Ok(false);
        }
        self.next = successor(track, &self.path.display().to_string())?;
        Ok(true)
    }

    /// Persist the next number to assign
    pub fn save(&self) -> Result<(), QarsError> {
        let name = self.path.display().to_string();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| QarsError::persistence(&name, e))?;
        }
        fs::write(&self.path, format!("{}\n", self.next)).map_err(|e| QarsError::persistence(name, e))
    }
}

fn successor(track: TrackingNumber, name: &str) -> Result<TrackingNumber, QarsError> {
    track
        .checked_add(1)
        .ok_or_else(|| QarsError::corrupt(name, format!("tracking numbers exhausted at {}", track)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::DEFAULT_TRACKING;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!("target/test_tracking_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_uses_default() {
        let dir = test_dir("default");
        let counter = TrackingCounter::load(dir.join("transaction.id"), DEFAULT_TRACKING).unwrap();
        assert_eq!(counter.server_track(), DEFAULT_TRACKING);
        assert_eq!(counter.peek_next(), DEFAULT_TRACKING + 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_allocation_is_monotonic_and_persisted() {
        let dir = test_dir("monotonic");
        let path = dir.join("transaction.id");
        let mut counter = TrackingCounter::load(&path, DEFAULT_TRACKING).unwrap();
        let a = counter.allocate().unwrap();
        let b = counter.allocate().unwrap();
        assert!(b > a);
        assert_eq!(counter.last_assigned(), b);
        counter.save().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), (b + 1).to_string());

        // a restart never reuses b
        let mut reloaded = TrackingCounter::load(&path, DEFAULT_TRACKING).unwrap();
        assert!(reloaded.allocate().unwrap() > b);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_ensure_after_skips_known_numbers() {
        let dir = test_dir("ensure");
        let mut counter = TrackingCounter::load(dir.join("transaction.id"), DEFAULT_TRACKING).unwrap();
        assert!(!counter.ensure_after(DEFAULT_TRACKING).unwrap());
        assert!(counter.ensure_after(10050).unwrap());
        assert_eq!(counter.allocate().unwrap(), 10051);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unparsable_file_is_fatal() {
        let dir = test_dir("garbage");
        let path = dir.join("transaction.id");
        fs::write(&path, "ten thousand\n").unwrap();
        let err = TrackingCounter::load(&path, DEFAULT_TRACKING).unwrap_err();
        assert_eq!(err.code(), "CORRUPT_ARTIFACT");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_exhausted_numbers_are_errors_not_overflow() {
        let dir = test_dir("exhausted");
        let path = dir.join("transaction.id");
        fs::write(&path, format!("{}\n", TrackingNumber::MAX)).unwrap();
        let err = TrackingCounter::load(&path, DEFAULT_TRACKING).unwrap_err();
        assert_eq!(err.code(), "CORRUPT_ARTIFACT");

        fs::write(&path, format!("{}\n", TrackingNumber::MAX - 2)).unwrap();
        let mut counter = TrackingCounter::load(&path, DEFAULT_TRACKING).unwrap();
        assert_eq!(counter.allocate().unwrap(), TrackingNumber::MAX - 1);
        assert!(counter.allocate().is_err());
        assert_eq!(counter.peek_next(), TrackingNumber::MAX);
        assert!(counter.ensure_after(TrackingNumber::MAX).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
