//! Whole-collection snapshots
//!
//! Each named artifact holds one complete, ordered collection of a single
//! entity kind. Artifacts are rewritten in full on every save through a
//! temporary file and an atomic rename, so a reader never observes a partial
//! collection.
//!
//! On-disk layout: bincode([`SnapshotEnvelope`]), where `body` is the
//! bincode encoding of `Vec<T>` and `checksum` its CRC64.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::entity::{ChangeRecord, TransferRequest, User};
use crate::error::QarsError;

pub const FORMAT_VERSION: u32 = 1;

// ============================================================
// Entity Kinds
// ============================================================

/// Element kind recorded in every artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    ChangeRecord,
    TransferRequest,
    User,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ChangeRecord => "change_record",
            EntityKind::TransferRequest => "transfer_request",
            EntityKind::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entity that can be stored in a snapshot artifact
pub trait Snapshot: Serialize + DeserializeOwned {
    const KIND: EntityKind;
}

impl Snapshot for ChangeRecord {
    const KIND: EntityKind = EntityKind::ChangeRecord;
}

impl Snapshot for TransferRequest {
    const KIND: EntityKind = EntityKind::TransferRequest;
}

impl Snapshot for User {
    const KIND: EntityKind = EntityKind::User;
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    kind: EntityKind,
    count: u64,
    checksum: u64,
    body: Vec<u8>,
}

// ============================================================
// Snapshot Store
// ============================================================

/// Snapshot artifacts under one data directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Load a collection. An absent or empty artifact is an empty collection.
    pub fn load<T: Snapshot>(&self, name: &str) -> Result<Vec<T>, QarsError> {
        let bytes = match fs::read(self.path(name)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(artifact = name, "Snapshot absent, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(QarsError::persistence(name, e)),
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        decode(name, &bytes)
    }

    /// Write a complete collection.
    ///
    /// An empty collection is only written when `force` is set; otherwise the
    /// last saved state is kept. Returns whether the artifact was written.
    pub fn save<T: Snapshot>(&self, name: &str, items: &[T], force: bool) -> Result<bool, QarsError> {
        if items.is_empty() && !force {
            debug!(artifact = name, "Skipping unforced save of empty collection");
            return Ok(false);
        }
        let bytes = encode(items)?;
        self.write_atomic(name, &bytes)
            .map_err(|e| QarsError::persistence(name, e))?;
        debug!(artifact = name, count = items.len(), "Snapshot saved");
        Ok(true)
    }

    /// Delete an artifact. Absent artifacts are not an error.
    pub fn remove(&self, name: &str) -> Result<bool, QarsError> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(QarsError::persistence(name, e)),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{}.tmp", name));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, self.path(name)) {
            warn!(artifact = name, error = %e, "Snapshot rename failed");
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

// ============================================================
// Encoding
// ============================================================

fn encode<T: Snapshot>(items: &[T]) -> Result<Vec<u8>, QarsError> {
    let kind = T::KIND.as_str();
    let body = bincode::serialize(items).map_err(|e| QarsError::persistence(kind, e))?;
    let envelope = SnapshotEnvelope {
        format_version: FORMAT_VERSION,
        kind: T::KIND,
        count: items.len() as u64,
        checksum: calculate_crc64(&body),
        body,
    };
    bincode::serialize(&envelope).map_err(|e| QarsError::persistence(kind, e))
}

fn decode<T: Snapshot>(name: &str, bytes: &[u8]) -> Result<Vec<T>, QarsError> {
    let envelope: SnapshotEnvelope =
        bincode::deserialize(bytes).map_err(|e| QarsError::corrupt(name, e))?;

    if envelope.format_version != FORMAT_VERSION {
        return Err(QarsError::corrupt(
            name,
            format!("unsupported format version {}", envelope.format_version),
        ));
    }
    if envelope.kind != T::KIND {
        return Err(QarsError::corrupt(
            name,
            format!("expected {} elements, found {}", T::KIND, envelope.kind),
        ));
    }
    let checksum = calculate_crc64(&envelope.body);
    if checksum != envelope.checksum {
        return Err(QarsError::corrupt(
            name,
            format!(
                "checksum mismatch: expected {:016x}, got {:016x}",
                envelope.checksum, checksum
            ),
        ));
    }

    let items: Vec<T> =
        bincode::deserialize(&envelope.body).map_err(|e| QarsError::corrupt(name, e))?;
    if items.len() as u64 != envelope.count {
        return Err(QarsError::corrupt(
            name,
            format!("expected {} elements, decoded {}", envelope.count, items.len()),
        ));
    }
    Ok(items)
}

fn calculate_crc64(data: &[u8]) -> u64 {
    use crc::{CRC_64_ECMA_182, Crc};

    const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);
    CRC64.checksum(data)
}

// ============================================================
// Unit Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Category, ReleaseFile};

    fn test_store(tag: &str) -> (String, SnapshotStore) {
        let dir = format!("target/test_snapshot_{}_{}", tag, std::process::id());
        let _ = fs::remove_dir_all(&dir);
        let store = SnapshotStore::new(&dir);
        (dir, store)
    }

    fn sample_records() -> Vec<ChangeRecord> {
        let mut a = ChangeRecord::new("CR100", "alice");
        a.add_file(ReleaseFile::with_defaults("orders.p", 10, Category::Source));
        a.link_impact("common.i", "report.p");
        let b = ChangeRecord::new("CR200", "bob");
        vec![a, b]
    }

    #[test]
    fn test_absent_and_empty_artifacts_load_empty() {
        let (dir, store) = test_store("absent");
        let loaded: Vec<ChangeRecord> = store.load("qars.active").unwrap();
        assert!(loaded.is_empty());

        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path("qars.active"), b"").unwrap();
        let loaded: Vec<ChangeRecord> = store.load("qars.active").unwrap();
        assert!(loaded.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_then_load() {
        let (dir, store) = test_store("save_load");
        assert!(store.save("qars.active", &sample_records(), false).unwrap());

        let loaded: Vec<ChangeRecord> = store.load("qars.active").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id(), "CR100");
        assert_eq!(loaded[0].author(), "alice");
        assert_eq!(loaded[0].files(Category::Impact).len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unforced_empty_save_keeps_last_state() {
        let (dir, store) = test_store("unforced");
        store.save("qars.active", &sample_records(), false).unwrap();

        let empty: Vec<ChangeRecord> = Vec::new();
        assert!(!store.save("qars.active", &empty, false).unwrap());
        let loaded: Vec<ChangeRecord> = store.load("qars.active").unwrap();
        assert_eq!(loaded.len(), 2);

        assert!(store.save("qars.active", &empty, true).unwrap());
        let loaded: Vec<ChangeRecord> = store.load("qars.active").unwrap();
        assert!(loaded.is_empty());
        assert!(store.exists("qars.active"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_then_save_is_byte_identical() {
        let (dir, store) = test_store("identical");
        let requests = vec![
            TransferRequest::with_tracking(Some(&sample_records()[0]), "alice", 10001),
            TransferRequest::with_tracking(None, "bob", 10002),
        ];
        store.save("qars.pending", &requests, false).unwrap();
        let before = fs::read(store.path("qars.pending")).unwrap();

        let loaded: Vec<TransferRequest> = store.load("qars.pending").unwrap();
        store.save("qars.pending", &loaded, false).unwrap();
        let after = fs::read(store.path("qars.pending")).unwrap();
        assert_eq!(before, after);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_wrong_kind_is_corrupt() {
        let (dir, store) = test_store("kind");
        store
            .save("qars.users", &[User::new("amy", "amyx")], false)
            .unwrap();

        let err = store.load::<ChangeRecord>("qars.users").unwrap_err();
        assert_eq!(err.code(), "CORRUPT_ARTIFACT");
        assert!(err.to_string().contains("expected change_record elements, found user"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_damaged_artifact_is_corrupt() {
        let (dir, store) = test_store("damaged");
        store.save("qars.active", &sample_records(), false).unwrap();

        let path = store.path("qars.active");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let err = store.load::<ChangeRecord>("qars.active").unwrap_err();
        assert_eq!(err.code(), "CORRUPT_ARTIFACT");

        fs::write(&path, b"not a snapshot").unwrap();
        let err = store.load::<ChangeRecord>("qars.active").unwrap_err();
        assert_eq!(err.code(), "CORRUPT_ARTIFACT");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_remove() {
        let (dir, store) = test_store("remove");
        store
            .save("qars.transfer", &[TransferRequest::with_tracking(None, "a", 10001)], false)
            .unwrap();
        assert!(store.remove("qars.transfer").unwrap());
        assert!(!store.remove("qars.transfer").unwrap());
        assert!(!store.exists("qars.transfer"));

        let _ = fs::remove_dir_all(&dir);
    }
}
