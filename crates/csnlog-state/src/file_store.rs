//! File-backed state store.
//!
//! All states of a directory live in one JSON envelope. Writes go to a
//! temporary file that is synced and renamed over the previous envelope,
//! so a crash leaves either the old or the new content, never a mix.

use crate::error::{Result, StorageError};
use crate::store::StateStore;
use csnlog_core::{DomainId, ReplicaId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SERVER_STATE_FILE_NAME: &str = "server-state.json";
const SERVER_STATE_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StateRecord {
    domain: DomainId,
    replica_id: ReplicaId,
    state: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateEnvelope {
    version: u32,
    #[serde(default)]
    states: Vec<StateRecord>,
}

/// A [`StateStore`] persisting into a directory.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on the envelope.
    lock: Mutex<()>,
}

impl FileStateStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStateStore {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_file_path(&self) -> PathBuf {
        self.dir.join(SERVER_STATE_FILE_NAME)
    }

    fn read_records(&self) -> Result<Vec<StateRecord>> {
        let path = self.state_file_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&path)?;
        let envelope: StateEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != SERVER_STATE_VERSION {
            return Err(StorageError::VersionMismatch {
                expected: SERVER_STATE_VERSION,
                actual: envelope.version,
            });
        }
        Ok(envelope.states)
    }

    fn write_records(&self, states: Vec<StateRecord>) -> Result<()> {
        let path = self.state_file_path();
        let envelope = StateEnvelope {
            version: SERVER_STATE_VERSION,
            states,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let temp_path = path.with_extension("json.tmp");
        if let Err(err) = write_then_rename(&temp_path, &path, &bytes) {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temporary state file");
                }
            }
            return Err(err.into());
        }
        sync_dir(&self.dir)?;

        debug!(path = %path.display(), states = envelope.states.len(), "wrote server state envelope");
        Ok(())
    }
}

fn write_then_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(temp_path, path)
}

impl StateStore for FileStateStore {
    fn load(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        Ok(self
            .read_records()?
            .into_iter()
            .find(|record| &record.domain == domain && record.replica_id == replica_id)
            .map(|record| record.state))
    }

    fn store(&self, domain: &DomainId, replica_id: ReplicaId, bytes: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let mut records = self.read_records()?;
        match records
            .iter_mut()
            .find(|record| &record.domain == domain && record.replica_id == replica_id)
        {
            Some(record) => record.state = bytes.to_vec(),
            None => records.push(StateRecord {
                domain: domain.clone(),
                replica_id,
                state: bytes.to_vec(),
            }),
        }
        self.write_records(records)
    }

    fn remove(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<()> {
        let _guard = self.lock.lock();
        let mut records = self.read_records()?;
        let before = records.len();
        records.retain(|record| !(&record.domain == domain && record.replica_id == replica_id));
        if records.len() == before {
            return Ok(());
        }
        self.write_records(records)
    }
}

fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        let domain = DomainId::new("dc=example");

        assert_eq!(store.load(&domain, 1).unwrap(), None);

        store.store(&domain, 1, &[1, 2, 3]).unwrap();
        store.store(&domain, 2, &[4]).unwrap();
        store.store(&domain, 1, &[5, 6]).unwrap();

        let reopened = FileStateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load(&domain, 1).unwrap(), Some(vec![5, 6]));
        assert_eq!(reopened.load(&domain, 2).unwrap(), Some(vec![4]));

        reopened.remove(&domain, 1).unwrap();
        assert_eq!(reopened.load(&domain, 1).unwrap(), None);
        assert_eq!(reopened.load(&domain, 2).unwrap(), Some(vec![4]));
    }

    #[test]
    fn test_file_store_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SERVER_STATE_FILE_NAME),
            br#"{"version":99,"states":[]}"#,
        )
        .unwrap();

        let store = FileStateStore::open(dir.path()).unwrap();
        let err = store.load(&DomainId::new("o=x"), 1).unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionMismatch {
                expected: SERVER_STATE_VERSION,
                actual: 99
            }
        ));
    }

    #[test]
    fn test_file_store_reports_garbage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SERVER_STATE_FILE_NAME), b"not json").unwrap();

        let store = FileStateStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load(&DomainId::new("o=x"), 1),
            Err(StorageError::SerializationError(_))
        ));
    }

    #[test]
    fn test_failed_write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the envelope makes the rename fail.
        let blocker = dir.path().join(SERVER_STATE_FILE_NAME);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        let store = FileStateStore::open(dir.path()).unwrap();
        assert!(matches!(store.write_records(Vec::new()), Err(StorageError::Io(_))));
        assert!(!blocker.with_extension("json.tmp").exists());
    }
}
