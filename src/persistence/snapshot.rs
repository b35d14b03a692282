//! Point-in-time snapshots of an index.

use super::error::{PersistenceError, PersistenceResult};
use super::format::{frame, unframe, SnapshotHeader};
use crate::config::EngineConfig;
use crate::fingerprint::Fingerprint;
use crate::index::{EntityId, SimilarityIndex};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Every live entry of an index plus the configuration that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub entries: Vec<(EntityId, Fingerprint)>,
}

impl Snapshot {
    /// Capture the serving generation of `index`.
    pub fn capture(index: &SimilarityIndex, config: &EngineConfig) -> Self {
        let entries = index.entries();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            header: SnapshotHeader {
                config: config.clone(),
                created_at,
                entry_count: entries.len() as u64,
            },
            entries,
        }
    }

    pub fn to_bytes(&self) -> PersistenceResult<Vec<u8>> {
        let payload = postcard::to_stdvec(self)
            .map_err(|e| PersistenceError::Serialization(format!("postcard error: {e}")))?;
        Ok(frame(&payload))
    }

    pub fn from_bytes(bytes: &[u8]) -> PersistenceResult<Self> {
        let payload = unframe(bytes)?;
        let snapshot: Snapshot = postcard::from_bytes(payload)
            .map_err(|e| PersistenceError::Deserialization(format!("postcard error: {e}")))?;
        if snapshot.header.entry_count != snapshot.entries.len() as u64 {
            return Err(PersistenceError::Format(format!(
                "header declares {} entries, found {}",
                snapshot.header.entry_count,
                snapshot.entries.len()
            )));
        }
        Ok(snapshot)
    }

    /// Write atomically: temp file, fsync, rename.
    pub fn save(&self, path: impl AsRef<Path>) -> PersistenceResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = self.to_bytes()?;
        let temp_path = temp_path_for(path);
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, path)?;
        tracing::info!(
            path = %path.display(),
            entries = self.entries.len(),
            bytes = bytes.len(),
            "snapshot saved"
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let snapshot = Self::from_bytes(&bytes)?;
        tracing::info!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CancelToken;

    fn populated() -> (SimilarityIndex, EngineConfig) {
        let config = EngineConfig::default().with_versions("tok", "hash");
        let index = SimilarityIndex::new(&config).unwrap();
        for id in 0..20u64 {
            index
                .upsert(id, Fingerprint::from_value(id * 0x0101_0101, 64), 1)
                .unwrap();
        }
        index.upsert(99, Fingerprint::empty(64), 1).unwrap();
        (index, config)
    }

    #[test]
    fn test_save_load_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.snap");
        let (index, config) = populated();

        let snapshot = Snapshot::capture(&index, &config);
        snapshot.save(&path).unwrap();
        assert!(!temp_path_for(&path).exists());

        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.header.config, config);

        let restored = SimilarityIndex::new(&config).unwrap();
        restored
            .rebuild(loaded.entries.into_iter().map(Ok), &CancelToken::new())
            .unwrap();
        assert_eq!(restored.entries(), index.entries());
        assert_eq!(restored.get(99), Some(Fingerprint::empty(64)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Snapshot::load(dir.path().join("absent")),
            Err(PersistenceError::Io(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let (index, config) = populated();
        let bytes = Snapshot::capture(&index, &config).to_bytes().unwrap();
        let err = Snapshot::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, PersistenceError::ChecksumMismatch { .. }));
    }
}
