//! Persisted diff baseline: the last published snapshot as JSON.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Version of the on-disk layout.
pub const STORE_FORMAT: u32 = 1;

/// Directory inside a project that holds netsnap state.
pub const STATE_DIR: &str = ".netsnap";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: invalid snapshot: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: unsupported snapshot format {found} (expected {})", .path.display(), STORE_FORMAT)]
    UnsupportedFormat { path: PathBuf, found: u32 },
}

#[derive(Serialize)]
struct StoredRef<'a> {
    format: u32,
    snapshot: &'a Snapshot,
}

#[derive(Deserialize)]
struct Stored {
    format: u32,
    snapshot: Snapshot,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<project>/.netsnap/snapshot.json`
    pub fn in_project(dir: &Path) -> Self {
        Self::new(dir.join(STATE_DIR).join("snapshot.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored baseline, or `None` when nothing has been published yet.
    pub fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let stored: Stored = serde_json::from_str(&content).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;
        if stored.format != STORE_FORMAT {
            return Err(StoreError::UnsupportedFormat {
                path: self.path.clone(),
                found: stored.format,
            });
        }

        debug!("loaded baseline generation {} from {}", stored.snapshot.generation, self.path.display());
        Ok(Some(stored.snapshot))
    }

    /// Replace the stored baseline. Readers see either the old file or the new one.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&StoredRef {
            format: STORE_FORMAT,
            snapshot,
        })
        .map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;

        write_atomic(&self.path, &json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!("stored generation {} at {}", snapshot.generation, self.path.display());
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Mirror, Point};
    use crate::snapshot::{ComponentRecord, NetRecord, PinRef, SourceFile};
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        Snapshot {
            generation: 7,
            root: "top.kicad_sch".to_string(),
            components: vec![ComponentRecord {
                reference: "amp/R1".to_string(),
                lib_id: "Device:R".to_string(),
                value: "4k7".to_string(),
                footprint: None,
                position: Point::new(0.1 + 0.2, 127.000_000_000_01),
                rotation: 270.0,
                mirror: Mirror::Y,
                units: vec![1],
                pin_count: 2,
                in_bom: false,
                dnp: true,
                sheet: "amp".to_string(),
            }],
            nets: vec![NetRecord {
                id: 1,
                name: "amp/OUT".to_string(),
                pins: vec![PinRef::new("amp/R1", "2")],
            }],
            sources: vec![SourceFile {
                document: "top.kicad_sch".to_string(),
                fingerprint: "00ff".to_string(),
                tokens: 120,
            }],
        }
    }

    #[test]
    fn test_missing_store_is_no_baseline() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::in_project(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_is_exact() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::in_project(dir.path());
        let snapshot = sample();

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(store.path().ends_with(".netsnap/snapshot.json"));
        assert!(!dir.path().join(".netsnap/snapshot.json.tmp").exists());
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::in_project(dir.path());
        let mut snapshot = sample();
        store.save(&snapshot).unwrap();
        snapshot.generation = 8;
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap().map(|s| s.generation), Some(8));
    }

    #[test]
    fn test_rejects_other_format_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut value = serde_json::json!({ "format": 1, "snapshot": sample() });
        value["format"] = serde_json::json!(99);
        fs::write(&path, value.to_string()).unwrap();

        let err = SnapshotStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFormat { found: 99, .. }));
    }

    #[test]
    fn test_corrupt_file_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SnapshotStore::new(&path).load(),
            Err(StoreError::Format { .. })
        ));
    }
}
