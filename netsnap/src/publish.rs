//! Publication of extraction results.
//!
//! The publisher owns the only shared mutable state in the system: the last
//! published snapshot. It is swapped whole behind a lock, so readers always
//! get a complete snapshot, and `version()` lets front ends detect staleness.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::core::NetsnapError;
use crate::diagnostics::ExtractionWarning;
use crate::diff::{SnapshotDiff, SnapshotDiffer};
use crate::snapshot::{Extraction, Snapshot};
use crate::store::SnapshotStore;

/// Outcome of one successful publication.
#[derive(Debug, Clone)]
pub struct Publication {
    pub snapshot: Arc<Snapshot>,
    /// Changes against the previous baseline.
    pub diff: SnapshotDiff,
    pub warnings: Vec<ExtractionWarning>,
}

pub struct SnapshotPublisher {
    current: RwLock<Option<Arc<Snapshot>>>,
    // Serializes publish() calls; readers only take `current`.
    publishing: Mutex<()>,
    store: Option<SnapshotStore>,
    differ: SnapshotDiffer,
}

impl SnapshotPublisher {
    /// In-memory publisher with no baseline.
    pub fn new(differ: SnapshotDiffer) -> Self {
        Self {
            current: RwLock::new(None),
            publishing: Mutex::new(()),
            store: None,
            differ,
        }
    }

    /// Publisher backed by `store`; its stored snapshot becomes the baseline.
    pub fn with_store(store: SnapshotStore, differ: SnapshotDiffer) -> Result<Self, NetsnapError> {
        let baseline = store.load()?;
        Ok(Self {
            current: RwLock::new(baseline.map(Arc::new)),
            publishing: Mutex::new(()),
            store: Some(store),
            differ,
        })
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation of the current snapshot, 0 before the first publication.
    pub fn version(&self) -> u64 {
        self.current().map_or(0, |s| s.generation)
    }

    /// Assign the next generation, diff against the baseline, persist, then swap.
    ///
    /// If persisting fails the previous snapshot stays current and stored.
    pub fn publish(&self, extraction: Extraction) -> Result<Publication, NetsnapError> {
        self.publish_with(extraction, |_| Ok(()))
    }

    /// Like [`publish`](Self::publish), but hands the pending publication to
    /// `stage` before it is persisted. An error from `stage` publishes nothing.
    pub fn publish_with<E, F>(&self, extraction: Extraction, stage: F) -> Result<Publication, E>
    where
        E: From<NetsnapError>,
        F: FnOnce(&Publication) -> Result<(), E>,
    {
        let _guard = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.current();
        let generation = previous.as_ref().map_or(0, |s| s.generation) + 1;
        let (snapshot, warnings) = extraction.into_parts(generation);
        let diff = self.differ.diff(previous.as_deref(), &snapshot);
        let publication = Publication {
            snapshot: Arc::new(snapshot),
            diff,
            warnings,
        };

        stage(&publication)?;

        if let Some(store) = &self.store {
            store
                .save(&publication.snapshot)
                .map_err(|e| E::from(NetsnapError::from(e)))?;
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&publication.snapshot));

        info!(
            "published generation {}: {} components, {} nets, {} changes",
            generation,
            publication.snapshot.components.len(),
            publication.snapshot.nets.len(),
            publication.diff.len()
        );

        Ok(publication)
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new(SnapshotDiffer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Mirror, Point};
    use crate::snapshot::ComponentRecord;
    use tempfile::TempDir;

    fn extraction(value: &str) -> Extraction {
        Extraction {
            root: "top.kicad_sch".to_string(),
            components: vec![ComponentRecord {
                reference: "R1".to_string(),
                lib_id: "Device:R".to_string(),
                value: value.to_string(),
                footprint: None,
                position: Point::new(10.0, 10.0),
                rotation: 0.0,
                mirror: Mirror::None,
                units: vec![1],
                pin_count: 2,
                in_bom: true,
                dnp: false,
                sheet: String::new(),
            }],
            nets: vec![],
            sources: vec![],
            warnings: vec![],
        }
    }

    #[test]
    fn test_generations_increase_and_diff_against_previous() {
        let publisher = SnapshotPublisher::default();
        assert_eq!(publisher.version(), 0);

        let first = publisher.publish(extraction("1K")).unwrap();
        assert_eq!(first.snapshot.generation, 1);
        assert_eq!(first.diff.len(), 1);

        let second = publisher.publish(extraction("1.2K")).unwrap();
        assert_eq!(second.snapshot.generation, 2);
        assert_eq!(second.diff.len(), 1);
        assert_eq!(publisher.version(), 2);

        // Unchanged input still publishes a new generation with an empty diff.
        let third = publisher.publish(extraction("1.2K")).unwrap();
        assert!(third.diff.is_empty());
        assert_eq!(publisher.version(), 3);
    }

    #[test]
    fn test_store_provides_baseline_across_restarts() {
        let dir = TempDir::new().unwrap();
        {
            let publisher =
                SnapshotPublisher::with_store(SnapshotStore::in_project(dir.path()), SnapshotDiffer::default())
                    .unwrap();
            publisher.publish(extraction("1K")).unwrap();
        }

        let publisher =
            SnapshotPublisher::with_store(SnapshotStore::in_project(dir.path()), SnapshotDiffer::default())
                .unwrap();
        assert_eq!(publisher.version(), 1);
        let publication = publisher.publish(extraction("1K")).unwrap();
        assert!(publication.diff.is_empty());
        assert_eq!(publication.snapshot.generation, 2);
    }

    #[test]
    fn test_failed_persist_keeps_previous() {
        let dir = TempDir::new().unwrap();
        // A directory where the snapshot file should be makes the rename fail.
        let path = dir.path().join("snapshot.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let publisher = SnapshotPublisher {
            current: RwLock::new(None),
            publishing: Mutex::new(()),
            store: Some(SnapshotStore::new(&path)),
            differ: SnapshotDiffer::default(),
        };

        assert!(publisher.publish(extraction("1K")).is_err());
        assert!(publisher.current().is_none());
        assert_eq!(publisher.version(), 0);
    }

    #[test]
    fn test_failed_stage_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::in_project(dir.path());
        let publisher = SnapshotPublisher::with_store(store.clone(), SnapshotDiffer::default()).unwrap();

        let result = publisher.publish_with(extraction("1K"), |pending| {
            assert_eq!(pending.snapshot.generation, 1);
            assert_eq!(pending.diff.len(), 1);
            Err(NetsnapError::InvalidEpsilon { epsilon: 0.0 })
        });
        assert!(result.is_err());
        assert_eq!(publisher.version(), 0);
        assert!(store.load().unwrap().is_none());

        // The same changes are reported again once staging succeeds.
        let publication = publisher.publish(extraction("1K")).unwrap();
        assert_eq!(publication.snapshot.generation, 1);
        assert_eq!(publication.diff.len(), 1);
    }
}
