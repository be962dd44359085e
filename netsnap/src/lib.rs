//! Netsnap - deterministic component and net snapshots from KiCad schematics
//!
//! This library reads a hierarchical KiCad schematic project, flattens its
//! sheets, resolves pin-level connectivity and names every net, producing a
//! snapshot that is stable across runs and cheap to diff.
//!
//! # Quick Start
//!
//! ```no_run
//! use netsnap::{ExtractOptions, Netsnap, SnapshotPublisher};
//! use std::path::Path;
//!
//! let extraction = Netsnap::extract_dir(Path::new("my-board"), &ExtractOptions::default()).unwrap();
//! let publisher = SnapshotPublisher::default();
//! let publication = publisher.publish(extraction).unwrap();
//!
//! for net in &publication.snapshot.nets {
//!     println!("{}: {} pins", net.name, net.pins.len());
//! }
//! for warning in &publication.warnings {
//!     eprintln!("warning: {}", warning);
//! }
//! ```
//!
//! # Pipeline
//!
//! - **Loading**: one `.kicad_sch` document at a time against an immutable library index
//! - **Hierarchy**: sheet instances expanded with path-qualified references
//! - **Connectivity**: union-find over pins, wires, junctions, labels and sheet pins
//! - **Naming**: global, hierarchical and local labels by precedence, then `Net_<n>`
//! - **Diffing**: ordered change records between published snapshots

pub mod connectivity;
pub mod core;
pub mod diagnostics;
pub mod diff;
pub mod geometry;
pub mod hierarchy;
pub mod library;
pub mod naming;
pub mod parser;
pub mod publish;
pub mod snapshot;
pub mod store;

// Re-export main types
pub use crate::core::{discover_schematic_files, ExtractOptions, Netsnap, NetsnapError, ProjectContext};
pub use diagnostics::{ExtractionWarning, LabelSite, SheetPinSide};
pub use diff::{ChangeKind, ChangeRecord, ComponentField, FieldChange, SnapshotDiff, SnapshotDiffer};
pub use geometry::{Point, COINCIDENCE_EPSILON};
pub use library::{LibraryIndex, PinElectricalType};
pub use naming::{NamingPolicy, TieBreak};
pub use parser::kicad::{ParseError, SchematicLoader};
pub use publish::{Publication, SnapshotPublisher};
pub use snapshot::{
    estimate_tokens, ComponentRecord, Extraction, NetRecord, PinRef, Snapshot, SourceFile,
};
pub use store::{SnapshotStore, StoreError};

/// Extract a project directory with default options (convenience wrapper).
pub fn extract_dir(dir: &std::path::Path) -> Result<Extraction, NetsnapError> {
    Netsnap::extract_dir(dir, &ExtractOptions::default())
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        ChangeRecord, ExtractOptions, Extraction, ExtractionWarning, Netsnap, NetsnapError,
        ProjectContext, Snapshot, SnapshotDiffer, SnapshotPublisher, SnapshotStore,
    };
}
