//! Snapshot model: the published result of one extraction run.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::diagnostics::ExtractionWarning;
use crate::geometry::{Mirror, Point};

/// One electrical pin: component reference plus pin number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub component: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(component: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            pin: pin.into(),
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.pin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Globally unique, sheet-path qualified (`amp/R1`).
    pub reference: String,
    pub lib_id: String,
    pub value: String,
    pub footprint: Option<String>,
    pub position: Point,
    pub rotation: f64,
    pub mirror: Mirror,
    /// Placed units, ascending.
    pub units: Vec<u32>,
    pub pin_count: usize,
    pub in_bom: bool,
    pub dnp: bool,
    /// Sheet path, empty for the root sheet.
    pub sheet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetRecord {
    /// 1-based position in the name-sorted net list.
    pub id: usize,
    pub name: String,
    /// Sorted by (reference, pin number).
    pub pins: Vec<PinRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub document: String,
    /// SHA-256 of the file content, lowercase hex.
    pub fingerprint: String,
    /// Estimated language-model tokens in the file content.
    #[serde(default)]
    pub tokens: usize,
}

/// Character-based token estimate: whitespace runs count once and KiCad text
/// averages about 3.5 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    let mut chars = 0usize;
    let mut in_space = false;
    for c in text.trim().chars() {
        if !(c.is_whitespace() && in_space) {
            chars += 1;
        }
        in_space = c.is_whitespace();
    }
    (chars * 2).div_ceil(7)
}

/// Immutable, deterministic result of one published extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Logical clock, incremented once per publication.
    pub generation: u64,
    pub root: String,
    pub components: Vec<ComponentRecord>,
    pub nets: Vec<NetRecord>,
    pub sources: Vec<SourceFile>,
}

impl Snapshot {
    pub fn component(&self, reference: &str) -> Option<&ComponentRecord> {
        self.components
            .binary_search_by(|c| c.reference.as_str().cmp(reference))
            .ok()
            .map(|i| &self.components[i])
    }

    pub fn net(&self, name: &str) -> Option<&NetRecord> {
        self.nets
            .binary_search_by(|n| n.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.nets[i])
    }

    pub fn pin_count(&self) -> usize {
        self.nets.iter().map(|n| n.pins.len()).sum()
    }
}

/// Output of the extraction pipeline before it has been assigned a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub root: String,
    pub components: Vec<ComponentRecord>,
    pub nets: Vec<NetRecord>,
    pub sources: Vec<SourceFile>,
    pub warnings: Vec<ExtractionWarning>,
}

impl Extraction {
    /// Split into the publishable snapshot and the warnings raised while building it.
    pub fn into_parts(self, generation: u64) -> (Snapshot, Vec<ExtractionWarning>) {
        let snapshot = Snapshot {
            generation,
            root: self.root,
            components: self.components,
            nets: self.nets,
            sources: self.sources,
        };
        (snapshot, self.warnings)
    }

    /// Snapshot view without consuming the extraction.
    pub fn to_snapshot(&self, generation: u64) -> Snapshot {
        Snapshot {
            generation,
            root: self.root.clone(),
            components: self.components.clone(),
            nets: self.nets.clone(),
            sources: self.sources.clone(),
        }
    }
}

/// SHA-256 of `content` as lowercase hex.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
