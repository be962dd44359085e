use serde::{Deserialize, Serialize};

use crate::geometry::{Mirror, Point};
use crate::library::PinElectricalType;

/// One parsed schematic file, in its own sheet coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchematicDocument {
    /// Project-relative identifier, `/`-separated.
    pub id: String,
    pub uuid: Option<String>,
    pub version: Option<String>,
    pub symbols: Vec<SymbolInstance>,
    pub wires: Vec<WireSegment>,
    pub junctions: Vec<Junction>,
    pub labels: Vec<Label>,
    pub sheets: Vec<SheetInstance>,
}

impl SchematicDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: None,
            version: None,
            symbols: Vec::new(),
            wires: Vec::new(),
            junctions: Vec::new(),
            labels: Vec::new(),
            sheets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInstance {
    pub uuid: Option<String>,
    pub reference: String, // R1, C1, U1 (sheet path prefix added when flattened)
    pub lib_id: String,    // Device:R
    pub value: String,
    pub footprint: Option<String>,
    pub position: Point,
    pub rotation: f64,
    pub mirror: Mirror,
    pub unit: u32,
    pub in_bom: bool,
    pub dnp: bool,
    /// Library definition is flagged `(power)`.
    pub is_power: bool,
    /// False when the library index had no definition; `pins` is then empty.
    pub has_geometry: bool,
    pub pins: Vec<PlacedPin>,
}

/// A library pin after the symbol's placement has been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedPin {
    pub number: String,
    pub name: String,
    pub electrical_type: PinElectricalType,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireSegment {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Junction {
    pub position: Point,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    pub kind: LabelKind,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Global,
    Hierarchical,
    Local,
}

impl std::fmt::Display for LabelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelKind::Global => write!(f, "global"),
            LabelKind::Hierarchical => write!(f, "hierarchical"),
            LabelKind::Local => write!(f, "local"),
        }
    }
}

/// A placed reference to a child document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetInstance {
    pub name: String,
    /// File as written in the parent, relative to the parent's directory.
    pub file: String,
    pub position: Point,
    pub rotation: f64,
    pub pins: Vec<SheetPin>,
}

/// Sheet-box pin bridging a parent net to a child hierarchical label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetPin {
    pub name: String,
    pub position: Point,
}
