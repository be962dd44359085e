//! Non-fatal extraction conditions.
//!
//! Each warning names the entity it concerns and where it sits, so a front
//! end can point the user at it without re-reading the source.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point;
use crate::parser::schema::LabelKind;
use crate::snapshot::PinRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ExtractionWarning {
    #[error("{document}: {reference} at {position} uses {symbol}, which has no library definition; its pins are not connected")]
    MissingLibrarySymbol {
        symbol: String,
        reference: String,
        document: String,
        position: Point,
    },

    #[error("{document}: sheet {sheet} pin {pin} {side}")]
    UnmatchedSheetPin {
        sheet: String,
        pin: String,
        side: SheetPinSide,
        document: String,
    },

    #[error("net {chosen} at {pin}: {kind} labels disagree ({}); using {chosen}", sites(.labels))]
    AmbiguousLabel {
        kind: LabelKind,
        texts: Vec<String>,
        chosen: String,
        /// Smallest pin of the net.
        pin: PinRef,
        /// Every label of the competing tier.
        labels: Vec<LabelSite>,
    },

    #[error("{document}: reference {reference} at {position} is already used; renamed to {renamed_to}")]
    DuplicateReference {
        reference: String,
        renamed_to: String,
        document: String,
        position: Point,
    },

    #[error("{document}: sheet name {name} is already used; renamed to {renamed_to}")]
    DuplicateSheetName {
        name: String,
        renamed_to: String,
        document: String,
    },

    #[error("net name {name} at {pin} is used by another net{}; renamed to {renamed_to}", named_by(.labels))]
    DuplicateNetName {
        name: String,
        renamed_to: String,
        /// Smallest pin of the renamed net.
        pin: PinRef,
        /// Labels that gave the renamed net its name; empty for synthetic names.
        labels: Vec<LabelSite>,
    },
}

/// Where a label sits: its text, sheet path, document and root coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSite {
    pub text: String,
    /// Empty for the root sheet.
    pub sheet: String,
    pub document: String,
    pub position: Point,
}

impl std::fmt::Display for LabelSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.text, self.document)?;
        if !self.sheet.is_empty() {
            write!(f, " (sheet {})", self.sheet)?;
        }
        write!(f, " at {}", self.position)
    }
}

fn sites(labels: &[LabelSite]) -> String {
    labels.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn named_by(labels: &[LabelSite]) -> String {
    if labels.is_empty() {
        String::new()
    } else {
        format!(" (named by {})", sites(labels))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetPinSide {
    /// The sheet box has the pin but the child has no hierarchical label for it.
    MissingChildLabel,
    /// The child has the hierarchical label but the sheet box has no pin for it.
    MissingSheetPin,
}

impl std::fmt::Display for SheetPinSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetPinSide::MissingChildLabel => write!(f, "has no matching hierarchical label"),
            SheetPinSide::MissingSheetPin => write!(f, "has no matching sheet pin"),
        }
    }
}
