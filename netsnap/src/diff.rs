//! Snapshot differ: ordered, deterministic change records between two
//! published snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{normalize_degrees, round4, COINCIDENCE_EPSILON};
use crate::snapshot::{ComponentRecord, NetRecord, PinRef, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentField {
    Value,
    Footprint,
    Position,
    Rotation,
}

impl fmt::Display for ComponentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentField::Value => write!(f, "value"),
            ComponentField::Footprint => write!(f, "footprint"),
            ComponentField::Position => write!(f, "position"),
            ComponentField::Rotation => write!(f, "rotation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: ComponentField,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Removal,
    Addition,
    Modification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeRecord {
    ComponentRemoved {
        reference: String,
        lib_id: String,
        value: String,
    },
    NetRemoved {
        name: String,
        pins: Vec<PinRef>,
    },
    ComponentAdded {
        reference: String,
        lib_id: String,
        value: String,
    },
    NetAdded {
        name: String,
        pins: Vec<PinRef>,
    },
    ComponentModified {
        reference: String,
        changes: Vec<FieldChange>,
    },
    NetModified {
        name: String,
        added_pins: Vec<PinRef>,
        removed_pins: Vec<PinRef>,
    },
}

impl ChangeRecord {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeRecord::ComponentRemoved { .. } | ChangeRecord::NetRemoved { .. } => ChangeKind::Removal,
            ChangeRecord::ComponentAdded { .. } | ChangeRecord::NetAdded { .. } => ChangeKind::Addition,
            ChangeRecord::ComponentModified { .. } | ChangeRecord::NetModified { .. } => {
                ChangeKind::Modification
            }
        }
    }

    /// Component reference or net name.
    pub fn id(&self) -> &str {
        match self {
            ChangeRecord::ComponentRemoved { reference, .. }
            | ChangeRecord::ComponentAdded { reference, .. }
            | ChangeRecord::ComponentModified { reference, .. } => reference,
            ChangeRecord::NetRemoved { name, .. }
            | ChangeRecord::NetAdded { name, .. }
            | ChangeRecord::NetModified { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// `None` when there was no baseline.
    pub from_generation: Option<u64>,
    pub to_generation: u64,
    /// Removals, then additions, then modifications.
    pub records: Vec<ChangeRecord>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(move |r| r.kind() == kind)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotDiffer {
    epsilon: f64,
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        Self::new(COINCIDENCE_EPSILON)
    }
}

impl SnapshotDiffer {
    /// `epsilon` is the position tolerance in mm.
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn diff(&self, old: Option<&Snapshot>, new: &Snapshot) -> SnapshotDiff {
        let empty: &[ComponentRecord] = &[];
        let old_components: BTreeMap<&str, &ComponentRecord> = old
            .map_or(empty, |s| s.components.as_slice())
            .iter()
            .map(|c| (c.reference.as_str(), c))
            .collect();
        let new_components: BTreeMap<&str, &ComponentRecord> = new
            .components
            .iter()
            .map(|c| (c.reference.as_str(), c))
            .collect();
        let no_nets: &[NetRecord] = &[];
        let old_nets: BTreeMap<&str, &NetRecord> = old
            .map_or(no_nets, |s| s.nets.as_slice())
            .iter()
            .map(|n| (n.name.as_str(), n))
            .collect();
        let new_nets: BTreeMap<&str, &NetRecord> =
            new.nets.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut records = Vec::new();

        // Removals
        for (reference, c) in &old_components {
            if !new_components.contains_key(reference) {
                records.push(ChangeRecord::ComponentRemoved {
                    reference: reference.to_string(),
                    lib_id: c.lib_id.clone(),
                    value: c.value.clone(),
                });
            }
        }
        for (name, n) in &old_nets {
            if !new_nets.contains_key(name) {
                records.push(ChangeRecord::NetRemoved {
                    name: name.to_string(),
                    pins: n.pins.clone(),
                });
            }
        }

        // Additions
        for (reference, c) in &new_components {
            if !old_components.contains_key(reference) {
                records.push(ChangeRecord::ComponentAdded {
                    reference: reference.to_string(),
                    lib_id: c.lib_id.clone(),
                    value: c.value.clone(),
                });
            }
        }
        for (name, n) in &new_nets {
            if !old_nets.contains_key(name) {
                records.push(ChangeRecord::NetAdded {
                    name: name.to_string(),
                    pins: n.pins.clone(),
                });
            }
        }

        // Modifications
        for (reference, c) in &new_components {
            if let Some(before) = old_components.get(reference) {
                let changes = self.component_changes(before, c);
                if !changes.is_empty() {
                    records.push(ChangeRecord::ComponentModified {
                        reference: reference.to_string(),
                        changes,
                    });
                }
            }
        }
        for (name, n) in &new_nets {
            if let Some(before) = old_nets.get(name) {
                let old_pins: BTreeSet<&PinRef> = before.pins.iter().collect();
                let new_pins: BTreeSet<&PinRef> = n.pins.iter().collect();
                if old_pins != new_pins {
                    records.push(ChangeRecord::NetModified {
                        name: name.to_string(),
                        added_pins: new_pins.difference(&old_pins).map(|p| (*p).clone()).collect(),
                        removed_pins: old_pins.difference(&new_pins).map(|p| (*p).clone()).collect(),
                    });
                }
            }
        }

        SnapshotDiff {
            from_generation: old.map(|s| s.generation),
            to_generation: new.generation,
            records,
        }
    }

    fn component_changes(&self, old: &ComponentRecord, new: &ComponentRecord) -> Vec<FieldChange> {
        let mut changes = Vec::new();

        if old.value != new.value {
            changes.push(FieldChange {
                field: ComponentField::Value,
                old: old.value.clone(),
                new: new.value.clone(),
            });
        }
        if old.footprint != new.footprint {
            changes.push(FieldChange {
                field: ComponentField::Footprint,
                old: old.footprint.clone().unwrap_or_default(),
                new: new.footprint.clone().unwrap_or_default(),
            });
        }
        if !old.position.coincident(&new.position, self.epsilon) {
            changes.push(FieldChange {
                field: ComponentField::Position,
                old: old.position.to_string(),
                new: new.position.to_string(),
            });
        }
        let (old_rotation, new_rotation) = (normalize_degrees(old.rotation), normalize_degrees(new.rotation));
        if (old_rotation - new_rotation).abs() > 1e-6 {
            changes.push(FieldChange {
                field: ComponentField::Rotation,
                old: round4(old_rotation).to_string(),
                new: round4(new_rotation).to_string(),
            });
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Mirror, Point};

    fn component(reference: &str, value: &str) -> ComponentRecord {
        ComponentRecord {
            reference: reference.to_string(),
            lib_id: "Device:R".to_string(),
            value: value.to_string(),
            footprint: Some("Resistor_SMD:R_0603_1608Metric".to_string()),
            position: Point::new(100.0, 50.0),
            rotation: 0.0,
            mirror: Mirror::None,
            units: vec![1],
            pin_count: 2,
            in_bom: true,
            dnp: false,
            sheet: String::new(),
        }
    }

    fn net(id: usize, name: &str, pins: &[(&str, &str)]) -> NetRecord {
        NetRecord {
            id,
            name: name.to_string(),
            pins: pins.iter().map(|(c, p)| PinRef::new(*c, *p)).collect(),
        }
    }

    fn snapshot(generation: u64, components: Vec<ComponentRecord>, nets: Vec<NetRecord>) -> Snapshot {
        Snapshot {
            generation,
            root: "top.kicad_sch".to_string(),
            components,
            nets,
            sources: vec![],
        }
    }

    #[test]
    fn test_value_change_is_single_modification() {
        let nets = vec![net(1, "VCC", &[("R1", "1")])];
        let old = snapshot(1, vec![component("R1", "1K")], nets.clone());
        let new = snapshot(2, vec![component("R1", "1.2K")], nets);

        let diff = SnapshotDiffer::default().diff(Some(&old), &new);
        assert_eq!(
            diff.records,
            vec![ChangeRecord::ComponentModified {
                reference: "R1".to_string(),
                changes: vec![FieldChange {
                    field: ComponentField::Value,
                    old: "1K".to_string(),
                    new: "1.2K".to_string(),
                }],
            }]
        );
        assert_eq!(diff.from_generation, Some(1));
        assert_eq!(diff.to_generation, 2);
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let s = snapshot(
            4,
            vec![component("C1", "100n"), component("R1", "10k")],
            vec![net(1, "GND", &[("C1", "2")]), net(2, "Net_1", &[("C1", "1"), ("R1", "2")])],
        );
        assert!(SnapshotDiffer::default().diff(Some(&s), &s.clone()).is_empty());
    }

    #[test]
    fn test_first_run_is_all_additions() {
        let s = snapshot(1, vec![component("R1", "10k")], vec![net(1, "VCC", &[("R1", "1")])]);
        let diff = SnapshotDiffer::default().diff(None, &s);
        assert_eq!(diff.from_generation, None);
        assert_eq!(diff.len(), 2);
        assert!(diff.records.iter().all(|r| r.kind() == ChangeKind::Addition));
    }

    #[test]
    fn test_groups_and_order() {
        let old = snapshot(
            1,
            vec![component("R1", "10k"), component("R3", "1k"), component("R2", "10k")],
            vec![net(1, "OLD", &[("R3", "1")]), net(2, "VCC", &[("R1", "1")])],
        );
        let mut moved = component("R2", "10k");
        moved.position = Point::new(110.0, 50.0);
        moved.rotation = 450.0;
        let new = snapshot(
            2,
            vec![component("C9", "1u"), component("R1", "10k"), moved],
            vec![net(1, "NEW", &[("C9", "1")]), net(2, "VCC", &[("C9", "2"), ("R2", "1")])],
        );

        let diff = SnapshotDiffer::default().diff(Some(&old), &new);
        let summary: Vec<(ChangeKind, &str)> = diff.records.iter().map(|r| (r.kind(), r.id())).collect();
        assert_eq!(
            summary,
            vec![
                (ChangeKind::Removal, "R3"),
                (ChangeKind::Removal, "OLD"),
                (ChangeKind::Addition, "C9"),
                (ChangeKind::Addition, "NEW"),
                (ChangeKind::Modification, "R2"),
                (ChangeKind::Modification, "VCC"),
            ]
        );

        match &diff.records[4] {
            ChangeRecord::ComponentModified { changes, .. } => {
                let fields: Vec<ComponentField> = changes.iter().map(|c| c.field).collect();
                assert_eq!(fields, vec![ComponentField::Position, ComponentField::Rotation]);
                assert_eq!(changes[1].new, "90");
            }
            other => panic!("unexpected record {:?}", other),
        }
        match &diff.records[5] {
            ChangeRecord::NetModified { added_pins, removed_pins, .. } => {
                assert_eq!(added_pins, &vec![PinRef::new("C9", "2"), PinRef::new("R2", "1")]);
                assert_eq!(removed_pins, &vec![PinRef::new("R1", "1")]);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_tiny_moves_and_full_turns_are_ignored() {
        let old = snapshot(1, vec![component("R1", "10k")], vec![]);
        let mut nudged = component("R1", "10k");
        nudged.position = Point::new(100.004, 50.0);
        nudged.rotation = 360.0;
        let new = snapshot(2, vec![nudged], vec![]);
        assert!(SnapshotDiffer::default().diff(Some(&old), &new).is_empty());
    }
}
