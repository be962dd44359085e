//! Hierarchical sheet flattening.
//!
//! Walks the sheet tree from the root document with an explicit stack,
//! placing every child document's entities into the root coordinate space
//! and qualifying references with the sheet path that led to them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::core::NetsnapError;
use crate::diagnostics::{ExtractionWarning, SheetPinSide};
use crate::geometry::{normalize_degrees, Point, Transform};
use crate::parser::schema::{LabelKind, SchematicDocument, SymbolInstance};
use crate::snapshot::ComponentRecord;

/// Access to already-loaded documents by project-relative identifier.
pub trait DocumentSource {
    fn document(&self, id: &str) -> Option<&SchematicDocument>;

    /// Every known identifier, sorted.
    fn document_ids(&self) -> Vec<&str>;
}

impl DocumentSource for BTreeMap<String, SchematicDocument> {
    fn document(&self, id: &str) -> Option<&SchematicDocument> {
        self.get(id)
    }

    fn document_ids(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// Index into [`FlatDesign::scopes`].
pub type ScopeId = usize;

/// One expanded sheet instance.
#[derive(Debug, Clone)]
pub struct SheetScope {
    /// `/`-joined sheet names from the root; empty for the root itself.
    pub path: String,
    pub document: String,
    pub parent: Option<ScopeId>,
    pub transform: Transform,
}

impl SheetScope {
    pub fn qualify(&self, name: &str) -> String {
        qualify(&self.path, name)
    }
}

#[derive(Debug, Clone)]
pub struct FlatSymbol {
    pub scope: ScopeId,
    /// Placement and pins in root coordinates; `reference` is qualified.
    pub instance: SymbolInstance,
}

#[derive(Debug, Clone, Copy)]
pub struct FlatWire {
    pub scope: ScopeId,
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, Copy)]
pub struct FlatJunction {
    pub scope: ScopeId,
    pub position: Point,
}

#[derive(Debug, Clone)]
pub struct FlatLabel {
    pub scope: ScopeId,
    pub text: String,
    pub kind: LabelKind,
    pub position: Point,
}

/// A sheet pin in the parent scope. `matched` when the child has a
/// hierarchical label of the same name.
#[derive(Debug, Clone)]
pub struct SheetBridge {
    pub parent: ScopeId,
    pub child: ScopeId,
    pub name: String,
    pub position: Point,
    pub matched: bool,
}

/// The whole design with unique references and absolute coordinates.
#[derive(Debug, Clone, Default)]
pub struct FlatDesign {
    pub root: String,
    pub scopes: Vec<SheetScope>,
    pub symbols: Vec<FlatSymbol>,
    pub wires: Vec<FlatWire>,
    pub junctions: Vec<FlatJunction>,
    pub labels: Vec<FlatLabel>,
    pub bridges: Vec<SheetBridge>,
    pub warnings: Vec<ExtractionWarning>,
}

impl FlatDesign {
    /// Distinct documents reached by the walk, sorted.
    pub fn documents(&self) -> Vec<String> {
        self.scopes
            .iter()
            .map(|s| s.document.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Component table: power symbols excluded, units of one reference merged.
    pub fn components(&self) -> Vec<ComponentRecord> {
        let mut by_reference: BTreeMap<&str, Vec<&FlatSymbol>> = BTreeMap::new();
        for symbol in self.symbols.iter().filter(|s| !s.instance.is_power) {
            by_reference
                .entry(symbol.instance.reference.as_str())
                .or_default()
                .push(symbol);
        }

        by_reference
            .into_iter()
            .filter_map(|(reference, mut units)| {
                units.sort_by_key(|s| s.instance.unit);
                let first = units.first()?;
                let pins: BTreeSet<&str> = units
                    .iter()
                    .flat_map(|s| s.instance.pins.iter().map(|p| p.number.as_str()))
                    .collect();
                Some(ComponentRecord {
                    reference: reference.to_string(),
                    lib_id: first.instance.lib_id.clone(),
                    value: first.instance.value.clone(),
                    footprint: first.instance.footprint.clone(),
                    position: first.instance.position,
                    rotation: first.instance.rotation,
                    mirror: first.instance.mirror,
                    units: units.iter().map(|s| s.instance.unit).collect(),
                    pin_count: pins.len(),
                    in_bom: first.instance.in_bom,
                    dnp: first.instance.dnp,
                    sheet: self.scopes[first.scope].path.clone(),
                })
            })
            .collect()
    }
}

/// Link from a parent scope to a child that is about to be expanded.
struct PendingSheet {
    parent: ScopeId,
    parent_document: String,
    name: String,
    file: String,
    pins: Vec<(String, Point)>,
}

enum Frame {
    Enter {
        document: String,
        path: String,
        transform: Transform,
        via: Option<PendingSheet>,
    },
    Exit,
}

pub struct HierarchyResolver;

impl HierarchyResolver {
    /// Pick the root document: explicit choice, then project hint, then the
    /// single document no other document references.
    pub fn find_root(
        source: &impl DocumentSource,
        explicit: Option<&str>,
        hint: Option<&str>,
    ) -> Result<String, NetsnapError> {
        if let Some(root) = explicit {
            let root = normalize_path(root);
            return match source.document(&root) {
                Some(_) => Ok(root),
                None => Err(NetsnapError::UnknownRoot { root }),
            };
        }
        if let Some(hint) = hint.map(normalize_path) {
            if source.document(&hint).is_some() {
                return Ok(hint);
            }
        }

        let ids = source.document_ids();
        let mut referenced = BTreeSet::new();
        for id in &ids {
            if let Some(doc) = source.document(id) {
                referenced.extend(doc.sheets.iter().map(|s| resolve_sheet_file(id, &s.file)));
            }
        }
        let candidates: Vec<String> = ids
            .into_iter()
            .filter(|id| !referenced.contains(*id))
            .map(str::to_string)
            .collect();

        match candidates.len() {
            0 => Err(NetsnapError::NoRoot),
            1 => Ok(candidates.into_iter().next().unwrap_or_default()),
            _ => Err(NetsnapError::AmbiguousRoot { candidates }),
        }
    }

    pub fn resolve(root: &str, source: &impl DocumentSource) -> Result<FlatDesign, NetsnapError> {
        let mut design = FlatDesign {
            root: root.to_string(),
            ..FlatDesign::default()
        };
        let mut active: Vec<String> = Vec::new();
        let mut stack = vec![Frame::Enter {
            document: root.to_string(),
            path: String::new(),
            transform: Transform::IDENTITY,
            via: None,
        }];

        while let Some(frame) = stack.pop() {
            let (document, path, transform, via) = match frame {
                Frame::Exit => {
                    active.pop();
                    continue;
                }
                Frame::Enter {
                    document,
                    path,
                    transform,
                    via,
                } => (document, path, transform, via),
            };

            if active.contains(&document) {
                let mut chain = active.clone();
                chain.push(document);
                return Err(NetsnapError::Cycle { chain });
            }
            let doc = match source.document(&document) {
                Some(doc) => doc,
                None => {
                    return Err(match via {
                        Some(sheet) => NetsnapError::MissingDocument {
                            parent: sheet.parent_document,
                            file: sheet.file,
                        },
                        None => NetsnapError::UnknownRoot { root: document },
                    })
                }
            };

            let scope = design.scopes.len();
            design.scopes.push(SheetScope {
                path: path.clone(),
                document: document.clone(),
                parent: via.as_ref().map(|s| s.parent),
                transform,
            });
            debug!("expanding {} as '{}'", document, path);

            if let Some(sheet) = via {
                Self::bridge(&mut design, scope, sheet, doc);
            }
            Self::place_entities(&mut design, scope, doc);

            active.push(document.clone());
            stack.push(Frame::Exit);

            let mut children = Vec::new();
            let mut sibling_names: HashMap<String, usize> = HashMap::new();
            for sheet in &doc.sheets {
                let base = sanitize_sheet_name(&sheet.name);
                let count = sibling_names.entry(base.clone()).or_insert(0);
                *count += 1;
                let name = if *count == 1 {
                    base
                } else {
                    let renamed = format!("{}_{}", base, count);
                    design.warnings.push(ExtractionWarning::DuplicateSheetName {
                        name: base,
                        renamed_to: renamed.clone(),
                        document: document.clone(),
                    });
                    renamed
                };

                let child_transform = transform.compose(&Transform::new(sheet.position, sheet.rotation));
                children.push(Frame::Enter {
                    document: resolve_sheet_file(&document, &sheet.file),
                    path: qualify(&path, &name),
                    transform: child_transform,
                    via: Some(PendingSheet {
                        parent: scope,
                        parent_document: document.clone(),
                        name,
                        file: sheet.file.clone(),
                        pins: sheet
                            .pins
                            .iter()
                            .map(|pin| (pin.name.clone(), transform.apply(pin.position)))
                            .collect(),
                    }),
                });
            }
            // Reversed so children pop in source order.
            stack.extend(children.into_iter().rev());
        }

        debug!(
            "flattened {} sheets: {} symbols, {} wires, {} labels",
            design.scopes.len(),
            design.symbols.len(),
            design.wires.len(),
            design.labels.len()
        );
        Ok(design)
    }

    fn bridge(design: &mut FlatDesign, child: ScopeId, sheet: PendingSheet, doc: &SchematicDocument) {
        let child_labels: BTreeSet<&str> = doc
            .labels
            .iter()
            .filter(|l| l.kind == LabelKind::Hierarchical)
            .map(|l| l.text.as_str())
            .collect();
        let sheet_pins: BTreeSet<&str> = sheet.pins.iter().map(|(name, _)| name.as_str()).collect();

        for (name, position) in &sheet.pins {
            let matched = child_labels.contains(name.as_str());
            if !matched {
                design.warnings.push(ExtractionWarning::UnmatchedSheetPin {
                    sheet: design.scopes[child].path.clone(),
                    pin: name.clone(),
                    side: SheetPinSide::MissingChildLabel,
                    document: sheet.parent_document.clone(),
                });
            }
            design.bridges.push(SheetBridge {
                parent: sheet.parent,
                child,
                name: name.clone(),
                position: *position,
                matched,
            });
        }

        for label in child_labels.difference(&sheet_pins) {
            design.warnings.push(ExtractionWarning::UnmatchedSheetPin {
                sheet: design.scopes[child].path.clone(),
                pin: label.to_string(),
                side: SheetPinSide::MissingSheetPin,
                document: doc.id.clone(),
            });
        }
    }

    fn place_entities(design: &mut FlatDesign, scope: ScopeId, doc: &SchematicDocument) {
        let sheet = &design.scopes[scope];
        let transform = sheet.transform;
        let path = sheet.path.clone();

        // reference -> (lib_id, units already placed)
        let mut seen: HashMap<String, (String, BTreeSet<u32>)> = HashMap::new();
        let mut taken: BTreeSet<String> = doc
            .symbols
            .iter()
            .map(|s| s.reference.clone())
            .collect();

        for symbol in &doc.symbols {
            let mut instance = symbol.clone();
            instance.position = transform.apply(symbol.position);
            instance.rotation = normalize_degrees(symbol.rotation + transform.rotation);
            for pin in &mut instance.pins {
                pin.position = transform.apply(pin.position);
            }

            // Power symbols never reach the component table; their
            // references are often left unannotated.
            if !symbol.is_power {
                let fresh = match seen.get_mut(&symbol.reference) {
                    Some((lib_id, units)) => *lib_id == symbol.lib_id && units.insert(symbol.unit),
                    None => {
                        seen.insert(
                            symbol.reference.clone(),
                            (symbol.lib_id.clone(), BTreeSet::from([symbol.unit])),
                        );
                        true
                    }
                };
                let reference = if fresh {
                    symbol.reference.clone()
                } else {
                    let renamed = (2..)
                        .map(|n| format!("{}_{}", symbol.reference, n))
                        .find(|candidate| !taken.contains(candidate))
                        .unwrap_or_default();
                    taken.insert(renamed.clone());
                    design.warnings.push(ExtractionWarning::DuplicateReference {
                        reference: qualify(&path, &symbol.reference),
                        renamed_to: qualify(&path, &renamed),
                        document: doc.id.clone(),
                        position: symbol.position,
                    });
                    renamed
                };
                instance.reference = qualify(&path, &reference);
            } else {
                instance.reference = qualify(&path, &symbol.reference);
            }

            design.symbols.push(FlatSymbol { scope, instance });
        }

        design.wires.extend(doc.wires.iter().map(|w| FlatWire {
            scope,
            start: transform.apply(w.start),
            end: transform.apply(w.end),
        }));
        design.junctions.extend(doc.junctions.iter().map(|j| FlatJunction {
            scope,
            position: transform.apply(j.position),
        }));
        design.labels.extend(doc.labels.iter().map(|l| FlatLabel {
            scope,
            text: l.text.clone(),
            kind: l.kind,
            position: transform.apply(l.position),
        }));
    }
}

fn qualify(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}

fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ' ' { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "sheet".to_string()
    } else {
        cleaned
    }
}

/// Normalize to a `/`-separated path without `.` or `..` segments.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Resolve a sheet file name relative to the directory of its parent document.
pub fn resolve_sheet_file(parent: &str, file: &str) -> String {
    match parent.rsplit_once('/') {
        Some((dir, _)) => normalize_path(&format!("{}/{}", dir, file)),
        None => normalize_path(file),
    }
}
