//! Library index: symbol identifier to pin geometry.
//!
//! Assembled once per extraction run from the `lib_symbols` sections embedded
//! in every project document (plus any external `.kicad_sym` libraries) and
//! then passed, read-only, to the loader.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::Point;
use crate::parser::kicad::{ParseError, SchematicLoader, SourceText};
use crate::parser::sexp::SExp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinElectricalType {
    Input,
    Output,
    Bidirectional,
    TriState,
    Passive,
    Free,
    Unspecified,
    PowerIn,
    PowerOut,
    OpenCollector,
    OpenEmitter,
    NoConnect,
}

impl PinElectricalType {
    pub fn parse(token: &str) -> Self {
        match token {
            "input" => PinElectricalType::Input,
            "output" => PinElectricalType::Output,
            "bidirectional" => PinElectricalType::Bidirectional,
            "tri_state" => PinElectricalType::TriState,
            "passive" => PinElectricalType::Passive,
            "free" => PinElectricalType::Free,
            "power_in" => PinElectricalType::PowerIn,
            "power_out" => PinElectricalType::PowerOut,
            "open_collector" => PinElectricalType::OpenCollector,
            "open_emitter" => PinElectricalType::OpenEmitter,
            "no_connect" => PinElectricalType::NoConnect,
            _ => PinElectricalType::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinDefinition {
    pub number: String,
    pub name: String,
    /// Connection end of the pin relative to the symbol origin, library space (Y up).
    pub offset: Point,
    pub electrical_type: PinElectricalType,
    /// Owning unit; 0 means the pin belongs to every unit.
    pub unit: u32,
    pub lib_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibSymbol {
    pub lib_id: String,
    pub is_power: bool,
    pub pins: Vec<PinDefinition>,
    /// Base symbol name for derived library symbols.
    pub extends: Option<String>,
}

impl LibSymbol {
    pub fn new(lib_id: impl Into<String>) -> Self {
        Self {
            lib_id: lib_id.into(),
            is_power: false,
            pins: Vec::new(),
            extends: None,
        }
    }

    /// Pins present on a placed unit: shared pins plus the unit's own.
    pub fn pins_for_unit(&self, unit: u32) -> impl Iterator<Item = &PinDefinition> {
        self.pins
            .iter()
            .filter(move |pin| pin.unit == 0 || pin.unit == unit)
    }

    pub(crate) fn from_sexp(
        src: SourceText<'_>,
        lib_id: String,
        sexp: &SExp,
    ) -> Result<Self, ParseError> {
        let mut symbol = LibSymbol::new(lib_id);
        symbol.is_power = sexp.get("power").is_some();
        symbol.extends = sexp.value("extends").map(str::to_string);

        for pin in sexp.get_all("pin") {
            symbol.pins.push(Self::parse_pin(src, &symbol.lib_id, pin, 0)?);
        }

        // Sub-symbols are named NAME_UNIT_STYLE; style 2 is the De Morgan alternate.
        for unit_sexp in sexp.get_all("symbol") {
            let unit_name = unit_sexp.atom_at(1).unwrap_or_default();
            let (unit, style) = parse_unit_name(unit_name);
            if style > 1 {
                continue;
            }
            for pin in unit_sexp.get_all("pin") {
                symbol.pins.push(Self::parse_pin(src, &symbol.lib_id, pin, unit)?);
            }
        }

        Ok(symbol)
    }

    /// `(pin TYPE STYLE (at X Y ANGLE) (length L) (name "N") (number "1"))`
    fn parse_pin(
        src: SourceText<'_>,
        lib_id: &str,
        sexp: &SExp,
        unit: u32,
    ) -> Result<PinDefinition, ParseError> {
        let electrical_type = PinElectricalType::parse(sexp.atom_at(1).unwrap_or("unspecified"));
        let (offset, _) = src.at(sexp)?;
        let number = sexp
            .value("number")
            .ok_or_else(|| src.error(sexp.offset(), format!("pin of {} has no number", lib_id)))?
            .to_string();
        let name = sexp.value("name").unwrap_or_default().to_string();

        Ok(PinDefinition {
            number,
            name,
            offset,
            electrical_type,
            unit,
            lib_id: lib_id.to_string(),
        })
    }
}

fn parse_unit_name(name: &str) -> (u32, u32) {
    let mut parts = name.rsplitn(3, '_');
    let style = parts.next().and_then(|s| s.parse().ok());
    let unit = parts.next().and_then(|s| s.parse().ok());
    match (unit, style) {
        (Some(unit), Some(style)) => (unit, style),
        _ => (0, 1),
    }
}

/// Immutable symbol-to-pin lookup for one extraction run.
#[derive(Debug, Clone, Default)]
pub struct LibraryIndex {
    by_document: BTreeMap<(String, String), Arc<LibSymbol>>,
    shared: BTreeMap<String, Arc<LibSymbol>>,
}

impl LibraryIndex {
    pub fn builder() -> LibraryIndexBuilder {
        LibraryIndexBuilder::default()
    }

    /// Prefer the definition embedded in `document`, then any other source.
    pub fn lookup(&self, document: &str, lib_id: &str) -> Option<&LibSymbol> {
        self.by_document
            .get(&(document.to_string(), lib_id.to_string()))
            .or_else(|| self.shared.get(lib_id))
            .map(Arc::as_ref)
    }

    pub fn contains(&self, document: &str, lib_id: &str) -> bool {
        self.lookup(document, lib_id).is_some()
    }

    /// Number of distinct symbol identifiers.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct LibraryIndexBuilder {
    by_document: BTreeMap<(String, String), LibSymbol>,
    shared: BTreeMap<String, LibSymbol>,
}

impl LibraryIndexBuilder {
    /// Register a symbol. With a document it is that document's own
    /// definition; the first registration of an identifier is also the
    /// fallback for every other document.
    pub fn insert(&mut self, document: Option<&str>, symbol: LibSymbol) -> &mut Self {
        if let Some(document) = document {
            self.by_document
                .insert((document.to_string(), symbol.lib_id.clone()), symbol.clone());
        }
        self.shared.entry(symbol.lib_id.clone()).or_insert(symbol);
        self
    }

    /// Add the embedded `lib_symbols` of a schematic document.
    pub fn add_schematic(&mut self, document: &str, content: &str) -> Result<&mut Self, ParseError> {
        let src = SourceText::new(document, content);
        let root = SchematicLoader::parse_root(src, "kicad_sch")?;
        self.add_schematic_tree(src, &root)
    }

    /// Same as [`add_schematic`](Self::add_schematic) for an already tokenized document.
    pub(crate) fn add_schematic_tree(
        &mut self,
        src: SourceText<'_>,
        root: &SExp,
    ) -> Result<&mut Self, ParseError> {
        let document = src.document;
        let mut count = 0;
        if let Some(lib_symbols) = root.get("lib_symbols") {
            for sexp in lib_symbols.get_all("symbol") {
                let lib_id = sexp
                    .atom_at(1)
                    .ok_or_else(|| src.error(sexp.offset(), "library symbol has no name"))?;
                let symbol = LibSymbol::from_sexp(src, lib_id.to_string(), sexp)?;
                self.insert(Some(document), symbol);
                count += 1;
            }
        }
        debug!("{}: {} embedded library symbols", document, count);
        Ok(self)
    }

    /// Add an external `.kicad_sym` library under `nickname`.
    pub fn add_symbol_library(
        &mut self,
        nickname: &str,
        source: &str,
        content: &str,
    ) -> Result<&mut Self, ParseError> {
        let src = SourceText::new(source, content);
        let root = SchematicLoader::parse_root(src, "kicad_symbol_lib")?;
        let mut count = 0;
        for sexp in root.get_all("symbol") {
            let name = sexp
                .atom_at(1)
                .ok_or_else(|| src.error(sexp.offset(), "library symbol has no name"))?;
            let symbol = LibSymbol::from_sexp(src, format!("{}:{}", nickname, name), sexp)?;
            self.insert(None, symbol);
            count += 1;
        }
        debug!("{}: {} library symbols as {}", source, count, nickname);
        Ok(self)
    }

    /// Resolve `extends` derivations and freeze the index.
    pub fn build(self) -> LibraryIndex {
        let by_document = self
            .by_document
            .iter()
            .map(|((document, lib_id), symbol)| {
                let resolved = resolve_extends(symbol, |base| {
                    self.by_document
                        .get(&(document.clone(), base.to_string()))
                        .or_else(|| self.shared.get(base))
                });
                ((document.clone(), lib_id.clone()), Arc::new(resolved))
            })
            .collect();
        let shared = self
            .shared
            .iter()
            .map(|(lib_id, symbol)| {
                let resolved = resolve_extends(symbol, |base| self.shared.get(base));
                (lib_id.clone(), Arc::new(resolved))
            })
            .collect();

        LibraryIndex {
            by_document,
            shared,
        }
    }
}

fn resolve_extends<'a>(
    symbol: &LibSymbol,
    find: impl Fn(&str) -> Option<&'a LibSymbol>,
) -> LibSymbol {
    let mut resolved = symbol.clone();
    let mut seen = vec![symbol.lib_id.clone()];
    let mut current = symbol.extends.clone();

    // Derivation chains are short; `seen` guards against malformed loops.
    while let Some(base_name) = current {
        let base_id = match symbol.lib_id.split_once(':') {
            Some((library, _)) => format!("{}:{}", library, base_name),
            None => base_name,
        };
        if seen.contains(&base_id) {
            break;
        }
        let Some(base) = find(&base_id) else {
            break;
        };
        if resolved.pins.is_empty() {
            resolved.pins = base
                .pins
                .iter()
                .map(|pin| PinDefinition {
                    lib_id: symbol.lib_id.clone(),
                    ..pin.clone()
                })
                .collect();
        }
        resolved.is_power |= base.is_power;
        seen.push(base_id);
        current = base.extends.clone();
    }

    resolved
}
