//! KiCAD Schematic Loader
//!
//! Reads one `.kicad_sch` document (KiCad 6 and later S-expression format)
//! into a [`SchematicDocument`] in that document's own coordinates.
//!
//! Format details relied on:
//! - All values are in millimeters, Y grows downwards on the sheet
//! - Properties: (property "KEY" "VALUE" ...)
//! - Position: (at X Y [ANGLE])
//! - Points: (pts (xy X Y) ...)
//! - Library pin geometry lives in (lib_symbols ...) with Y growing upwards

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::diagnostics::ExtractionWarning;
use crate::geometry::{Mirror, Placement, Point};
use crate::library::LibraryIndex;
use crate::parser::schema::*;
use crate::parser::sexp::{line_column, SExp, SExpParser};

/// A document that cannot be read at all. Fatal for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{file}:{line}:{column}: {message}")]
pub struct ParseError {
    pub file: String,
    /// Byte offset into the document.
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Document name plus its text, for turning byte offsets into [`ParseError`]s.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceText<'a> {
    pub document: &'a str,
    pub content: &'a str,
}

impl<'a> SourceText<'a> {
    pub fn new(document: &'a str, content: &'a str) -> Self {
        Self { document, content }
    }

    pub fn error(&self, offset: usize, message: impl Into<String>) -> ParseError {
        let (line, column) = line_column(self.content, offset);
        ParseError {
            file: self.document.to_string(),
            offset,
            line,
            column,
            message: message.into(),
        }
    }

    /// Numeric atom at `index` of `sexp`.
    pub fn number(&self, sexp: &SExp, index: usize, what: &str) -> Result<f64, ParseError> {
        let atom = sexp
            .atom_at(index)
            .ok_or_else(|| self.error(sexp.offset(), format!("missing {}", what)))?;
        atom.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.error(sexp.offset(), format!("invalid {} '{}'", what, atom)))
    }

    /// `(at X Y [ANGLE])` child of `sexp`.
    pub fn at(&self, sexp: &SExp) -> Result<(Point, f64), ParseError> {
        let at = sexp.get("at").ok_or_else(|| {
            self.error(
                sexp.offset(),
                format!("{} has no position", sexp.tag().unwrap_or("element")),
            )
        })?;
        let x = self.number(at, 1, "x coordinate")?;
        let y = self.number(at, 2, "y coordinate")?;
        let rotation = match at.atom_at(3) {
            Some(_) => self.number(at, 3, "rotation")?,
            None => 0.0,
        };
        Ok((Point::new(x, y), rotation))
    }
}

/// Result of loading one document: the model plus anything worth reporting.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: SchematicDocument,
    pub warnings: Vec<ExtractionWarning>,
}

/// Loader for KiCAD schematic documents.
///
/// Structural problems (bad tokens, missing mandatory fields, non-numeric
/// coordinates) abort the document with a [`ParseError`]. A symbol whose
/// library definition is unknown is kept, without pins, and reported as a
/// warning.
pub struct SchematicLoader;

impl SchematicLoader {
    pub fn load(
        document: &str,
        content: &str,
        library: &LibraryIndex,
    ) -> Result<LoadedDocument, ParseError> {
        let src = SourceText::new(document, content);
        let root = Self::parse_root(src, "kicad_sch")?;
        Self::load_tree(src, &root, library)
    }

    /// Build the document model from an already tokenized `kicad_sch` tree.
    pub(crate) fn load_tree(
        src: SourceText<'_>,
        root: &SExp,
        library: &LibraryIndex,
    ) -> Result<LoadedDocument, ParseError> {
        let document = src.document;
        let mut schematic = SchematicDocument::new(document);
        schematic.uuid = root.value("uuid").map(str::to_string);
        schematic.version = root.value("version").map(str::to_string);
        let mut warnings = Vec::new();

        for item in root.as_list().unwrap_or_default().iter().skip(1) {
            match item.tag() {
                Some("symbol") => {
                    let (symbol, warning) = Self::parse_symbol(src, item, library)?;
                    warnings.extend(warning);
                    schematic.symbols.push(symbol);
                }
                Some("wire") => schematic.wires.extend(Self::parse_wire(src, item)?),
                Some("junction") => schematic.junctions.push(Junction {
                    position: src.at(item)?.0,
                }),
                Some("label") => schematic
                    .labels
                    .push(Self::parse_label(src, item, LabelKind::Local)?),
                Some("global_label") => schematic
                    .labels
                    .push(Self::parse_label(src, item, LabelKind::Global)?),
                Some("hierarchical_label") => schematic
                    .labels
                    .push(Self::parse_label(src, item, LabelKind::Hierarchical)?),
                Some("sheet") => schematic.sheets.push(Self::parse_sheet(src, item)?),
                _ => {
                    // bus, no_connect, text, graphics, instances: not electrical here
                }
            }
        }

        debug!(
            "{}: {} symbols, {} wires, {} labels, {} sheets",
            document,
            schematic.symbols.len(),
            schematic.wires.len(),
            schematic.labels.len(),
            schematic.sheets.len()
        );

        Ok(LoadedDocument {
            document: schematic,
            warnings,
        })
    }

    /// Tokenize `content` and check the root tag.
    pub(crate) fn parse_root(src: SourceText<'_>, expected: &str) -> Result<SExp, ParseError> {
        let root = SExpParser::new(src.content)
            .parse()
            .map_err(|e| src.error(e.offset(), e.to_string()))?;

        match root.tag() {
            Some(tag) if tag == expected => Ok(root),
            Some(tag) => Err(src.error(
                root.offset(),
                format!("expected {} document, found {}", expected, tag),
            )),
            None => Err(src.error(root.offset(), format!("expected {} document", expected))),
        }
    }

    fn parse_symbol(
        src: SourceText<'_>,
        sexp: &SExp,
        library: &LibraryIndex,
    ) -> Result<(SymbolInstance, Option<ExtractionWarning>), ParseError> {
        let lib_id = sexp
            .value("lib_id")
            .ok_or_else(|| src.error(sexp.offset(), "symbol has no lib_id"))?
            .to_string();
        let (position, rotation) = src.at(sexp)?;
        let mirror = sexp
            .value("mirror")
            .and_then(Mirror::parse)
            .unwrap_or_default();
        let unit = match sexp.get("unit") {
            Some(unit) => {
                let atom = unit.atom_at(1).unwrap_or_default();
                atom.parse::<u32>()
                    .ok()
                    .filter(|u| *u >= 1)
                    .ok_or_else(|| src.error(unit.offset(), format!("invalid unit '{}'", atom)))?
            }
            None => 1,
        };
        let in_bom = sexp.value("in_bom").map_or(true, |v| v == "yes");
        let dnp = sexp.value("dnp").is_some_and(|v| v == "yes");

        let mut reference = None;
        let mut value = String::new();
        let mut footprint = None;
        for prop in sexp.get_all("property") {
            let text = prop.atom_at(2).unwrap_or_default();
            match prop.atom_at(1) {
                Some("Reference") => reference = Some(text.to_string()),
                Some("Value") => value = text.to_string(),
                Some("Footprint") if !text.is_empty() => footprint = Some(text.to_string()),
                _ => {}
            }
        }
        let reference = reference.ok_or_else(|| {
            src.error(
                sexp.offset(),
                format!("symbol {} has no Reference property", lib_id),
            )
        })?;

        // lib_name points at a locally edited copy of the library symbol.
        let lookup_id = sexp
            .value("lib_name")
            .filter(|name| library.contains(src.document, name))
            .unwrap_or(lib_id.as_str());

        let mut symbol = SymbolInstance {
            uuid: sexp.value("uuid").map(str::to_string),
            reference,
            lib_id: lib_id.clone(),
            value,
            footprint,
            position,
            rotation,
            mirror,
            unit,
            in_bom,
            dnp,
            is_power: false,
            has_geometry: false,
            pins: Vec::new(),
        };

        let warning = match library.lookup(src.document, lookup_id) {
            Some(definition) => {
                let placement = Placement {
                    origin: position,
                    rotation,
                    mirror,
                };
                symbol.pins = definition
                    .pins_for_unit(unit)
                    .map(|pin| PlacedPin {
                        number: pin.number.clone(),
                        name: pin.name.clone(),
                        electrical_type: pin.electrical_type,
                        position: placement.apply(pin.offset),
                    })
                    .collect();
                symbol.is_power = definition.is_power;
                symbol.has_geometry = true;
                None
            }
            None => {
                // Power symbol references start with '#' by convention.
                symbol.is_power = symbol.reference.starts_with('#');
                Some(ExtractionWarning::MissingLibrarySymbol {
                    symbol: lib_id,
                    reference: symbol.reference.clone(),
                    document: src.document.to_string(),
                    position,
                })
            }
        };

        Ok((symbol, warning))
    }

    fn parse_wire(src: SourceText<'_>, sexp: &SExp) -> Result<Vec<WireSegment>, ParseError> {
        let pts = sexp
            .get("pts")
            .ok_or_else(|| src.error(sexp.offset(), "wire has no points"))?;
        let points = pts
            .get_all("xy")
            .into_iter()
            .map(|xy| {
                Ok(Point::new(
                    src.number(xy, 1, "x coordinate")?,
                    src.number(xy, 2, "y coordinate")?,
                ))
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        if points.len() < 2 {
            return Err(src.error(pts.offset(), "wire needs at least two points"));
        }

        Ok(points
            .windows(2)
            .map(|pair| WireSegment {
                start: pair[0],
                end: pair[1],
            })
            .collect())
    }

    fn parse_label(src: SourceText<'_>, sexp: &SExp, kind: LabelKind) -> Result<Label, ParseError> {
        let text = sexp
            .atom_at(1)
            .ok_or_else(|| src.error(sexp.offset(), format!("{} label has no text", kind)))?;
        let (position, _) = src.at(sexp)?;
        Ok(Label {
            text: text.to_string(),
            kind,
            position,
        })
    }

    fn parse_sheet(src: SourceText<'_>, sexp: &SExp) -> Result<SheetInstance, ParseError> {
        let (position, rotation) = src.at(sexp)?;

        let mut name = None;
        let mut file = None;
        for prop in sexp.get_all("property") {
            let text = prop.atom_at(2).map(str::to_string);
            match prop.atom_at(1) {
                // KiCad 6 wrote "Sheet name"/"Sheet file"; later versions drop the space.
                Some("Sheetname") | Some("Sheet name") => name = text,
                Some("Sheetfile") | Some("Sheet file") => file = text,
                _ => {}
            }
        }
        let file = file
            .filter(|f| !f.is_empty())
            .ok_or_else(|| src.error(sexp.offset(), "sheet has no file"))?;
        let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| {
            file.rsplit('/')
                .next()
                .unwrap_or(&file)
                .trim_end_matches(".kicad_sch")
                .to_string()
        });

        let pins = sexp
            .get_all("pin")
            .into_iter()
            .map(|pin| {
                let pin_name = pin
                    .atom_at(1)
                    .ok_or_else(|| src.error(pin.offset(), format!("pin of sheet {} has no name", name)))?;
                Ok(SheetPin {
                    name: pin_name.to_string(),
                    position: src.at(pin)?.0,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(SheetInstance {
            name,
            file,
            position,
            rotation,
            pins,
        })
    }
}
