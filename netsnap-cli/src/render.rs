//! Text renderings of snapshots, diffs and changelog entries.

use std::fmt::Write;

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::ValueEnum;
use netsnap::geometry::round4;
use netsnap::{
    estimate_tokens, ChangeRecord, ExtractionWarning, FieldChange, PinRef, Snapshot, SnapshotDiff,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Component and net tables, one line per entry
    #[default]
    Compact,
    /// Human-readable counts and warnings
    Summary,
    /// Full snapshot as JSON
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiffFormat {
    Human,
    Json,
}

pub fn render_snapshot(
    snapshot: &Snapshot,
    warnings: &[ExtractionWarning],
    format: OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Compact => Ok(compact(snapshot)),
        OutputFormat::Summary => Ok(summary(snapshot, warnings)),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "snapshot": snapshot,
                "warnings": warnings,
            });
            Ok(serde_json::to_string_pretty(&output)? + "\n")
        }
    }
}

fn pin_list(pins: &[PinRef]) -> String {
    pins.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

/// `REF|TYPE|VALUE|FOOTPRINT|X,Y|PINS|ROT` rows, then `NAME: REF.PIN ...` rows.
fn compact(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# root {}", snapshot.root);
    let _ = writeln!(out, "# components {}", snapshot.components.len());
    for c in &snapshot.components {
        let _ = writeln!(
            out,
            "{}|{}|{}|{}|{},{}|{}|{}",
            c.reference,
            c.lib_id,
            c.value,
            c.footprint.as_deref().unwrap_or(""),
            round4(c.position.x),
            round4(c.position.y),
            c.pin_count,
            round4(c.rotation)
        );
    }
    let _ = writeln!(out, "# nets {}", snapshot.nets.len());
    for net in &snapshot.nets {
        let _ = writeln!(out, "{}: {}", net.name, pin_list(&net.pins));
    }
    out
}

fn summary(snapshot: &Snapshot, warnings: &[ExtractionWarning]) -> String {
    let mut out = String::new();
    let in_bom = snapshot.components.iter().filter(|c| c.in_bom).count();
    let dnp = snapshot.components.iter().filter(|c| c.dnp).count();
    let unconnected = snapshot.nets.iter().filter(|n| n.pins.len() == 1).count();

    let _ = writeln!(out, "Snapshot {} of {}", snapshot.generation, snapshot.root);
    let _ = writeln!(out, "{}", "─".repeat(60));
    let _ = writeln!(
        out,
        "  Components: {} ({} in BOM, {} DNP)",
        snapshot.components.len(),
        in_bom,
        dnp
    );
    let _ = writeln!(
        out,
        "  Nets:       {} ({} single-pin)",
        snapshot.nets.len(),
        unconnected
    );
    let _ = writeln!(out, "  Pins:       {}", snapshot.pin_count());
    let source_tokens: usize = snapshot.sources.iter().map(|s| s.tokens).sum();
    let compact_tokens = estimate_tokens(&compact(snapshot));
    let _ = write!(
        out,
        "  Tokens:     ~{} source, ~{} compact",
        source_tokens, compact_tokens
    );
    if source_tokens > 0 {
        let saved = 100.0 * (source_tokens as f64 - compact_tokens as f64) / source_tokens as f64;
        let _ = write!(out, " ({:.1}% reduction)", saved);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  Sources:");
    for source in &snapshot.sources {
        let _ = writeln!(
            out,
            "    {} {}",
            &source.fingerprint[..source.fingerprint.len().min(12)],
            source.document
        );
    }

    if !warnings.is_empty() {
        let _ = writeln!(out, "\n  Warnings:");
        for warning in warnings {
            let _ = writeln!(out, "    - {}", warning);
        }
    }
    out
}

fn field_changes(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(|c| format!("{} {} -> {}", c.field, c.old, c.new))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One `-`, `+` or `*` prefixed line per change record.
pub fn change_lines(diff: &SnapshotDiff) -> Vec<String> {
    diff.records
        .iter()
        .map(|record| match record {
            ChangeRecord::ComponentRemoved { reference, lib_id, value } => {
                format!("- component {} ({} {})", reference, lib_id, value)
            }
            ChangeRecord::NetRemoved { name, pins } => {
                format!("- net {} ({} pins)", name, pins.len())
            }
            ChangeRecord::ComponentAdded { reference, lib_id, value } => {
                format!("+ component {} ({} {})", reference, lib_id, value)
            }
            ChangeRecord::NetAdded { name, pins } => {
                format!("+ net {}: {}", name, pin_list(pins))
            }
            ChangeRecord::ComponentModified { reference, changes } => {
                format!("* component {}: {}", reference, field_changes(changes))
            }
            ChangeRecord::NetModified { name, added_pins, removed_pins } => {
                let mut parts: Vec<String> =
                    added_pins.iter().map(|p| format!("+{}", p)).collect();
                parts.extend(removed_pins.iter().map(|p| format!("-{}", p)));
                format!("* net {}: {}", name, parts.join(" "))
            }
        })
        .collect()
}

pub fn render_diff(diff: &SnapshotDiff, format: DiffFormat) -> Result<String> {
    match format {
        DiffFormat::Json => Ok(serde_json::to_string_pretty(diff)? + "\n"),
        DiffFormat::Human => {
            if diff.is_empty() {
                return Ok("No changes\n".to_string());
            }
            let mut out = String::new();
            for line in change_lines(diff) {
                let _ = writeln!(out, "{}", line);
            }
            Ok(out)
        }
    }
}

/// `[YYYY-MM-DD HH:MM:SS] reason` followed by indented change lines.
pub fn changelog_entry(diff: &SnapshotDiff, reason: &str, at: DateTime<Local>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{}] {}", at.format("%Y-%m-%d %H:%M:%S"), reason);
    for line in change_lines(diff) {
        let _ = writeln!(out, "  {}", line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use netsnap::{ComponentField, ComponentRecord, NetRecord, Point, SourceFile};

    fn snapshot() -> Snapshot {
        Snapshot {
            generation: 3,
            root: "board.kicad_sch".to_string(),
            components: vec![ComponentRecord {
                reference: "R1".to_string(),
                lib_id: "Device:R".to_string(),
                value: "10k".to_string(),
                footprint: Some("R_0603".to_string()),
                position: Point::new(100.0, 50.8),
                rotation: 90.0,
                mirror: Default::default(),
                units: vec![1],
                pin_count: 2,
                in_bom: true,
                dnp: false,
                sheet: String::new(),
            }],
            nets: vec![NetRecord {
                id: 1,
                name: "VCC".to_string(),
                pins: vec![PinRef::new("R1", "1")],
            }],
            sources: vec![],
        }
    }

    #[test]
    fn test_compact_tables() {
        let text = render_snapshot(&snapshot(), &[], OutputFormat::Compact).unwrap();
        assert_eq!(
            text,
            "# root board.kicad_sch\n# components 1\nR1|Device:R|10k|R_0603|100,50.8|2|90\n# nets 1\nVCC: R1.1\n"
        );
    }

    #[test]
    fn test_json_includes_warnings() {
        let warning = ExtractionWarning::DuplicateNetName {
            name: "VCC".to_string(),
            renamed_to: "VCC_2".to_string(),
            pin: PinRef::new("R2", "1"),
            labels: vec![],
        };
        let text = render_snapshot(&snapshot(), &[warning], OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["snapshot"]["generation"], 3);
        assert_eq!(value["warnings"][0]["renamed_to"], "VCC_2");
        assert_eq!(value["warnings"][0]["pin"]["component"], "R2");
    }

    #[test]
    fn test_summary_reports_token_estimate() {
        let mut snapshot = snapshot();
        snapshot.sources = vec![SourceFile {
            document: "board.kicad_sch".to_string(),
            fingerprint: "ab".repeat(32),
            tokens: 1000,
        }];
        let compact_tokens =
            estimate_tokens(&render_snapshot(&snapshot, &[], OutputFormat::Compact).unwrap());

        let text = render_snapshot(&snapshot, &[], OutputFormat::Summary).unwrap();
        let expected = format!(
            "  Tokens:     ~1000 source, ~{} compact ({:.1}% reduction)\n",
            compact_tokens,
            100.0 * (1000.0 - compact_tokens as f64) / 1000.0
        );
        assert!(text.contains(&expected), "{}", text);
        assert!(text.contains("    abababababab board.kicad_sch"));

        snapshot.sources.clear();
        let text = render_snapshot(&snapshot, &[], OutputFormat::Summary).unwrap();
        assert!(text.contains(&format!("  Tokens:     ~0 source, ~{} compact\n", compact_tokens)));
    }

    #[test]
    fn test_changelog_entry() {
        let diff = SnapshotDiff {
            from_generation: Some(2),
            to_generation: 3,
            records: vec![
                ChangeRecord::ComponentRemoved {
                    reference: "C9".to_string(),
                    lib_id: "Device:C".to_string(),
                    value: "1u".to_string(),
                },
                ChangeRecord::NetAdded {
                    name: "SDA".to_string(),
                    pins: vec![PinRef::new("R1", "2"), PinRef::new("U1", "5")],
                },
                ChangeRecord::ComponentModified {
                    reference: "R1".to_string(),
                    changes: vec![FieldChange {
                        field: ComponentField::Value,
                        old: "4k7".to_string(),
                        new: "10k".to_string(),
                    }],
                },
                ChangeRecord::NetModified {
                    name: "GND".to_string(),
                    added_pins: vec![PinRef::new("U1", "4")],
                    removed_pins: vec![PinRef::new("C9", "2")],
                },
            ],
        };
        let at = Local.with_ymd_and_hms(2026, 3, 1, 9, 5, 0).unwrap();

        assert_eq!(
            changelog_entry(&diff, "board.kicad_sch changed", at),
            "[2026-03-01 09:05:00] board.kicad_sch changed\n\
             \x20 - component C9 (Device:C 1u)\n\
             \x20 + net SDA: R1.2 U1.5\n\
             \x20 * component R1: value 4k7 -> 10k\n\
             \x20 * net GND: +U1.4 -C9.2\n"
        );
    }

    #[test]
    fn test_empty_diff() {
        let diff = SnapshotDiff {
            from_generation: Some(1),
            to_generation: 2,
            records: vec![],
        };
        assert_eq!(render_diff(&diff, DiffFormat::Human).unwrap(), "No changes\n");
    }
}
