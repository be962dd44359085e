//! Net naming by label precedence: global, then hierarchical, then local,
//! then a synthetic `Net_<n>`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connectivity::{NetCluster, NetLabel};
use crate::diagnostics::ExtractionWarning;
use crate::parser::schema::LabelKind;
use crate::snapshot::{NetRecord, PinRef};

/// How to choose between several distinct label names on one net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Lexicographically smallest.
    #[default]
    Smallest,
    Largest,
    /// Shortest, then lexicographically smallest.
    Shortest,
}

impl TieBreak {
    fn pick<'a>(&self, candidates: &BTreeSet<&'a str>) -> Option<&'a str> {
        match self {
            TieBreak::Smallest => candidates.iter().next().copied(),
            TieBreak::Largest => candidates.iter().next_back().copied(),
            TieBreak::Shortest => candidates.iter().copied().min_by_key(|c| (c.len(), *c)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPolicy {
    pub tie_break: TieBreak,
    pub synthetic_prefix: String,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::Smallest,
            synthetic_prefix: "Net_".to_string(),
        }
    }
}

pub struct NetNamer<'p> {
    policy: &'p NamingPolicy,
}

impl<'p> NetNamer<'p> {
    pub fn new(policy: &'p NamingPolicy) -> Self {
        Self { policy }
    }

    /// Name every cluster and return the nets sorted by name, with 1-based ids.
    pub fn name(&self, clusters: Vec<NetCluster>) -> (Vec<NetRecord>, Vec<ExtractionWarning>) {
        let mut warnings = Vec::new();
        let mut named: Vec<(String, NetCluster)> = Vec::new();
        let mut unnamed: Vec<NetCluster> = Vec::new();

        for cluster in clusters {
            match self.label_name(&cluster, &mut warnings) {
                Some(name) => named.push((name, cluster)),
                None => unnamed.push(cluster),
            }
        }

        // Smallest member reference first, larger nets first among equals.
        unnamed.sort_by_cached_key(|cluster| {
            let smallest = cluster
                .pins
                .iter()
                .next()
                .map(|p| p.component.clone())
                .unwrap_or_default();
            (smallest, Reverse(cluster.pins.len()), cluster.pins.clone())
        });
        named.extend(unnamed.into_iter().enumerate().map(|(i, cluster)| {
            (format!("{}{}", self.policy.synthetic_prefix, i + 1), cluster)
        }));

        let named = Self::deduplicate(named, &mut warnings);

        let mut nets: Vec<NetRecord> = named
            .into_iter()
            .map(|(name, cluster)| NetRecord {
                id: 0,
                name,
                pins: cluster.pins.into_iter().collect(),
            })
            .collect();
        nets.sort_by(|a, b| a.name.cmp(&b.name));
        for (i, net) in nets.iter_mut().enumerate() {
            net.id = i + 1;
        }

        debug!("named {} nets", nets.len());
        (nets, warnings)
    }

    /// Highest-precedence tier wins. Within a tier the tie-break picks among
    /// raw texts; the chosen text is qualified with the shallowest sheet
    /// carrying it.
    fn label_name(
        &self,
        cluster: &NetCluster,
        warnings: &mut Vec<ExtractionWarning>,
    ) -> Option<String> {
        for kind in [LabelKind::Global, LabelKind::Hierarchical, LabelKind::Local] {
            // Labels are sorted, so within one text the smallest sheet path comes first.
            let tier: Vec<&NetLabel> = cluster.labels.iter().filter(|l| l.kind == kind).collect();
            if tier.is_empty() {
                continue;
            }

            let texts: BTreeSet<&str> = tier.iter().map(|l| l.text.as_str()).collect();
            let text = self.policy.tie_break.pick(&texts)?;
            let chosen = qualified_name(tier.iter().find(|l| l.text == text)?);

            if texts.len() > 1 {
                warnings.push(ExtractionWarning::AmbiguousLabel {
                    kind,
                    texts: texts.into_iter().map(str::to_string).collect(),
                    chosen: chosen.clone(),
                    pin: smallest_pin(cluster),
                    labels: tier.iter().map(|l| l.site()).collect(),
                });
            }
            return Some(chosen);
        }
        None
    }

    /// The net with the smallest pin keeps a shared name; the rest get `_2`, `_3`...
    fn deduplicate(
        named: Vec<(String, NetCluster)>,
        warnings: &mut Vec<ExtractionWarning>,
    ) -> Vec<(String, NetCluster)> {
        let mut by_name: BTreeMap<String, Vec<NetCluster>> = BTreeMap::new();
        for (name, cluster) in named {
            by_name.entry(name).or_default().push(cluster);
        }
        let mut taken: BTreeSet<String> = by_name.keys().cloned().collect();

        let mut result = Vec::new();
        for (name, mut clusters) in by_name {
            clusters.sort_by(|a, b| a.pins.iter().next().cmp(&b.pins.iter().next()));
            let mut suffix = 1;
            for (i, cluster) in clusters.into_iter().enumerate() {
                if i == 0 {
                    result.push((name.clone(), cluster));
                    continue;
                }
                let renamed = loop {
                    suffix += 1;
                    let candidate = format!("{}_{}", name, suffix);
                    if !taken.contains(&candidate) {
                        break candidate;
                    }
                };
                taken.insert(renamed.clone());
                let labels = cluster
                    .labels
                    .iter()
                    .filter(|l| qualified_name(l) == name)
                    .map(NetLabel::site)
                    .collect();
                warnings.push(ExtractionWarning::DuplicateNetName {
                    name: name.clone(),
                    renamed_to: renamed.clone(),
                    pin: smallest_pin(&cluster),
                    labels,
                });
                result.push((renamed, cluster));
            }
        }
        result
    }
}

fn smallest_pin(cluster: &NetCluster) -> PinRef {
    cluster.pins.iter().next().cloned().unwrap_or_else(|| PinRef::new("", ""))
}

/// Global labels name a net as written; other labels are qualified with their sheet.
fn qualified_name(label: &NetLabel) -> String {
    if label.kind == LabelKind::Global || label.sheet.is_empty() {
        label.text.clone()
    } else {
        format!("{}/{}", label.sheet, label.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn cluster(pins: &[(&str, &str)], labels: &[(LabelKind, &str, &str)]) -> NetCluster {
        NetCluster {
            pins: pins.iter().map(|(c, p)| PinRef::new(*c, *p)).collect(),
            labels: labels
                .iter()
                .map(|(kind, text, sheet)| NetLabel {
                    kind: *kind,
                    text: text.to_string(),
                    sheet: sheet.to_string(),
                    document: "doc.kicad_sch".to_string(),
                    position: Point::new(0.0, 0.0),
                })
                .collect(),
        }
    }

    fn names(nets: &[NetRecord]) -> Vec<(&str, Vec<String>)> {
        nets.iter()
            .map(|n| (n.name.as_str(), n.pins.iter().map(ToString::to_string).collect()))
            .collect()
    }

    #[test]
    fn test_synthetic_numbering_by_smallest_reference() {
        let policy = NamingPolicy::default();
        let clusters = vec![
            cluster(&[("A", "1")], &[]),
            cluster(&[("A", "2"), ("B", "1")], &[]),
            cluster(&[("B", "2")], &[]),
        ];
        let (nets, warnings) = NetNamer::new(&policy).name(clusters);
        assert!(warnings.is_empty());
        assert_eq!(
            names(&nets),
            vec![
                ("Net_1", vec!["A.2".to_string(), "B.1".to_string()]),
                ("Net_2", vec!["A.1".to_string()]),
                ("Net_3", vec!["B.2".to_string()]),
            ]
        );
        assert_eq!(nets.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_precedence_global_over_local() {
        let policy = NamingPolicy::default();
        let clusters = vec![cluster(
            &[("R1", "1")],
            &[(LabelKind::Local, "AAA", ""), (LabelKind::Global, "VCC", "")],
        )];
        let (nets, _) = NetNamer::new(&policy).name(clusters);
        assert_eq!(nets[0].name, "VCC");
    }

    #[test]
    fn test_ambiguous_labels_tie_break() {
        let clusters = || {
            vec![cluster(
                &[("R1", "1")],
                &[(LabelKind::Global, "VDD", ""), (LabelKind::Global, "V3V3", "")],
            )]
        };

        let (nets, warnings) = NetNamer::new(&NamingPolicy::default()).name(clusters());
        assert_eq!(nets[0].name, "V3V3");
        assert_eq!(warnings.len(), 1);
        match &warnings[0] {
            ExtractionWarning::AmbiguousLabel {
                kind,
                texts,
                chosen,
                pin,
                labels,
            } => {
                assert_eq!(*kind, LabelKind::Global);
                assert_eq!(texts, &vec!["V3V3".to_string(), "VDD".to_string()]);
                assert_eq!(chosen, "V3V3");
                assert_eq!(pin, &PinRef::new("R1", "1"));
                assert_eq!(labels.len(), 2);
                assert!(labels.iter().all(|l| l.document == "doc.kicad_sch"));
            }
            other => panic!("unexpected warning {:?}", other),
        }
        let message = warnings[0].to_string();
        assert!(message.contains("R1.1"), "{}", message);
        assert!(message.contains("doc.kicad_sch"), "{}", message);

        let shortest = NamingPolicy {
            tie_break: TieBreak::Shortest,
            ..NamingPolicy::default()
        };
        let (nets, _) = NetNamer::new(&shortest).name(clusters());
        assert_eq!(nets[0].name, "VDD");
    }

    #[test]
    fn test_tie_break_uses_label_text_over_sheet_depth() {
        let policy = NamingPolicy::default();
        let clusters = vec![cluster(
            &[("ch1/R1", "1")],
            &[
                (LabelKind::Hierarchical, "A", "ch1/sub"),
                (LabelKind::Hierarchical, "B", "ch1"),
            ],
        )];
        let (nets, warnings) = NetNamer::new(&policy).name(clusters);
        assert_eq!(nets[0].name, "ch1/sub/A");
        assert!(matches!(
            &warnings[..],
            [ExtractionWarning::AmbiguousLabel { chosen, .. }] if chosen == "ch1/sub/A"
        ));
    }

    #[test]
    fn test_shallowest_sheet_qualifies_chosen_text() {
        let policy = NamingPolicy::default();
        let clusters = vec![cluster(
            &[("ch1/R1", "1")],
            &[
                (LabelKind::Hierarchical, "A", "ch1/sub"),
                (LabelKind::Hierarchical, "A", "ch1"),
            ],
        )];
        let (nets, warnings) = NetNamer::new(&policy).name(clusters);
        assert_eq!(nets[0].name, "ch1/A");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_sheet_local_names_are_qualified() {
        let policy = NamingPolicy::default();
        let clusters = vec![
            cluster(&[("ch1/R1", "1")], &[(LabelKind::Hierarchical, "OUT", "ch1")]),
            cluster(&[("ch2/R1", "1")], &[(LabelKind::Hierarchical, "OUT", "ch2")]),
            cluster(&[("R5", "1")], &[(LabelKind::Local, "OUT", "")]),
        ];
        let (nets, warnings) = NetNamer::new(&policy).name(clusters);
        let all: Vec<&str> = nets.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(all, vec!["OUT", "ch1/OUT", "ch2/OUT"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let policy = NamingPolicy::default();
        let clusters = vec![
            cluster(&[("R2", "1")], &[(LabelKind::Local, "SIG", "")]),
            cluster(&[("R1", "1")], &[(LabelKind::Local, "SIG", "")]),
        ];
        let (nets, warnings) = NetNamer::new(&policy).name(clusters);
        assert_eq!(
            names(&nets),
            vec![
                ("SIG", vec!["R1.1".to_string()]),
                ("SIG_2", vec!["R2.1".to_string()]),
            ]
        );
        match &warnings[..] {
            [ExtractionWarning::DuplicateNetName {
                name,
                renamed_to,
                pin,
                labels,
            }] => {
                assert_eq!(name, "SIG");
                assert_eq!(renamed_to, "SIG_2");
                assert_eq!(pin, &PinRef::new("R2", "1"));
                assert_eq!(labels.len(), 1);
            }
            other => panic!("unexpected warnings {:?}", other),
        }
        assert!(warnings[0].to_string().contains("at R2.1"));
    }

    #[test]
    fn test_custom_prefix() {
        let policy = NamingPolicy {
            synthetic_prefix: "N$".to_string(),
            ..NamingPolicy::default()
        };
        let (nets, _) = NetNamer::new(&policy).name(vec![cluster(&[("U1", "3")], &[])]);
        assert_eq!(nets[0].name, "N$1");
    }
}
