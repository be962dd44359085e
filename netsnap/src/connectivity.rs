//! Connectivity Graph
//!
//! Merges connection points (pins, wire endpoints, junctions, labels, sheet
//! pins) into electrical nets with a union-find over point indices. All
//! geometric tests stay inside one sheet instance; labels and sheet-pin
//! bridges are the only way a net crosses sheets.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::unionfind::UnionFind;
use tracing::debug;

use crate::diagnostics::LabelSite;
use crate::geometry::Point;
use crate::hierarchy::{FlatDesign, ScopeId};
use crate::library::PinElectricalType;
use crate::parser::schema::LabelKind;
use crate::snapshot::PinRef;

/// What put a connection point into the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOwner {
    /// `pin` indexes `design.symbols[symbol].instance.pins`.
    Pin { symbol: usize, pin: usize },
    WireEnd { wire: usize },
    Junction { junction: usize },
    Label { label: usize },
    SheetPin { bridge: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionPoint {
    pub position: Point,
    pub scope: ScopeId,
    pub owner: PointOwner,
    /// Component pin, as opposed to a power-symbol pin or wiring.
    pub component_pin: bool,
}

/// A label (or power symbol) that names the net it is attached to.
#[derive(Debug, Clone)]
pub struct NetLabel {
    pub kind: LabelKind,
    pub text: String,
    /// Sheet path of the label's scope, empty for the root.
    pub sheet: String,
    pub document: String,
    /// Root coordinates.
    pub position: Point,
}

impl NetLabel {
    pub fn site(&self) -> LabelSite {
        LabelSite {
            text: self.text.clone(),
            sheet: self.sheet.clone(),
            document: self.document.clone(),
            position: self.position,
        }
    }
}

// Ordered by kind, text and sheet first so naming sees the shallowest sheet
// carrying a text before deeper ones.
impl Ord for NetLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.kind, &self.text, &self.sheet, &self.document)
            .cmp(&(other.kind, &other.text, &other.sheet, &other.document))
            .then_with(|| self.position.x.total_cmp(&other.position.x))
            .then_with(|| self.position.y.total_cmp(&other.position.y))
    }
}

impl PartialOrd for NetLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NetLabel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NetLabel {}

/// One electrically connected set with at least one component pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetCluster {
    pub pins: BTreeSet<PinRef>,
    /// Sorted and deduplicated.
    pub labels: Vec<NetLabel>,
}

pub struct ConnectivityGraph<'a> {
    design: &'a FlatDesign,
    points: Vec<ConnectionPoint>,
    sets: UnionFind<usize>,
    epsilon: f64,
}

impl<'a> ConnectivityGraph<'a> {
    /// Build the point arena and apply every union rule.
    pub fn build(design: &'a FlatDesign, epsilon: f64) -> Self {
        let points = Self::collect_points(design);
        let sets = UnionFind::new(points.len());
        let mut graph = Self {
            design,
            points,
            sets,
            epsilon,
        };

        // Step 1: both ends of a wire segment
        graph.unite_wire_ends();
        // Step 2: coincident points within one sheet
        graph.unite_coincident();
        // Step 3: junctions, labels and endpoints landing on a wire's interior
        graph.unite_wire_interiors();
        // Step 4: the same pin reached through several units
        graph.unite_shared_pins();
        // Step 5: label scopes and sheet-pin bridges
        graph.unite_labels();

        debug!("connectivity: {} points", graph.points.len());
        graph
    }

    pub fn points(&self) -> &[ConnectionPoint] {
        &self.points
    }

    /// True when points `a` and `b` ended up in the same set.
    pub fn connected(&self, a: usize, b: usize) -> bool {
        self.sets.equiv(a, b)
    }

    fn collect_points(design: &FlatDesign) -> Vec<ConnectionPoint> {
        let mut points = Vec::new();

        for (s, symbol) in design.symbols.iter().enumerate() {
            for (p, pin) in symbol.instance.pins.iter().enumerate() {
                points.push(ConnectionPoint {
                    position: pin.position,
                    scope: symbol.scope,
                    owner: PointOwner::Pin { symbol: s, pin: p },
                    component_pin: !symbol.instance.is_power,
                });
            }
        }
        for (w, wire) in design.wires.iter().enumerate() {
            for position in [wire.start, wire.end] {
                points.push(ConnectionPoint {
                    position,
                    scope: wire.scope,
                    owner: PointOwner::WireEnd { wire: w },
                    component_pin: false,
                });
            }
        }
        for (j, junction) in design.junctions.iter().enumerate() {
            points.push(ConnectionPoint {
                position: junction.position,
                scope: junction.scope,
                owner: PointOwner::Junction { junction: j },
                component_pin: false,
            });
        }
        for (l, label) in design.labels.iter().enumerate() {
            points.push(ConnectionPoint {
                position: label.position,
                scope: label.scope,
                owner: PointOwner::Label { label: l },
                component_pin: false,
            });
        }
        for (b, bridge) in design.bridges.iter().enumerate() {
            points.push(ConnectionPoint {
                position: bridge.position,
                scope: bridge.parent,
                owner: PointOwner::SheetPin { bridge: b },
                component_pin: false,
            });
        }

        points
    }

    fn unite_wire_ends(&mut self) {
        let mut first_end: HashMap<usize, usize> = HashMap::new();
        for (i, point) in self.points.iter().enumerate() {
            if let PointOwner::WireEnd { wire } = point.owner {
                match first_end.get(&wire) {
                    Some(&other) => {
                        self.sets.union(other, i);
                    }
                    None => {
                        first_end.insert(wire, i);
                    }
                }
            }
        }
    }

    /// Grid cell of `position`; far-out coordinates saturate into the edge cells.
    fn cell(&self, position: Point) -> (i64, i64) {
        (
            (position.x / self.epsilon).floor() as i64,
            (position.y / self.epsilon).floor() as i64,
        )
    }

    /// Spatial hash with epsilon-sized cells; neighbours are the 3x3 block.
    fn unite_coincident(&mut self) {
        let mut grid: HashMap<(ScopeId, i64, i64), Vec<usize>> = HashMap::new();

        for i in 0..self.points.len() {
            let point = self.points[i];
            let (cx, cy) = self.cell(point.position);

            for dx in -1..=1 {
                for dy in -1..=1 {
                    let key = (point.scope, cx.saturating_add(dx), cy.saturating_add(dy));
                    let Some(candidates) = grid.get(&key) else {
                        continue;
                    };
                    for &j in candidates {
                        let other = &self.points[j];
                        // Overlapping component pins are not a connection.
                        if point.component_pin && other.component_pin {
                            continue;
                        }
                        if point.position.coincident(&other.position, self.epsilon) {
                            self.sets.union(i, j);
                        }
                    }
                }
            }

            grid.entry((point.scope, cx, cy)).or_default().push(i);
        }
    }

    fn unite_wire_interiors(&mut self) {
        // Pins only connect at wire ends, which unite_coincident covers.
        let mut by_scope: BTreeMap<ScopeId, Vec<usize>> = BTreeMap::new();
        for (i, point) in self.points.iter().enumerate() {
            if !matches!(point.owner, PointOwner::Pin { .. }) {
                by_scope.entry(point.scope).or_default().push(i);
            }
        }

        for (w, wire) in self.design.wires.iter().enumerate() {
            let Some(candidates) = by_scope.get(&wire.scope) else {
                continue;
            };
            let Some(anchor) = candidates
                .iter()
                .copied()
                .find(|&i| self.points[i].owner == PointOwner::WireEnd { wire: w })
            else {
                continue;
            };

            let (min_x, max_x) = (wire.start.x.min(wire.end.x), wire.start.x.max(wire.end.x));
            let (min_y, max_y) = (wire.start.y.min(wire.end.y), wire.start.y.max(wire.end.y));
            for &i in candidates {
                let p = self.points[i].position;
                if p.x < min_x - self.epsilon
                    || p.x > max_x + self.epsilon
                    || p.y < min_y - self.epsilon
                    || p.y > max_y + self.epsilon
                {
                    continue;
                }
                if p.on_segment(&wire.start, &wire.end, self.epsilon) {
                    self.sets.union(anchor, i);
                }
            }
        }
    }

    fn unite_shared_pins(&mut self) {
        let mut first: HashMap<(&str, &str), usize> = HashMap::new();
        for (i, point) in self.points.iter().enumerate() {
            let PointOwner::Pin { symbol, pin } = point.owner else {
                continue;
            };
            if !point.component_pin {
                continue;
            }
            let instance = &self.design.symbols[symbol].instance;
            let key = (instance.reference.as_str(), instance.pins[pin].number.as_str());
            match first.get(&key) {
                Some(&other) => {
                    self.sets.union(other, i);
                }
                None => {
                    first.insert(key, i);
                }
            }
        }
    }

    fn unite_labels(&mut self) {
        // Group key: (kind, scope or None for design-wide, text)
        let mut groups: BTreeMap<(LabelKind, Option<ScopeId>, &str), Vec<usize>> = BTreeMap::new();

        for (i, point) in self.points.iter().enumerate() {
            match point.owner {
                PointOwner::Label { label } => {
                    let label = &self.design.labels[label];
                    let scope = match label.kind {
                        LabelKind::Global => None,
                        LabelKind::Hierarchical | LabelKind::Local => Some(label.scope),
                    };
                    groups
                        .entry((label.kind, scope, label.text.as_str()))
                        .or_default()
                        .push(i);
                }
                PointOwner::Pin { symbol, pin } if !point.component_pin => {
                    let instance = &self.design.symbols[symbol].instance;
                    // A power_in pin on a power symbol is a global label named by its value.
                    if instance.pins[pin].electrical_type == PinElectricalType::PowerIn
                        && !instance.value.is_empty()
                    {
                        groups
                            .entry((LabelKind::Global, None, instance.value.as_str()))
                            .or_default()
                            .push(i);
                    }
                }
                _ => {}
            }
        }

        for members in groups.values() {
            for pair in members.windows(2) {
                self.sets.union(pair[0], pair[1]);
            }
        }

        for (i, point) in self.points.iter().enumerate() {
            let PointOwner::SheetPin { bridge } = point.owner else {
                continue;
            };
            let bridge = &self.design.bridges[bridge];
            if !bridge.matched {
                continue;
            }
            let key = (LabelKind::Hierarchical, Some(bridge.child), bridge.name.as_str());
            if let Some(&child) = groups.get(&key).and_then(|members| members.first()) {
                self.sets.union(i, child);
            }
        }
    }

    /// Final sets holding at least one component pin, ordered by smallest pin.
    pub fn clusters(&self) -> Vec<NetCluster> {
        let mut by_root: BTreeMap<usize, (BTreeSet<PinRef>, BTreeSet<NetLabel>)> = BTreeMap::new();

        for (i, point) in self.points.iter().enumerate() {
            let entry = by_root.entry(self.sets.find(i)).or_default();
            match point.owner {
                PointOwner::Pin { symbol, pin } => {
                    let scope = &self.design.scopes[self.design.symbols[symbol].scope];
                    let instance = &self.design.symbols[symbol].instance;
                    let definition = &instance.pins[pin];
                    if point.component_pin {
                        entry
                            .0
                            .insert(PinRef::new(instance.reference.as_str(), definition.number.as_str()));
                    } else if definition.electrical_type == PinElectricalType::PowerIn
                        && !instance.value.is_empty()
                    {
                        entry.1.insert(NetLabel {
                            kind: LabelKind::Global,
                            text: instance.value.clone(),
                            sheet: scope.path.clone(),
                            document: scope.document.clone(),
                            position: definition.position,
                        });
                    }
                }
                PointOwner::Label { label } => {
                    let label = &self.design.labels[label];
                    let scope = &self.design.scopes[label.scope];
                    entry.1.insert(NetLabel {
                        kind: label.kind,
                        text: label.text.clone(),
                        sheet: scope.path.clone(),
                        document: scope.document.clone(),
                        position: label.position,
                    });
                }
                _ => {}
            }
        }

        let mut clusters: Vec<NetCluster> = by_root
            .into_values()
            .filter(|(pins, _)| !pins.is_empty())
            .map(|(pins, labels)| NetCluster {
                pins,
                labels: labels.into_iter().collect(),
            })
            .collect();
        clusters.sort_by(|a, b| a.pins.iter().next().cmp(&b.pins.iter().next()));
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Mirror, Transform, COINCIDENCE_EPSILON};
    use crate::hierarchy::{FlatJunction, FlatLabel, FlatSymbol, FlatWire, SheetBridge, SheetScope};
    use crate::parser::schema::{PlacedPin, SymbolInstance};

    fn two_pin(reference: &str, scope: ScopeId, p1: Point, p2: Point) -> FlatSymbol {
        let pin = |number: &str, position: Point| PlacedPin {
            number: number.to_string(),
            name: "~".to_string(),
            electrical_type: PinElectricalType::Passive,
            position,
        };
        FlatSymbol {
            scope,
            instance: SymbolInstance {
                uuid: None,
                reference: reference.to_string(),
                lib_id: "Device:R".to_string(),
                value: "10k".to_string(),
                footprint: None,
                position: p1,
                rotation: 0.0,
                mirror: Mirror::None,
                unit: 1,
                in_bom: true,
                dnp: false,
                is_power: false,
                has_geometry: true,
                pins: vec![pin("1", p1), pin("2", p2)],
            },
        }
    }

    fn design(sheets: usize) -> FlatDesign {
        let mut design = FlatDesign::default();
        for i in 0..sheets {
            design.scopes.push(SheetScope {
                path: if i == 0 { String::new() } else { format!("s{}", i) },
                document: "doc.kicad_sch".to_string(),
                parent: if i == 0 { None } else { Some(0) },
                transform: Transform::IDENTITY,
            });
        }
        design
    }

    fn wire(scope: ScopeId, start: Point, end: Point) -> FlatWire {
        FlatWire { scope, start, end }
    }

    fn label(scope: ScopeId, kind: LabelKind, text: &str, position: Point) -> FlatLabel {
        FlatLabel {
            scope,
            text: text.to_string(),
            kind,
            position,
        }
    }

    fn rendered(clusters: &[NetCluster]) -> Vec<Vec<String>> {
        clusters
            .iter()
            .map(|c| c.pins.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn test_single_wire_between_two_parts() {
        let mut d = design(1);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("B", 0, Point::new(20.0, 0.0), Point::new(30.0, 0.0)));
        d.wires.push(wire(0, Point::new(10.0, 0.0), Point::new(20.0, 0.0)));

        let graph = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON);
        assert_eq!(
            rendered(&graph.clusters()),
            vec![vec!["A.1"], vec!["A.2", "B.1"], vec!["B.2"]]
        );
    }

    #[test]
    fn test_cells_saturate_for_tiny_epsilon() {
        let mut d = design(1);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("B", 0, Point::new(20.0, 0.0), Point::new(30.0, 0.0)));
        d.wires.push(wire(0, Point::new(10.0, 0.0), Point::new(20.0, 0.0)));

        // 10.0 / 1e-300 is past i64::MAX, so every cell index clamps to the edge.
        let graph = ConnectivityGraph::build(&d, 1e-300);
        assert_eq!(
            rendered(&graph.clusters()),
            vec![vec!["A.1"], vec!["A.2", "B.1"], vec!["B.2"]]
        );
    }

    #[test]
    fn test_overlapping_pins_stay_apart() {
        let mut d = design(1);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("B", 0, Point::new(10.0, 0.0), Point::new(20.0, 0.0)));

        let graph = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON);
        assert_eq!(graph.clusters().len(), 4);
    }

    #[test]
    fn test_crossing_wires_need_a_junction() {
        let mut d = design(1);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 10.0), Point::new(0.0, 50.0)));
        d.symbols.push(two_pin("B", 0, Point::new(10.0, 0.0), Point::new(50.0, 0.0)));
        d.wires.push(wire(0, Point::new(0.0, 10.0), Point::new(20.0, 10.0)));
        d.wires.push(wire(0, Point::new(10.0, 0.0), Point::new(10.0, 20.0)));

        let crossing = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        assert_eq!(crossing.len(), 4);

        d.junctions.push(FlatJunction {
            scope: 0,
            position: Point::new(10.0, 10.0),
        });
        let joined = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        assert_eq!(rendered(&joined)[0], vec!["A.1", "B.1"]);
    }

    #[test]
    fn test_t_connection_on_wire_interior() {
        let mut d = design(1);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(0.0, 5.0)));
        d.symbols.push(two_pin("B", 0, Point::new(10.0, 20.0), Point::new(10.0, 30.0)));
        d.wires.push(wire(0, Point::new(0.0, 0.0), Point::new(20.0, 0.0)));
        d.wires.push(wire(0, Point::new(10.0, 0.0), Point::new(10.0, 20.0)));

        let clusters = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        assert_eq!(rendered(&clusters)[0], vec!["A.1", "B.1"]);
    }

    #[test]
    fn test_global_labels_merge_disjoint_clusters() {
        let mut d = design(2);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("s1/B", 1, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.wires.push(wire(0, Point::new(0.0, 0.0), Point::new(0.0, -5.0)));
        d.wires.push(wire(1, Point::new(0.0, 0.0), Point::new(0.0, -5.0)));
        d.labels.push(label(0, LabelKind::Global, "VCC", Point::new(0.0, -5.0)));
        d.labels.push(label(1, LabelKind::Global, "VCC", Point::new(0.0, -5.0)));

        let clusters = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        let vcc = clusters.iter().find(|c| c.pins.len() == 2).unwrap();
        assert_eq!(
            vcc.pins.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["A.1", "s1/B.1"]
        );
        assert_eq!(vcc.labels.len(), 2);
    }

    #[test]
    fn test_local_labels_do_not_cross_sheets() {
        let mut d = design(2);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("s1/B", 1, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.labels.push(label(0, LabelKind::Local, "SIG", Point::new(0.0, 0.0)));
        d.labels.push(label(1, LabelKind::Local, "SIG", Point::new(0.0, 0.0)));

        let clusters = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        assert!(clusters.iter().all(|c| c.pins.len() == 1));
    }

    #[test]
    fn test_hierarchical_label_joins_through_bridge_only() {
        let mut d = design(3);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("s1/B", 1, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("s2/B", 2, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.labels.push(label(1, LabelKind::Hierarchical, "IN", Point::new(0.0, 0.0)));
        d.labels.push(label(2, LabelKind::Hierarchical, "IN", Point::new(0.0, 0.0)));
        d.wires.push(wire(0, Point::new(10.0, 0.0), Point::new(50.0, 0.0)));
        d.bridges.push(SheetBridge {
            parent: 0,
            child: 1,
            name: "IN".to_string(),
            position: Point::new(50.0, 0.0),
            matched: true,
        });

        let clusters = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        let joined = clusters.iter().find(|c| c.pins.len() == 2).unwrap();
        assert_eq!(
            joined.pins.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["A.2", "s1/B.1"]
        );
        // s2 has no bridge, so its IN stays alone.
        assert!(clusters
            .iter()
            .any(|c| c.pins.len() == 1 && c.pins.contains(&PinRef::new("s2/B", "1"))));
    }

    #[test]
    fn test_power_symbol_names_and_connects() {
        let mut d = design(1);
        d.symbols.push(two_pin("A", 0, Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        d.symbols.push(two_pin("B", 0, Point::new(50.0, 0.0), Point::new(60.0, 0.0)));
        for (i, x) in [10.0, 60.0].into_iter().enumerate() {
            let mut gnd = two_pin(&format!("#PWR0{}", i), 0, Point::new(x, 0.0), Point::new(x, 5.0));
            gnd.instance.is_power = true;
            gnd.instance.value = "GND".to_string();
            gnd.instance.pins.truncate(1);
            gnd.instance.pins[0].electrical_type = PinElectricalType::PowerIn;
            d.symbols.push(gnd);
        }

        let clusters = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        let gnd = clusters.iter().find(|c| c.pins.len() == 2).unwrap();
        assert!(gnd.pins.contains(&PinRef::new("A", "2")));
        assert!(gnd.pins.contains(&PinRef::new("B", "2")));
        assert_eq!(gnd.labels[0].text, "GND");
        assert!(clusters.iter().all(|c| c.pins.iter().all(|p| !p.component.starts_with('#'))));
    }

    #[test]
    fn test_every_pin_in_exactly_one_cluster() {
        let mut d = design(1);
        for i in 0..20 {
            let x = i as f64 * 5.0;
            d.symbols.push(two_pin(&format!("R{}", i), 0, Point::new(x, 0.0), Point::new(x, 10.0)));
        }
        d.wires.push(wire(0, Point::new(0.0, 10.0), Point::new(95.0, 10.0)));

        let clusters = ConnectivityGraph::build(&d, COINCIDENCE_EPSILON).clusters();
        let total: usize = clusters.iter().map(|c| c.pins.len()).sum();
        assert_eq!(total, 40);
        let all: BTreeSet<&PinRef> = clusters.iter().flat_map(|c| c.pins.iter()).collect();
        assert_eq!(all.len(), 40);
        // Pins at the wire ends join it; pins along the interior do not.
        assert_eq!(clusters.iter().map(|c| c.pins.len()).max(), Some(2));
    }
}
