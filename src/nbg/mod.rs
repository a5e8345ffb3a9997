//! Node-based graph: the street network before turn expansion.
//!
//! Vertices are intersections, edges are directed road segments. Each
//! undirected input segment arrives as two directed edges; the backward one
//! carries the `reversed` flag. Per-edge metadata (name, travel mode, road
//! classification) lives in the deduplicated annotation table and edges
//! reference it by index.

pub mod annotation;
pub mod compressor;
pub mod geometry;

use rustc_hash::FxHashSet;

use crate::error::{Result, RoadloomError, WarningCounters};
use crate::formats::input_graph::{InputGraph, RawEdge};
use crate::geo::{FixedCoordinate, NodeId};
use crate::graph::{DynamicGraph, InputEdge};
use crate::nbg::geometry::GeometryId;

/// Name id of unnamed roads.
pub const EMPTY_NAME_ID: u32 = 0;

/// Sentinel for "no edge-based node assigned yet".
pub const INVALID_EDGE_BASED_NODE: u32 = u32::MAX;

/// Closed set of travel modes, 4 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TravelMode {
    Inaccessible = 0,
    Driving = 1,
    Cycling = 2,
    Walking = 3,
    Ferry = 4,
    Train = 5,
    Pushing = 6,
}

impl TravelMode {
    /// Decode a 4-bit mode tag; unknown tags fall back to inaccessible and
    /// are counted as a warning by the caller.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Inaccessible),
            1 => Some(Self::Driving),
            2 => Some(Self::Cycling),
            3 => Some(Self::Walking),
            4 => Some(Self::Ferry),
            5 => Some(Self::Train),
            6 => Some(Self::Pushing),
            _ => None,
        }
    }
}

/// Road priority, lower is more important. The values mirror the usual
/// highway ladder; links sit next to their parent class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RoadPriority(pub u8);

impl RoadPriority {
    pub const MOTORWAY: RoadPriority = RoadPriority(0);
    pub const TRUNK: RoadPriority = RoadPriority(2);
    pub const PRIMARY: RoadPriority = RoadPriority(4);
    pub const SECONDARY: RoadPriority = RoadPriority(6);
    pub const TERTIARY: RoadPriority = RoadPriority(8);
    pub const UNCLASSIFIED: RoadPriority = RoadPriority(10);
    pub const RESIDENTIAL: RoadPriority = RoadPriority(11);
    pub const SERVICE: RoadPriority = RoadPriority(13);
    pub const DRIVEWAY: RoadPriority = RoadPriority(14);
}

/// Classification flags of a road segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoadClassification {
    /// Priority ladder position; lower is more important.
    pub priority: u8,
    /// Connector/ramp to a road of this priority.
    pub link: bool,
    /// Tagged lane count; 0 = unknown.
    pub lanes: u8,
}

impl RoadClassification {
    pub fn new(priority: u8, link: bool, lanes: u8) -> Self {
        Self { priority, link, lanes }
    }

    pub fn priority(&self) -> RoadPriority {
        RoadPriority(self.priority)
    }

    /// Coarse grouping used when judging "major class change" turns: the
    /// ladder collapses to motorway/trunk, primary..tertiary, everything
    /// below.
    pub fn road_group(&self) -> u8 {
        self.priority / 2
    }

    pub fn is_motorway_class(&self) -> bool {
        !self.link && self.priority <= RoadPriority::TRUNK.0
    }

    pub fn is_ramp_class(&self) -> bool {
        self.link && self.priority <= RoadPriority::TRUNK.0
    }

    pub fn is_link_class(&self) -> bool {
        self.link
    }

    pub fn is_low_priority_class(&self) -> bool {
        self.priority >= RoadPriority::SERVICE.0
    }
}

/// `lhs` is strictly less important than `rhs`.
pub fn strictly_less(lhs: RoadClassification, rhs: RoadClassification) -> bool {
    lhs.priority > rhs.priority || (lhs.priority == rhs.priority && lhs.link && !rhs.link)
}

/// `lhs` is a link/ramp belonging to `rhs`'s class.
pub fn is_link_to(lhs: RoadClassification, rhs: RoadClassification) -> bool {
    lhs.link && !rhs.link && lhs.priority == rhs.priority
}

/// Deduplicated per-edge metadata tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Annotation {
    pub name_id: u32,
    pub mode: TravelMode,
    pub classification: RoadClassification,
}

/// Payload of a directed node-based edge.
#[derive(Debug, Clone)]
pub struct NodeBasedEdgeData {
    pub weight: u32,
    pub duration: u32,
    pub distance: f32,
    pub geometry_id: GeometryId,
    pub annotation_id: u32,
    /// This directed arc may not be entered (it only exists to round-trip
    /// the bidirectionality of its twin).
    pub reversed: bool,
    pub roundabout: bool,
    pub circular: bool,
    pub startpoint: bool,
    /// Access-restricted (destination-only and similar).
    pub restricted: bool,
    /// Filled during edge-based node emission.
    pub edge_based_node_id: u32,
}

impl Default for NodeBasedEdgeData {
    fn default() -> Self {
        Self {
            weight: 0,
            duration: 0,
            distance: 0.0,
            geometry_id: GeometryId::default(),
            annotation_id: 0,
            reversed: false,
            roundabout: false,
            circular: false,
            startpoint: false,
            restricted: false,
            edge_based_node_id: INVALID_EDGE_BASED_NODE,
        }
    }
}

pub type NodeBasedGraph = DynamicGraph<NodeBasedEdgeData>;

/// The frozen node-based network handed from C1–C3 to the later stages.
#[derive(Debug)]
pub struct NodeBasedContext {
    pub graph: NodeBasedGraph,
    pub coordinates: Vec<FixedCoordinate>,
    pub osm_node_ids: Vec<i64>,
    pub barrier_nodes: FxHashSet<NodeId>,
    pub traffic_signals: FxHashSet<NodeId>,
    pub annotations: Vec<Annotation>,
    pub geometry: geometry::GeometryStore,
}

/// Build the directed node-based graph from the input artifact (C1).
///
/// Input edges are undirected segment records carrying forward/backward
/// traversability; each becomes two directed edges with the backward one
/// flagged `reversed`. Self-loops are rejected, duplicate directed edges
/// collapse to the cheaper one (counted), and weights are clamped to >= 1
/// (counted).
pub fn build_node_based_graph(
    input: &InputGraph,
    warnings: &WarningCounters,
) -> Result<NodeBasedContext> {
    let number_of_nodes = input.nodes.len() as NodeId;

    let mut coordinates = Vec::with_capacity(input.nodes.len());
    let mut osm_node_ids = Vec::with_capacity(input.nodes.len());
    let mut barrier_nodes = FxHashSet::default();
    let mut traffic_signals = FxHashSet::default();
    for (index, node) in input.nodes.iter().enumerate() {
        coordinates.push(FixedCoordinate::new(node.lon, node.lat));
        osm_node_ids.push(node.osm_id);
        if node.barrier {
            barrier_nodes.insert(index as NodeId);
        }
        if node.traffic_signal {
            traffic_signals.insert(index as NodeId);
        }
    }

    let mut annotations = Vec::new();
    let mut annotation_index = rustc_hash::FxHashMap::default();

    let mut directed: Vec<InputEdge<NodeBasedEdgeData>> =
        Vec::with_capacity(input.edges.len() * 2);
    for edge in &input.edges {
        if edge.source == edge.target {
            return Err(RoadloomError::invalid_input(
                input.path.clone(),
                format!("self-loop edge at node {}", edge.source),
            ));
        }
        if edge.source >= number_of_nodes || edge.target >= number_of_nodes {
            return Err(RoadloomError::invalid_input(
                input.path.clone(),
                format!("edge ({}, {}) references a non-existent node", edge.source, edge.target),
            ));
        }

        let mode = TravelMode::from_tag(edge.mode).unwrap_or_else(|| {
            WarningCounters::bump(&warnings.unknown_travel_modes);
            TravelMode::Inaccessible
        });

        let annotation = Annotation {
            name_id: edge.name_id,
            mode,
            classification: decode_classification(edge.classification),
        };
        let annotation_id = *annotation_index.entry(annotation).or_insert_with(|| {
            annotations.push(annotation);
            (annotations.len() - 1) as u32
        });

        let weight = if edge.weight == 0 {
            WarningCounters::bump(&warnings.weights_clamped);
            1
        } else {
            edge.weight
        };

        let data = NodeBasedEdgeData {
            weight,
            duration: edge.duration,
            distance: edge.distance,
            annotation_id,
            roundabout: edge.roundabout,
            circular: edge.circular,
            startpoint: edge.startpoint,
            restricted: edge.restricted,
            ..NodeBasedEdgeData::default()
        };

        // forward arc: traversable iff the segment allows forward travel
        directed.push(InputEdge {
            source: edge.source,
            target: edge.target,
            data: NodeBasedEdgeData {
                reversed: !edge.forward,
                ..data.clone()
            },
        });
        // backward arc
        directed.push(InputEdge {
            source: edge.target,
            target: edge.source,
            data: NodeBasedEdgeData {
                reversed: !edge.backward,
                ..data
            },
        });
    }

    directed.sort_by_key(|e| (e.source, e.target, e.data.weight));

    // enforce per-direction uniqueness, keeping the cheaper duplicate
    directed.dedup_by(|b, a| {
        let duplicate = a.source == b.source && a.target == b.target;
        if duplicate {
            WarningCounters::bump(&warnings.duplicate_edges);
        }
        duplicate
    });

    let graph = NodeBasedGraph::from_sorted_edges(number_of_nodes, &directed);
    check_graph_validity(&graph)?;

    Ok(NodeBasedContext {
        graph,
        coordinates,
        osm_node_ids,
        barrier_nodes,
        traffic_signals,
        annotations,
        geometry: geometry::GeometryStore::new(),
    })
}

/// No unordered pair may be reversed in both directions; that would be two
/// arcs that can never be entered, i.e. a corrupt split upstream.
fn check_graph_validity(graph: &NodeBasedGraph) -> Result<()> {
    for u in 0..graph.num_nodes() {
        for edge in graph.adjacent_edges(u) {
            let v = graph.target(edge);
            if let Some(reverse) = graph.find_edge(v, u) {
                if graph.edge_data(edge).reversed && graph.edge_data(reverse).reversed {
                    return Err(RoadloomError::IntegrityViolation(format!(
                        "edge pair ({u}, {v}) is reversed in both directions"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Unpack the 32-bit wire classification: priority in the low byte, link
/// flag at bit 8, lane count in bits 16..24.
pub fn decode_classification(raw: u32) -> RoadClassification {
    RoadClassification {
        priority: (raw & 0xFF) as u8,
        link: raw & 0x100 != 0,
        lanes: ((raw >> 16) & 0xFF) as u8,
    }
}

/// Inverse of [`decode_classification`].
pub fn encode_classification(classification: RoadClassification) -> u32 {
    u32::from(classification.priority)
        | if classification.link { 0x100 } else { 0 }
        | (u32::from(classification.lanes) << 16)
}

/// Helper for tests across the crate: build an input graph in memory.
#[doc(hidden)]
pub fn raw_edge(source: NodeId, target: NodeId) -> RawEdge {
    RawEdge {
        source,
        target,
        weight: 100,
        duration: 100,
        distance: 100.0,
        name_id: EMPTY_NAME_ID,
        forward: true,
        backward: true,
        roundabout: false,
        circular: false,
        restricted: false,
        startpoint: true,
        is_split: false,
        mode: TravelMode::Driving as u8,
        classification: encode_classification(RoadClassification::new(
            RoadPriority::RESIDENTIAL.0,
            false,
            1,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::input_graph::{InputGraph, RawNode};

    fn grid_nodes(n: usize) -> Vec<RawNode> {
        (0..n)
            .map(|i| RawNode {
                lon: i as i32 * 1000,
                lat: 0,
                barrier: false,
                traffic_signal: false,
                osm_id: i as i64,
            })
            .collect()
    }

    #[test]
    fn test_bidirectional_edge_becomes_two_arcs() {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: grid_nodes(2),
            edges: vec![raw_edge(0, 1)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        assert_eq!(context.graph.num_edges(), 2);
        let fwd = context.graph.find_edge(0, 1).unwrap();
        let bwd = context.graph.find_edge(1, 0).unwrap();
        assert!(!context.graph.edge_data(fwd).reversed);
        assert!(!context.graph.edge_data(bwd).reversed);
    }

    #[test]
    fn test_oneway_marks_reverse_arc() {
        let mut edge = raw_edge(0, 1);
        edge.backward = false;
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: grid_nodes(2),
            edges: vec![edge],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        let bwd = context.graph.find_edge(1, 0).unwrap();
        assert!(context.graph.edge_data(bwd).reversed);
    }

    #[test]
    fn test_self_loop_rejected() {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: grid_nodes(2),
            edges: vec![raw_edge(1, 1)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let result = build_node_based_graph(&input, &warnings);
        assert!(matches!(result, Err(RoadloomError::InputInvalid { .. })));
    }

    #[test]
    fn test_zero_weight_clamped() {
        let mut edge = raw_edge(0, 1);
        edge.weight = 0;
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: grid_nodes(2),
            edges: vec![edge],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        let fwd = context.graph.find_edge(0, 1).unwrap();
        assert_eq!(context.graph.edge_data(fwd).weight, 1);
        assert_eq!(
            warnings
                .weights_clamped
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_annotations_interned() {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: grid_nodes(3),
            edges: vec![raw_edge(0, 1), raw_edge(1, 2)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        // same name/mode/classification tuple: one annotation entry
        assert_eq!(context.annotations.len(), 1);
    }

    #[test]
    fn test_empty_graph_passes() {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: vec![],
            edges: vec![],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        assert_eq!(context.graph.num_nodes(), 0);
        assert_eq!(context.graph.num_edges(), 0);
    }

    #[test]
    fn test_classification_round_trip() {
        let classification = RoadClassification::new(RoadPriority::PRIMARY.0, true, 3);
        assert_eq!(
            decode_classification(encode_classification(classification)),
            classification
        );
    }
}
