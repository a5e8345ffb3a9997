//! Intersection enumeration (C6): the ordered set of roads connected to the
//! end of an edge, with perceived bearings and turn angles.
//!
//! Bearings are sampled a short distance down each road to smooth over
//! geometric noise right at the junction. Entries are sorted by turn angle;
//! index 0 is always the u-turn slot, flagged not-enterable unless the via
//! node is a dead end or a barrier.

pub mod mergable;
pub mod walker;

use rustc_hash::FxHashSet;

use crate::geo::{
    bearing, reverse_bearing, trim_coordinates_to_length, turn_angle, EdgeId, FixedCoordinate,
    NodeId, SPECIAL_EDGE_ID,
};
use crate::nbg::geometry::GeometryStore;
use crate::nbg::{Annotation, NodeBasedContext, NodeBasedGraph, TravelMode};

/// How far down a road bearings are sampled.
pub const BEARING_SAMPLE_DISTANCE: f64 = 20.0;

/// Shared read-only state for the intersection stages. Replaces ambient
/// globals with one context passed down the call chain.
#[derive(Clone, Copy)]
pub struct IntersectionContext<'a> {
    pub graph: &'a NodeBasedGraph,
    pub coordinates: &'a [FixedCoordinate],
    pub annotations: &'a [Annotation],
    pub geometry: &'a GeometryStore,
    pub barrier_nodes: &'a FxHashSet<NodeId>,
    pub traffic_signals: &'a FxHashSet<NodeId>,
}

impl<'a> IntersectionContext<'a> {
    pub fn new(context: &'a NodeBasedContext) -> Self {
        Self {
            graph: &context.graph,
            coordinates: &context.coordinates,
            annotations: &context.annotations,
            geometry: &context.geometry,
            barrier_nodes: &context.barrier_nodes,
            traffic_signals: &context.traffic_signals,
        }
    }

    pub fn annotation(&self, edge: EdgeId) -> &'a Annotation {
        &self.annotations[self.graph.edge_data(edge).annotation_id as usize]
    }

    /// Full coordinate run of a directed edge leaving `from`, endpoints
    /// included. Falls back to the straight endpoint pair when the geometry
    /// store has not been populated.
    pub fn edge_coordinates(&self, from: NodeId, edge: EdgeId) -> Vec<FixedCoordinate> {
        let to = self.graph.target(edge);
        let mut run = vec![self.coordinates[from as usize]];
        let geometry_id = self.graph.edge_data(edge).geometry_id;
        if geometry_id.is_valid() {
            if let Ok(interiors) = self.geometry.interior_coordinates(geometry_id) {
                run.extend(interiors);
            }
        }
        run.push(self.coordinates[to as usize]);
        run
    }

    /// Bearing of departure onto `edge` at `from`, sampled over the first
    /// stretch of geometry.
    pub fn perceived_bearing(&self, from: NodeId, edge: EdgeId) -> f64 {
        let run = trim_coordinates_to_length(
            self.edge_coordinates(from, edge),
            BEARING_SAMPLE_DISTANCE,
        );
        let first = run[0];
        let last = *run.last().unwrap();
        if first == last {
            // degenerate geometry; fall back to the raw endpoints
            let to = self.graph.target(edge);
            return bearing(self.coordinates[from as usize], self.coordinates[to as usize]);
        }
        bearing(first, last)
    }
}

/// One outgoing road at an intersection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectedRoad {
    /// Outgoing edge, or `SPECIAL_EDGE_ID` for a synthesized u-turn slot at
    /// an intersection with no returning edge.
    pub eid: EdgeId,
    /// Turn angle from the arrival direction; straight ahead is 180.
    pub angle: f64,
    /// Sampled compass bearing of the road.
    pub perceived_bearing: f64,
    pub entry_allowed: bool,
}

impl ConnectedRoad {
    pub fn is_uturn(&self) -> bool {
        self.angle == 0.0
    }
}

/// Connected roads ordered by angle, u-turn first.
#[derive(Debug, Clone)]
pub struct IntersectionView {
    roads: Vec<ConnectedRoad>,
}

impl std::ops::Deref for IntersectionView {
    type Target = [ConnectedRoad];

    fn deref(&self) -> &Self::Target {
        &self.roads
    }
}

impl IntersectionView {
    /// Rebuild a view from an already-ordered road list (u-turn first).
    pub fn from_sorted(roads: Vec<ConnectedRoad>) -> Self {
        Self { roads }
    }

    /// The entry whose angle is closest to `target_angle`.
    pub fn find_closest_turn(&self, target_angle: f64) -> Option<&ConnectedRoad> {
        self.find_closest_turn_matching(target_angle, |_| true)
    }

    /// The closest entry among those accepted by the predicate.
    pub fn find_closest_turn_matching(
        &self,
        target_angle: f64,
        accept: impl Fn(&ConnectedRoad) -> bool,
    ) -> Option<&ConnectedRoad> {
        self.roads
            .iter()
            .filter(|road| road.eid != SPECIAL_EDGE_ID)
            .filter(|road| accept(road))
            .min_by(|a, b| {
                let da = crate::geo::angular_deviation(a.angle, target_angle);
                let db = crate::geo::angular_deviation(b.angle, target_angle);
                da.partial_cmp(&db).unwrap()
            })
    }

    pub fn index_of(&self, eid: EdgeId) -> Option<usize> {
        self.roads.iter().position(|road| road.eid == eid)
    }

    pub fn count_enterable(&self) -> usize {
        self.roads.iter().filter(|road| road.entry_allowed).count()
    }
}

/// Enumerate the connected roads at the target of `via_edge`, arriving from
/// `from_node`.
pub fn connected_roads(
    context: &IntersectionContext,
    from_node: NodeId,
    via_edge: EdgeId,
) -> IntersectionView {
    let via_node = context.graph.target(via_edge);
    let is_barrier = context.barrier_nodes.contains(&via_node);
    let is_dead_end = context.graph.out_degree(via_node) == 1;

    // direction of travel when arriving at the via node
    let mut arrival_run = context.edge_coordinates(from_node, via_edge);
    arrival_run.reverse();
    let back_run = trim_coordinates_to_length(arrival_run, BEARING_SAMPLE_DISTANCE);
    let uturn_bearing = if back_run[0] == *back_run.last().unwrap() {
        bearing(
            context.coordinates[via_node as usize],
            context.coordinates[from_node as usize],
        )
    } else {
        bearing(back_run[0], *back_run.last().unwrap())
    };
    let in_bearing = reverse_bearing(uturn_bearing);

    let mut uturn: Option<ConnectedRoad> = None;
    let mut roads = Vec::new();

    for edge in context.graph.adjacent_edges(via_node) {
        let target = context.graph.target(edge);
        let data = context.graph.edge_data(edge);
        let enterable = !data.reversed
            && context.annotation(edge).mode != TravelMode::Inaccessible;

        if target == from_node {
            uturn = Some(ConnectedRoad {
                eid: edge,
                angle: 0.0,
                perceived_bearing: uturn_bearing,
                entry_allowed: enterable && (is_dead_end || is_barrier),
            });
            continue;
        }

        let perceived = context.perceived_bearing(via_node, edge);
        roads.push(ConnectedRoad {
            eid: edge,
            angle: turn_angle(in_bearing, perceived),
            perceived_bearing: perceived,
            // a barrier blocks everything except turning around
            entry_allowed: enterable && !is_barrier,
        });
    }

    roads.sort_by(|a, b| a.angle.partial_cmp(&b.angle).unwrap());

    let uturn = uturn.unwrap_or(ConnectedRoad {
        eid: SPECIAL_EDGE_ID,
        angle: 0.0,
        perceived_bearing: uturn_bearing,
        entry_allowed: false,
    });

    let mut ordered = Vec::with_capacity(roads.len() + 1);
    ordered.push(uturn);
    ordered.extend(roads);
    IntersectionView { roads: ordered }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningCounters;
    use crate::formats::input_graph::{InputGraph, RawNode};
    use crate::nbg::{build_node_based_graph, raw_edge};

    fn node(lon: i32, lat: i32) -> RawNode {
        RawNode {
            lon,
            lat,
            barrier: false,
            traffic_signal: false,
            osm_id: 0,
        }
    }

    /// Cross: center 2, west 0, east 1, south 3, north 4.
    fn cross_context() -> NodeBasedContext {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: vec![
                node(-10_000, 0),
                node(10_000, 0),
                node(0, 0),
                node(0, -10_000),
                node(0, 10_000),
            ],
            edges: vec![raw_edge(0, 2), raw_edge(2, 1), raw_edge(2, 3), raw_edge(2, 4)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        build_node_based_graph(&input, &warnings).unwrap()
    }

    use crate::nbg::NodeBasedContext;

    #[test]
    fn test_cross_intersection_angles() {
        let nbg = cross_context();
        let context = IntersectionContext::new(&nbg);
        let via = nbg.graph.find_edge(0, 2).unwrap();
        let view = connected_roads(&context, 0, via);

        assert_eq!(view.len(), 4);
        assert!(view[0].is_uturn());
        // non-dead-end, non-barrier: the u-turn slot is closed
        assert!(!view[0].entry_allowed);

        // arriving eastbound: south road right (90), east road straight
        // (180), north road left (270); sorted by angle
        let to_south = nbg.graph.find_edge(2, 3).unwrap();
        let to_east = nbg.graph.find_edge(2, 1).unwrap();
        let to_north = nbg.graph.find_edge(2, 4).unwrap();
        assert_eq!(view[1].eid, to_south);
        assert!((view[1].angle - 90.0).abs() < 2.0);
        assert_eq!(view[2].eid, to_east);
        assert!((view[2].angle - 180.0).abs() < 2.0);
        assert_eq!(view[3].eid, to_north);
        assert!((view[3].angle - 270.0).abs() < 2.0);

        let straightmost = view.find_closest_turn(180.0).unwrap();
        assert_eq!(straightmost.eid, to_east);
    }

    #[test]
    fn test_dead_end_allows_uturn() {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: vec![node(0, 0), node(10_000, 0)],
            edges: vec![raw_edge(0, 1)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let nbg = build_node_based_graph(&input, &warnings).unwrap();
        let context = IntersectionContext::new(&nbg);
        let via = nbg.graph.find_edge(0, 1).unwrap();
        let view = connected_roads(&context, 0, via);

        assert_eq!(view.len(), 1);
        assert!(view[0].is_uturn());
        assert!(view[0].entry_allowed);
    }

    #[test]
    fn test_barrier_blocks_all_but_uturn() {
        let mut nbg = {
            let input = InputGraph {
                path: "test.rln".into(),
                nodes: vec![node(-10_000, 0), node(0, 0), node(10_000, 0)],
                edges: vec![raw_edge(0, 1), raw_edge(1, 2)],
                restrictions: vec![],
            };
            let warnings = WarningCounters::new();
            build_node_based_graph(&input, &warnings).unwrap()
        };
        nbg.barrier_nodes.insert(1);

        let context = IntersectionContext::new(&nbg);
        let via = nbg.graph.find_edge(0, 1).unwrap();
        let view = connected_roads(&context, 0, via);

        let uturn = &view[0];
        assert!(uturn.entry_allowed);
        let onward = view.iter().find(|road| !road.is_uturn()).unwrap();
        assert!(!onward.entry_allowed);
    }

    #[test]
    fn test_find_closest_turn_with_filter() {
        let nbg = cross_context();
        let context = IntersectionContext::new(&nbg);
        let via = nbg.graph.find_edge(0, 2).unwrap();
        let view = connected_roads(&context, 0, via);
        let to_east = nbg.graph.find_edge(2, 1).unwrap();

        // excluding the straight road, the closest to 180 is a 90-ish turn
        let second_best = view
            .find_closest_turn_matching(180.0, |road| road.eid != to_east)
            .unwrap();
        assert_ne!(second_best.eid, to_east);
        assert!(crate::geo::angular_deviation(second_best.angle, 180.0) > 45.0);
    }
}
