//! Graph walking (C7): follow a road through the node-based graph, one
//! intersection at a time.
//!
//! A walk pairs a *selector* (which onward edge to take at each
//! intersection) with an *accumulator* (what to collect along the way). It
//! stops when the accumulator signals done, the selector returns nothing,
//! or the walk loops back to its start; a hard step cap guards against
//! pathological loops.

use crate::geo::{
    angular_deviation, coordinate_length, trim_coordinates_to_length, EdgeId, FixedCoordinate,
    NodeId,
};
use crate::guidance::{FUZZY_ANGLE_DIFFERENCE, GROUP_ANGLE, NARROW_TURN_ANGLE, STRAIGHT_ANGLE};
use crate::intersection::{connected_roads, IntersectionContext, IntersectionView};

/// Hard cap on walk steps.
const WALK_STEP_CAP: usize = 1000;

pub trait RoadSelector {
    /// Pick the edge to continue on, or `None` to stop the walk.
    fn select(
        &self,
        context: &IntersectionContext,
        node: NodeId,
        via_edge: EdgeId,
        intersection: &IntersectionView,
    ) -> Option<EdgeId>;
}

pub trait WalkAccumulator {
    /// Observe one step of the walk.
    fn update(&mut self, context: &IntersectionContext, from: NodeId, via: EdgeId, to: NodeId);
    /// Whether the walk should stop after the last update.
    fn terminate(&mut self) -> bool;
}

/// Walk from (start_node, start_edge). Returns the last (node, edge) pair
/// visited, or `None` if not even the first step was taken.
pub fn traverse_road(
    context: &IntersectionContext,
    start_node: NodeId,
    start_edge: EdgeId,
    accumulator: &mut impl WalkAccumulator,
    selector: &impl RoadSelector,
) -> Option<(NodeId, EdgeId)> {
    let mut current_node = start_node;
    let mut current_edge = start_edge;
    let mut last = None;

    for _ in 0..WALK_STEP_CAP {
        let next_node = context.graph.target(current_edge);
        accumulator.update(context, current_node, current_edge, next_node);
        last = Some((current_node, current_edge));

        if accumulator.terminate() {
            break;
        }
        // looped back to where we started
        if next_node == start_node {
            break;
        }

        let intersection = connected_roads(context, current_node, current_edge);
        let Some(next_edge) =
            selector.select(context, next_node, current_edge, &intersection)
        else {
            break;
        };
        current_node = next_node;
        current_edge = next_edge;
    }

    last
}

/// Collect coordinates along the walk until a length budget is exhausted.
/// The final segment is trimmed to the exact remaining length.
pub struct LengthLimitedCoordinateAccumulator {
    pub coordinates: Vec<FixedCoordinate>,
    pub accumulated_length: f64,
    max_length: f64,
}

impl LengthLimitedCoordinateAccumulator {
    pub fn new(max_length: f64) -> Self {
        Self {
            coordinates: Vec::new(),
            accumulated_length: 0.0,
            max_length,
        }
    }
}

impl WalkAccumulator for LengthLimitedCoordinateAccumulator {
    fn update(&mut self, context: &IntersectionContext, from: NodeId, via: EdgeId, _to: NodeId) {
        let mut run = context.edge_coordinates(from, via);
        let length = coordinate_length(&run);

        if length + self.accumulated_length > self.max_length {
            run = trim_coordinates_to_length(run, self.max_length - self.accumulated_length);
        }
        self.coordinates.extend(run);
        self.accumulated_length = (self.accumulated_length + length).min(self.max_length);
    }

    fn terminate(&mut self) -> bool {
        self.accumulated_length >= self.max_length
    }
}

/// Walk up to a hop limit, stopping at the first real intersection (more
/// than two connected roads). Keeps the final intersection view around for
/// the caller.
pub struct IntersectionFinderAccumulator {
    hops: usize,
    hop_limit: usize,
    pub node: NodeId,
    pub via_edge: EdgeId,
    pub intersection: Option<IntersectionView>,
}

impl IntersectionFinderAccumulator {
    pub fn new(hop_limit: usize) -> Self {
        Self {
            hops: 0,
            hop_limit,
            node: 0,
            via_edge: 0,
            intersection: None,
        }
    }
}

impl WalkAccumulator for IntersectionFinderAccumulator {
    fn update(&mut self, context: &IntersectionContext, from: NodeId, via: EdgeId, _to: NodeId) {
        self.hops += 1;
        self.node = from;
        self.via_edge = via;
        self.intersection = Some(connected_roads(context, from, via));
    }

    fn terminate(&mut self) -> bool {
        let at_real_intersection = self
            .intersection
            .as_ref()
            .is_some_and(|intersection| intersection.len() > 2);
        if at_real_intersection || self.hops == self.hop_limit {
            self.hops = 0;
            true
        } else {
            false
        }
    }
}

/// Straightmost-on-same-name selection: prefer enterable roads (when
/// required), then roads keeping the desired name, then smaller deviation
/// from straight. Gives up when the road fans out too much or the best
/// choice is a genuine turn.
pub struct SelectStraightmostRoadByNameAndOnlyChoice {
    pub desired_name_id: u32,
    pub initial_bearing: f64,
    pub requires_entry: bool,
    pub stop_on_ambiguous_turns: bool,
}

impl RoadSelector for SelectStraightmostRoadByNameAndOnlyChoice {
    fn select(
        &self,
        context: &IntersectionContext,
        _node: NodeId,
        _via_edge: EdgeId,
        intersection: &IntersectionView,
    ) -> Option<EdgeId> {
        if intersection.len() <= 1 {
            return None;
        }

        // score favors valid entries over requested names over straightness
        let score = |road: &crate::intersection::ConnectedRoad| -> f64 {
            let mut result = 0.0;
            if self.requires_entry && !road.entry_allowed {
                result += 360.0;
            }
            if context.annotation(road.eid).name_id != self.desired_name_id {
                result += 180.0;
            }
            result + angular_deviation(road.angle, STRAIGHT_ANGLE)
        };

        let count_desired_name = intersection
            .iter()
            .filter(|road| road.eid != crate::geo::SPECIAL_EDGE_ID)
            .filter(|road| context.annotation(road.eid).name_id == self.desired_name_id)
            .count();
        if count_desired_name > 2 {
            return None;
        }

        let best = intersection[1..]
            .iter()
            .filter(|road| road.eid != crate::geo::SPECIAL_EDGE_ID)
            .min_by(|a, b| score(a).partial_cmp(&score(b)).unwrap())?;

        if self.requires_entry && !best.entry_allowed {
            return None;
        }

        let straightmost = intersection.find_closest_turn(STRAIGHT_ANGLE);
        let has_valid_angle = (intersection.len() == 2
            || straightmost.map(|road| road.eid) == Some(best.eid))
            && angular_deviation(best.angle, STRAIGHT_ANGLE) < NARROW_TURN_ANGLE
            && angular_deviation(self.initial_bearing, best.perceived_bearing)
                < NARROW_TURN_ANGLE;

        if has_valid_angle {
            return Some(best.eid);
        }

        // dual carriageways split with strong angles; allow those when the
        // name continues and it is the only same-name choice
        let is_only_choice_with_same_name = count_desired_name <= 2
            && context.annotation(best.eid).name_id == self.desired_name_id
            && angular_deviation(best.angle, STRAIGHT_ANGLE) < 100.0;

        if self.stop_on_ambiguous_turns
            && angular_deviation(STRAIGHT_ANGLE, best.angle) > GROUP_ANGLE
        {
            // a turn opposite the chosen one means the road itself turns;
            // continuing would be a guess
            let opposite = intersection
                .find_closest_turn(crate::geo::restrict_angle_to_valid_range(best.angle + 180.0));
            if let Some(opposite) = opposite {
                if angular_deviation(best.angle, opposite.angle) > 180.0 - FUZZY_ANGLE_DIFFERENCE {
                    return None;
                }
            }
            if let Some(closest) = straightmost {
                if angular_deviation(closest.angle, STRAIGHT_ANGLE) < FUZZY_ANGLE_DIFFERENCE {
                    return None;
                }
            }
        }

        is_only_choice_with_same_name.then_some(best.eid)
    }
}

/// Degree-two intersections are artifacts (barriers, signals, geometry
/// breaks); skip over them to find where the road really continues.
pub fn skip_degree_two_nodes(
    context: &IntersectionContext,
    start_node: NodeId,
    start_edge: EdgeId,
) -> (NodeId, EdgeId) {
    let mut node = start_node;
    let mut edge = start_edge;

    for _ in 0..WALK_STEP_CAP {
        let next = context.graph.target(edge);
        if context.graph.out_degree(next) != 2 || next == start_node {
            break;
        }
        let onward = context
            .graph
            .adjacent_edges(next)
            .find(|&candidate| context.graph.target(candidate) != node);
        match onward {
            Some(candidate) => {
                node = next;
                edge = candidate;
            }
            None => break,
        }
    }

    (node, edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningCounters;
    use crate::formats::input_graph::{InputGraph, RawNode};
    use crate::nbg::{build_node_based_graph, raw_edge, NodeBasedContext, EMPTY_NAME_ID};

    fn node(lon: i32, lat: i32) -> RawNode {
        RawNode {
            lon,
            lat,
            barrier: false,
            traffic_signal: false,
            osm_id: 0,
        }
    }

    /// A straight west-east chain 0-1-2-3, uncompressed.
    fn chain() -> NodeBasedContext {
        let input = InputGraph {
            path: "test.rln".into(),
            nodes: (0..4).map(|i| node(i * 10_000, 0)).collect(),
            edges: vec![raw_edge(0, 1), raw_edge(1, 2), raw_edge(2, 3)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        build_node_based_graph(&input, &warnings).unwrap()
    }

    #[test]
    fn test_skip_degree_two_reaches_far_end() {
        let nbg = chain();
        let context = IntersectionContext::new(&nbg);
        let first = nbg.graph.find_edge(0, 1).unwrap();
        let (node, edge) = skip_degree_two_nodes(&context, 0, first);
        assert_eq!(context.graph.target(edge), 3);
        assert_eq!(node, 2);
    }

    #[test]
    fn test_length_limited_walk_trims() {
        let nbg = chain();
        let context = IntersectionContext::new(&nbg);
        let first = nbg.graph.find_edge(0, 1).unwrap();

        let selector = SelectStraightmostRoadByNameAndOnlyChoice {
            desired_name_id: EMPTY_NAME_ID,
            initial_bearing: 90.0,
            requires_entry: false,
            stop_on_ambiguous_turns: false,
        };
        // each segment is ~1.1km; budget 1.5km stops mid second segment
        let mut accumulator = LengthLimitedCoordinateAccumulator::new(1500.0);
        traverse_road(&context, 0, first, &mut accumulator, &selector);

        assert!(accumulator.accumulated_length <= 1500.0 + 1.0);
        let walked = coordinate_length(&accumulator.coordinates);
        assert!((walked - 1500.0).abs() < 2.0, "walked {walked}");
    }

    #[test]
    fn test_walk_stops_at_dead_end() {
        let nbg = chain();
        let context = IntersectionContext::new(&nbg);
        let first = nbg.graph.find_edge(0, 1).unwrap();
        let selector = SelectStraightmostRoadByNameAndOnlyChoice {
            desired_name_id: EMPTY_NAME_ID,
            initial_bearing: 90.0,
            requires_entry: false,
            stop_on_ambiguous_turns: false,
        };
        let mut accumulator = LengthLimitedCoordinateAccumulator::new(f64::INFINITY);
        let last = traverse_road(&context, 0, first, &mut accumulator, &selector);
        // walked all the way to the last edge (2 -> 3)
        let (last_node, last_edge) = last.unwrap();
        assert_eq!(last_node, 2);
        assert_eq!(context.graph.target(last_edge), 3);
    }

    #[test]
    fn test_intersection_finder_stops_at_junction() {
        // chain with a side road at node 2
        let mut input = InputGraph {
            path: "test.rln".into(),
            nodes: (0..4).map(|i| node(i * 10_000, 0)).collect(),
            edges: vec![raw_edge(0, 1), raw_edge(1, 2), raw_edge(2, 3)],
            restrictions: vec![],
        };
        input.nodes.push(node(20_000, 10_000));
        input.edges.push(raw_edge(2, 4));
        let warnings = WarningCounters::new();
        let nbg = build_node_based_graph(&input, &warnings).unwrap();
        let context = IntersectionContext::new(&nbg);

        let first = nbg.graph.find_edge(0, 1).unwrap();
        let selector = SelectStraightmostRoadByNameAndOnlyChoice {
            desired_name_id: EMPTY_NAME_ID,
            initial_bearing: 90.0,
            requires_entry: false,
            stop_on_ambiguous_turns: false,
        };
        let mut finder = IntersectionFinderAccumulator::new(5);
        traverse_road(&context, 0, first, &mut finder, &selector);

        // stopped on the edge arriving at the 3-way node 2
        assert_eq!(context.graph.target(finder.via_edge), 2);
        assert!(finder.intersection.unwrap().len() > 2);
    }
}
