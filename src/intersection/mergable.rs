//! Mergeable-road detection (C8): do two outgoing roads at an intersection
//! represent one logical road split into parallel carriageways?
//!
//! Merging is allowed only for close-bearing, same-name, same-class pairs
//! facing opposite directions, and requires a geometric witness: a narrow
//! triangle right before a joint intersection, parallel sampled geometry, or
//! a small traffic island. Link roads and circular shapes (throughabouts)
//! are rejected.

use crate::geo::{
    angular_deviation, are_parallel, find_closest_distance, great_circle_distance, polygon_area,
    sample_coordinates, EdgeId, NodeId,
};
use crate::guidance::{
    ASSUMED_LANE_WIDTH, FUZZY_ANGLE_DIFFERENCE, MERGABLE_ANGLE_DIFFERENCE, NARROW_TURN_ANGLE,
    ORTHOGONAL_ANGLE, STRAIGHT_ANGLE,
};
use crate::intersection::walker::{
    skip_degree_two_nodes, traverse_road, IntersectionFinderAccumulator,
    LengthLimitedCoordinateAccumulator, SelectStraightmostRoadByNameAndOnlyChoice,
};
use crate::intersection::{connected_roads, ConnectedRoad, IntersectionContext};
use crate::nbg::EMPTY_NAME_ID;

/// How far geometry is extracted for the parallelism judgment.
const DISTANCE_TO_EXTRACT: f64 = 100.0;
const SMALL_RANDOM_HOPLIMIT: usize = 5;
const RANGE_TO_TRIANGLE_LIMIT: f64 = 80.0;
const MAXIMAL_ALLOWED_TRAFFIC_ISLAND_WIDTH: f64 = 10.0;
const MINIMUM_LENGTH_FOR_PARALLEL_DETECTION: f64 = 40.0;
const SAMPLE_INTERVAL: f64 = 5.0;
const MAXIMAL_ALLOWED_SEPARATION_WIDTH: f64 = 12.0;
/// Isoperimetric lower bound: rings with area/perimeter^2 above this are
/// circular shapes (e.g. throughabouts), not split carriageways.
const CIRCULAR_POLYGON_ISOPERIMETRIC_LOWER_BOUND: f64 = 0.85 / (4.0 * std::f64::consts::PI);

pub struct MergableRoadDetector<'a> {
    context: IntersectionContext<'a>,
}

fn names_match(lhs: u32, rhs: u32) -> bool {
    lhs != EMPTY_NAME_ID && rhs != EMPTY_NAME_ID && lhs == rhs
}

impl<'a> MergableRoadDetector<'a> {
    pub fn new(context: IntersectionContext<'a>) -> Self {
        Self { context }
    }

    /// Should `lhs` and `rhs` be treated as one road for instructions?
    pub fn can_merge_road(
        &self,
        intersection_node: NodeId,
        lhs: &ConnectedRoad,
        rhs: &ConnectedRoad,
    ) -> bool {
        // roads should be somewhat close
        if angular_deviation(lhs.perceived_bearing, rhs.perceived_bearing)
            > MERGABLE_ANGLE_DIFFERENCE
        {
            return false;
        }

        // and they need to describe the same road, facing each other
        let lhs_data = self.context.graph.edge_data(lhs.eid);
        let rhs_data = self.context.graph.edge_data(rhs.eid);
        if lhs_data.reversed == rhs_data.reversed
            || !self.edge_data_supports_merge(lhs.eid, rhs.eid)
        {
            return false;
        }

        // circular links mess up the detection, jump out early
        if self.context.graph.target(lhs.eid) == intersection_node
            || self.context.graph.target(rhs.eid) == intersection_node
        {
            return false;
        }

        if self.is_traffic_loop(intersection_node, lhs)
            || self.is_traffic_loop(intersection_node, rhs)
        {
            return false;
        }

        // checked prior to link roads, since island connections can seem
        // like links
        if self.is_traffic_island(intersection_node, lhs, rhs) {
            return true;
        }

        if self.is_link_road(intersection_node, lhs) || self.is_link_road(intersection_node, rhs) {
            return false;
        }

        if self.is_narrow_triangle(intersection_node, lhs, rhs) {
            return true;
        }

        self.have_same_direction(intersection_node, lhs, rhs)
            && !self.is_circular_shape(intersection_node, lhs, rhs)
    }

    /// Quick pre-filter used by the handler when grouping roads.
    pub fn is_distinct_from(&self, lhs: &ConnectedRoad, rhs: &ConnectedRoad) -> bool {
        if angular_deviation(lhs.perceived_bearing, rhs.perceived_bearing)
            > MERGABLE_ANGLE_DIFFERENCE
        {
            return true;
        }
        !names_match(
            self.context.annotation(lhs.eid).name_id,
            self.context.annotation(rhs.eid).name_id,
        )
    }

    fn edge_data_supports_merge(&self, lhs: EdgeId, rhs: EdgeId) -> bool {
        let lhs_data = self.context.graph.edge_data(lhs);
        let rhs_data = self.context.graph.edge_data(rhs);
        // roundabouts are special, don't touch them
        if lhs_data.roundabout || rhs_data.roundabout {
            return false;
        }

        let lhs_annotation = self.context.annotation(lhs);
        let rhs_annotation = self.context.annotation(rhs);
        if lhs_annotation.mode != rhs_annotation.mode {
            return false;
        }
        if !names_match(lhs_annotation.name_id, rhs_annotation.name_id) {
            return false;
        }
        lhs_annotation.classification == rhs_annotation.classification
    }

    fn is_traffic_loop(&self, intersection_node: NodeId, road: &ConnectedRoad) -> bool {
        let (_, edge) = skip_degree_two_nodes(&self.context, intersection_node, road.eid);
        self.context.graph.target(edge) == intersection_node
    }

    fn straightmost_selector(
        &self,
        name_edge: EdgeId,
        initial_bearing: f64,
        stop_on_ambiguous_turns: bool,
    ) -> SelectStraightmostRoadByNameAndOnlyChoice {
        SelectStraightmostRoadByNameAndOnlyChoice {
            desired_name_id: self.context.annotation(name_edge).name_id,
            initial_bearing,
            requires_entry: false,
            stop_on_ambiguous_turns,
        }
    }

    /// Witness A: the two roads converge into a narrow triangle just ahead.
    ///
    ///    b ..... c
    ///     \     /
    ///      \   /
    ///        a
    fn is_narrow_triangle(
        &self,
        intersection_node: NodeId,
        lhs: &ConnectedRoad,
        rhs: &ConnectedRoad,
    ) -> bool {
        let selector = self.straightmost_selector(lhs.eid, lhs.perceived_bearing, false);

        let mut left_accumulator = IntersectionFinderAccumulator::new(SMALL_RANDOM_HOPLIMIT);
        traverse_road(
            &self.context,
            intersection_node,
            lhs.eid,
            &mut left_accumulator,
            &selector,
        );

        // if there is no right turn here, continue once past a small side
        // street
        if let Some(intersection) = left_accumulator.intersection.clone() {
            let closest = intersection.find_closest_turn(ORTHOGONAL_ANGLE);
            if closest.map_or(true, |turn| {
                angular_deviation(turn.angle, ORTHOGONAL_ANGLE) > NARROW_TURN_ANGLE
            }) {
                if let Some(straight) = intersection.find_closest_turn(STRAIGHT_ANGLE) {
                    traverse_road(
                        &self.context,
                        self.context.graph.target(left_accumulator.via_edge),
                        straight.eid,
                        &mut left_accumulator,
                        &selector,
                    );
                }
            }
        } else {
            return false;
        }

        let left_corner = self.context.graph.target(left_accumulator.via_edge);
        let distance_to_triangle = great_circle_distance(
            self.context.coordinates[intersection_node as usize],
            self.context.coordinates[left_corner as usize],
        );
        if distance_to_triangle > RANGE_TO_TRIANGLE_LIMIT {
            return false;
        }

        let mut right_accumulator = IntersectionFinderAccumulator::new(SMALL_RANDOM_HOPLIMIT);
        traverse_road(
            &self.context,
            intersection_node,
            rhs.eid,
            &mut right_accumulator,
            &selector,
        );
        if let Some(intersection) = right_accumulator.intersection.clone() {
            let closest = intersection.find_closest_turn(270.0);
            if closest.map_or(true, |turn| angular_deviation(turn.angle, 270.0) > NARROW_TURN_ANGLE)
            {
                if let Some(straight) = intersection.find_closest_turn(STRAIGHT_ANGLE) {
                    traverse_road(
                        &self.context,
                        self.context.graph.target(right_accumulator.via_edge),
                        straight.eid,
                        &mut right_accumulator,
                        &selector,
                    );
                }
            }
        } else {
            return false;
        }

        let Some(left_view) = left_accumulator.intersection else {
            return false;
        };
        // looking along the left side, the triangle connector is a right
        // turn toward c
        let Some(connector_turn) = left_view.find_closest_turn(ORTHOGONAL_ANGLE) else {
            return false;
        };
        if angular_deviation(connector_turn.angle, ORTHOGONAL_ANGLE) > NARROW_TURN_ANGLE {
            return false;
        }

        let num_lanes = |road: &ConnectedRoad| {
            f64::from(
                self.context
                    .annotation(road.eid)
                    .classification
                    .lanes
                    .max(1),
            )
        };
        let assumed_road_width = (num_lanes(lhs) + num_lanes(rhs)) * ASSUMED_LANE_WIDTH;
        let right_corner = self.context.graph.target(right_accumulator.via_edge);
        let distance_between_triangle_corners = great_circle_distance(
            self.context.coordinates[left_corner as usize],
            self.context.coordinates[right_corner as usize],
        );
        if distance_between_triangle_corners
            > assumed_road_width + MAXIMAL_ALLOWED_TRAFFIC_ISLAND_WIDTH
        {
            return false;
        }

        // the right turn off the left side has to reach the right side
        let mut connect_accumulator = IntersectionFinderAccumulator::new(SMALL_RANDOM_HOPLIMIT);
        traverse_road(
            &self.context,
            left_corner,
            connector_turn.eid,
            &mut connect_accumulator,
            &selector,
        );
        self.context.graph.target(connect_accumulator.via_edge) == right_corner
    }

    fn coordinates_along_road(
        &self,
        intersection_node: NodeId,
        road: &ConnectedRoad,
        initial_bearing: f64,
        stop_on_ambiguous_turns: bool,
    ) -> (f64, Vec<crate::geo::FixedCoordinate>) {
        let selector =
            self.straightmost_selector(road.eid, initial_bearing, stop_on_ambiguous_turns);
        let mut accumulator = LengthLimitedCoordinateAccumulator::new(DISTANCE_TO_EXTRACT);
        traverse_road(
            &self.context,
            intersection_node,
            road.eid,
            &mut accumulator,
            &selector,
        );
        (accumulator.accumulated_length, accumulator.coordinates)
    }

    /// Witness-B veto: if both walks rejoin into a closed ring whose
    /// area/perimeter ratio is near-circular, the pair is a circulatory
    /// junction and must not merge.
    fn is_circular_shape(
        &self,
        intersection_node: NodeId,
        lhs: &ConnectedRoad,
        rhs: &ConnectedRoad,
    ) -> bool {
        let (left_length, left_coordinates) =
            self.coordinates_along_road(intersection_node, lhs, lhs.perceived_bearing, false);
        let (_, right_coordinates) =
            self.coordinates_along_road(intersection_node, rhs, lhs.perceived_bearing, false);

        let (Some(left_last), Some(right_last)) =
            (left_coordinates.last(), right_coordinates.last())
        else {
            return false;
        };
        let connect_again = left_last == right_last;

        if connect_again && left_coordinates.first() == left_coordinates.last() {
            let area = polygon_area(&left_coordinates).abs();
            let perimeter = left_length;
            if perimeter > 0.0
                && area / (perimeter * perimeter) >= CIRCULAR_POLYGON_ISOPERIMETRIC_LOWER_BOUND
            {
                return true;
            }
        }
        false
    }

    /// Witness B: sampled geometry of both roads runs parallel at
    /// carriageway distance.
    fn have_same_direction(
        &self,
        intersection_node: NodeId,
        lhs: &ConnectedRoad,
        rhs: &ConnectedRoad,
    ) -> bool {
        if angular_deviation(lhs.perceived_bearing, rhs.perceived_bearing)
            > MERGABLE_ANGLE_DIFFERENCE
        {
            return false;
        }

        let (left_length, left_coordinates) =
            self.coordinates_along_road(intersection_node, lhs, lhs.perceived_bearing, true);
        // barely looking past the intersection is not enough signal
        if left_length <= MINIMUM_LENGTH_FOR_PARALLEL_DETECTION {
            return false;
        }
        let (right_length, right_coordinates) =
            self.coordinates_along_road(intersection_node, rhs, lhs.perceived_bearing, true);
        if right_length <= MINIMUM_LENGTH_FOR_PARALLEL_DETECTION {
            return false;
        }

        let connect_again = left_coordinates.last() == right_coordinates.last();

        let mut left_sampled =
            sample_coordinates(&left_coordinates, DISTANCE_TO_EXTRACT, SAMPLE_INTERVAL);
        let mut right_sampled =
            sample_coordinates(&right_coordinates, DISTANCE_TO_EXTRACT, SAMPLE_INTERVAL);

        // the first stretch leaves the shared junction; prune it unless the
        // roads meet up again anyway
        let prune = |data: &mut Vec<crate::geo::FixedCoordinate>| {
            if data.len() >= 3 {
                let cut = data.len() / 3;
                data.drain(..cut);
            }
        };
        if !connect_again {
            prune(&mut left_sampled);
            prune(&mut right_sampled);
        }

        if !are_parallel(&left_sampled, &right_sampled) {
            return false;
        }

        let distance_mid_left_to_right = find_closest_distance(
            left_sampled[left_sampled.len() / 2],
            &right_sampled,
        );
        let distance_mid_right_to_left = find_closest_distance(
            right_sampled[right_sampled.len() / 2],
            &left_sampled,
        );
        let distance_between_roads = distance_mid_left_to_right.min(distance_mid_right_to_left);

        let lane_count = |eid: EdgeId| {
            f64::from(self.context.annotation(eid).classification.lanes.max(1))
        };
        let combined_road_width =
            0.5 * (lane_count(lhs.eid) + lane_count(rhs.eid)) * ASSUMED_LANE_WIDTH;
        distance_between_roads <= combined_road_width + MAXIMAL_ALLOWED_SEPARATION_WIDTH
    }

    /// Witness C: both roads collapse into the same vertex across a small
    /// traffic island.
    fn is_traffic_island(
        &self,
        intersection_node: NodeId,
        lhs: &ConnectedRoad,
        rhs: &ConnectedRoad,
    ) -> bool {
        let (_, left_edge) = skip_degree_two_nodes(&self.context, intersection_node, lhs.eid);
        let (_, right_edge) = skip_degree_two_nodes(&self.context, intersection_node, rhs.eid);

        let left_candidate = self.context.graph.target(left_edge);
        let right_candidate = self.context.graph.target(right_edge);
        if left_candidate != right_candidate || left_candidate == intersection_node {
            return false;
        }

        let all_same_name_and_degree_three = |nid: NodeId| {
            if self.context.graph.out_degree(nid) != 3 {
                return false;
            }
            let mut edges = self.context.graph.adjacent_edges(nid);
            let required_name = self
                .context
                .annotation(edges.next().unwrap())
                .name_id;
            if required_name == EMPTY_NAME_ID {
                return false;
            }
            self.context
                .graph
                .adjacent_edges(nid)
                .all(|eid| names_match(required_name, self.context.annotation(eid).name_id))
        };

        let degree_three_connect_in = all_same_name_and_degree_three(intersection_node);
        let degree_three_connect_out = all_same_name_and_degree_three(left_candidate);
        if !degree_three_connect_in && !degree_three_connect_out {
            return false;
        }

        let distance_between_candidates = great_circle_distance(
            self.context.coordinates[intersection_node as usize],
            self.context.coordinates[left_candidate as usize],
        );
        // allow longer separations when both ends split and join directly
        if degree_three_connect_in && degree_three_connect_out {
            distance_between_candidates < 30.0
        } else {
            distance_between_candidates < 15.0
        }
    }

    /// A link road continues into a same-name near-straight road at its far
    /// end whose opposite direction is a different edge: a connector, not a
    /// mainline split.
    fn is_link_road(&self, intersection_node: NodeId, road: &ConnectedRoad) -> bool {
        let (next_node, next_edge) =
            skip_degree_two_nodes(&self.context, intersection_node, road.eid);
        let next_intersection = connected_roads(&self.context, next_node, next_edge);

        let requested_name = self.context.annotation(road.eid).name_id;
        let Some(next_road_along_path) =
            next_intersection.find_closest_turn_matching(STRAIGHT_ANGLE, |candidate| {
                names_match(requested_name, self.context.annotation(candidate.eid).name_id)
            })
        else {
            return false;
        };

        let Some(opposite_of_next_road_along_path) = next_intersection.find_closest_turn(
            crate::geo::restrict_angle_to_valid_range(next_road_along_path.angle + STRAIGHT_ANGLE),
        ) else {
            return false;
        };

        // cannot be looking at the road we came from
        if self.context.graph.target(opposite_of_next_road_along_path.eid) == next_node {
            return false;
        }

        // the opposite pick has to be sane, not our own incoming road
        if angular_deviation(
            angular_deviation(next_road_along_path.angle, STRAIGHT_ANGLE),
            angular_deviation(opposite_of_next_road_along_path.angle, 0.0),
        ) < FUZZY_ANGLE_DIFFERENCE
        {
            return false;
        }

        angular_deviation(
            opposite_of_next_road_along_path.angle,
            next_road_along_path.angle,
        ) >= STRAIGHT_ANGLE - FUZZY_ANGLE_DIFFERENCE
            && self.context.graph.edge_data(next_road_along_path.eid).reversed
                == self
                    .context
                    .graph
                    .edge_data(opposite_of_next_road_along_path.eid)
                    .reversed
            && self.edge_data_supports_merge(
                next_road_along_path.eid,
                opposite_of_next_road_along_path.eid,
            )
    }
}
