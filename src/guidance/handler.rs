//! Intersection handling (C9): pick the "obvious" continuation at an
//! intersection and assign every admissible turn an instruction.
//!
//! Obviousness follows a two-step rule: prefer a distinct continuation of
//! the current name, else a distinct straightish road of same-or-higher
//! category. Distinctness weighs angular deviation ratios, road classes,
//! driveways and crossing one-ways against the candidate.

use crate::geo::{
    angular_deviation, restrict_angle_to_valid_range, EdgeId, NodeId, SPECIAL_EDGE_ID,
};
use crate::guidance::{
    direction_from_angle, DirectionModifier, TurnInstruction, TurnType, DISTINCTION_RATIO,
    FUZZY_ANGLE_DIFFERENCE, GROUP_ANGLE, MAXIMAL_ALLOWED_NO_TURN_DEVIATION, NARROW_TURN_ANGLE,
    STRAIGHT_ANGLE,
};
use crate::intersection::mergable::MergableRoadDetector;
use crate::intersection::{ConnectedRoad, IntersectionContext, IntersectionView};
use crate::nbg::{is_link_to, strictly_less, RoadClassification, RoadPriority, EMPTY_NAME_ID};

/// Whether moving from name `from` to name `to` has to be announced.
fn requires_name_announced(from: u32, to: u32) -> bool {
    !(from != EMPTY_NAME_ID && from == to)
}

pub struct IntersectionHandler<'a> {
    context: IntersectionContext<'a>,
}

impl<'a> IntersectionHandler<'a> {
    pub fn new(context: IntersectionContext<'a>) -> Self {
        Self { context }
    }

    fn name(&self, eid: EdgeId) -> u32 {
        self.context.annotation(eid).name_id
    }

    fn class(&self, eid: EdgeId) -> RoadClassification {
        self.context.annotation(eid).classification
    }

    /// Collapse visually-parallel carriageways in the view: an adjacent
    /// mergeable pair becomes one logical road, keeping the enterable side.
    pub fn merged_view(&self, node: NodeId, view: &IntersectionView) -> IntersectionView {
        if view.len() < 3 {
            return view.clone();
        }
        let detector = MergableRoadDetector::new(self.context);

        let mut roads: Vec<ConnectedRoad> = view.to_vec();
        let mut index = 1;
        while index + 1 < roads.len() {
            let lhs = roads[index];
            let rhs = roads[index + 1];
            if lhs.eid != SPECIAL_EDGE_ID
                && rhs.eid != SPECIAL_EDGE_ID
                && detector.can_merge_road(node, &lhs, &rhs)
            {
                let (keep, drop) = if lhs.entry_allowed { (index, index + 1) } else { (index + 1, index) };
                let merged_angle = restrict_angle_to_valid_range(
                    roads[keep].angle - (roads[keep].angle - roads[drop].angle) / 2.0,
                );
                roads[keep].angle = merged_angle;
                roads.remove(drop);
            } else {
                index += 1;
            }
        }
        IntersectionView::from_sorted(roads)
    }

    /// Index of the obvious onward road in the view, 0 when there is none.
    pub fn find_obvious_turn(&self, via_edge: EdgeId, intersection: &IntersectionView) -> usize {
        // no choice, no obvious road
        if intersection.len() == 1 {
            return 0;
        }
        // a single non-u-turn is obvious
        if intersection.len() == 2 {
            return 1;
        }

        let via_class = self.class(via_edge);
        let via_name = self.name(via_edge);

        // roads continuing our name on a same-or-higher class
        let continues_on_name = |road: &ConnectedRoad| {
            if !road.entry_allowed {
                return false;
            }
            if via_name == EMPTY_NAME_ID && !via_class.is_low_priority_class() {
                return false;
            }
            let road_class = self.class(road.eid);
            let road_name = self.name(road.eid);
            if road_name == EMPTY_NAME_ID && !road_class.is_low_priority_class() {
                return false;
            }
            if (via_name == EMPTY_NAME_ID) != (road_name == EMPTY_NAME_ID) {
                return false;
            }
            if strictly_less(road_class, via_class) {
                return false;
            }
            if is_link_to(road_class, via_class) {
                return false;
            }
            !requires_name_announced(via_name, road_name)
        };

        let to_index_if_valid = |road: &ConnectedRoad| -> usize {
            let via_data = self.context.graph.edge_data(via_edge);
            let road_data = self.context.graph.edge_data(road.eid);
            if via_data.roundabout != road_data.roundabout {
                return 0;
            }
            let via_mode = self.context.annotation(via_edge).mode;
            let road_mode = self.context.annotation(road.eid).mode;
            if via_mode != road_mode {
                return 0;
            }
            if self.is_through_street_refusal(via_edge, road, intersection) {
                return 0;
            }
            intersection.index_of(road.eid).unwrap_or(0)
        };

        if let Some(road) =
            intersection.find_closest_turn_matching(STRAIGHT_ANGLE, continues_on_name)
        {
            if let Some(index) = intersection.index_of(road.eid) {
                if self.is_distinct_continue(index, via_edge, intersection) {
                    return to_index_if_valid(road);
                }
            }
        }

        // no continuation; a straightish road of same-or-higher category
        // can still be obvious
        let higher_or_same = |road: &ConnectedRoad| {
            road.entry_allowed
                && !strictly_less(self.class(road.eid), via_class)
                && !is_link_to(self.class(road.eid), via_class)
        };
        if let Some(road) = intersection.find_closest_turn_matching(STRAIGHT_ANGLE, higher_or_same)
        {
            if let Some(index) = intersection.index_of(road.eid) {
                if self.is_distinct_turn(index, via_edge, intersection) {
                    return to_index_if_valid(road);
                }
            }
        }

        let Some(straightmost_valid) =
            intersection.find_closest_turn_matching(STRAIGHT_ANGLE, |road| road.entry_allowed)
        else {
            return 0;
        };
        let straightmost_index = intersection.index_of(straightmost_valid.eid).unwrap_or(0);

        let non_sharp_turns = intersection
            .iter()
            .filter(|road| angular_deviation(road.angle, STRAIGHT_ANGLE) <= 90.0)
            .count();
        let straight_is_only_non_sharp =
            angular_deviation(straightmost_valid.angle, STRAIGHT_ANGLE) <= 90.0
                && non_sharp_turns == 1;

        if (angular_deviation(STRAIGHT_ANGLE, straightmost_valid.angle) <= GROUP_ANGLE
            || straight_is_only_non_sharp)
            && !self.class(straightmost_valid.eid).is_low_priority_class()
            && self.is_distinct_turn(straightmost_index, via_edge, intersection)
        {
            return to_index_if_valid(straightmost_valid);
        }

        // on motorways, narrow only-allowed turns are always obvious
        if self.class(straightmost_valid.eid).is_motorway_class()
            && angular_deviation(straightmost_valid.angle, STRAIGHT_ANGLE) <= GROUP_ANGLE
            && intersection.count_enterable() == 1
        {
            return to_index_if_valid(straightmost_valid);
        }

        // roads splitting up under a single shared name
        if intersection.len() == 3
            && intersection
                .iter()
                .filter(|road| road.eid != SPECIAL_EDGE_ID)
                .all(|road| {
                    let name = self.name(road.eid);
                    name != EMPTY_NAME_ID && name == via_name
                })
            && intersection.count_enterable() == 1
            && (angular_deviation(intersection[1].angle, 90.0) > NARROW_TURN_ANGLE
                || angular_deviation(intersection[2].angle, 270.0) > NARROW_TURN_ANGLE)
        {
            return to_index_if_valid(straightmost_valid);
        }

        0
    }

    /// Obvious classification is refused when the candidate is a one-way of
    /// a crossing street whose opposite arm is blocked: the driver needs an
    /// explicit announcement there.
    fn is_through_street_refusal(
        &self,
        via_edge: EdgeId,
        candidate: &ConnectedRoad,
        intersection: &IntersectionView,
    ) -> bool {
        let Some(opposite) = intersection.find_closest_turn_matching(
            restrict_angle_to_valid_range(candidate.angle + STRAIGHT_ANGLE),
            |road| {
                road.eid != candidate.eid && angular_deviation(road.angle, 0.0) > NARROW_TURN_ANGLE
            },
        ) else {
            return false;
        };

        !opposite.entry_allowed
            && self.class(opposite.eid) == self.class(candidate.eid)
            && self.name(opposite.eid) == self.name(candidate.eid)
            && requires_name_announced(self.name(via_edge), self.name(candidate.eid))
    }

    fn override_class_by_lanes(
        &self,
        via_class: RoadClassification,
        compare_class: RoadClassification,
    ) -> bool {
        // roads tagged oddly within a neighborhood: a visibly wider road
        // overrides its nominal classification
        via_class.lanes > 0
            && compare_class.lanes > 0
            && via_class.lanes.saturating_sub(compare_class.lanes) > 1
    }

    fn distinct_by_class(
        &self,
        road: &ConnectedRoad,
        via_class: RoadClassification,
        candidate_class: RoadClassification,
    ) -> bool {
        let compare_class = self.class(road.eid);

        if strictly_less(compare_class, via_class)
            && strictly_less(compare_class, candidate_class)
            && self.override_class_by_lanes(via_class, compare_class)
        {
            return true;
        }

        // passing by a link of the same category
        if is_link_to(compare_class, via_class) && is_link_to(compare_class, candidate_class) {
            return true;
        }

        // severe general-class change (residential vs motorway link)
        if compare_class.is_link_class()
            && via_class.priority == candidate_class.priority
            && (i32::from(via_class.road_group()) - i32::from(compare_class.road_group())).abs()
                > 4
            && self.override_class_by_lanes(via_class, compare_class)
        {
            return true;
        }

        false
    }

    /// Is the candidate at `index` clearly set apart from every other turn?
    pub fn is_distinct_turn(
        &self,
        index: usize,
        via_edge: EdgeId,
        intersection: &IntersectionView,
    ) -> bool {
        let candidate = &intersection[index];
        let via_class = self.class(via_edge);
        let via_name = self.name(via_edge);
        let candidate_class = self.class(candidate.eid);
        let candidate_name = self.name(candidate.eid);
        let candidate_deviation = angular_deviation(candidate.angle, STRAIGHT_ANGLE);

        if candidate_deviation <= GROUP_ANGLE {
            // narrow-turn criteria
            let candidate_changes_name = requires_name_announced(via_name, candidate_name);

            let is_similar_turn = |road: &ConnectedRoad| -> bool {
                if road.eid == candidate.eid || road.eid == SPECIAL_EDGE_ID {
                    return false;
                }
                // for narrow turns, only enterable roads compete
                if candidate_deviation < NARROW_TURN_ANGLE && !road.entry_allowed {
                    return false;
                }

                // segregated intersections: a blocked link in a 4-way
                // layout of near-orthogonal arms is no competitor
                if !road.entry_allowed
                    && intersection.len() == 5
                    && intersection.count_enterable() <= 2
                {
                    let all_close_to_90 = (1..3).all(|i| {
                        let deviation = angular_deviation(
                            intersection[i].angle,
                            intersection[i + 1].angle,
                        );
                        (75.0..=105.0).contains(&deviation)
                    });
                    if all_close_to_90 {
                        return false;
                    }
                }

                let compare_deviation = angular_deviation(road.angle, STRAIGHT_ANGLE);
                let compare_class = self.class(road.eid);
                let compare_name = self.name(road.eid);
                let via_data = self.context.graph.edge_data(via_edge);
                let compare_data = self.context.graph.edge_data(road.eid);
                let candidate_data = self.context.graph.edge_data(candidate.eid);

                // passing by restricted driveways is always obvious
                if candidate_deviation < NARROW_TURN_ANGLE
                    && compare_deviation > 1.5 * candidate_deviation
                    && compare_data.restricted
                    && !via_data.restricted
                    && !candidate_data.restricted
                {
                    return false;
                }

                // throughabout exits: a roundabout arm at a larger angle is
                // no competitor
                if compare_data.roundabout != via_data.roundabout
                    && via_data.roundabout == candidate_data.roundabout
                    && candidate_deviation < compare_deviation
                {
                    return false;
                }

                let opposing = intersection.find_closest_turn(restrict_angle_to_valid_range(
                    road.angle + STRAIGHT_ANGLE,
                ));
                let name_changes_onto_compare = requires_name_announced(via_name, compare_name);
                let name_changes_onto_compare_from_opposing = opposing.map_or(true, |opposing| {
                    requires_name_announced(self.name(opposing.eid), compare_name)
                });

                // if the continuing road itself turns while we branch off
                // it, announcements stay necessary
                let continue_turns = via_name != EMPTY_NAME_ID
                    && !name_changes_onto_compare
                    && opposing.is_some_and(|opposing| {
                        angular_deviation(road.angle, opposing.angle)
                            < STRAIGHT_ANGLE - NARROW_TURN_ANGLE
                    })
                    && name_changes_onto_compare_from_opposing
                    && angular_deviation(road.angle, 0.0) > NARROW_TURN_ANGLE;
                let continuing_road_takes_a_turn = candidate_changes_name && continue_turns;

                let roads_deviation_is_distinct = compare_deviation
                    / candidate_deviation.max(0.1)
                    > DISTINCTION_RATIO
                    && (compare_deviation - candidate_deviation).abs() > FUZZY_ANGLE_DIFFERENCE;

                let continue_is_main_class = via_class.priority <= RoadPriority::SECONDARY.0;
                if (!continuing_road_takes_a_turn || !continue_is_main_class)
                    && roads_deviation_is_distinct
                {
                    return false;
                }

                // a narrow exit on extra lanes is distinct even at small
                // angle differences
                if via_class.lanes > 0
                    && candidate_class.lanes == via_class.lanes
                    && compare_deviation > candidate_deviation
                    && candidate_deviation <= FUZZY_ANGLE_DIFFERENCE
                    && (compare_deviation - candidate_deviation) > 0.5 * FUZZY_ANGLE_DIFFERENCE
                {
                    return false;
                }

                // crossing another street outright
                let crossing_compare = !name_changes_onto_compare_from_opposing
                    && opposing.is_some_and(|opposing| {
                        angular_deviation(opposing.angle, road.angle)
                            > STRAIGHT_ANGLE - FUZZY_ANGLE_DIFFERENCE
                    })
                    && name_changes_onto_compare;

                let compare_has_lower_class = candidate_class.priority == via_class.priority
                    && candidate_class.priority < compare_class.priority;
                let compare_has_way_higher_class = candidate_class.priority == via_class.priority
                    && (i32::from(candidate_class.priority) - i32::from(compare_class.priority))
                        .abs()
                        > 4;

                if !candidate_changes_name
                    && !continuing_road_takes_a_turn
                    && (compare_has_lower_class
                        || compare_has_way_higher_class
                        || crossing_compare)
                    && compare_deviation / candidate_deviation.max(0.1) > 0.7 * DISTINCTION_RATIO
                {
                    return false;
                }

                if self.distinct_by_class(road, via_class, candidate_class) {
                    return false;
                }

                // switching the general road class within a turn is not a
                // likely maneuver
                if via_class.road_group() != compare_class.road_group()
                    && via_class.priority == candidate_class.priority
                {
                    return false;
                }

                true
            };

            !intersection[1..].iter().any(is_similar_turn)
        } else {
            // wide-angle criteria; entry-allowed is no distinction here
            let is_similar_turn = |road: &ConnectedRoad| -> bool {
                if road.eid == candidate.eid || road.eid == SPECIAL_EDGE_ID {
                    return false;
                }
                let compare_class = self.class(road.eid);

                if self.distinct_by_class(road, via_class, candidate_class)
                    && !self.override_class_by_lanes(via_class, compare_class)
                {
                    return false;
                }

                if angular_deviation(road.angle, candidate.angle) < 100.0
                    && via_class.priority <= RoadPriority::SECONDARY.0
                    && via_class.road_group() != compare_class.road_group()
                    && via_class.priority == candidate_class.priority
                    && !self.override_class_by_lanes(via_class, compare_class)
                    && via_class.priority != RoadPriority::UNCLASSIFIED.0
                    && compare_class.priority != RoadPriority::UNCLASSIFIED.0
                {
                    return false;
                }

                let compare_deviation = angular_deviation(road.angle, STRAIGHT_ANGLE);
                if compare_deviation / candidate_deviation.max(0.1) > DISTINCTION_RATIO {
                    return false;
                }

                true
            };

            !intersection[1..].iter().any(is_similar_turn)
        }
    }

    pub fn is_distinct_continue(
        &self,
        index: usize,
        via_edge: EdgeId,
        intersection: &IntersectionView,
    ) -> bool {
        if self.is_distinct_turn(index, via_edge, intersection) {
            return true;
        }
        // nearly straight on the same road type is good enough
        let in_class = self.class(via_edge);
        let continue_class = self.class(intersection[index].eid);
        in_class.priority == continue_class.priority
            && angular_deviation(intersection[index].angle, STRAIGHT_ANGLE)
                < MAXIMAL_ALLOWED_NO_TURN_DEVIATION
    }

    /// Classify the turn (u, v, w): type from the road relationship,
    /// direction from the angle.
    pub fn analyze_turn(
        &self,
        u: NodeId,
        via_edge: EdgeId,
        out_edge: EdgeId,
        angle: f64,
        intersection: &IntersectionView,
    ) -> TurnInstruction {
        let via_node = self.context.graph.target(via_edge);
        let w = self.context.graph.target(out_edge);

        if u == w {
            return TurnInstruction::uturn();
        }

        let in_data = self.context.graph.edge_data(via_edge);
        let out_data = self.context.graph.edge_data(out_edge);

        // roundabouts are handled explicitly
        if in_data.roundabout && out_data.roundabout {
            return if self.context.graph.out_degree(via_node) == 1 {
                TurnInstruction::no_turn()
            } else {
                TurnInstruction::new(TurnType::StayOnRoundabout, direction_from_angle(angle))
            };
        }
        if !in_data.roundabout && out_data.roundabout {
            return TurnInstruction::new(TurnType::EnterRoundabout, direction_from_angle(angle));
        }
        if in_data.roundabout && !out_data.roundabout {
            return TurnInstruction::new(TurnType::LeaveRoundabout, direction_from_angle(angle));
        }

        let in_name = self.name(via_edge);
        let out_name = self.name(out_edge);
        let in_class = self.class(via_edge);
        let out_class = self.class(out_edge);

        // keeping the name is no announcement on simple continuations
        if !requires_name_announced(in_name, out_name) {
            return if self.context.graph.out_degree(via_node) <= 2 {
                TurnInstruction::no_turn()
            } else {
                TurnInstruction::new(TurnType::Continue, direction_from_angle(angle))
            };
        }
        if in_name == EMPTY_NAME_ID
            && out_name == EMPTY_NAME_ID
            && self.context.graph.out_degree(via_node) <= 2
        {
            return TurnInstruction::no_turn();
        }

        let direction = direction_from_angle(angle);

        // ramps
        if out_class.is_link_class() && !in_class.is_link_class() {
            let kind = if out_class.priority < in_class.priority {
                TurnType::OnRamp
            } else {
                TurnType::OffRamp
            };
            return TurnInstruction::new(kind, direction);
        }
        // leaving a ramp into a mainline at a shallow angle reads as a merge
        if in_class.is_link_class()
            && !out_class.is_link_class()
            && angular_deviation(angle, STRAIGHT_ANGLE) < NARROW_TURN_ANGLE
        {
            return TurnInstruction::new(TurnType::Merge, direction);
        }

        // a fork: several narrow same-class choices ahead
        let narrow_choices = intersection
            .iter()
            .filter(|road| road.eid != SPECIAL_EDGE_ID && road.entry_allowed)
            .filter(|road| angular_deviation(road.angle, STRAIGHT_ANGLE) <= NARROW_TURN_ANGLE)
            .count();
        if narrow_choices >= 2 && angular_deviation(angle, STRAIGHT_ANGLE) <= NARROW_TURN_ANGLE {
            return TurnInstruction::new(TurnType::Fork, direction);
        }

        // end of road: nothing ahead resembles straight, only sideways
        let closest_to_straight = intersection
            .iter()
            .filter(|road| road.eid != SPECIAL_EDGE_ID)
            .map(|road| angular_deviation(road.angle, STRAIGHT_ANGLE))
            .fold(f64::INFINITY, f64::min);
        if closest_to_straight > GROUP_ANGLE - FUZZY_ANGLE_DIFFERENCE
            && matches!(
                direction,
                DirectionModifier::Left
                    | DirectionModifier::Right
                    | DirectionModifier::SharpLeft
                    | DirectionModifier::SharpRight
            )
        {
            return TurnInstruction::new(TurnType::EndOfRoad, direction);
        }

        if direction == DirectionModifier::Straight {
            return TurnInstruction::new(TurnType::NewNameStraight, direction);
        }
        TurnInstruction::new(TurnType::Turn, direction)
    }
}
