//! Via-way restriction index (C5).
//!
//! Restrictions whose via is a way need a two-edge history to identify.
//! They are grouped by (in.via, out.via, in.from); each group is assigned a
//! *duplicated node* — a shadow edge-based node representing "arrived on the
//! via way through this specific in-way". The router then distinguishes
//! same-looking turns with different histories.
//!
//! Group ids are defined through a prefix table over the sorted restriction
//! list: the id of a restriction is the index of the group whose boundary
//! range contains it.

use rustc_hash::FxHashMap;

use crate::geo::NodeId;
use crate::restrictions::{RestrictionShape, TurnRestriction, WayRestriction};

pub type DuplicatedNodeId = usize;

/// Representative of one duplicated-node group: the via way it shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViaWay {
    pub id: DuplicatedNodeId,
    pub from: NodeId,
    pub to: NodeId,
}

#[derive(Debug, Clone)]
struct Entry {
    way: WayRestriction,
    is_only: bool,
    has_condition: bool,
}

impl Entry {
    fn group_key(&self) -> (NodeId, NodeId, NodeId) {
        (
            self.way.in_restriction.via,
            self.way.out_restriction.via,
            self.way.in_restriction.from,
        )
    }

    fn via_key(&self) -> (NodeId, NodeId) {
        (self.way.out_restriction.from, self.way.out_restriction.via)
    }
}

#[derive(Debug, Default)]
pub struct WayRestrictionMap {
    /// Sorted by group key, then (out.to, is_only, has_condition).
    restriction_data: Vec<Entry>,
    /// Group boundary offsets into `restriction_data`; one more entry than
    /// there are groups.
    duplicated_node_groups: Vec<usize>,
    /// (in.from, in.via) to the restrictions starting there.
    restriction_starts: FxHashMap<(NodeId, NodeId), Vec<usize>>,
}

impl WayRestrictionMap {
    pub fn new(restrictions: &[TurnRestriction]) -> Self {
        let mut data: Vec<Entry> = restrictions
            .iter()
            .filter_map(|restriction| match &restriction.shape {
                RestrictionShape::Way(way) => {
                    // only uninterrupted chains are representable
                    let uninterrupted = way.in_restriction.via == way.out_restriction.from
                        && way.in_restriction.to == way.out_restriction.via;
                    uninterrupted.then(|| Entry {
                        way: *way,
                        is_only: restriction.is_only,
                        has_condition: !restriction.condition.is_empty(),
                    })
                }
                RestrictionShape::Node(_) => None,
            })
            .collect();

        data.sort_by_key(|entry| {
            (
                entry.group_key(),
                entry.way.out_restriction.to,
                entry.is_only,
                entry.has_condition,
            )
        });
        data.dedup_by(|b, a| {
            a.group_key() == b.group_key()
                && a.way.out_restriction.to == b.way.out_restriction.to
                && a.is_only == b.is_only
                && a.has_condition == b.has_condition
        });

        let mut duplicated_node_groups = Vec::new();
        if !data.is_empty() {
            duplicated_node_groups.push(0);
            for offset in 1..data.len() {
                if data[offset - 1].group_key() != data[offset].group_key() {
                    duplicated_node_groups.push(offset);
                }
            }
            duplicated_node_groups.push(data.len());
        }

        let mut restriction_starts: FxHashMap<(NodeId, NodeId), Vec<usize>> =
            FxHashMap::default();
        for (index, entry) in data.iter().enumerate() {
            let key = (entry.way.in_restriction.from, entry.way.in_restriction.via);
            restriction_starts.entry(key).or_default().push(index);
        }

        Self {
            restriction_data: data,
            duplicated_node_groups,
            restriction_starts,
        }
    }

    pub fn number_of_duplicated_nodes(&self) -> usize {
        self.duplicated_node_groups.len().saturating_sub(1)
    }

    /// Whether the directed edge (from, to) is the via way of any
    /// restriction.
    pub fn is_via_way(&self, from: NodeId, to: NodeId) -> bool {
        if self.restriction_data.is_empty() {
            return false;
        }
        let start = self
            .restriction_data
            .partition_point(|entry| entry.via_key() < (from, to));
        self.restriction_data
            .get(start)
            .is_some_and(|entry| entry.via_key() == (from, to))
    }

    fn as_duplicated_node_id(&self, restriction_id: usize) -> DuplicatedNodeId {
        self.duplicated_node_groups
            .partition_point(|&offset| offset <= restriction_id)
            - 1
    }

    /// Range of duplicated-node ids whose via way is (from, to).
    pub fn duplicated_node_ids(
        &self,
        from: NodeId,
        to: NodeId,
    ) -> std::ops::Range<DuplicatedNodeId> {
        if self.restriction_data.is_empty() {
            return 0..0;
        }
        let lower = self
            .restriction_data
            .partition_point(|entry| entry.via_key() < (from, to));
        let upper = self
            .restriction_data
            .partition_point(|entry| entry.via_key() <= (from, to));
        if lower == upper {
            return 0..0;
        }
        self.as_duplicated_node_id(lower)..self.as_duplicated_node_id(upper - 1) + 1
    }

    /// Whether turning onto `to` is forbidden when standing on the
    /// duplicated node. Conditional entries never restrict statically.
    pub fn is_restricted(&self, duplicated_node: DuplicatedNodeId, to: NodeId) -> bool {
        let start = self.duplicated_node_groups[duplicated_node];
        let end = self.duplicated_node_groups[duplicated_node + 1];
        for entry in &self.restriction_data[start..end] {
            if entry.has_condition {
                continue;
            }
            if entry.is_only {
                return entry.way.out_restriction.to != to;
            }
            if entry.way.out_restriction.to == to {
                return true;
            }
        }
        false
    }

    /// One representative via way per duplicated node, for shadow-node
    /// emission.
    pub fn duplicated_node_representatives(&self) -> Vec<ViaWay> {
        self.duplicated_node_groups
            .iter()
            .take(self.number_of_duplicated_nodes())
            .enumerate()
            .map(|(id, &offset)| {
                let way = &self.restriction_data[offset].way;
                ViaWay {
                    id,
                    from: way.in_restriction.via,
                    to: way.out_restriction.via,
                }
            })
            .collect()
    }

    /// When the turn (from, via, to) enters the via way of a restriction
    /// group, redirect `edge_based_node` to the group's duplicated node,
    /// which lives in the tail id range of the edge-based node space.
    pub fn remap_if_restricted(
        &self,
        edge_based_node: u32,
        node_based_from: NodeId,
        node_based_via: NodeId,
        node_based_to: NodeId,
        number_of_edge_based_nodes: u32,
    ) -> u32 {
        let Some(candidates) = self
            .restriction_starts
            .get(&(node_based_from, node_based_via))
        else {
            return edge_based_node;
        };

        match candidates.iter().find(|&&index| {
            self.restriction_data[index].way.in_restriction.to == node_based_to
        }) {
            Some(&index) => {
                number_of_edge_based_nodes - self.number_of_duplicated_nodes() as u32
                    + self.as_duplicated_node_id(index) as u32
            }
            None => edge_based_node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restrictions::NodeRestriction;

    fn way(from: NodeId, via: NodeId, via2: NodeId, to: NodeId, is_only: bool) -> TurnRestriction {
        TurnRestriction {
            shape: RestrictionShape::Way(WayRestriction {
                in_restriction: NodeRestriction { from, via, to: via2 },
                out_restriction: NodeRestriction { from: via, via: via2, to },
            }),
            is_only,
            condition: String::new(),
        }
    }

    //  a - b
    //      |
    //  y - c - x
    //
    // restrictions: no (a,b,c,x), no (a,b,c,y) -- one group, via way b->c
    fn two_no_turns() -> WayRestrictionMap {
        WayRestrictionMap::new(&[way(0, 1, 2, 3, false), way(0, 1, 2, 4, false)])
    }

    #[test]
    fn test_one_group_for_shared_via_and_from() {
        let map = two_no_turns();
        assert_eq!(map.number_of_duplicated_nodes(), 1);
        assert!(map.is_via_way(1, 2));
        assert!(!map.is_via_way(2, 1));
        assert_eq!(map.duplicated_node_ids(1, 2), 0..1);
        assert!(map.is_restricted(0, 3));
        assert!(map.is_restricted(0, 4));
        assert!(!map.is_restricted(0, 5));
    }

    #[test]
    fn test_two_groups_for_distinct_in_ways() {
        // same via way b->c, but entered from different roads
        let map = WayRestrictionMap::new(&[way(0, 1, 2, 3, false), way(5, 1, 2, 4, false)]);
        assert_eq!(map.number_of_duplicated_nodes(), 2);
        assert_eq!(map.duplicated_node_ids(1, 2), 0..2);
        // group order follows in.from: (…, in_from=0) before (…, in_from=5)
        assert!(map.is_restricted(0, 3));
        assert!(!map.is_restricted(0, 4));
        assert!(map.is_restricted(1, 4));
        assert!(!map.is_restricted(1, 3));
    }

    #[test]
    fn test_only_restriction_inverts_targets() {
        let map = WayRestrictionMap::new(&[way(0, 1, 2, 3, true)]);
        assert!(!map.is_restricted(0, 3));
        assert!(map.is_restricted(0, 4));
        assert!(map.is_restricted(0, 9));
    }

    #[test]
    fn test_remap_targets_the_tail_range() {
        let map = two_no_turns();
        // 10 edge-based nodes total, 1 duplicated: the shadow node is id 9
        assert_eq!(map.remap_if_restricted(7, 0, 1, 2, 10), 9);
        // a turn that does not enter the via way stays untouched
        assert_eq!(map.remap_if_restricted(7, 0, 1, 5, 10), 7);
        assert_eq!(map.remap_if_restricted(7, 4, 1, 2, 10), 7);
    }

    #[test]
    fn test_representatives_name_the_via_way() {
        let map = two_no_turns();
        let reps = map.duplicated_node_representatives();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].from, 1);
        assert_eq!(reps[0].to, 2);
    }

    #[test]
    fn test_conditional_entry_never_restricts_statically() {
        let mut conditional = way(0, 1, 2, 3, false);
        conditional.condition = "Mo-Fr 07:00-09:00".to_string();
        let map = WayRestrictionMap::new(&[conditional]);
        assert_eq!(map.number_of_duplicated_nodes(), 1);
        assert!(!map.is_restricted(0, 3));
    }

    #[test]
    fn test_empty_map() {
        let map = WayRestrictionMap::new(&[]);
        assert_eq!(map.number_of_duplicated_nodes(), 0);
        assert!(!map.is_via_way(0, 1));
        assert_eq!(map.duplicated_node_ids(0, 1), 0..0);
    }
}
