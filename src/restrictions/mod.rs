//! Turn restriction records and their indexes.
//!
//! A simple restriction names (from-node, via-node, to-node). A via-way
//! restriction needs an edge as its via and is stored as two chained node
//! triples; only uninterrupted chains (`in.via == out.from && in.to ==
//! out.via`) are representable.

pub mod node_map;
pub mod way_map;

use rustc_hash::FxHashSet;

use crate::error::WarningCounters;
use crate::formats::input_graph::{RawRestriction, RawRestrictionKind};
use crate::geo::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeRestriction {
    pub from: NodeId,
    pub via: NodeId,
    pub to: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WayRestriction {
    pub in_restriction: NodeRestriction,
    pub out_restriction: NodeRestriction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionShape {
    Node(NodeRestriction),
    Way(WayRestriction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRestriction {
    pub shape: RestrictionShape,
    pub is_only: bool,
    /// Conditional clause text; empty when always active.
    pub condition: String,
}

impl TurnRestriction {
    pub fn is_unconditional(&self) -> bool {
        self.condition.is_empty()
    }

    /// Every node the restriction touches as a via; these nodes must not be
    /// compressed away.
    pub fn via_nodes(&self) -> Vec<NodeId> {
        match &self.shape {
            RestrictionShape::Node(r) => vec![r.via],
            RestrictionShape::Way(r) => vec![
                r.in_restriction.via,
                r.out_restriction.from,
                r.out_restriction.via,
            ],
        }
    }
}

/// Decode the raw input records, dropping any restriction that references a
/// node outside the graph (counted as a warning).
pub fn from_raw(
    raw: &[RawRestriction],
    number_of_nodes: NodeId,
    warnings: &WarningCounters,
) -> Vec<TurnRestriction> {
    let mut result = Vec::with_capacity(raw.len());
    for record in raw {
        let in_range = |n: NodeId| n < number_of_nodes;
        let valid = match record.kind {
            RawRestrictionKind::NodeVia => {
                in_range(record.from) && in_range(record.via) && in_range(record.to)
            }
            RawRestrictionKind::WayVia => {
                in_range(record.from)
                    && in_range(record.via)
                    && in_range(record.via2)
                    && in_range(record.to)
            }
        };
        if !valid {
            WarningCounters::bump(&warnings.restrictions_dropped);
            continue;
        }

        let shape = match record.kind {
            RawRestrictionKind::NodeVia => RestrictionShape::Node(NodeRestriction {
                from: record.from,
                via: record.via,
                to: record.to,
            }),
            // the via way runs via -> via2
            RawRestrictionKind::WayVia => RestrictionShape::Way(WayRestriction {
                in_restriction: NodeRestriction {
                    from: record.from,
                    via: record.via,
                    to: record.via2,
                },
                out_restriction: NodeRestriction {
                    from: record.via,
                    via: record.via2,
                    to: record.to,
                },
            }),
        };

        result.push(TurnRestriction {
            shape,
            is_only: record.is_only,
            condition: record.condition.clone(),
        });
    }
    result
}

/// The set of nodes the compressor must keep.
pub fn collect_via_nodes(restrictions: &[TurnRestriction]) -> FxHashSet<NodeId> {
    restrictions
        .iter()
        .flat_map(TurnRestriction::via_nodes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: RawRestrictionKind, from: u32, via: u32, via2: u32, to: u32) -> RawRestriction {
        RawRestriction {
            kind,
            from,
            via,
            via2,
            to,
            is_only: false,
            condition: String::new(),
        }
    }

    #[test]
    fn test_way_restriction_chains_triples() {
        let warnings = WarningCounters::new();
        let decoded = from_raw(&[raw(RawRestrictionKind::WayVia, 0, 1, 2, 3)], 4, &warnings);
        assert_eq!(decoded.len(), 1);
        match &decoded[0].shape {
            RestrictionShape::Way(way) => {
                assert_eq!(way.in_restriction.via, way.out_restriction.from);
                assert_eq!(way.in_restriction.to, way.out_restriction.via);
                assert_eq!(way.out_restriction.to, 3);
            }
            _ => panic!("expected way restriction"),
        }
    }

    #[test]
    fn test_out_of_range_dropped_with_warning() {
        let warnings = WarningCounters::new();
        let decoded = from_raw(&[raw(RawRestrictionKind::NodeVia, 0, 9, 0, 1)], 4, &warnings);
        assert!(decoded.is_empty());
        assert_eq!(
            warnings
                .restrictions_dropped
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_via_nodes_cover_the_way() {
        let warnings = WarningCounters::new();
        let decoded = from_raw(&[raw(RawRestrictionKind::WayVia, 0, 1, 2, 3)], 4, &warnings);
        let vias = collect_via_nodes(&decoded);
        assert!(vias.contains(&1));
        assert!(vias.contains(&2));
        assert!(!vias.contains(&3));
    }
}
