//! Simple restriction index (C4): (from-node, via-node) to a bucket of
//! targets.
//!
//! A bucket holds either a single `only_*` entry or any number of `no_*`
//! entries, never both: inserting an `only` clears the bucket, and anything
//! arriving after an `only` is ignored.

use rustc_hash::FxHashMap;

use crate::geo::NodeId;
use crate::restrictions::{RestrictionShape, TurnRestriction};

#[derive(Debug, Clone, Copy)]
struct BucketEntry {
    to: NodeId,
    is_only: bool,
}

#[derive(Debug, Default)]
pub struct RestrictionMap {
    index: FxHashMap<(NodeId, NodeId), usize>,
    buckets: Vec<Vec<BucketEntry>>,
}

impl RestrictionMap {
    /// Index the unconditional simple restrictions. Conditional records and
    /// via-way records are handled elsewhere.
    pub fn new(restrictions: &[TurnRestriction]) -> Self {
        let mut map = Self::default();
        for restriction in restrictions {
            if !restriction.is_unconditional() {
                continue;
            }
            let node = match &restriction.shape {
                RestrictionShape::Node(node) => node,
                RestrictionShape::Way(_) => continue,
            };

            let key = (node.from, node.via);
            let index = *map.index.entry(key).or_insert_with(|| {
                map.buckets.push(Vec::new());
                map.buckets.len() - 1
            });
            let bucket = &mut map.buckets[index];

            // a bucket already owned by an only_* entry is final
            if bucket.first().is_some_and(|entry| entry.is_only) {
                continue;
            }
            if restriction.is_only {
                bucket.clear();
            }
            bucket.push(BucketEntry {
                to: node.to,
                is_only: restriction.is_only,
            });
        }
        map
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mandated target of an `only_*` restriction starting at (u, v).
    pub fn only_target_at(&self, from: NodeId, via: NodeId) -> Option<NodeId> {
        let bucket = &self.buckets[*self.index.get(&(from, via))?];
        bucket
            .iter()
            .find(|entry| entry.is_only)
            .map(|entry| entry.to)
    }

    /// Whether the turn (u, v, w) is forbidden, either by an explicit `no_*`
    /// entry or by an `only_*` entry mandating a different target.
    pub fn is_restricted_turn(&self, from: NodeId, via: NodeId, to: NodeId) -> bool {
        let Some(&index) = self.index.get(&(from, via)) else {
            return false;
        };
        self.buckets[index].iter().any(|entry| {
            if entry.is_only {
                entry.to != to
            } else {
                entry.to == to
            }
        })
    }

    /// Invariant check: a bucket holding an only entry holds nothing else.
    pub fn check_bucket_invariant(&self) -> bool {
        self.buckets
            .iter()
            .all(|bucket| !bucket.iter().any(|e| e.is_only) || bucket.len() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restrictions::NodeRestriction;

    fn no_turn(from: NodeId, via: NodeId, to: NodeId) -> TurnRestriction {
        TurnRestriction {
            shape: RestrictionShape::Node(NodeRestriction { from, via, to }),
            is_only: false,
            condition: String::new(),
        }
    }

    fn only_turn(from: NodeId, via: NodeId, to: NodeId) -> TurnRestriction {
        TurnRestriction {
            is_only: true,
            ..no_turn(from, via, to)
        }
    }

    #[test]
    fn test_no_entries_accumulate() {
        let map = RestrictionMap::new(&[no_turn(0, 1, 2), no_turn(0, 1, 3)]);
        assert!(map.is_restricted_turn(0, 1, 2));
        assert!(map.is_restricted_turn(0, 1, 3));
        assert!(!map.is_restricted_turn(0, 1, 4));
        assert_eq!(map.only_target_at(0, 1), None);
        assert!(map.check_bucket_invariant());
    }

    #[test]
    fn test_only_clears_bucket() {
        let map = RestrictionMap::new(&[no_turn(0, 1, 2), only_turn(0, 1, 3)]);
        assert_eq!(map.only_target_at(0, 1), Some(3));
        // mandated target is allowed, everything else restricted
        assert!(!map.is_restricted_turn(0, 1, 3));
        assert!(map.is_restricted_turn(0, 1, 2));
        assert!(map.is_restricted_turn(0, 1, 4));
        assert!(map.check_bucket_invariant());
    }

    #[test]
    fn test_entries_after_only_ignored() {
        let map = RestrictionMap::new(&[only_turn(0, 1, 3), no_turn(0, 1, 3)]);
        assert_eq!(map.only_target_at(0, 1), Some(3));
        assert!(!map.is_restricted_turn(0, 1, 3));
        assert!(map.check_bucket_invariant());
    }

    #[test]
    fn test_conditional_records_skipped() {
        let mut conditional = no_turn(0, 1, 2);
        conditional.condition = "Mo-Fr 08:00-10:00".to_string();
        let map = RestrictionMap::new(&[conditional]);
        assert!(!map.is_restricted_turn(0, 1, 2));
        assert!(map.is_empty());
    }
}
