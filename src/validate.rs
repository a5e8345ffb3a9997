//! Post-build invariant checks over the edge-based graph.
//!
//! Fast-fail sanity for the properties the router depends on: no self
//! edges, dense unique turn ids, in-range node references, one sidecar
//! record per turn.

use crate::ebg::EdgeBasedGraph;
use crate::formats::original_edge_data::OriginalEdgeRecord;
use crate::restrictions::node_map::RestrictionMap;

#[derive(Debug, Default)]
pub struct InvariantResult {
    pub passed: bool,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl InvariantResult {
    fn new() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    fn check(&mut self, ok: bool, message: impl FnOnce() -> String) {
        self.checks_run += 1;
        if ok {
            self.checks_passed += 1;
        } else {
            self.passed = false;
            self.errors.push(message());
        }
    }

    pub fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

pub fn validate_edge_based_graph(
    graph: &EdgeBasedGraph,
    sidecar: &[OriginalEdgeRecord],
    restriction_map: &RestrictionMap,
) -> InvariantResult {
    let mut result = InvariantResult::new();

    // 1. no self edges
    let self_edges = graph
        .edges
        .iter()
        .filter(|edge| edge.source == edge.target)
        .count();
    result.check(self_edges == 0, || {
        format!("{self_edges} edge-based edges are self loops")
    });

    // 2. turn ids are dense and unique
    let mut turn_ids: Vec<u32> = graph.edges.iter().map(|edge| edge.turn_id).collect();
    turn_ids.sort_unstable();
    let dense = turn_ids
        .iter()
        .enumerate()
        .all(|(index, &id)| id == index as u32);
    result.check(dense, || "turn ids are not a dense 0..K range".to_string());

    // 3. node references in range
    let out_of_range = graph
        .edges
        .iter()
        .filter(|edge| {
            edge.source >= graph.stats.node_count || edge.target >= graph.stats.node_count
        })
        .count();
    result.check(out_of_range == 0, || {
        format!("{out_of_range} edges reference nodes outside the id range")
    });

    // 4. node ids unique
    let mut ids: Vec<u32> = graph.nodes.iter().map(|node| node.id).collect();
    ids.sort_unstable();
    let unique = ids.windows(2).all(|pair| pair[0] != pair[1]);
    result.check(unique, || "duplicate edge-based node ids".to_string());

    // 5. one sidecar record per turn
    result.check(sidecar.len() as u64 == graph.stats.edge_count, || {
        format!(
            "sidecar holds {} records for {} edges",
            sidecar.len(),
            graph.stats.edge_count
        )
    });

    // 6. restriction buckets hold either one only-entry or no-entries
    result.check(restriction_map.check_bucket_invariant(), || {
        "restriction bucket mixes only- and no-entries".to_string()
    });

    if graph.stats.edge_count == 0 && graph.stats.node_count > 0 {
        result.warn("edge-based graph has nodes but no turns".to_string());
    }

    result
}
