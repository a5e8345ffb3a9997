//! Annotation compaction (C3).
//!
//! Graph compression leaves annotation entries with no referencing edge.
//! A mark pass followed by a prefix sum builds the old-to-new index map,
//! edges are remapped in place, and the table is truncated.

use crate::error::{Result, RoadloomError};
use crate::nbg::NodeBasedContext;

const UNREFERENCED: u32 = u32::MAX;

/// Drop unreferenced annotation entries. Returns how many were removed.
pub fn compress_annotation_data(context: &mut NodeBasedContext) -> Result<usize> {
    let mut mapping = vec![UNREFERENCED; context.annotations.len()];

    // mark
    for u in 0..context.graph.num_nodes() {
        for edge in context.graph.adjacent_edges(u) {
            let annotation_id = context.graph.edge_data(edge).annotation_id as usize;
            if annotation_id >= mapping.len() {
                return Err(RoadloomError::IntegrityViolation(format!(
                    "edge references annotation {} of {}",
                    annotation_id,
                    mapping.len()
                )));
            }
            mapping[annotation_id] = 0;
        }
    }

    // prefix sum over the marks
    let mut prefix_sum = 0u32;
    for slot in mapping.iter_mut() {
        if *slot == 0 {
            *slot = prefix_sum;
            prefix_sum += 1;
        }
    }

    // apply
    for u in 0..context.graph.num_nodes() {
        for edge in context.graph.adjacent_edges(u) {
            let data = context.graph.edge_data_mut(edge);
            data.annotation_id = mapping[data.annotation_id as usize];
        }
    }

    // compact the table, shifting kept entries to the front
    let old_size = context.annotations.len();
    let mut keep = mapping.iter().map(|&m| m != UNREFERENCED);
    context.annotations.retain(|_| keep.next().unwrap());

    Ok(old_size - context.annotations.len())
}
