//! Graph compression: collapse chains of degree-2 nodes into single edges
//! whose interior geometry moves into the compressed geometry store.
//!
//! Runs single-threaded because it rewires adjacency in place. Barrier and
//! traffic-signal nodes, restriction via nodes and incompatible edge pairs
//! are never collapsed; the loop repeats until a full pass makes no change.

use rustc_hash::FxHashSet;

use crate::error::{Result, RoadloomError, WarningCounters};
use crate::geo::NodeId;
use crate::nbg::geometry::{CompressedEdgeContainer, GeometryId, GeometryStore};
use crate::nbg::{NodeBasedContext, NodeBasedEdgeData};

/// Collapse all compressible degree-2 chains. Returns the number of removed
/// nodes.
pub fn compress_graph(
    context: &mut NodeBasedContext,
    restriction_via_nodes: &FxHashSet<NodeId>,
    container: &mut CompressedEdgeContainer,
    warnings: &WarningCounters,
) -> usize {
    let mut removed = 0usize;

    loop {
        let mut changed = false;
        for v in 0..context.graph.num_nodes() {
            if try_compress_node(context, restriction_via_nodes, container, warnings, v) {
                removed += 1;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    removed
}

fn edges_compatible(lhs: &NodeBasedEdgeData, rhs: &NodeBasedEdgeData) -> bool {
    lhs.annotation_id == rhs.annotation_id
        && lhs.reversed == rhs.reversed
        && lhs.roundabout == rhs.roundabout
        && lhs.circular == rhs.circular
        && lhs.restricted == rhs.restricted
        && lhs.startpoint == rhs.startpoint
}

fn try_compress_node(
    context: &mut NodeBasedContext,
    restriction_via_nodes: &FxHashSet<NodeId>,
    container: &mut CompressedEdgeContainer,
    warnings: &WarningCounters,
    v: NodeId,
) -> bool {
    let graph = &context.graph;
    if graph.out_degree(v) != 2 {
        return false;
    }
    if context.barrier_nodes.contains(&v)
        || context.traffic_signals.contains(&v)
        || restriction_via_nodes.contains(&v)
    {
        return false;
    }

    let begin = graph.begin_edges(v);
    let via_to_u = begin;
    let via_to_w = begin + 1;
    let u = graph.target(via_to_u);
    let w = graph.target(via_to_w);

    // collapsing a loop would create a self-loop
    if u == w {
        return false;
    }

    let (forward_in, reverse_in) = match (graph.find_edge(u, v), graph.find_edge(w, v)) {
        (Some(f), Some(r)) => (f, r),
        _ => return false,
    };

    let compatible = edges_compatible(graph.edge_data(forward_in), graph.edge_data(via_to_w))
        && edges_compatible(graph.edge_data(reverse_in), graph.edge_data(via_to_u));
    if !compatible {
        WarningCounters::bump(&warnings.compressions_refused);
        return false;
    }

    // a compressed (u, w) edge may not collide with an existing one
    if context.graph.find_edge(u, w).is_some() || context.graph.find_edge(w, u).is_some() {
        return false;
    }

    // merge weights onto the surviving through-edges
    {
        let onward = context.graph.edge_data(via_to_w).clone();
        let data = context.graph.edge_data_mut(forward_in);
        data.weight += onward.weight;
        data.duration += onward.duration;
        data.distance += onward.distance;
    }
    {
        let onward = context.graph.edge_data(via_to_u).clone();
        let data = context.graph.edge_data_mut(reverse_in);
        data.weight += onward.weight;
        data.duration += onward.duration;
        data.distance += onward.distance;
    }

    container.compress_edge(forward_in, via_to_w, v);
    container.compress_edge(reverse_in, via_to_u, v);

    context.graph.set_target(forward_in, w);
    context.graph.set_target(reverse_in, u);

    // drop v's own arcs; their geometry buckets were merged above, so the
    // swap-delete cannot strand a live bucket
    context.graph.delete_edges_to(v, u);
    context.graph.delete_edges_to(v, w);

    true
}

/// Pack the per-edge interior buckets into the shared geometry store. Each
/// unordered pair gets one run, stored in forward direction; the reverse
/// directed edge reads it through the direction bit.
pub fn zip_geometries(
    context: &mut NodeBasedContext,
    container: &CompressedEdgeContainer,
    warnings: &WarningCounters,
) -> Result<()> {
    let mut store = GeometryStore::new();

    for u in 0..context.graph.num_nodes() {
        for edge in context.graph.adjacent_edges(u) {
            let v = context.graph.target(edge);
            // visit each unordered pair once
            if u >= v {
                continue;
            }

            let (from, to) = if context.graph.edge_data(edge).reversed {
                (v, u)
            } else {
                (u, v)
            };

            let forward_edge = context.graph.find_edge(from, to).ok_or_else(|| {
                RoadloomError::IntegrityViolation(format!("missing forward edge ({from}, {to})"))
            })?;
            let reverse_edge = context.graph.find_edge(to, from).ok_or_else(|| {
                RoadloomError::IntegrityViolation(format!("missing reverse edge ({to}, {from})"))
            })?;

            let interiors: Vec<_> = container
                .interior_nodes(forward_edge)
                .iter()
                .map(|&node| context.coordinates[node as usize])
                .collect();
            if container.has_entry(forward_edge) && interiors.is_empty() {
                WarningCounters::bump(&warnings.empty_geometries);
            }

            let id = store.push_run(&interiors);
            context.graph.edge_data_mut(forward_edge).geometry_id = GeometryId { id, forward: true };
            context.graph.edge_data_mut(reverse_edge).geometry_id =
                GeometryId { id, forward: false };
        }
    }

    context.geometry = store;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::input_graph::{InputGraph, RawNode};
    use crate::nbg::{build_node_based_graph, raw_edge};

    fn line_input(n: usize) -> InputGraph {
        let nodes = (0..n)
            .map(|i| RawNode {
                lon: i as i32 * 1000,
                lat: 0,
                barrier: false,
                traffic_signal: false,
                osm_id: i as i64,
            })
            .collect();
        let edges = (0..n - 1)
            .map(|i| raw_edge(i as u32, i as u32 + 1))
            .collect();
        InputGraph {
            path: "test.rln".into(),
            nodes,
            edges,
            restrictions: vec![],
        }
    }

    #[test]
    fn test_chain_collapses_to_single_edge() {
        let warnings = WarningCounters::new();
        let mut context = build_node_based_graph(&line_input(4), &warnings).unwrap();
        let mut container = CompressedEdgeContainer::new();

        let removed = compress_graph(
            &mut context,
            &FxHashSet::default(),
            &mut container,
            &warnings,
        );

        assert_eq!(removed, 2);
        let forward = context.graph.find_edge(0, 3).unwrap();
        // three segments of weight 100 each
        assert_eq!(context.graph.edge_data(forward).weight, 300);
        assert_eq!(container.interior_nodes(forward), &[1, 2]);

        zip_geometries(&mut context, &container, &warnings).unwrap();
        let geometry_id = context.graph.edge_data(forward).geometry_id;
        let interiors = context.geometry.interior_coordinates(geometry_id).unwrap();
        assert_eq!(interiors.len(), 2);
        assert_eq!(interiors[0].lon, 1000);

        // the reverse edge reads the same run backwards
        let backward = context.graph.find_edge(3, 0).unwrap();
        let reverse_id = context.graph.edge_data(backward).geometry_id;
        let reverse_run = context.geometry.interior_coordinates(reverse_id).unwrap();
        assert_eq!(reverse_run[0].lon, 2000);
    }

    #[test]
    fn test_barrier_node_survives() {
        let warnings = WarningCounters::new();
        let mut input = line_input(3);
        input.nodes[1].barrier = true;
        let mut context = build_node_based_graph(&input, &warnings).unwrap();
        let mut container = CompressedEdgeContainer::new();

        let removed = compress_graph(
            &mut context,
            &FxHashSet::default(),
            &mut container,
            &warnings,
        );

        assert_eq!(removed, 0);
        assert!(context.graph.find_edge(0, 1).is_some());
        assert!(context.graph.find_edge(1, 2).is_some());
    }

    #[test]
    fn test_restriction_via_survives() {
        let warnings = WarningCounters::new();
        let mut context = build_node_based_graph(&line_input(3), &warnings).unwrap();
        let mut container = CompressedEdgeContainer::new();
        let mut vias = FxHashSet::default();
        vias.insert(1u32);

        let removed = compress_graph(&mut context, &vias, &mut container, &warnings);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_incompatible_names_refused() {
        let warnings = WarningCounters::new();
        let mut input = line_input(3);
        input.edges[1].name_id = 42;
        let mut context = build_node_based_graph(&input, &warnings).unwrap();
        let mut container = CompressedEdgeContainer::new();

        let removed = compress_graph(
            &mut context,
            &FxHashSet::default(),
            &mut container,
            &warnings,
        );

        assert_eq!(removed, 0);
        assert!(
            warnings
                .compressions_refused
                .load(std::sync::atomic::Ordering::Relaxed)
                > 0
        );
    }

    #[test]
    fn test_degree_three_untouched() {
        let warnings = WarningCounters::new();
        let mut input = line_input(3);
        input.nodes.push(RawNode {
            lon: 1000,
            lat: 1000,
            barrier: false,
            traffic_signal: false,
            osm_id: 3,
        });
        input.edges.push(raw_edge(1, 3));
        let mut context = build_node_based_graph(&input, &warnings).unwrap();
        let mut container = CompressedEdgeContainer::new();

        let removed = compress_graph(
            &mut context,
            &FxHashSet::default(),
            &mut container,
            &warnings,
        );
        // node 1 has degree 3 now; nothing else is compressible
        assert_eq!(removed, 0);
    }
}
