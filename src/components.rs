//! Connected-component analysis of the node-based graph, and the
//! `components` tool that draws small disconnected components as shapefile
//! polylines for inspection.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::WarningCounters;
use crate::formats::input_graph::InputGraph;
use crate::formats::shapefile::{write_polylines, PolylineFeature};
use crate::geo::NodeId;
use crate::nbg::{build_node_based_graph, NodeBasedGraph};

/// Components below this node count are considered disconnected debris.
pub const SMALL_COMPONENT_SIZE: usize = 1000;

/// BFS component id per node, plus the number of components. Both directed
/// arcs of every segment are present, so out-adjacency doubles as the
/// undirected neighborhood.
pub fn connected_components(graph: &NodeBasedGraph) -> (Vec<u32>, usize) {
    let n = graph.num_nodes() as usize;
    let mut component = vec![u32::MAX; n];
    let mut count = 0u32;
    let mut queue = VecDeque::new();

    for start in 0..n {
        if component[start] != u32::MAX {
            continue;
        }
        component[start] = count;
        queue.push_back(start as NodeId);
        while let Some(node) = queue.pop_front() {
            for edge in graph.adjacent_edges(node) {
                let target = graph.target(edge);
                if component[target as usize] == u32::MAX {
                    component[target as usize] = count;
                    queue.push_back(target);
                }
            }
        }
        count += 1;
    }

    (component, count as usize)
}

#[derive(Debug)]
pub struct ComponentStats {
    pub components: usize,
    pub small_components: usize,
    pub small_component_edges: usize,
}

/// The `components` tool: compute components and write the edges of every
/// small one as polylines into `<prefix>.{shp,shx,dbf}`.
pub fn run_components(input_path: &Path, output_prefix: &Path) -> Result<ComponentStats> {
    println!("Loading {}...", input_path.display());
    let input = InputGraph::read(input_path)
        .with_context(|| format!("failed to read {}", input_path.display()))?;
    let warnings = WarningCounters::new();
    let context = build_node_based_graph(&input, &warnings)
        .context("failed to build the node-based graph")?;

    let (component, count) = connected_components(&context.graph);
    let mut sizes = vec![0usize; count];
    for &id in &component {
        if id != u32::MAX {
            sizes[id as usize] += 1;
        }
    }
    let small_components = sizes
        .iter()
        .filter(|&&size| size < SMALL_COMPONENT_SIZE)
        .count();

    let mut features = Vec::new();
    for u in 0..context.graph.num_nodes() {
        for edge in context.graph.adjacent_edges(u) {
            let v = context.graph.target(edge);
            // one feature per unordered pair
            if u >= v {
                continue;
            }
            let id = component[u as usize];
            if sizes[id as usize] >= SMALL_COMPONENT_SIZE {
                continue;
            }
            let a = context.coordinates[u as usize];
            let b = context.coordinates[v as usize];
            features.push(PolylineFeature {
                attribute: id,
                points: vec![(a.lon_deg(), a.lat_deg()), (b.lon_deg(), b.lat_deg())],
            });
        }
    }
    let small_component_edges = features.len();

    write_polylines(output_prefix, "COMPONENT", &features)
        .with_context(|| format!("failed to write {}", output_prefix.display()))?;

    println!(
        "{} components, {} below {} nodes ({} edges written)",
        count, small_components, SMALL_COMPONENT_SIZE, small_component_edges
    );

    Ok(ComponentStats {
        components: count,
        small_components,
        small_component_edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::input_graph::RawNode;
    use crate::nbg::raw_edge;

    fn node(lon: i32, lat: i32) -> RawNode {
        RawNode {
            lon,
            lat,
            barrier: false,
            traffic_signal: false,
            osm_id: 0,
        }
    }

    #[test]
    fn test_two_components() {
        let input = InputGraph {
            path: "t.rln".into(),
            nodes: vec![node(0, 0), node(1000, 0), node(50_000, 0), node(51_000, 0)],
            edges: vec![raw_edge(0, 1), raw_edge(2, 3)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        let (component, count) = connected_components(&context.graph);

        assert_eq!(count, 2);
        assert_eq!(component[0], component[1]);
        assert_eq!(component[2], component[3]);
        assert_ne!(component[0], component[2]);
    }

    #[test]
    fn test_isolated_node_is_own_component() {
        let input = InputGraph {
            path: "t.rln".into(),
            nodes: vec![node(0, 0), node(1000, 0), node(99_000, 0)],
            edges: vec![raw_edge(0, 1)],
            restrictions: vec![],
        };
        let warnings = WarningCounters::new();
        let context = build_node_based_graph(&input, &warnings).unwrap();
        let (component, count) = connected_components(&context.graph);
        assert_eq!(count, 2);
        assert_ne!(component[2], component[0]);
    }

    #[test]
    fn test_tool_writes_small_components() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("net.rln");
        let input = InputGraph {
            path: input_path.clone(),
            nodes: vec![node(0, 0), node(1000, 0), node(50_000, 0), node(51_000, 0)],
            edges: vec![raw_edge(0, 1), raw_edge(2, 3)],
            restrictions: vec![],
        };
        input.write(&input_path).unwrap();

        let prefix = dir.path().join("component");
        let stats = run_components(&input_path, &prefix).unwrap();
        assert_eq!(stats.components, 2);
        assert_eq!(stats.small_components, 2);
        assert_eq!(stats.small_component_edges, 2);
        assert!(prefix.with_extension("shp").exists());
        assert!(prefix.with_extension("dbf").exists());
    }
}
