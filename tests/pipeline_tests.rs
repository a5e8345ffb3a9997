//! End-to-end pipeline tests: synthetic networks written to disk, the full
//! build run over them, and the output artifacts read back.

use std::path::Path;

use roadloom::cancel::CancellationToken;
use roadloom::config::ProfileConfig;
use roadloom::formats::ebg_output;
use roadloom::formats::input_graph::{
    InputGraph, RawEdge, RawNode, RawRestriction, RawRestrictionKind,
};
use roadloom::formats::original_edge_data;
use roadloom::guidance::{DirectionModifier, TurnType};
use roadloom::pipeline::{run_build, BuildConfig};

fn node(lon: i32, lat: i32) -> RawNode {
    RawNode {
        lon,
        lat,
        barrier: false,
        traffic_signal: false,
        osm_id: 0,
    }
}

fn edge(source: u32, target: u32) -> RawEdge {
    RawEdge {
        source,
        target,
        weight: 100,
        duration: 100,
        distance: 100.0,
        name_id: 0,
        forward: true,
        backward: true,
        roundabout: false,
        circular: false,
        restricted: false,
        startpoint: true,
        is_split: false,
        mode: 1,
        classification: 11 | (1 << 16),
    }
}

fn named(source: u32, target: u32, name: u32) -> RawEdge {
    RawEdge {
        name_id: name,
        ..edge(source, target)
    }
}

fn build(input: &InputGraph, dir: &Path) -> roadloom::pipeline::BuildSummary {
    let path = dir.join("net.rln");
    input.write(&path).unwrap();
    let config = BuildConfig {
        input: path,
        outdir: dir.join("out"),
        profile: ProfileConfig::default(),
    };
    run_build(&config, &CancellationToken::new()).unwrap()
}

#[test]
fn empty_graph_builds_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![],
        edges: vec![],
        restrictions: vec![],
    };
    let summary = build(&input, dir.path());
    assert_eq!(summary.edge_based_nodes, 0);
    assert_eq!(summary.edge_based_edges, 0);

    let (nodes, _, _) = ebg_output::read_nodes(&summary.nodes_path).unwrap();
    assert!(nodes.is_empty());
}

#[test]
fn dead_end_street_allows_uturns() {
    // 0 - 1: both endpoints are dead ends, so both u-turns exist
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![node(0, 0), node(10_000, 0)],
        edges: vec![edge(0, 1)],
        restrictions: vec![],
    };
    let summary = build(&input, dir.path());
    assert_eq!(summary.edge_based_nodes, 2);
    assert_eq!(summary.edge_based_edges, 2);

    let records = original_edge_data::read_all(&summary.original_edge_data_path).unwrap();
    assert!(records
        .iter()
        .all(|record| record.instruction.kind == TurnType::UTurn));
}

#[test]
fn cross_intersection_instructions() {
    // four named roads meeting at the center; arriving from the west the
    // instructions read right / straight / left
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![
            node(-10_000, 0), // 0 west
            node(0, 0),       // 1 center
            node(10_000, 0),  // 2 east
            node(0, -10_000), // 3 south
            node(0, 10_000),  // 4 north
        ],
        edges: vec![
            named(0, 1, 1),
            named(1, 2, 2),
            named(1, 3, 3),
            named(1, 4, 4),
        ],
        restrictions: vec![],
    };
    let summary = build(&input, dir.path());

    let records = original_edge_data::read_all(&summary.original_edge_data_path).unwrap();
    // turns via the center arriving eastbound (pre bearing ~90 degrees)
    let eastbound: Vec<_> = records
        .iter()
        .filter(|record| record.via_node == 1 && record.pre_bearing.abs_diff(900) < 50)
        .collect();
    assert_eq!(eastbound.len(), 3);

    let directions: Vec<DirectionModifier> =
        eastbound.iter().map(|record| record.instruction.direction).collect();
    assert!(directions.contains(&DirectionModifier::Right));
    assert!(directions.contains(&DirectionModifier::Straight));
    assert!(directions.contains(&DirectionModifier::Left));

    let straight = eastbound
        .iter()
        .find(|record| record.instruction.direction == DirectionModifier::Straight)
        .unwrap();
    assert_eq!(straight.instruction.kind, TurnType::NewNameStraight);
}

#[test]
fn traffic_signal_adds_penalty() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![node(0, 0), node(10_000, 0), node(20_000, 0)],
        edges: vec![named(0, 1, 1), named(1, 2, 1)],
        restrictions: vec![],
    };
    input.nodes[1].traffic_signal = true;
    let summary = build(&input, dir.path());

    let (edges, _, _) = ebg_output::read_edges(&summary.edges_path).unwrap();
    // the through turns pay weight(edge) + 20ds signal penalty
    assert!(edges.iter().any(|edge| edge.weight == 120));
}

#[test]
fn via_way_restriction_expands_duplicated_node() {
    // forbid the chain 0 -> (1 -> 2) -> 3; the side exit 2 -> 4 stays
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![
            node(0, 0),
            node(10_000, 0),
            node(20_000, 0),
            node(30_000, 0),
            node(20_000, 10_000),
        ],
        edges: vec![
            named(0, 1, 1),
            named(1, 2, 1),
            named(2, 3, 1),
            named(2, 4, 2),
        ],
        restrictions: vec![RawRestriction {
            kind: RawRestrictionKind::WayVia,
            from: 0,
            via: 1,
            via2: 2,
            to: 3,
            is_only: false,
            condition: String::new(),
        }],
    };
    let summary = build(&input, dir.path());
    assert_eq!(summary.duplicated_nodes, 1);

    let (nodes, _, _) = ebg_output::read_nodes(&summary.nodes_path).unwrap();
    let shadow = nodes.iter().find(|node| node.ignore_in_grid).unwrap();

    let (edges, _, _) = ebg_output::read_edges(&summary.edges_path).unwrap();
    // exactly one turn enters the shadow node, and the shadow node offers
    // strictly fewer onward turns than the original via-way node
    let into_shadow: Vec<_> = edges.iter().filter(|e| e.target == shadow.id).collect();
    assert_eq!(into_shadow.len(), 1);
    let from_shadow = edges.iter().filter(|e| e.source == shadow.id).count();
    let original = nodes
        .iter()
        .find(|n| n.lon1 == 10_000 && n.lon2 == 20_000 && !n.ignore_in_grid)
        .unwrap();
    let from_original = edges.iter().filter(|e| e.source == original.id).count();
    assert_eq!(from_shadow + 1, from_original);
}

#[test]
fn only_restriction_prunes_other_turns() {
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![
            node(0, 0),
            node(10_000, 0),
            node(20_000, 0),
            node(10_000, 10_000),
        ],
        edges: vec![named(0, 1, 1), named(1, 2, 2), named(1, 3, 3)],
        restrictions: vec![RawRestriction {
            kind: RawRestrictionKind::NodeVia,
            from: 0,
            via: 1,
            via2: 0,
            to: 2,
            is_only: true,
            condition: String::new(),
        }],
    };
    let summary = build(&input, dir.path());
    assert!(summary.skipped_turns >= 1);

    let (nodes, _, _) = ebg_output::read_nodes(&summary.nodes_path).unwrap();
    let (edges, _, _) = ebg_output::read_edges(&summary.edges_path).unwrap();
    let source = nodes
        .iter()
        .find(|n| n.lon1 == 0 && n.lon2 == 10_000)
        .unwrap();
    let outgoing: Vec<_> = edges.iter().filter(|e| e.source == source.id).collect();
    assert_eq!(outgoing.len(), 1);
}

#[test]
fn degree_two_chain_is_compressed() {
    // 0 - 1 - 2 - 3 all same name collapses into one segment pair
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![
            node(0, 0),
            node(10_000, 0),
            node(20_000, 0),
            node(30_000, 0),
        ],
        edges: vec![named(0, 1, 1), named(1, 2, 1), named(2, 3, 1)],
        restrictions: vec![],
    };
    let summary = build(&input, dir.path());
    assert_eq!(summary.compressed_nodes, 2);
    // one surviving segment, two directions, u-turns at both dead ends
    assert_eq!(summary.edge_based_nodes, 2);
    assert_eq!(summary.edge_based_edges, 2);
    // summed weight survives on the turn edge: 300 + 200 u-turn penalty
    let (edges, _, _) = ebg_output::read_edges(&summary.edges_path).unwrap();
    assert!(edges.iter().all(|edge| edge.weight == 500));
}

#[test]
fn turn_ids_are_dense_and_match_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![
            node(-10_000, 0),
            node(0, 0),
            node(10_000, 0),
            node(0, -10_000),
            node(0, 10_000),
        ],
        edges: vec![
            named(0, 1, 1),
            named(1, 2, 2),
            named(1, 3, 3),
            named(1, 4, 4),
        ],
        restrictions: vec![],
    };
    let summary = build(&input, dir.path());

    let (edges, _, _) = ebg_output::read_edges(&summary.edges_path).unwrap();
    let records = original_edge_data::read_all(&summary.original_edge_data_path).unwrap();
    assert_eq!(edges.len(), records.len());

    let mut ids: Vec<u32> = edges.iter().map(|edge| edge.turn_id).collect();
    ids.sort_unstable();
    for (expected, id) in ids.iter().enumerate() {
        assert_eq!(*id, expected as u32);
    }
    for edge in &edges {
        assert_ne!(edge.source, edge.target);
    }
}

#[test]
fn output_files_round_trip_with_checksums() {
    let dir = tempfile::tempdir().unwrap();
    let input = InputGraph {
        path: dir.path().join("net.rln"),
        nodes: vec![node(0, 0), node(10_000, 0), node(20_000, 0)],
        edges: vec![named(0, 1, 1), named(1, 2, 1)],
        restrictions: vec![],
    };
    let summary = build(&input, dir.path());

    let (nodes, node_sha, node_crc) = ebg_output::read_nodes(&summary.nodes_path).unwrap();
    let (edges, edge_sha, edge_crc) = ebg_output::read_edges(&summary.edges_path).unwrap();
    assert_eq!(nodes.len() as u32, summary.edge_based_nodes);
    assert_eq!(edges.len() as u64, summary.edge_based_edges);
    assert_ne!(node_crc, 0);
    assert_ne!(edge_crc, 0);

    // both artifacts carry the digest of the input they were built from
    assert_eq!(node_sha, edge_sha);
    assert_eq!(hex::encode(node_sha), summary.inputs_sha);

    // edges come back sorted by (source, target, weight)
    for pair in edges.windows(2) {
        assert!(
            (pair[0].source, pair[0].target, pair[0].weight)
                <= (pair[1].source, pair[1].target, pair[1].weight)
        );
    }
}

#[test]
fn cancelled_build_leaves_no_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.rln");
    let input = InputGraph {
        path: path.clone(),
        nodes: vec![node(0, 0), node(10_000, 0)],
        edges: vec![edge(0, 1)],
        restrictions: vec![],
    };
    input.write(&path).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let config = BuildConfig {
        input: path,
        outdir: dir.path().join("out"),
        profile: ProfileConfig::default(),
    };
    let result = run_build(&config, &cancel);
    assert!(result.is_err());
    assert!(!dir.path().join("out").join("net.ebn").exists());
    assert!(!dir.path().join("out").join("net.oed").exists());
}

#[test]
fn conditional_restriction_check_roundtrip() {
    // dump a conditional restriction, then check it at two instants
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.rln");
    let input = InputGraph {
        path: path.clone(),
        nodes: vec![node(7_000_000, 50_000_000), node(7_010_000, 50_000_000)],
        edges: vec![edge(0, 1)],
        restrictions: vec![RawRestriction {
            kind: RawRestrictionKind::NodeVia,
            from: 0,
            via: 1,
            via2: 0,
            to: 0,
            is_only: false,
            condition: "Mo-Fr 08:30-20:00".to_string(),
        }],
    };
    input.write(&path).unwrap();

    let csv = dir.path().join("conditionals.csv");
    let written = roadloom::conditionals::dump_conditionals(&path, &csv).unwrap();
    assert_eq!(written, 1);

    let tz = dir.path().join("tz.json");
    std::fs::write(
        &tz,
        serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "offset": 3600 },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 40.0], [20.0, 40.0], [20.0, 60.0], [0.0, 60.0], [0.0, 40.0]]]
                }
            }]
        })
        .to_string(),
    )
    .unwrap();

    // Monday 2017-05-01 08:00 UTC is 09:00 local -> active
    let out_active = dir.path().join("active.csv");
    let stats = roadloom::conditionals::check_conditionals(
        &csv,
        &out_active,
        Some(&tz),
        1_493_625_600,
        None,
    )
    .unwrap();
    assert_eq!(stats.active, 1);

    // Saturday 2017-05-06 08:00 UTC is Saturday 09:00 local -> inactive
    let out_inactive = dir.path().join("inactive.csv");
    let stats = roadloom::conditionals::check_conditionals(
        &csv,
        &out_inactive,
        Some(&tz),
        1_494_057_600,
        None,
    )
    .unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.inactive, 1);
}
