//! Edge-based graph construction (C10).
//!
//! Two passes over the node-based graph. Pass 1 turns every traversable
//! directed edge into an edge-based node (plus one shadow node per
//! via-way restriction group). Pass 2 enumerates turns (u, v, w), applies
//! restrictions, barriers and penalties, classifies each admissible turn
//! and emits edge-based edges with dense turn ids.
//!
//! Pass 2 is data-parallel over source nodes; each worker appends into a
//! private buffer and the buffers are merged in node order at the end, so
//! every turn id is produced exactly once. Original-edge-data records
//! stream through a bounded queue into a single writer thread.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::config::ProfileConfig;
use crate::error::{Result, RoadloomError, WarningCounters};
use crate::formats::ebg_output::{EdgeBasedEdgeRecord, EdgeBasedNodeRecord};
use crate::formats::original_edge_data::{
    OriginalEdgeDataWriter, OriginalEdgeRecord, INVALID_LANE_DATA_ID,
};
use crate::geo::{reverse_bearing, turn_angle, EdgeId, NodeId};
use crate::guidance::handler::IntersectionHandler;
use crate::guidance::{direction_from_angle, TurnInstruction, TurnType};
use crate::intersection::{connected_roads, IntersectionContext, IntersectionView};
use crate::nbg::{NodeBasedContext, TravelMode, INVALID_EDGE_BASED_NODE};
use crate::restrictions::node_map::RestrictionMap;
use crate::restrictions::way_map::WayRestrictionMap;

/// Batch size for records sent to the writer thread.
const WRITER_BATCH: usize = 4096;
/// Bounded queue depth between the factory and the writer thread.
const WRITER_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct EdgeBasedGraphStats {
    pub node_count: u32,
    pub duplicated_node_count: u32,
    pub edge_count: u64,
    pub turn_count: u32,
    pub skipped_turns: u64,
    pub node_based_edge_count: u64,
}

#[derive(Debug)]
pub struct EdgeBasedGraph {
    pub nodes: Vec<EdgeBasedNodeRecord>,
    pub edges: Vec<EdgeBasedEdgeRecord>,
    pub stats: EdgeBasedGraphStats,
}

/// A turn produced by a worker, not yet carrying its turn id.
struct PendingTurn {
    source: u32,
    target: u32,
    weight: u32,
    duration: u32,
    distance: f32,
    record: OriginalEdgeRecord,
}

fn deci_degrees(bearing: f64) -> u16 {
    ((bearing * 10.0).round() as u32 % 3600) as u16
}

fn entry_class_of(view: &IntersectionView) -> u8 {
    view.iter()
        .take(8)
        .enumerate()
        .filter(|(_, road)| road.entry_allowed)
        .fold(0u8, |mask, (index, _)| mask | (1 << index))
}

/// A fork stops being a fork when one branch is the obvious continuation;
/// conversely a silent same-name continuation must be announced when it is
/// not obvious at a real intersection.
fn refine_with_obviousness(
    instruction: TurnInstruction,
    is_obvious: bool,
    angle: f64,
    choices: usize,
) -> TurnInstruction {
    match (instruction.kind, is_obvious) {
        (TurnType::Fork, true) => TurnInstruction {
            kind: TurnType::Continue,
            ..instruction
        },
        (TurnType::NoTurn, false) if choices > 2 => TurnInstruction {
            kind: TurnType::Continue,
            direction: direction_from_angle(angle),
            ..instruction
        },
        _ => instruction,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_edge_based_graph(
    context: &mut NodeBasedContext,
    restriction_map: &RestrictionMap,
    way_map: &WayRestrictionMap,
    components: &[u32],
    profile: &ProfileConfig,
    original_edge_data_path: &Path,
    inputs_sha: &[u8; 32],
    warnings: &WarningCounters,
) -> Result<EdgeBasedGraph> {
    let mut nodes = emit_edge_based_nodes(context, way_map, components, warnings);
    let base = nodes.len() as u32 - way_map.number_of_duplicated_nodes() as u32;
    let total = nodes.len() as u32;

    let intersection_context = IntersectionContext::new(context);
    let handler = IntersectionHandler::new(intersection_context);
    let skipped = AtomicU64::new(0);

    println!("Generating edge-expanded edges...");
    let graph = &context.graph;
    let progress_step = (graph.num_nodes() / 10).max(1);
    let processed = AtomicU64::new(0);

    // pass 2: per-source-node turn enumeration into private buffers
    let per_node: Vec<Vec<PendingTurn>> = (0..graph.num_nodes())
        .into_par_iter()
        .map(|u| {
            let done = processed.fetch_add(1, Ordering::Relaxed);
            if done % u64::from(progress_step) == 0 && done > 0 {
                println!(
                    "  {}%",
                    done * 100 / u64::from(graph.num_nodes().max(1))
                );
            }
            turns_from_node(
                u,
                &intersection_context,
                &handler,
                restriction_map,
                way_map,
                profile,
                total,
                &skipped,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let duplicated = turns_from_duplicated_nodes(
        &intersection_context,
        &handler,
        restriction_map,
        way_map,
        profile,
        base,
        total,
        &skipped,
    )?;

    // merge in node order; stream sidecar records through a bounded queue
    // to the single writer thread
    let (sender, receiver) =
        crossbeam_channel::bounded::<Vec<OriginalEdgeRecord>>(WRITER_QUEUE_DEPTH);
    let writer = OriginalEdgeDataWriter::create(original_edge_data_path, inputs_sha)?;
    let writer_thread = std::thread::spawn(move || -> Result<u32> {
        let mut writer = writer;
        for batch in receiver {
            for record in batch {
                writer.push(record)?;
            }
        }
        writer.finalize()
    });

    let mut edges = Vec::new();
    let mut turn_id = 0u32;
    let mut batch = Vec::with_capacity(WRITER_BATCH);
    for pending in per_node.into_iter().chain(std::iter::once(duplicated)) {
        for turn in pending {
            edges.push(EdgeBasedEdgeRecord {
                source: turn.source,
                target: turn.target,
                turn_id,
                weight: turn.weight,
                duration: turn.duration,
                distance: turn.distance,
                forward: true,
                backward: false,
            });
            batch.push(turn.record);
            turn_id += 1;
            if batch.len() >= WRITER_BATCH {
                sender
                    .send(std::mem::replace(&mut batch, Vec::with_capacity(WRITER_BATCH)))
                    .map_err(|_| {
                        RoadloomError::ResourceExhausted("sidecar writer died".to_string())
                    })?;
            }
        }
    }
    if !batch.is_empty() {
        sender
            .send(batch)
            .map_err(|_| RoadloomError::ResourceExhausted("sidecar writer died".to_string()))?;
    }
    drop(sender);
    let written = writer_thread
        .join()
        .map_err(|_| RoadloomError::ResourceExhausted("sidecar writer panicked".to_string()))??;
    if written != turn_id {
        return Err(RoadloomError::IntegrityViolation(format!(
            "sidecar holds {written} records for {turn_id} turns"
        )));
    }

    println!("Sorting edge-based nodes...");
    nodes.sort_by_key(|node| (node.id, node.name_id, node.weight));
    nodes.dedup();
    nodes.shrink_to_fit();

    let stats = EdgeBasedGraphStats {
        node_count: total,
        duplicated_node_count: way_map.number_of_duplicated_nodes() as u32,
        edge_count: edges.len() as u64,
        turn_count: turn_id,
        skipped_turns: skipped.load(Ordering::Relaxed),
        node_based_edge_count: u64::from(graph.num_edges()),
    };
    println!(
        "Edge-based graph: {} nodes, {} edges ({} turns skipped by restrictions)",
        stats.node_count, stats.edge_count, stats.skipped_turns
    );

    Ok(EdgeBasedGraph { nodes, edges, stats })
}

/// Pass 1: one edge-based node per traversable directed edge, plus shadow
/// nodes for via-way restriction groups.
fn emit_edge_based_nodes(
    context: &mut NodeBasedContext,
    way_map: &WayRestrictionMap,
    components: &[u32],
    warnings: &WarningCounters,
) -> Vec<EdgeBasedNodeRecord> {
    let mut nodes = Vec::new();
    let mut counter = 0u32;

    for u in 0..context.graph.num_nodes() {
        for edge in context.graph.adjacent_edges(u) {
            let (reversed, annotation_id) = {
                let data = context.graph.edge_data(edge);
                (data.reversed, data.annotation_id)
            };
            let annotation = context.annotations[annotation_id as usize];
            if reversed || annotation.mode == TravelMode::Inaccessible {
                continue;
            }
            let v = context.graph.target(edge);
            let data = context.graph.edge_data_mut(edge);
            data.edge_based_node_id = counter;
            let weight = data.weight;

            let source = context.coordinates[u as usize];
            let target = context.coordinates[v as usize];
            nodes.push(EdgeBasedNodeRecord {
                lon1: source.lon,
                lat1: source.lat,
                lon2: target.lon,
                lat2: target.lat,
                name_id: annotation.name_id,
                weight,
                ignore_in_grid: false,
                mode: annotation.mode as u8,
                component: components.get(u as usize).copied().unwrap_or(0),
                id: counter,
            });
            counter += 1;
        }
    }

    // shadow nodes live in the tail of the id range; they share geometry
    // with the via way they duplicate but stay out of the spatial index
    for representative in way_map.duplicated_node_representatives() {
        let id = counter + representative.id as u32;
        let record = match context.graph.find_edge(representative.from, representative.to) {
            Some(edge) if context.graph.edge_data(edge).edge_based_node_id
                != INVALID_EDGE_BASED_NODE =>
            {
                let original =
                    nodes[context.graph.edge_data(edge).edge_based_node_id as usize];
                EdgeBasedNodeRecord {
                    ignore_in_grid: true,
                    id,
                    ..original
                }
            }
            _ => {
                WarningCounters::bump(&warnings.restrictions_dropped);
                let from = context.coordinates[representative.from as usize];
                let to = context.coordinates[representative.to as usize];
                EdgeBasedNodeRecord {
                    lon1: from.lon,
                    lat1: from.lat,
                    lon2: to.lon,
                    lat2: to.lat,
                    name_id: crate::nbg::EMPTY_NAME_ID,
                    weight: 1,
                    ignore_in_grid: true,
                    mode: TravelMode::Inaccessible as u8,
                    component: 0,
                    id,
                }
            }
        };
        nodes.push(record);
    }

    nodes
}

/// Turns leaving all edge-based nodes whose node-based source is `u`.
#[allow(clippy::too_many_arguments)]
fn turns_from_node(
    u: NodeId,
    context: &IntersectionContext,
    handler: &IntersectionHandler,
    restriction_map: &RestrictionMap,
    way_map: &WayRestrictionMap,
    profile: &ProfileConfig,
    total_edge_based_nodes: u32,
    skipped: &AtomicU64,
) -> Result<Vec<PendingTurn>> {
    let mut pending = Vec::new();
    for via_edge in context.graph.adjacent_edges(u) {
        let data = context.graph.edge_data(via_edge);
        if data.reversed || context.annotation(via_edge).mode == TravelMode::Inaccessible {
            continue;
        }
        emit_turns(
            u,
            via_edge,
            data.edge_based_node_id,
            None,
            context,
            handler,
            restriction_map,
            way_map,
            profile,
            total_edge_based_nodes,
            skipped,
            &mut pending,
        )?;
    }
    Ok(pending)
}

/// Turns leaving the via-way shadow nodes. The source id is the shadow;
/// targets onto statically restricted roads are omitted.
#[allow(clippy::too_many_arguments)]
fn turns_from_duplicated_nodes(
    context: &IntersectionContext,
    handler: &IntersectionHandler,
    restriction_map: &RestrictionMap,
    way_map: &WayRestrictionMap,
    profile: &ProfileConfig,
    base: u32,
    total_edge_based_nodes: u32,
    skipped: &AtomicU64,
) -> Result<Vec<PendingTurn>> {
    let mut pending = Vec::new();
    for representative in way_map.duplicated_node_representatives() {
        let Some(via_edge) = context
            .graph
            .find_edge(representative.from, representative.to)
        else {
            continue;
        };
        let data = context.graph.edge_data(via_edge);
        if data.reversed
            || data.edge_based_node_id == INVALID_EDGE_BASED_NODE
            || context.annotation(via_edge).mode == TravelMode::Inaccessible
        {
            continue;
        }
        emit_turns(
            representative.from,
            via_edge,
            base + representative.id as u32,
            Some(representative.id),
            context,
            handler,
            restriction_map,
            way_map,
            profile,
            total_edge_based_nodes,
            skipped,
            &mut pending,
        )?;
    }
    Ok(pending)
}

/// Shared turn emission for one (source node, via edge) pair; `duplicated`
/// carries the shadow group when the source is a duplicated node.
#[allow(clippy::too_many_arguments)]
fn emit_turns(
    u: NodeId,
    via_edge: EdgeId,
    source_edge_based_node: u32,
    duplicated: Option<usize>,
    context: &IntersectionContext,
    handler: &IntersectionHandler,
    restriction_map: &RestrictionMap,
    way_map: &WayRestrictionMap,
    profile: &ProfileConfig,
    total_edge_based_nodes: u32,
    skipped: &AtomicU64,
    pending: &mut Vec<PendingTurn>,
) -> Result<()> {
    let graph = context.graph;
    let v = graph.target(via_edge);
    let data1 = graph.edge_data(via_edge);

    if source_edge_based_node == INVALID_EDGE_BASED_NODE
        || source_edge_based_node >= total_edge_based_nodes
    {
        return Err(RoadloomError::IntegrityViolation(format!(
            "edge ({u}, {v}) carries edge-based node id {source_edge_based_node} of {total_edge_based_nodes}"
        )));
    }

    let intersection = connected_roads(context, u, via_edge);
    let view = if profile.classify_turns {
        handler.merged_view(v, &intersection)
    } else {
        intersection.clone()
    };
    let obvious_index = profile
        .classify_turns
        .then(|| handler.find_obvious_turn(via_edge, &view))
        .unwrap_or(0);

    let only_to = restriction_map.only_target_at(u, v);
    let is_barrier = context.barrier_nodes.contains(&v);
    let has_signal = context.traffic_signals.contains(&v);
    let pre_bearing = deci_degrees(reverse_bearing(view[0].perceived_bearing));

    for out_edge in graph.adjacent_edges(v) {
        let w = graph.target(out_edge);
        let data2 = graph.edge_data(out_edge);
        if data2.reversed || context.annotation(out_edge).mode == TravelMode::Inaccessible {
            continue;
        }

        // an only_* restriction mandates its target
        if let Some(target) = only_to {
            if w != target {
                skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        }

        // u-turns are allowed through barriers and at dead ends, and
        // barriers admit nothing else
        let admissible = (!is_barrier && (u != w || graph.out_degree(v) == 1))
            || (u == w && is_barrier);
        if !admissible {
            continue;
        }

        if restriction_map.is_restricted_turn(u, v, w) {
            skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if let Some(group) = duplicated {
            if way_map.is_restricted(group, w) {
                skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        }

        let edge_based_target = data2.edge_based_node_id;
        if edge_based_target >= total_edge_based_nodes {
            return Err(RoadloomError::IntegrityViolation(format!(
                "edge ({v}, {w}) carries edge-based node id {edge_based_target} of {total_edge_based_nodes}"
            )));
        }

        let road_index = view.index_of(out_edge);
        let (angle, post_bearing) = match road_index {
            Some(index) => (view[index].angle, view[index].perceived_bearing),
            None => {
                let bearing = context.perceived_bearing(v, out_edge);
                (
                    turn_angle(reverse_bearing(view[0].perceived_bearing), bearing),
                    bearing,
                )
            }
        };

        let mut instruction = if profile.classify_turns {
            let raw = handler.analyze_turn(u, via_edge, out_edge, angle, &view);
            let is_obvious =
                obvious_index != 0 && road_index == Some(obvious_index);
            refine_with_obviousness(raw, is_obvious, angle, view.len())
        } else {
            TurnInstruction::new(TurnType::Turn, direction_from_angle(angle))
        };

        let mut weight = data1.weight;
        let mut duration = data1.duration;
        if has_signal {
            weight += profile.traffic_signal_penalty;
            duration += profile.traffic_signal_penalty;
        }
        if instruction.kind == TurnType::UTurn {
            weight += profile.uturn_penalty;
            duration += profile.uturn_penalty;
        }
        if !data1.restricted && data2.restricted {
            weight += profile.access_restriction_penalty;
            duration += profile.access_restriction_penalty;
            instruction.access_restricted = true;
        }

        // entering the via way of a restriction redirects the turn into the
        // group's shadow node
        let target = way_map.remap_if_restricted(
            edge_based_target,
            u,
            v,
            w,
            total_edge_based_nodes,
        );

        if source_edge_based_node == target {
            skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        pending.push(PendingTurn {
            source: source_edge_based_node,
            target,
            weight,
            duration,
            distance: data1.distance,
            record: OriginalEdgeRecord {
                via_node: v,
                name_id: context.annotation(out_edge).name_id,
                instruction,
                lane_data_id: INVALID_LANE_DATA_ID,
                mode: context.annotation(out_edge).mode as u8,
                entry_class: entry_class_of(&view),
                pre_bearing,
                post_bearing: deci_degrees(post_bearing),
            },
        });
    }

    Ok(())
}
