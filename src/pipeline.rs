//! The build driver: wires C1 through C10 together, checks for
//! cancellation between stages, counts recoverable conditions and writes
//! the output artifacts plus a summary report.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cancel::CancellationToken;
use crate::components::connected_components;
use crate::config::ProfileConfig;
use crate::ebg::build_edge_based_graph;
use crate::error::{RoadloomError, WarningCounters};
use crate::formats::ebg_output;
use crate::formats::input_graph::InputGraph;
use crate::formats::original_edge_data;
use crate::nbg::annotation::compress_annotation_data;
use crate::nbg::compressor::{compress_graph, zip_geometries};
use crate::nbg::geometry::CompressedEdgeContainer;
use crate::nbg::build_node_based_graph;
use crate::restrictions::node_map::RestrictionMap;
use crate::restrictions::way_map::WayRestrictionMap;
use crate::restrictions::{collect_via_nodes, from_raw};
use crate::validate::validate_edge_based_graph;

/// Warn prominently when more than this share of edges is dropped.
const DROPPED_EDGE_WARNING_RATIO: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub input: PathBuf,
    pub outdir: PathBuf,
    pub profile: ProfileConfig,
}

#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub node_based_nodes: u32,
    pub node_based_edges: u64,
    pub compressed_nodes: usize,
    pub removed_annotations: usize,
    pub edge_based_nodes: u32,
    pub duplicated_nodes: u32,
    pub edge_based_edges: u64,
    pub skipped_turns: u64,
    pub components: usize,
    /// Hex SHA-256 of the input artifact, as stamped into every output
    /// header.
    pub inputs_sha: String,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
    pub nodes_path: PathBuf,
    pub edges_path: PathBuf,
    pub original_edge_data_path: PathBuf,
}

struct OutputPaths {
    nodes: PathBuf,
    edges: PathBuf,
    original_edge_data: PathBuf,
    summary: PathBuf,
}

impl OutputPaths {
    fn new(config: &BuildConfig) -> Self {
        let stem = config
            .input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "graph".to_string());
        let join = |extension: &str| config.outdir.join(format!("{stem}.{extension}"));
        Self {
            nodes: join("ebn"),
            edges: join("ebe"),
            original_edge_data: join("oed"),
            summary: join("summary.json"),
        }
    }

    fn unlink_partial(&self) {
        for path in [
            &self.nodes,
            &self.edges,
            &self.original_edge_data,
            &self.summary,
        ] {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// SHA-256 over the raw input artifact; stamped into every output header
/// so downstream stages can detect a mismatched input/output set.
fn compute_inputs_sha(path: &Path) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot hash {}", path.display()))?;
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}

pub fn run_build(config: &BuildConfig, cancel: &CancellationToken) -> Result<BuildSummary> {
    let paths = OutputPaths::new(config);
    match run_build_inner(config, cancel, &paths) {
        Ok(summary) => Ok(summary),
        Err(error) => {
            // a cancelled build leaves no partial artifacts behind
            if matches!(
                error.downcast_ref::<RoadloomError>(),
                Some(RoadloomError::Cancelled)
            ) {
                paths.unlink_partial();
            }
            Err(error)
        }
    }
}

fn run_build_inner(
    config: &BuildConfig,
    cancel: &CancellationToken,
    paths: &OutputPaths,
) -> Result<BuildSummary> {
    let start = Instant::now();
    let warnings = WarningCounters::new();

    std::fs::create_dir_all(&config.outdir)
        .with_context(|| format!("cannot create {}", config.outdir.display()))?;

    println!("Loading {}...", config.input.display());
    let input = InputGraph::read(&config.input)?;
    println!(
        "  {} nodes, {} edges, {} restrictions",
        input.nodes.len(),
        input.edges.len(),
        input.restrictions.len()
    );
    let inputs_sha = compute_inputs_sha(&config.input)?;
    cancel.check()?;

    println!("Building node-based graph...");
    let mut context = build_node_based_graph(&input, &warnings)?;
    let node_based_nodes = context.graph.num_nodes();
    let restrictions = from_raw(&input.restrictions, node_based_nodes, &warnings);
    let via_nodes = collect_via_nodes(&restrictions);
    drop(input);
    cancel.check()?;

    println!("Compressing degree-two chains...");
    let mut geometry_container = CompressedEdgeContainer::new();
    let compressed_nodes = compress_graph(
        &mut context,
        &via_nodes,
        &mut geometry_container,
        &warnings,
    );
    zip_geometries(&mut context, &geometry_container, &warnings)?;
    println!(
        "  removed {} nodes, {} edges remain",
        compressed_nodes,
        context.graph.num_edges()
    );
    cancel.check()?;

    println!("Compacting annotations...");
    let removed_annotations = compress_annotation_data(&mut context)?;
    println!(
        "  removed {} of {} entries",
        removed_annotations,
        removed_annotations + context.annotations.len()
    );
    cancel.check()?;

    println!("Indexing restrictions...");
    let restriction_map = RestrictionMap::new(&restrictions);
    let way_map = WayRestrictionMap::new(&restrictions);
    println!(
        "  {} simple entries, {} via-way duplicated nodes",
        restriction_map.len(),
        way_map.number_of_duplicated_nodes()
    );

    let (components, component_count) = connected_components(&context.graph);
    cancel.check()?;

    let node_based_edges = u64::from(context.graph.num_edges());
    let graph = build_edge_based_graph(
        &mut context,
        &restriction_map,
        &way_map,
        &components,
        &config.profile,
        &paths.original_edge_data,
        &inputs_sha,
        &warnings,
    )?;
    cancel.check()?;

    println!("Writing edge-based graph...");
    ebg_output::write_nodes(&paths.nodes, &graph.nodes, &inputs_sha)?;
    ebg_output::write_edges(&paths.edges, &graph.edges, &inputs_sha)?;
    println!("  {}", paths.nodes.display());
    println!("  {}", paths.edges.display());
    println!("  {}", paths.original_edge_data.display());

    let sidecar = original_edge_data::read_all(&paths.original_edge_data)?;
    let invariants = validate_edge_based_graph(&graph, &sidecar, &restriction_map);
    if !invariants.passed {
        return Err(RoadloomError::IntegrityViolation(invariants.errors.join("; ")).into());
    }
    for warning in &invariants.warnings {
        tracing::warn!("{warning}");
    }

    let warning_lines = warnings.summary_lines();
    if !warning_lines.is_empty() {
        println!("Recoverable conditions:");
        for line in &warning_lines {
            println!("  {line}");
        }
    }
    let dropped = warnings.duplicate_edges.load(Ordering::Relaxed)
        + warnings.restrictions_dropped.load(Ordering::Relaxed);
    if node_based_edges > 0
        && (dropped as f64) / (node_based_edges as f64) > DROPPED_EDGE_WARNING_RATIO
    {
        println!(
            "WARNING: {} of {} input records dropped; check the extraction output",
            dropped, node_based_edges
        );
    }

    let summary = BuildSummary {
        node_based_nodes,
        node_based_edges,
        compressed_nodes,
        removed_annotations,
        edge_based_nodes: graph.stats.node_count,
        duplicated_nodes: graph.stats.duplicated_node_count,
        edge_based_edges: graph.stats.edge_count,
        skipped_turns: graph.stats.skipped_turns,
        components: component_count,
        inputs_sha: hex::encode(inputs_sha),
        warnings: warning_lines,
        elapsed_ms: start.elapsed().as_millis() as u64,
        nodes_path: paths.nodes.clone(),
        edges_path: paths.edges.clone(),
        original_edge_data_path: paths.original_edge_data.clone(),
    };
    let report = serde_json::to_string_pretty(&summary)?;
    std::fs::write(&paths.summary, report)
        .with_context(|| format!("cannot write {}", paths.summary.display()))?;

    println!(
        "Done in {:.2}s: {} edge-based nodes, {} edges",
        start.elapsed().as_secs_f64(),
        summary.edge_based_nodes,
        summary.edge_based_edges
    );

    Ok(summary)
}
