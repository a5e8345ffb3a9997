//! Roadloom: edge-based graph construction for street networks.
//!
//! Pipeline:
//! - C1: Node-based graph — directed multigraph from the extracted network
//! - C2: Graph compression — collapse degree-2 chains into geometry
//! - C3: Annotation compaction — prefix-sum remap of per-edge metadata
//! - C4/C5: Restriction indexes — simple and via-way (duplicated nodes)
//! - C6-C8: Intersection analysis — connected roads, walking, merging
//! - C9: Turn classification — obvious turns and instructions
//! - C10: Edge-based factory — turn expansion into THE routing graph
//!
//! Key principle: every directed road segment becomes a node, every
//! admissible turn becomes an edge carrying a turn-specific weight. The
//! edge-based graph is what the contraction and query stages consume.

pub mod cancel;
pub mod cli;
pub mod components;
pub mod conditionals;
pub mod config;
pub mod ebg;
pub mod error;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod guidance;
pub mod intersection;
pub mod nbg;
pub mod pipeline;
pub mod restrictions;
pub mod validate;

pub use config::ProfileConfig;
pub use error::{Result, RoadloomError, WarningCounters};
pub use pipeline::{run_build, BuildConfig, BuildSummary};
