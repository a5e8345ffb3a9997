//! Library-level error kinds for the preprocessing pipeline.
//!
//! Recoverable conditions (dropped restrictions, clamped weights, refused
//! compressions) are not errors; they are counted on [`WarningCounters`] and
//! summarized after each stage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoadloomError {
    /// Malformed input: wrong magic, impossible sizes, self-loop edges.
    #[error("invalid input in {}: {reason}", path.display())]
    InputInvalid { path: PathBuf, reason: String },

    /// Fingerprint major/minor mismatch.
    #[error("incompatible input {}: file is v{file_major}.{file_minor}, tool expects v{tool_major}.{tool_minor}", path.display())]
    InputIncompatible {
        path: PathBuf,
        file_major: u8,
        file_minor: u8,
        tool_major: u8,
        tool_minor: u8,
    },

    /// A broken internal invariant: dangling index, duplicate turn id,
    /// sentinel found where a real id is required. Indicates a bug.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Out of memory or unable to open an output file.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Cooperative cancellation observed at a stage boundary.
    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RoadloomError>;

impl RoadloomError {
    pub fn invalid_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InputInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Stage-local recoverable conditions, counted with relaxed atomics so
/// parallel stages can bump them without coordination.
#[derive(Debug, Default)]
pub struct WarningCounters {
    /// Restrictions referencing a node that does not exist (dropped).
    pub restrictions_dropped: AtomicU64,
    /// Conditional restriction clauses that failed to parse.
    pub conditions_unparsed: AtomicU64,
    /// Edge weights clamped up to 1.
    pub weights_clamped: AtomicU64,
    /// Degree-2 compressions refused due to incompatible edge data.
    pub compressions_refused: AtomicU64,
    /// Compressed edges that survived with zero interior coordinates.
    pub empty_geometries: AtomicU64,
    /// Travel-mode tags that were not recognized (mapped to inaccessible).
    pub unknown_travel_modes: AtomicU64,
    /// Duplicate directed input edges collapsed to the cheaper one.
    pub duplicate_edges: AtomicU64,
}

impl WarningCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.restrictions_dropped.load(Ordering::Relaxed)
            + self.conditions_unparsed.load(Ordering::Relaxed)
            + self.weights_clamped.load(Ordering::Relaxed)
            + self.compressions_refused.load(Ordering::Relaxed)
            + self.empty_geometries.load(Ordering::Relaxed)
            + self.unknown_travel_modes.load(Ordering::Relaxed)
            + self.duplicate_edges.load(Ordering::Relaxed)
    }

    /// One line per non-zero counter, for the post-stage summary.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut push = |label: &str, counter: &AtomicU64| {
            let value = counter.load(Ordering::Relaxed);
            if value > 0 {
                lines.push(format!("{}: {}", label, value));
            }
        };
        push("restrictions dropped", &self.restrictions_dropped);
        push("conditions unparsed", &self.conditions_unparsed);
        push("weights clamped to 1", &self.weights_clamped);
        push("compressions refused", &self.compressions_refused);
        push("empty compressed geometries", &self.empty_geometries);
        push("unknown travel modes", &self.unknown_travel_modes);
        push("duplicate input edges", &self.duplicate_edges);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_counters_summary() {
        let counters = WarningCounters::new();
        assert!(counters.summary_lines().is_empty());

        WarningCounters::bump(&counters.weights_clamped);
        WarningCounters::bump(&counters.weights_clamped);
        WarningCounters::bump(&counters.restrictions_dropped);

        let lines = counters.summary_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(counters.total(), 3);
    }
}
