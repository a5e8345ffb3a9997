//! Profile configuration.
//!
//! The extraction scripting environment that decides edge weights and access
//! flags is an external collaborator; the pipeline only consumes this plain
//! struct of per-turn penalties. All penalties are in deciseconds.

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Added to every turn passing a traffic-signal node.
    pub traffic_signal_penalty: u32,
    /// Added to turns classified as u-turns.
    pub uturn_penalty: u32,
    /// Added when a turn crosses into an access-restricted edge.
    pub access_restriction_penalty: u32,
    /// Whether to run the intersection handler and record instructions.
    /// Disabling it still emits turns, with plain angle-derived directions.
    pub classify_turns: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            traffic_signal_penalty: 20,
            uturn_penalty: 200,
            access_restriction_penalty: 600,
            classify_turns: true,
        }
    }
}
