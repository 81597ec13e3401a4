use std::time::Duration;

use fleetlearn_metrics::{Counter, Gauge, SharedRegistry};

pub const METRICS_PREFIX: &str = "fleetlearn_learner";

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// Learning rounds attempted, including those that failed early
    pub rounds: Counter,

    /// Learning rounds that ended with an error
    pub failed_rounds: Counter,

    /// Nodes admitted into the fleet for the first time
    pub nodes_learned: Counter,

    /// Candidates dropped for suspicious activity
    pub invalid_nodes: Counter,

    /// Teachers that did not answer a peer list request
    pub unresponsive_teachers: Counter,

    /// Number of nodes in the fleet
    pub known_nodes: Gauge,

    /// Current interval between learning rounds
    pub interval_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(registry: &SharedRegistry) -> Self {
        let metrics = Self::new();

        registry.with_prefix(METRICS_PREFIX, |registry| {
            registry.register(
                "rounds",
                "Learning rounds attempted, including those that failed early",
                metrics.rounds.clone(),
            );

            registry.register(
                "failed_rounds",
                "Learning rounds that ended with an error",
                metrics.failed_rounds.clone(),
            );

            registry.register(
                "nodes_learned",
                "Nodes admitted into the fleet for the first time",
                metrics.nodes_learned.clone(),
            );

            registry.register(
                "invalid_nodes",
                "Candidates dropped for suspicious activity",
                metrics.invalid_nodes.clone(),
            );

            registry.register(
                "unresponsive_teachers",
                "Teachers that did not answer a peer list request",
                metrics.unresponsive_teachers.clone(),
            );

            registry.register(
                "known_nodes",
                "Number of nodes in the fleet",
                metrics.known_nodes.clone(),
            );

            registry.register(
                "interval_seconds",
                "Current interval between learning rounds",
                metrics.interval_seconds.clone(),
            );
        });

        metrics
    }

    pub(crate) fn set_known_nodes(&self, count: usize) {
        self.known_nodes.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        self.interval_seconds
            .set(i64::try_from(interval.as_secs()).unwrap_or(i64::MAX));
    }
}
