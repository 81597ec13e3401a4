use std::time::Duration;

/// Polling interval adapting to how many new nodes each round yields.
#[derive(Clone, Debug)]
pub struct Schedule {
    short: Duration,
    long: Duration,
    rounds_before_slowdown: usize,
    rounds_without_new_nodes: usize,
    interval: Duration,
}

impl Schedule {
    pub fn new(short: Duration, long: Duration, rounds_before_slowdown: usize) -> Self {
        Self {
            short,
            long,
            rounds_before_slowdown,
            rounds_without_new_nodes: 0,
            interval: short,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn rounds_without_new_nodes(&self) -> usize {
        self.rounds_without_new_nodes
    }

    /// Account for a round which admitted `new_nodes` new nodes.
    /// Returns whether the interval changed.
    pub fn adjust(&mut self, new_nodes: usize) -> bool {
        let previous = self.interval;

        if new_nodes > 0 {
            self.rounds_without_new_nodes = 0;
            self.interval = self.short;
        } else {
            self.rounds_without_new_nodes = self.rounds_without_new_nodes.saturating_add(1);

            if self.rounds_without_new_nodes >= self.rounds_before_slowdown {
                self.interval = self.long;
            }
        }

        self.interval != previous
    }
}
