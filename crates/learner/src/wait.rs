use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use fleetlearn_config::Eagerness;
use fleetlearn_peer::PeerIdentity;

use crate::error::WaitError;
use crate::shared::Shared;
use crate::Learner;

/// Bookkeeping of a blocking wait on the fleet.
pub(crate) struct Progress {
    started: Instant,
    start_round: u64,
    warned: bool,
}

impl Progress {
    pub(crate) fn new(shared: &Shared) -> Self {
        Self {
            started: Instant::now(),
            start_round: shared.round(),
            warned: false,
        }
    }

    /// Fail with the fault of a crashed loop, and warn once if nobody is learning.
    pub(crate) fn check(&mut self, shared: &Shared, driving: bool) -> Result<(), WaitError> {
        if let Some(error) = shared.crashed() {
            return Err(WaitError::Crashed(error));
        }

        if !driving && !self.warned && !shared.is_running() {
            warn!("Blocking to learn about nodes, but the learning loop is not running");
            self.warned = true;
        }

        Ok(())
    }

    pub(crate) fn timed_out(&self, timeout: Duration) -> bool {
        self.started.elapsed() >= timeout
    }

    pub(crate) fn not_enough_nodes(&self, shared: &Shared, wanted: usize) -> WaitError {
        WaitError::NotEnoughNodes {
            elapsed: self.started.elapsed(),
            rounds: shared.round() - self.start_round,
            known: shared.fleet().len(),
            wanted,
            loop_running: shared.is_running(),
        }
    }

    /// `Ok(false)` if few enough nodes are missing, an error otherwise.
    pub(crate) fn missing_nodes(
        &self,
        shared: &Shared,
        missing: Vec<PeerIdentity>,
        allow_missing: usize,
    ) -> Result<bool, WaitError> {
        if missing.len() <= allow_missing {
            debug!(missing = missing.len(), allow_missing, "Tolerating missing nodes");
            return Ok(false);
        }

        Err(WaitError::MissingNodes {
            elapsed: self.started.elapsed(),
            rounds: shared.round() - self.start_round,
            missing,
            loop_running: shared.is_running(),
        })
    }
}

pub(crate) fn missing(shared: &Shared, identities: &BTreeSet<PeerIdentity>) -> Vec<PeerIdentity> {
    let fleet = shared.fleet();
    identities
        .iter()
        .filter(|identity| !fleet.contains(identity))
        .copied()
        .collect()
}

impl Learner {
    /// [`Self::wait_until_count`] with the configured learning timeout.
    pub async fn wait_for_count(&mut self, count: usize) -> Result<(), WaitError> {
        self.wait_until_count(count, self.config.learning_timeout)
            .await
    }

    /// [`Self::wait_until_identities_known`] with the configured learning timeout.
    pub async fn wait_for_identities(
        &mut self,
        identities: &[PeerIdentity],
        allow_missing: usize,
    ) -> Result<bool, WaitError> {
        let timeout = self.config.learning_timeout;
        self.wait_until_identities_known(identities, timeout, allow_missing)
            .await
    }

    /// Run eager learning rounds on this thread until `count` nodes are known.
    pub async fn wait_until_count(
        &mut self,
        count: usize,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let shared = std::sync::Arc::clone(&self.shared);
        let mut progress = Progress::new(&shared);

        loop {
            progress.check(&shared, true)?;

            if shared.fleet().len() >= count {
                return Ok(());
            }

            if progress.timed_out(timeout) {
                return Err(progress.not_enough_nodes(&shared, count));
            }

            self.learn_while_waiting().await?;
            sleep(self.config.wait_poll_interval).await;
        }
    }

    /// Run eager learning rounds on this thread until all of `identities` are known.
    ///
    /// Returns `Ok(true)` once they are, and `Ok(false)` if the timeout is hit
    /// with no more than `allow_missing` of them still unknown.
    pub async fn wait_until_identities_known(
        &mut self,
        identities: &[PeerIdentity],
        timeout: Duration,
        allow_missing: usize,
    ) -> Result<bool, WaitError> {
        let shared = std::sync::Arc::clone(&self.shared);
        let identities = identities.iter().copied().collect::<BTreeSet<_>>();
        let mut progress = Progress::new(&shared);

        shared.want(&identities.iter().copied().collect::<Vec<_>>());

        loop {
            progress.check(&shared, true)?;

            let missing = missing(&shared, &identities);
            if missing.is_empty() {
                return Ok(true);
            }

            if progress.timed_out(timeout) {
                return progress.missing_nodes(&shared, missing, allow_missing);
            }

            self.learn_while_waiting().await?;
            sleep(self.config.wait_poll_interval).await;
        }
    }

    async fn learn_while_waiting(&mut self) -> Result<(), WaitError> {
        match self.learn_from_teacher_node(Eagerness::Eager).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_recoverable() => Ok(()),
            Err(e) if e.is_protocol_fault() => {
                warn!(error = %e, "Learning round failed while waiting for nodes");
                Ok(())
            }
            Err(e) => Err(WaitError::Crashed(e)),
        }
    }
}
