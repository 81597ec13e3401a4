use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use fleetlearn_fleet::{FleetChecksum, FleetState};
use fleetlearn_node::PeerRecord;
use fleetlearn_peer::PeerIdentity;

use crate::error::{LearningError, WaitError};
use crate::shared::Shared;
use crate::wait::{missing, Progress};

/// Result of looking up a node by identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeLookup {
    Found(Box<PeerRecord>),
    /// Not in the fleet yet, learning may still find it
    NotKnownLocally,
    /// Still unknown after learning about it for a while
    NotKnownAnywhere,
}

impl NodeLookup {
    pub fn found(&self) -> Option<&PeerRecord> {
        match self {
            Self::Found(record) => Some(&**record),
            _ => None,
        }
    }
}

/// Cheap, cloneable access to the fleet of a learner and to its progress.
///
/// Handles never drive learning themselves: their waits only observe the
/// fleet while the learning task, or the learner's owner, runs rounds.
#[derive(Clone)]
pub struct LearnerHandle {
    shared: Arc<Shared>,
    poll_interval: Duration,
    /// Timeout of [`Self::wait_for_count`] and [`Self::wait_for_identities`]
    learning_timeout: Duration,
}

impl LearnerHandle {
    pub(crate) fn new(shared: Arc<Shared>, poll_interval: Duration, learning_timeout: Duration) -> Self {
        Self {
            shared,
            poll_interval,
            learning_timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// A snapshot of the fleet.
    pub fn fleet(&self) -> FleetState {
        self.shared.fleet().clone()
    }

    /// Read the fleet without copying it. `f` must not call back into this handle.
    pub fn with_fleet<A>(&self, f: impl FnOnce(&FleetState) -> A) -> A {
        f(&*self.shared.fleet())
    }

    pub fn known_nodes(&self) -> usize {
        self.shared.fleet().len()
    }

    pub fn checksum(&self) -> FleetChecksum {
        self.shared.fleet().checksum()
    }

    pub fn learning_round(&self) -> u64 {
        self.shared.round()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// The fault which stopped the learning task, if it crashed.
    pub fn crashed(&self) -> Option<LearningError> {
        self.shared.crashed()
    }

    /// Interval the learning task currently waits between rounds.
    pub fn current_interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Receive each of `identities` once, as soon as it is known.
    ///
    /// Identities already in the fleet are delivered immediately. The channel
    /// closes once every identity was delivered.
    pub fn subscribe(&self, identities: &[PeerIdentity]) -> mpsc::UnboundedReceiver<PeerIdentity> {
        self.shared.subscribe(identities)
    }

    /// Wake the learning task up for a round right away.
    pub fn learn_about_nodes_now(&self) {
        if !self.shared.is_running() {
            warn!("Asked to learn about nodes now, but the learning loop is not running");
            return;
        }

        debug!("Waking up the learning loop");
        self.shared.learn_now.notify_one();
    }

    /// Ask teachers about `identities` from now on, until they are known,
    /// and learn right away.
    pub fn learn_about_specific_nodes(&self, identities: &[PeerIdentity]) {
        self.shared.want(identities);
        self.learn_about_nodes_now();
    }

    /// Look each of `identities` up in the fleet.
    pub fn lookup_nodes(&self, identities: &[PeerIdentity]) -> Vec<(PeerIdentity, NodeLookup)> {
        let fleet = self.shared.fleet();

        identities
            .iter()
            .map(|identity| {
                let lookup = match fleet.get(identity) {
                    Some(record) => NodeLookup::Found(Box::new(record.clone())),
                    None => NodeLookup::NotKnownLocally,
                };
                (*identity, lookup)
            })
            .collect()
    }

    /// Look each of `identities` up, learning about those which are unknown
    /// for at most `timeout`.
    pub async fn resolve_nodes(
        &self,
        identities: &[PeerIdentity],
        timeout: Duration,
    ) -> Result<Vec<(PeerIdentity, NodeLookup)>, WaitError> {
        self.wait_until_identities_known(identities, timeout, identities.len())
            .await?;

        let resolved = self
            .lookup_nodes(identities)
            .into_iter()
            .map(|(identity, lookup)| match lookup {
                NodeLookup::NotKnownLocally => (identity, NodeLookup::NotKnownAnywhere),
                lookup => (identity, lookup),
            })
            .collect();

        Ok(resolved)
    }

    /// [`Self::wait_until_count`] with the configured learning timeout.
    pub async fn wait_for_count(&self, count: usize) -> Result<(), WaitError> {
        self.wait_until_count(count, self.learning_timeout).await
    }

    /// [`Self::wait_until_identities_known`] with the configured learning timeout.
    pub async fn wait_for_identities(
        &self,
        identities: &[PeerIdentity],
        allow_missing: usize,
    ) -> Result<bool, WaitError> {
        self.wait_until_identities_known(identities, self.learning_timeout, allow_missing)
            .await
    }

    /// Wait until at least `count` nodes are known.
    pub async fn wait_until_count(&self, count: usize, timeout: Duration) -> Result<(), WaitError> {
        let mut progress = Progress::new(&self.shared);

        loop {
            progress.check(&self.shared, false)?;

            if self.shared.fleet().len() >= count {
                return Ok(());
            }

            if progress.timed_out(timeout) {
                return Err(progress.not_enough_nodes(&self.shared, count));
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Wait until all of `identities` are known, asking teachers for them.
    ///
    /// Returns `Ok(true)` once they are, and `Ok(false)` if the timeout is hit
    /// with no more than `allow_missing` of them still unknown.
    pub async fn wait_until_identities_known(
        &self,
        identities: &[PeerIdentity],
        timeout: Duration,
        allow_missing: usize,
    ) -> Result<bool, WaitError> {
        let identities = identities.iter().copied().collect::<BTreeSet<_>>();
        let mut progress = Progress::new(&self.shared);

        let unknown = missing(&self.shared, &identities);
        if !unknown.is_empty() {
            self.shared.want(&unknown);
            self.shared.learn_now.notify_one();
        }

        loop {
            progress.check(&self.shared, false)?;

            let missing = missing(&self.shared, &identities);
            if missing.is_empty() {
                return Ok(true);
            }

            if progress.timed_out(timeout) {
                return progress.missing_nodes(&self.shared, missing, allow_missing);
            }

            sleep(self.poll_interval).await;
        }
    }
}

impl fmt::Debug for LearnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearnerHandle")
            .field("round", &self.shared.round())
            .field("running", &self.shared.is_running())
            .field("known_nodes", &self.known_nodes())
            .finish()
    }
}
