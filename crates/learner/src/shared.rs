use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use fleetlearn_fleet::{FleetState, Outcome};
use fleetlearn_node::PeerRecord;
use fleetlearn_peer::PeerIdentity;

use crate::error::LearningError;

type Listener = mpsc::UnboundedSender<PeerIdentity>;

/// State shared between a learner, its spawned task and any number of handles.
///
/// The fleet is only mutated through [`Shared::merge`], which holds the write
/// lock while listeners are popped, so a subscription registered under the
/// read lock can never miss the node it waits for.
pub(crate) struct Shared {
    fleet: RwLock<FleetState>,
    round: AtomicU64,
    running: AtomicBool,
    stopping: AtomicBool,
    crashed: Mutex<Option<LearningError>>,
    listeners: DashMap<PeerIdentity, Vec<Listener>>,
    wanted: DashSet<PeerIdentity>,
    interval_ms: AtomicU64,
    pub(crate) learn_now: Notify,
    pub(crate) stop: Notify,
}

impl Shared {
    pub(crate) fn new(fleet: FleetState, interval: Duration) -> Self {
        Self {
            fleet: RwLock::new(fleet),
            round: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            crashed: Mutex::new(None),
            listeners: DashMap::new(),
            wanted: DashSet::new(),
            interval_ms: AtomicU64::new(duration_to_millis(interval)),
            learn_now: Notify::new(),
            stop: Notify::new(),
        }
    }

    pub(crate) fn fleet(&self) -> RwLockReadGuard<'_, FleetState> {
        self.fleet.read().expect("poisoned lock")
    }

    pub(crate) fn merge(&self, record: PeerRecord) -> Outcome {
        let identity = record.identity();

        let mut fleet = self.fleet.write().expect("poisoned lock");
        let outcome = fleet.upsert(record);

        if outcome.is_accepted() {
            self.wanted.remove(&identity);

            if let Some((_, listeners)) = self.listeners.remove(&identity) {
                debug!(%identity, count = listeners.len(), "Notifying learning listeners");

                for listener in listeners {
                    // The receiver may have been dropped
                    let _ = listener.send(identity);
                }
            }
        }

        outcome
    }

    pub(crate) fn touch(&self, identity: &PeerIdentity, at: std::time::SystemTime) -> bool {
        self.fleet.write().expect("poisoned lock").touch(identity, at)
    }

    pub(crate) fn subscribe(&self, identities: &[PeerIdentity]) -> mpsc::UnboundedReceiver<PeerIdentity> {
        let (tx, rx) = mpsc::unbounded_channel();

        let fleet = self.fleet();
        for identity in identities {
            if fleet.contains(identity) {
                let _ = tx.send(*identity);
            } else {
                self.listeners.entry(*identity).or_default().push(tx.clone());
            }
        }

        rx
    }

    pub(crate) fn want(&self, identities: &[PeerIdentity]) {
        let fleet = self.fleet();
        for identity in identities {
            if !fleet.contains(identity) {
                self.wanted.insert(*identity);
            }
        }
    }

    pub(crate) fn wanted(&self) -> Vec<PeerIdentity> {
        let mut wanted = self.wanted.iter().map(|id| *id).collect::<Vec<_>>();
        wanted.sort();
        wanted
    }

    /// Increment the round counter, returning the number of the new round.
    pub(crate) fn next_round(&self) -> u64 {
        self.round.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }

    pub(crate) fn crashed(&self) -> Option<LearningError> {
        self.crashed.lock().expect("poisoned lock").clone()
    }

    pub(crate) fn record_crash(&self, error: LearningError) {
        *self.crashed.lock().expect("poisoned lock") = Some(error);
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(duration_to_millis(interval), Ordering::SeqCst);
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Marks the learning loop as running for as long as it is alive,
/// including when its task is aborted.
pub(crate) struct RunningGuard<'a>(&'a Shared);

impl<'a> RunningGuard<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        shared.set_running(true);
        Self(shared)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}
