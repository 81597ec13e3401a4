//! Gossip-based discovery of the nodes of a fleet.
//!
//! A [`Learner`] repeatedly asks a known node, its teacher, for the nodes that
//! node knows about, verifies every candidate and merges the survivors into a
//! shared [`FleetState`]. It is either driven directly by the caller, through
//! [`Learner::learn_from_teacher_node`] and the blocking waits, or moved into a
//! background task with [`Learner::spawn`]. The [`LearnerHandle`] gives access
//! to the fleet and to the waits from anywhere.

#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use fleetlearn_config::LearnerConfig;
use fleetlearn_fleet::{FleetState, Outcome};
use fleetlearn_node::{
    certificate_path, CertificateSink, FsCertificateSink, InMemoryNodeStore, NodeStore,
    PeerRecord, PeerTransport,
};
use fleetlearn_peer::PeerIdentity;

mod error;
mod handle;
mod metrics;
mod round;
mod schedule;
mod seeding;
mod shared;
mod task;
mod teachers;
mod wait;

pub use error::{LearningError, WaitError};
pub use handle::{LearnerHandle, NodeLookup};
pub use metrics::{Metrics, METRICS_PREFIX};
pub use round::RoundReport;
pub use schedule::Schedule;
pub use task::LearningTask;
pub use teachers::TeacherQueue;

pub use fleetlearn_config::{Eagerness, OnLearningError, SeedNode};

use seeding::SeedState;
use shared::Shared;

type Teardown = Box<dyn FnOnce(&LearningError) + Send + Sync>;

/// What the local node is to the fleet it learns about.
#[derive(Clone, Debug)]
pub enum Role {
    /// Learns about the fleet without being part of it.
    /// Records claiming `identity` are never admitted.
    Plain { identity: Option<PeerIdentity> },

    /// A node of the fleet. Its record, which must carry signing power,
    /// is announced to every teacher and included in the fleet checksum.
    Relay(Box<PeerRecord>),
}

impl Role {
    pub fn identity(&self) -> Option<PeerIdentity> {
        match self {
            Self::Plain { identity } => *identity,
            Self::Relay(record) => Some(record.identity()),
        }
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, Self::Relay(_))
    }
}

pub struct Learner {
    config: LearnerConfig,
    role: Role,
    /// Encoded local record sent along with every peer list request
    announce: Option<Bytes>,
    shared: Arc<Shared>,
    transport: Arc<dyn PeerTransport>,
    store: Arc<dyn NodeStore>,
    certificates: Arc<dyn CertificateSink>,
    teachers: TeacherQueue,
    schedule: Schedule,
    seeds: SeedState,
    rng: StdRng,
    metrics: Metrics,
    teardown: Option<Teardown>,
}

impl Learner {
    pub fn new(
        config: LearnerConfig,
        role: Role,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, LearningError> {
        let mut fleet = FleetState::new(role.identity());

        let (role, announce) = match role {
            Role::Relay(mut record) => {
                record.sign_and_date_interface();
                let announce = record.to_bytes().map_err(LearningError::LocalRecord)?;

                fleet
                    .set_local_record((*record).clone())
                    .map_err(LearningError::LocalRecord)?;

                (Role::Relay(record), Some(announce))
            }
            plain => (plain, None),
        };

        let schedule = Schedule::new(
            config.short_interval,
            config.long_interval,
            config.rounds_before_slowdown,
        );

        Ok(Self {
            shared: Arc::new(Shared::new(fleet, schedule.interval())),
            seeds: SeedState::new(&config.seed_nodes),
            config,
            role,
            announce,
            transport,
            store: Arc::new(InMemoryNodeStore::new()),
            certificates: Arc::new(FsCertificateSink),
            teachers: TeacherQueue::new(),
            schedule,
            rng: StdRng::from_entropy(),
            metrics: Metrics::new(),
            teardown: None,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_certificate_sink(mut self, certificates: Arc<dyn CertificateSink>) -> Self {
        self.certificates = certificates;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Make teacher selection reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Last-chance hook run by the spawned task before it aborts on a fatal fault.
    pub fn with_teardown(
        mut self,
        teardown: impl FnOnce(&LearningError) + Send + Sync + 'static,
    ) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn handle(&self) -> LearnerHandle {
        LearnerHandle::new(
            Arc::clone(&self.shared),
            self.config.wait_poll_interval,
            self.config.learning_timeout,
        )
    }

    pub fn learning_round(&self) -> u64 {
        self.shared.round()
    }

    pub fn current_teacher(&self) -> Option<PeerIdentity> {
        self.teachers.current()
    }

    /// Number of teachers left before the queue is reshuffled from the fleet.
    pub fn teacher_queue_len(&self) -> usize {
        self.teachers.len()
    }

    pub fn current_interval(&self) -> Duration {
        self.schedule.interval()
    }

    /// Merge `record` into the fleet, saving it to the node store if
    /// metadata persistence is enabled and the record was accepted.
    pub fn remember_node(&mut self, record: PeerRecord) -> Result<Outcome, LearningError> {
        let to_save = self.config.save_metadata.then(|| record.clone());

        let outcome = self.shared.merge(record);
        self.metrics.set_known_nodes(self.shared.fleet().len());

        if let (true, Some(record)) = (outcome.is_accepted(), to_save) {
            let identity = self.store.save(&record)?;
            debug!(%identity, "Saved node metadata");
        }

        Ok(outcome)
    }

    /// Merge every node found in the node store which passes the stamp and
    /// interface checks. Returns how many were accepted.
    pub fn read_nodes_from_storage(&mut self) -> Result<usize, LearningError> {
        let records = self.store.load_all()?;
        let mut accepted = 0;

        for mut record in records {
            if let Err(e) = record.validate_metadata(self.config.federated_only) {
                warn!(identity = %record.identity(), error = %e, "Ignoring invalid stored node");
                continue;
            }

            if self.shared.merge(record).is_accepted() {
                accepted += 1;
            }
        }

        self.metrics.set_known_nodes(self.shared.fleet().len());
        debug!(accepted, "Read nodes from storage");

        Ok(accepted)
    }

    /// Where the certificate of `record` is pinned.
    fn certificate_path_of(&self, record: &PeerRecord) -> PathBuf {
        record
            .certificate_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| certificate_path(&self.config.certificates_dir, &record.identity()))
    }
}

#[cfg(test)]
pub(crate) mod test_support;
