use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use tracing::{debug, error, info, warn};

use fleetlearn_config::SeedNode;
use fleetlearn_node::{
    certificate_path, pending_certificate_path, seed_certificate_path, PeerRecord, RestInterface,
    VerificationError,
};
use fleetlearn_peer::PeerIdentity;

use crate::error::LearningError;
use crate::Learner;

/// Progress of bootstrapping from the configured seed nodes.
#[derive(Clone, Debug, Default)]
pub(crate) struct SeedState {
    attempts: BTreeMap<SeedNode, usize>,
    unresponsive: BTreeSet<SeedNode>,
    done: bool,
}

impl SeedState {
    pub(crate) fn new(seeds: &[SeedNode]) -> Self {
        Self {
            attempts: seeds.iter().map(|seed| (seed.clone(), 0)).collect(),
            unresponsive: BTreeSet::new(),
            done: false,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
}

enum SeedFailure {
    /// Worth another attempt later on
    Unresponsive(String),
    /// The seed cannot be trusted, no use trying again
    Rejected(String),
}

impl Learner {
    /// Seeds which did not answer, or answered badly, the last time they were contacted.
    pub fn unresponsive_seed_nodes(&self) -> Vec<SeedNode> {
        self.seeds.unresponsive.iter().cloned().collect()
    }

    /// Learn about every configured seed node, then about the nodes found
    /// in the node store if so configured. Returns how many seeds were learned.
    pub async fn load_seed_nodes(&mut self) -> Result<usize, LearningError> {
        let seeds = self.config.seed_nodes.clone();
        let mut learned = 0;
        let mut failure = None;

        for seed in &seeds {
            match self.learn_about_seed(seed).await {
                Ok(true) => learned += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(%seed, error = %e, "Failed to remember seed node");
                    failure.get_or_insert(e);
                }
            }
        }

        self.seeds.done = true;

        if !seeds.is_empty() && learned == seeds.len() {
            info!(count = learned, "Finished learning about all seed nodes");
        }

        if self.config.read_storage_on_seed {
            if let Err(e) = self.read_nodes_from_storage() {
                error!(error = %e, "Failed to read stored nodes");
                failure.get_or_insert(e);
            }
        }

        if self.shared.fleet().is_empty() {
            warn!(
                seeds = seeds.len(),
                unresponsive = self.seeds.unresponsive.len(),
                "No nodes known after seeding, learning will not make progress until one is reachable"
            );
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(learned),
        }
    }

    /// Contact again the unresponsive seeds which have attempts left.
    pub(crate) async fn retry_unresponsive_seeds(&mut self) -> Result<(), LearningError> {
        if !self.seeds.done {
            return Ok(());
        }

        let max = self.config.seed_retry_attempts;
        let retries = self
            .seeds
            .unresponsive
            .iter()
            .filter(|seed| self.seeds.attempts.get(*seed).copied().unwrap_or(0) < max)
            .cloned()
            .collect::<Vec<_>>();

        for seed in &retries {
            debug!(%seed, "Retrying unresponsive seed node");
            self.learn_about_seed(seed).await?;
        }

        Ok(())
    }

    async fn learn_about_seed(&mut self, seed: &SeedNode) -> Result<bool, LearningError> {
        *self.seeds.attempts.entry(seed.clone()).or_default() += 1;

        let record = match self.contact_seed(seed).await {
            Ok(record) => record,
            Err(SeedFailure::Unresponsive(reason)) => {
                info!(%seed, %reason, "Seed node is unresponsive");
                self.seeds.unresponsive.insert(seed.clone());
                return Ok(false);
            }
            Err(SeedFailure::Rejected(reason)) => {
                warn!(%seed, %reason, "Rejected seed node, dropping it");
                self.seeds.unresponsive.remove(seed);
                return Ok(false);
            }
        };

        let identity = record.identity();
        self.seeds.unresponsive.remove(seed);

        let outcome = self.remember_node(record)?;
        if !outcome.is_accepted() {
            debug!(%seed, %identity, ?outcome, "Seed node not merged");
            return Ok(false);
        }

        info!(%seed, %identity, "Learned about seed node");
        Ok(true)
    }

    async fn contact_seed(&mut self, seed: &SeedNode) -> Result<PeerRecord, SeedFailure> {
        let rest = RestInterface::new(seed.host.clone(), seed.port);

        let certificate = self
            .transport
            .fetch_certificate(&rest)
            .await
            .map_err(unresponsive)?;

        let dir = &self.config.certificates_dir;
        let path = match &seed.identity {
            Some(identity) => certificate_path(dir, identity),
            None => seed_certificate_path(dir, &seed.host),
        };
        let pending = pending_certificate_path(&path);

        self.certificates
            .write(&certificate, &pending, true)
            .map_err(unresponsive)?;

        let verified = self.verify_seed(seed, &rest, &pending).await;

        if let Err(e) = self.certificates.discard(&pending) {
            debug!(%seed, error = %e, "Failed to discard pending certificate");
        }

        let mut record = verified?;

        self.certificates
            .write(&certificate, &path, true)
            .map_err(unresponsive)?;
        record.set_certificate_path(path);

        Ok(record)
    }

    /// Fetch the self-description of `seed` and verify it, using the
    /// certificate at `pending`.
    async fn verify_seed(
        &self,
        seed: &SeedNode,
        rest: &RestInterface,
        pending: &Path,
    ) -> Result<PeerRecord, SeedFailure> {
        let response = self
            .transport
            .get_node_info(rest, pending)
            .await
            .map_err(unresponsive)?;

        if !response.is_success() {
            return Err(SeedFailure::Unresponsive(format!(
                "bad response status {}",
                response.status
            )));
        }

        let mut record = PeerRecord::from_bytes(response.body).map_err(unresponsive)?;

        check_seed_identity(seed, record.identity())?;

        record
            .verify_node(&*self.transport, pending, self.config.federated_only, true)
            .await
            .map_err(|e| match e {
                VerificationError::InvalidNode { .. } | VerificationError::WrongMode(_) => {
                    SeedFailure::Rejected(e.to_string())
                }
                e => unresponsive(e),
            })?;

        Ok(record)
    }
}

fn unresponsive(error: impl fmt::Display) -> SeedFailure {
    SeedFailure::Unresponsive(error.to_string())
}

fn check_seed_identity(seed: &SeedNode, advertised: PeerIdentity) -> Result<(), SeedFailure> {
    match seed.identity {
        Some(expected) if expected != advertised => Err(SeedFailure::Rejected(format!(
            "seed is expected to be {expected} but advertises {advertised}"
        ))),
        _ => Ok(()),
    }
}
