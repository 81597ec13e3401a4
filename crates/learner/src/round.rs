use std::time::SystemTime;

use tracing::{debug, error, info, warn};

use fleetlearn_config::Eagerness;
use fleetlearn_fleet::Outcome;
use fleetlearn_node::{
    certificate_path, decode_batch, pending_certificate_path, split_signed_peer_list, PeerRecord,
    VerificationError,
};
use fleetlearn_peer::PeerIdentity;

use crate::error::LearningError;
use crate::Learner;

/// What a successful learning round achieved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    pub teacher: PeerIdentity,
    /// Number of nodes the teacher told about
    pub candidates: usize,
    /// Nodes which were not known before this round
    pub new_nodes: Vec<PeerIdentity>,
}

impl Learner {
    /// Run one learning round against the current teacher.
    ///
    /// The round counter is incremented whatever the outcome, and the teacher
    /// is rotated out afterwards unless there was none to pick.
    pub async fn learn_from_teacher_node(
        &mut self,
        eagerness: Eagerness,
    ) -> Result<RoundReport, LearningError> {
        let round = self.shared.next_round();
        self.metrics.rounds.inc();

        let result = self.run_round(round, eagerness).await;

        match &result {
            Err(LearningError::NotEnoughTeachers(reason)) => {
                warn!(round, "Can't learn right now: {reason}");
            }
            Err(LearningError::UnresponsiveTeacher { teacher, source }) => {
                info!(round, %teacher, error = %source, "No response from teacher");
            }
            _ => {}
        }

        if result.is_err() {
            self.metrics.failed_rounds.inc();
        }

        if !matches!(result, Err(LearningError::NotEnoughTeachers(_))) {
            let fleet = self.shared.fleet();
            // The fleet cannot be empty since a teacher was found in it
            let _ = self.teachers.cycle(&fleet, &mut self.rng);
        }

        result
    }

    async fn run_round(
        &mut self,
        round: u64,
        eagerness: Eagerness,
    ) -> Result<RoundReport, LearningError> {
        self.retry_unresponsive_seeds().await?;

        let teacher = {
            let fleet = self.shared.fleet();
            let identity = self.teachers.current_or_cycle(&fleet, &mut self.rng)?;
            fleet
                .get(&identity)
                .cloned()
                .ok_or_else(|| LearningError::NotEnoughTeachers(format!("teacher {identity} was forgotten")))?
        };

        let teacher_id = teacher.identity();
        let teacher_certificate = self.certificate_path_of(&teacher);
        let wanted = self.shared.wanted();

        let response = self
            .transport
            .get_peer_list(
                teacher.rest(),
                &wanted,
                self.announce.clone(),
                &teacher_certificate,
            )
            .await
            .map_err(|source| {
                self.metrics.unresponsive_teachers.inc();
                LearningError::UnresponsiveTeacher {
                    teacher: teacher_id,
                    source,
                }
            })?;

        if !response.is_success() {
            error!(round, teacher = %teacher_id, status = response.status, "Bad response from teacher");
            return Err(LearningError::BadResponse {
                teacher: teacher_id,
                status: response.status,
            });
        }

        let malformed = |source| LearningError::MalformedPeerList {
            teacher: teacher_id,
            source,
        };

        let (signature, batch) = split_signed_peer_list(response.body).map_err(malformed)?;

        if teacher.signing_key().verify(&batch, &signature).is_err() {
            return Err(LearningError::InvalidTeacherSignature {
                teacher: teacher_id,
            });
        }

        let candidates = decode_batch(batch).map_err(malformed)?;
        let candidate_count = candidates.len();

        self.shared.touch(&teacher_id, SystemTime::now());

        let mut new_nodes = Vec::new();

        for candidate in candidates {
            let Some(candidate) = self.vet_candidate(candidate, eagerness).await else {
                continue;
            };

            let identity = candidate.identity();
            let certificate = candidate.certificate().clone();
            let path = self.certificate_path_of(&candidate);
            // Liveness-checked candidates are always pinned
            let pin = self.config.persist_certificates || candidate.certificate_path().is_some();

            let outcome = self.remember_node(candidate)?;

            if outcome == Outcome::Inserted {
                self.metrics.nodes_learned.inc();
                new_nodes.push(identity);
            }

            if pin && outcome.is_accepted() {
                if let Err(e) = self.certificates.write(&certificate, &path, true) {
                    warn!(%identity, error = %e, "Failed to persist certificate");
                }
            }
        }

        if self.schedule.adjust(new_nodes.len()) {
            let interval = self.schedule.interval();
            info!(
                round,
                interval = ?interval,
                rounds_without_new_nodes = self.schedule.rounds_without_new_nodes(),
                "Changed learning interval"
            );
        }

        self.shared.set_interval(self.schedule.interval());
        self.metrics.set_interval(self.schedule.interval());

        info!(
            round,
            teacher = %teacher,
            "Learning round {round}. Teacher {teacher} knew about {candidate_count} nodes, {} were new",
            new_nodes.len()
        );

        Ok(RoundReport {
            round,
            teacher: teacher_id,
            candidates: candidate_count,
            new_nodes,
        })
    }

    /// Verify `candidate` at the requested depth.
    /// Returns `None` if it must not be merged.
    async fn vet_candidate(
        &mut self,
        mut candidate: PeerRecord,
        eagerness: Eagerness,
    ) -> Option<PeerRecord> {
        let identity = candidate.identity();

        if self.role.identity() == Some(identity) {
            debug!(%identity, "Skipping own record");
            return None;
        }

        let stale = self
            .shared
            .fleet()
            .get(&identity)
            .is_some_and(|known| known.timestamp() >= candidate.timestamp());

        if stale {
            debug!(%identity, "Skipping stale record");
            return None;
        }

        let result = match eagerness {
            Eagerness::Lazy => candidate.validate_metadata(self.config.federated_only),
            Eagerness::Eager => {
                let path = certificate_path(&self.config.certificates_dir, &identity);
                let pending = pending_certificate_path(&path);

                if let Err(e) = self
                    .certificates
                    .write(candidate.certificate(), &pending, true)
                {
                    warn!(%identity, error = %e, "Failed to pin certificate of candidate");
                    return None;
                }

                let result = candidate
                    .verify_node(&*self.transport, &pending, self.config.federated_only, false)
                    .await;

                if let Err(e) = self.certificates.discard(&pending) {
                    debug!(%identity, error = %e, "Failed to discard pending certificate");
                }

                if result.is_ok() {
                    candidate.set_certificate_path(path);
                }

                result
            }
        };

        match result {
            Ok(()) => {
                debug!(%identity, state = ?candidate.state(), "Verified node");
                Some(candidate)
            }
            Err(e) if e.is_suspicious() => {
                warn!(%identity, error = %e, "Suspicious activity from candidate, dropping it");
                self.metrics.invalid_nodes.inc();
                None
            }
            Err(VerificationError::WrongMode(_)) => {
                info!(%identity, "Candidate lacks identity evidence, dropping it");
                None
            }
            Err(e) => {
                info!(%identity, error = %e, "Could not verify candidate, dropping it");
                None
            }
        }
    }
}
