use std::path::Path;
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use fleetlearn_peer::PeerIdentity;

use crate::codec::CodecError;
use crate::record::{NodeMetadata, PeerRecord};
use crate::transport::{PeerTransport, TransportError};

/// How far a record has been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationState {
    Unverified,
    StampChecked,
    InterfaceChecked,
    FullyVerified,
    /// Terminal for this advertisement; only a forced re-verification clears it.
    Invalid(String),
    /// The node has no identity evidence and federated-only mode was not accepted.
    WrongMode,
}

impl VerificationState {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("invalid node {identity}: {reason}")]
    InvalidNode {
        identity: PeerIdentity,
        reason: String,
    },

    #[error("node {0} carries no identity evidence and federated-only nodes are not accepted")]
    WrongMode(PeerIdentity),

    #[error("node {0} is a stranger and cannot sign its own interface")]
    NoSigningPower(PeerIdentity),

    #[error("node {identity} is unreachable: {source}")]
    Unreachable {
        identity: PeerIdentity,
        source: TransportError,
    },

    #[error("node {identity} answered its node information request with status {status}")]
    BadResponse { identity: PeerIdentity, status: u16 },

    #[error("node {identity} sent an undecodable self-description: {source}")]
    Malformed {
        identity: PeerIdentity,
        source: CodecError,
    },
}

impl VerificationError {
    /// The node lied about itself, as opposed to being unreachable or misconfigured.
    pub fn is_suspicious(&self) -> bool {
        matches!(self, Self::InvalidNode { .. })
    }
}

/// Verification flags of a record. Once set, a flag stays set until a forced
/// re-verification.
#[derive(Clone, Debug, Default)]
pub(crate) struct Verification {
    /// The stamp check passed, possibly without evidence in federated mode
    pub(crate) stamp_checked: bool,
    /// The identity evidence recovers to the claimed identity
    pub(crate) stamp_verified: bool,
    pub(crate) interface_verified: bool,
    pub(crate) fully_verified: bool,
    pub(crate) failure: Option<Failure>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    Invalid(String),
    WrongMode,
}

impl PeerRecord {
    pub fn state(&self) -> VerificationState {
        let v = &self.verification;

        match &v.failure {
            Some(Failure::Invalid(reason)) => VerificationState::Invalid(reason.clone()),
            Some(Failure::WrongMode) => VerificationState::WrongMode,
            None if v.fully_verified => VerificationState::FullyVerified,
            None if v.stamp_checked && v.interface_verified => VerificationState::InterfaceChecked,
            None if v.stamp_checked => VerificationState::StampChecked,
            None => VerificationState::Unverified,
        }
    }

    pub fn is_stamp_verified(&self) -> bool {
        self.verification.stamp_verified
    }

    pub fn is_interface_verified(&self) -> bool {
        self.verification.interface_verified
    }

    pub fn is_fully_verified(&self) -> bool {
        self.verification.fully_verified
    }

    /// Check that the identity evidence, a signature over the stamp, recovers
    /// to the claimed identity.
    ///
    /// Without evidence the stamp is only accepted if `accept_federated` is set,
    /// and it is not counted as verified.
    pub fn check_stamp(&mut self, accept_federated: bool) -> Result<(), VerificationError> {
        self.ensure_not_invalid()?;

        let identity = self.identity();

        match self.metadata.evidence {
            Some(evidence) => match evidence.recover(self.metadata.stamp()) {
                Ok(recovered) if recovered == identity => {
                    self.verification.stamp_checked = true;
                    self.verification.stamp_verified = true;
                    self.clear_wrong_mode();
                    Ok(())
                }
                Ok(recovered) => {
                    self.invalidate(format!("identity evidence recovers to {recovered}"))
                }
                Err(e) => self.invalidate(format!("unusable identity evidence: {e}")),
            },

            None if accept_federated => {
                self.verification.stamp_checked = true;
                self.clear_wrong_mode();
                Ok(())
            }

            None => {
                self.verification.failure = Some(Failure::WrongMode);
                Err(VerificationError::WrongMode(identity))
            }
        }
    }

    /// Check the interface signature against the claimed signing key.
    ///
    /// A record without an interface signature is signed now if it has
    /// signing power.
    pub fn check_interface(&mut self) -> Result<(), VerificationError> {
        self.ensure_not_invalid()?;

        if self.metadata.interface_signature.is_none() && !self.sign_and_date_interface() {
            return Err(VerificationError::NoSigningPower(self.identity()));
        }

        let Some(signature) = self.metadata.interface_signature else {
            return Err(VerificationError::NoSigningPower(self.identity()));
        };

        let message = self.metadata.interface_message();

        match self.metadata.signing_key.verify(&message, &signature) {
            Ok(()) => {
                self.verification.interface_verified = true;
                Ok(())
            }
            Err(e) => self.invalidate(format!("interface signature: {e}")),
        }
    }

    /// Stamp and interface checks, each skipped if already passed.
    pub fn validate_metadata(&mut self, accept_federated: bool) -> Result<(), VerificationError> {
        if !self.verification.stamp_checked {
            self.check_stamp(accept_federated)?;
        }

        if !self.verification.interface_verified {
            self.check_interface()?;
        }

        Ok(())
    }

    /// Contact the node at its advertised address and make sure it still uses
    /// the credentials it advertised.
    ///
    /// A transport failure leaves the record untouched. The record only becomes
    /// fully verified if its metadata was validated beforehand.
    pub async fn check_liveness(
        &mut self,
        transport: &dyn PeerTransport,
        certificate_path: &Path,
    ) -> Result<(), VerificationError> {
        self.ensure_not_invalid()?;

        let identity = self.identity();

        let response = transport
            .get_node_info(self.rest(), certificate_path)
            .await
            .map_err(|source| VerificationError::Unreachable { identity, source })?;

        if !response.is_success() {
            return Err(VerificationError::BadResponse {
                identity,
                status: response.status,
            });
        }

        let live = NodeMetadata::from_bytes(response.body)
            .map_err(|source| VerificationError::Malformed { identity, source })?;

        if !self.matches_live(&live) {
            return self.invalidate("impersonation or credential rotation".to_string());
        }

        self.last_seen = Some(SystemTime::now());
        self.verification.fully_verified =
            self.verification.stamp_checked && self.verification.interface_verified;

        debug!(%identity, rest = %self.rest(), "Node is live");

        Ok(())
    }

    /// Run the stamp, interface and liveness checks.
    ///
    /// A fully verified record is left alone, without any network call,
    /// unless `force` is set, in which case all verification progress is
    /// discarded first.
    pub async fn verify_node(
        &mut self,
        transport: &dyn PeerTransport,
        certificate_path: &Path,
        accept_federated: bool,
        force: bool,
    ) -> Result<(), VerificationError> {
        if force {
            self.verification = Verification::default();
        } else if self.verification.fully_verified {
            return Ok(());
        }

        self.validate_metadata(accept_federated)?;
        self.check_liveness(transport, certificate_path).await
    }

    fn matches_live(&self, live: &NodeMetadata) -> bool {
        let identity = self.identity();
        let ours = &self.metadata;

        let addresses_match = live.identity == ours.identity;
        let signing_keys_match = live.signing_key == ours.signing_key;
        let encrypting_keys_match = live.encrypting_key == ours.encrypting_key;
        let evidence_matches = live.evidence == ours.evidence;

        if !addresses_match {
            warn!(%identity, live = %live.identity, "Canonical address swapped out, someone is trying to defraud this node");
        }

        if !signing_keys_match {
            warn!(%identity, "Signing key swapped out, someone is impersonating this node");
        }

        if !encrypting_keys_match {
            warn!(%identity, "Encrypting key swapped out");
        }

        if !evidence_matches {
            warn!(%identity, "Identity evidence swapped out");
        }

        addresses_match && signing_keys_match && encrypting_keys_match && evidence_matches
    }

    fn ensure_not_invalid(&self) -> Result<(), VerificationError> {
        match &self.verification.failure {
            Some(Failure::Invalid(reason)) => Err(VerificationError::InvalidNode {
                identity: self.identity(),
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn clear_wrong_mode(&mut self) {
        if self.verification.failure == Some(Failure::WrongMode) {
            self.verification.failure = None;
        }
    }

    fn invalidate(&mut self, reason: String) -> Result<(), VerificationError> {
        self.verification.failure = Some(Failure::Invalid(reason.clone()));

        Err(VerificationError::InvalidNode {
            identity: self.identity(),
            reason,
        })
    }
}
