use std::time::Duration;

use thiserror::Error;

use fleetlearn_node::{CodecError, StoreError, TransportError};
use fleetlearn_peer::PeerIdentity;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LearningError {
    #[error("not enough teachers: {0}")]
    NotEnoughTeachers(String),

    #[error("no response from teacher {teacher}: {source}")]
    UnresponsiveTeacher {
        teacher: PeerIdentity,
        source: TransportError,
    },

    #[error("bad response from teacher {teacher}: status {status}")]
    BadResponse { teacher: PeerIdentity, status: u16 },

    #[error("malformed peer list from teacher {teacher}: {source}")]
    MalformedPeerList {
        teacher: PeerIdentity,
        source: CodecError,
    },

    #[error("peer list from teacher {teacher} is not signed by its stamp")]
    InvalidTeacherSignature { teacher: PeerIdentity },

    #[error("local record cannot be announced: {0}")]
    LocalRecord(CodecError),

    #[error("node storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("learning round panicked: {0}")]
    Panicked(String),
}

impl LearningError {
    /// The round could not take place; learning goes on with the next teacher.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotEnoughTeachers(_) | Self::UnresponsiveTeacher { .. }
        )
    }

    /// The teacher misbehaved; the round was aborted without touching the fleet.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Self::BadResponse { .. }
                | Self::MalformedPeerList { .. }
                | Self::InvalidTeacherSignature { .. }
        )
    }

    /// Handled according to the configured learning error policy.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable() && !self.is_protocol_fault()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error(
        "after {elapsed:?} and {rounds} learning rounds, {known} nodes are known \
         but {wanted} are wanted (learning loop running: {loop_running})"
    )]
    NotEnoughNodes {
        elapsed: Duration,
        rounds: u64,
        known: usize,
        wanted: usize,
        loop_running: bool,
    },

    #[error(
        "after {elapsed:?} and {rounds} learning rounds, {count} nodes are still unknown: \
         {missing:?} (learning loop running: {loop_running})",
        count = .missing.len()
    )]
    MissingNodes {
        elapsed: Duration,
        rounds: u64,
        missing: Vec<PeerIdentity>,
        loop_running: bool,
    },

    #[error("learning loop crashed: {0}")]
    Crashed(LearningError),
}
