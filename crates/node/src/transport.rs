use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use fleetlearn_peer::PeerIdentity;

use crate::record::RestInterface;

pub const STATUS_OK: u16 = 200;

/// Status and body of a REST exchange with a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: Bytes) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Bytes) -> Self {
        Self::new(STATUS_OK, body)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot connect to {rest}: {reason}")]
    Connection { rest: RestInterface, reason: String },

    #[error("request to {rest} timed out")]
    Timeout { rest: RestInterface },

    #[error("TLS failure with {rest}: {reason}")]
    Tls { rest: RestInterface, reason: String },
}

/// Network capability used to talk to other nodes.
///
/// Every request but [`PeerTransport::fetch_certificate`] is made over TLS,
/// pinned to the certificate stored at `certificate_path`.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Ask `teacher` for the nodes it knows about.
    ///
    /// `wanted` lists identities the caller urgently needs, and `announce`
    /// carries the caller's own record when it should be learned about.
    /// A successful response body is a signed peer list.
    async fn get_peer_list(
        &self,
        teacher: &RestInterface,
        wanted: &[PeerIdentity],
        announce: Option<Bytes>,
        certificate_path: &Path,
    ) -> Result<Response, TransportError>;

    /// Ask the node at `rest` to describe itself.
    /// A successful response body is a single encoded record.
    async fn get_node_info(
        &self,
        rest: &RestInterface,
        certificate_path: &Path,
    ) -> Result<Response, TransportError>;

    /// Fetch the TLS certificate presented at `rest`, without pinning.
    async fn fetch_certificate(&self, rest: &RestInterface) -> Result<Bytes, TransportError>;
}
