use core::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use fleetlearn_peer::PeerIdentity;
use fleetlearn_signing::{IdentityEvidence, InterfaceSignature, Signer, SigningPublicKey};

use crate::codec::{self, CodecError};
use crate::verification::Verification;

/// Current time in epoch seconds, saturating at `u32::MAX`.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Advertised REST endpoint of a node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RestInterface {
    pub host: String,
    pub port: u16,
}

impl RestInterface {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RestInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a node says about itself on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Epoch seconds at which the interface was signed
    pub timestamp: u32,
    pub interface_signature: Option<InterfaceSignature>,
    pub evidence: Option<IdentityEvidence>,
    pub signing_key: SigningPublicKey,
    pub encrypting_key: Bytes,
    pub identity: PeerIdentity,
    pub certificate: Bytes,
    pub rest: RestInterface,
}

impl NodeMetadata {
    /// The stamp is the node's public signing key.
    pub fn stamp(&self) -> &[u8] {
        self.signing_key.as_bytes()
    }

    /// `timestamp || canonical address || rest host || rest port`
    pub fn interface_message(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + 20 + self.rest.host.len() + 2);
        buf.put_u32(self.timestamp);
        buf.put_slice(self.identity.as_bytes());
        buf.put_slice(self.rest.host.as_bytes());
        buf.put_u16(self.rest.port);
        buf.freeze()
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        codec::encode_metadata(self, &mut buf)?;
        Ok(buf.freeze())
    }

    pub fn from_bytes(bytes: Bytes) -> Result<Self, CodecError> {
        codec::decode_metadata_exact(bytes)
    }
}

/// A peer as known by the local node: its advertised metadata, how far it has
/// been verified, and when it was last contacted.
///
/// Only the local node's own record carries a [`Signer`]; every record learned
/// from the network is a stranger which can be verified but not re-signed.
#[derive(Clone)]
pub struct PeerRecord {
    pub(crate) metadata: NodeMetadata,
    pub(crate) certificate_path: Option<PathBuf>,
    pub(crate) signer: Option<Arc<dyn Signer>>,
    pub(crate) verification: Verification,
    pub(crate) last_seen: Option<SystemTime>,
}

impl PeerRecord {
    /// A record learned from the network.
    pub fn stranger(metadata: NodeMetadata) -> Self {
        Self {
            metadata,
            certificate_path: None,
            signer: None,
            verification: Verification::default(),
            last_seen: None,
        }
    }

    /// The local node's record. The interface is signed lazily, on first use.
    pub fn local(
        signer: Arc<dyn Signer>,
        identity: PeerIdentity,
        evidence: Option<IdentityEvidence>,
        encrypting_key: Bytes,
        certificate: Bytes,
        rest: RestInterface,
    ) -> Self {
        let metadata = NodeMetadata {
            timestamp: 0,
            interface_signature: None,
            evidence,
            signing_key: signer.public_key(),
            encrypting_key,
            identity,
            certificate,
            rest,
        };

        Self {
            metadata,
            certificate_path: None,
            signer: Some(signer),
            verification: Verification::default(),
            last_seen: None,
        }
    }

    pub fn from_bytes(bytes: Bytes) -> Result<Self, CodecError> {
        NodeMetadata::from_bytes(bytes).map(Self::stranger)
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        self.metadata.to_bytes()
    }

    pub fn identity(&self) -> PeerIdentity {
        self.metadata.identity
    }

    pub fn timestamp(&self) -> u32 {
        self.metadata.timestamp
    }

    pub fn signing_key(&self) -> &SigningPublicKey {
        &self.metadata.signing_key
    }

    pub fn encrypting_key(&self) -> &Bytes {
        &self.metadata.encrypting_key
    }

    pub fn evidence(&self) -> Option<&IdentityEvidence> {
        self.metadata.evidence.as_ref()
    }

    pub fn certificate(&self) -> &Bytes {
        &self.metadata.certificate
    }

    pub fn certificate_path(&self) -> Option<&Path> {
        self.certificate_path.as_deref()
    }

    pub fn set_certificate_path(&mut self, path: PathBuf) {
        self.certificate_path = Some(path);
    }

    pub fn rest(&self) -> &RestInterface {
        &self.metadata.rest
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn has_signing_power(&self) -> bool {
        self.signer.is_some()
    }

    pub fn last_seen(&self) -> Option<SystemTime> {
        self.last_seen
    }

    pub fn mark_seen(&mut self, at: SystemTime) {
        self.last_seen = Some(at);
    }

    /// Sign the current interface with the local signer, dated now.
    ///
    /// Returns `false` if this record has no signing power.
    pub fn sign_and_date_interface(&mut self) -> bool {
        let Some(signer) = &self.signer else {
            return false;
        };

        self.metadata.timestamp = unix_now();
        self.metadata.interface_signature = Some(signer.sign(&self.metadata.interface_message()));
        self.verification.interface_verified = false;

        true
    }
}

impl PartialEq for PeerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata
    }
}

impl Eq for PeerRecord {}

impl fmt::Debug for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRecord")
            .field("identity", &self.metadata.identity)
            .field("rest", &self.metadata.rest)
            .field("timestamp", &self.metadata.timestamp)
            .field("state", &self.state())
            .field("last_seen", &self.last_seen)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.metadata.identity.short(), self.metadata.rest)
    }
}
