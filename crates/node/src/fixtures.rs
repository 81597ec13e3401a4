//! Deterministic nodes for tests.

use std::sync::Arc;

use bytes::Bytes;

use fleetlearn_peer::PeerIdentity;
use fleetlearn_signing::{Ed25519Signer, IdentityEvidence, IdentityKey, Signer};

use crate::codec::{encode_batch, sign_peer_list};
use crate::record::{NodeMetadata, PeerRecord, RestInterface};

pub const FIXTURE_PORT: u16 = 9151;

/// Keys and endpoint of a node, all derived from `seed`.
#[derive(Clone, Debug)]
pub struct NodeFixture {
    pub seed: u8,
    pub signer: Ed25519Signer,
    pub identity_key: IdentityKey,
    pub rest: RestInterface,
}

impl NodeFixture {
    pub fn new(seed: u8) -> Self {
        let mut secret = [0u8; 32];
        secret[0] = 0x11;
        secret[31] = seed;

        Self {
            seed,
            signer: Ed25519Signer::from_secret([seed; 32]),
            identity_key: IdentityKey::from_secret(&secret).unwrap(),
            rest: RestInterface::new(format!("node-{seed}.fleet.test"), FIXTURE_PORT),
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity_key.identity()
    }

    pub fn encrypting_key(&self) -> Bytes {
        Bytes::from(vec![self.seed; 33])
    }

    pub fn certificate(&self) -> Bytes {
        Bytes::from(format!(
            "-----BEGIN CERTIFICATE-----\nnode-{}\n-----END CERTIFICATE-----\n",
            self.seed
        ))
    }

    /// Evidence binding this node's own stamp to its identity.
    pub fn evidence(&self) -> IdentityEvidence {
        self.identity_key
            .sign_stamp(self.signer.public_key().as_bytes())
            .unwrap()
    }

    /// Metadata claiming this node's identity and endpoint, signed by `stamp`.
    pub fn metadata(
        &self,
        timestamp: u32,
        stamp: &Ed25519Signer,
        evidence: Option<IdentityEvidence>,
    ) -> NodeMetadata {
        let mut metadata = NodeMetadata {
            timestamp,
            interface_signature: None,
            evidence,
            signing_key: stamp.public_key(),
            encrypting_key: self.encrypting_key(),
            identity: self.identity(),
            certificate: self.certificate(),
            rest: self.rest.clone(),
        };

        metadata.interface_signature = Some(stamp.sign(&metadata.interface_message()));
        metadata
    }

    /// A genuine advertisement with identity evidence.
    pub fn record(&self, timestamp: u32) -> PeerRecord {
        PeerRecord::stranger(self.metadata(timestamp, &self.signer, Some(self.evidence())))
    }

    /// A genuine advertisement without identity evidence.
    pub fn federated_record(&self, timestamp: u32) -> PeerRecord {
        PeerRecord::stranger(self.metadata(timestamp, &self.signer, None))
    }

    /// This node's advertisement, with evidence signed by `other`'s identity key.
    pub fn record_with_evidence_of(&self, other: &NodeFixture, timestamp: u32) -> PeerRecord {
        let evidence = other
            .identity_key
            .sign_stamp(self.signer.public_key().as_bytes())
            .unwrap();

        PeerRecord::stranger(self.metadata(timestamp, &self.signer, Some(evidence)))
    }

    /// This node's identity and evidence, with `other`'s signing key.
    pub fn record_with_signing_key_of(&self, other: &NodeFixture, timestamp: u32) -> PeerRecord {
        PeerRecord::stranger(self.metadata(timestamp, &other.signer, Some(self.evidence())))
    }

    /// This node's identity without evidence, with `other`'s signing key.
    pub fn federated_record_with_signing_key_of(
        &self,
        other: &NodeFixture,
        timestamp: u32,
    ) -> PeerRecord {
        PeerRecord::stranger(self.metadata(timestamp, &other.signer, None))
    }

    /// The record of this node as run locally, with signing power.
    pub fn local_record(&self) -> PeerRecord {
        PeerRecord::local(
            Arc::new(self.signer.clone()),
            self.identity(),
            Some(self.evidence()),
            self.encrypting_key(),
            self.certificate(),
            self.rest.clone(),
        )
    }

    /// A peer list of `records`, signed by this node.
    pub fn signed_peer_list<'a>(&self, records: impl IntoIterator<Item = &'a PeerRecord>) -> Bytes {
        sign_peer_list(&self.signer, encode_batch(records).unwrap())
    }
}
