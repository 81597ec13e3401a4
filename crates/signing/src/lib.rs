//! Signing primitives used to authenticate peers.
//!
//! Two schemes are involved:
//! - [`ed25519`]: the node's *stamp*, the key that signs its interface
//!   information (timestamp, canonical address and REST endpoint).
//! - [`ecdsa`]: the *identity evidence*, a recoverable secp256k1 signature
//!   over the stamp which binds the stamp to the canonical address.

// For coverage on nightly
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use sha3::{Digest, Keccak256};
use thiserror::Error;

pub mod ecdsa;
pub mod ed25519;

pub use ecdsa::{IdentityEvidence, IdentityKey, EVIDENCE_LENGTH};
pub use ed25519::{
    Ed25519Signer, InterfaceSignature, SigningPublicKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};

pub use fleetlearn_peer::PeerIdentity;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("malformed signing key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature does not verify")]
    InvalidSignature,

    #[error("cannot recover a public key from evidence: {0}")]
    Unrecoverable(String),
}

/// A capability to produce interface signatures with a node's stamp.
///
/// Only the local node holds one; records learned from the network
/// are strangers and can only be verified.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> SigningPublicKey;

    fn sign(&self, message: &[u8]) -> InterfaceSignature;
}

/// Keccak-256 digest of `data`.
pub fn keccak_digest(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}
