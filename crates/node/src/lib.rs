//! Verifiable peer records.
//!
//! A [`PeerRecord`] holds what a peer claims about itself (its [`NodeMetadata`])
//! together with how far that claim has been verified. Verification goes
//! through three checks, in order:
//!
//! 1. the *stamp* check: the identity evidence recovers to the claimed identity,
//! 2. the *interface* check: the REST interface is signed by the stamp,
//! 3. the *liveness* check: the node answers at its advertised address with the
//!    same credentials.
//!
//! The network, the node store and the certificate store are consumed through
//! the [`PeerTransport`], [`NodeStore`] and [`CertificateSink`] capabilities.

// For coverage on nightly
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod certificate;
mod codec;
mod record;
mod store;
mod transport;
mod verification;

#[cfg(any(test, feature = "test-utils"))]
pub mod fixtures;

pub use certificate::{
    certificate_path, pending_certificate_path, seed_certificate_path, CertificateError,
    CertificateSink, FsCertificateSink,
};
pub use codec::{decode_batch, encode_batch, sign_peer_list, split_signed_peer_list, CodecError};
pub use record::{unix_now, NodeMetadata, PeerRecord, RestInterface};
pub use store::{InMemoryNodeStore, NodeStore, StoreError};
pub use transport::{PeerTransport, Response, TransportError};
pub use verification::{VerificationError, VerificationState};

pub use fleetlearn_peer::PeerIdentity;
