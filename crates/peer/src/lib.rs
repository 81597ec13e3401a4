//! Stable cryptographic identity of a participant in the fleet.
//!
//! A [`PeerIdentity`] is the 20-byte canonical address derived from a secp256k1
//! public key: the last 20 bytes of the Keccak-256 digest of the uncompressed
//! point (without its `0x04` tag). It is rendered with the mixed-case checksum
//! encoding of EIP-55.

// For coverage on nightly
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::fmt;
use core::str::FromStr;

use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Length in bytes of a canonical address.
pub const IDENTITY_LENGTH: usize = 20;

/// Length of an uncompressed secp256k1 point, tag included.
const UNCOMPRESSED_KEY_LENGTH: usize = 65;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("invalid identity length: expected {IDENTITY_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("mixed-case address {0} does not match its checksum")]
    BadChecksum(String),

    #[error("invalid uncompressed public key of {0} bytes")]
    InvalidPublicKey(usize),
}

/// Canonical address of a peer, unique key for every peer lookup.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerIdentity([u8; IDENTITY_LENGTH]);

impl PeerIdentity {
    pub const fn from_bytes(bytes: [u8; IDENTITY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let bytes: [u8; IDENTITY_LENGTH] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(bytes.len()))?;

        Ok(Self(bytes))
    }

    /// Derive the identity from an uncompressed secp256k1 public key,
    /// either tagged (65 bytes) or untagged (64 bytes).
    pub fn from_public_key(public_key: &[u8]) -> Result<Self, IdentityError> {
        let point = match public_key.len() {
            UNCOMPRESSED_KEY_LENGTH if public_key[0] == 0x04 => &public_key[1..],
            64 => public_key,
            len => return Err(IdentityError::InvalidPublicKey(len)),
        };

        let digest = Keccak256::digest(point);
        Self::try_from_slice(&digest[32 - IDENTITY_LENGTH..])
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// EIP-55 mixed-case rendering, `0x`-prefixed.
    pub fn to_checksum_address(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");

        for (i, c) in lower.chars().enumerate() {
            let byte = digest[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };

            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }

        out
    }

    /// A short prefix of the checksum address, used in log lines.
    pub fn short(&self) -> String {
        self.to_checksum_address()[..10].to_string()
    }

    #[cfg(feature = "rand")]
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl FromStr for PeerIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        let bytes = hex::decode(digits).map_err(|e| IdentityError::InvalidHex(e.to_string()))?;
        let identity = Self::try_from_slice(&bytes)?;

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());

        if has_lower && has_upper && identity.to_checksum_address()[2..] != *digits {
            return Err(IdentityError::BadChecksum(s.to_string()));
        }

        Ok(identity)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum_address())
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({})", self.to_checksum_address())
    }
}

impl AsRef<[u8]> for PeerIdentity {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; IDENTITY_LENGTH]> for PeerIdentity {
    fn from(bytes: [u8; IDENTITY_LENGTH]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for PeerIdentity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_checksum_address())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for PeerIdentity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
