//! The local node's checksummed view of the fleet.

// For coverage on nightly
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::fmt;
use std::collections::BTreeMap;
use std::time::SystemTime;

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use tracing::debug;

use fleetlearn_node::{CodecError, PeerRecord};
use fleetlearn_peer::PeerIdentity;

mod nickname;

pub use nickname::Nickname;

/// Result of merging a record into the fleet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    /// A record with an equal or newer timestamp is already known
    RejectedStale,
    /// The record describes the local node
    RejectedSelf,
    /// The record has no interface signature and cannot be part of the checksum
    RejectedUnsigned,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

/// Digest of the known fleet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FleetChecksum {
    /// No node is known yet
    NoKnownNodes,
    Known([u8; 32]),
}

impl FleetChecksum {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn to_hex(&self) -> Option<String> {
        match self {
            Self::NoKnownNodes => None,
            Self::Known(digest) => Some(hex::encode(digest)),
        }
    }
}

impl fmt::Display for FleetChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKnownNodes => f.write_str("NO_KNOWN_NODES"),
            Self::Known(digest) => f.write_str(&hex::encode(digest)),
        }
    }
}

#[derive(Clone, Debug)]
struct Member {
    record: PeerRecord,
    encoded: Bytes,
}

/// Known nodes keyed by identity, with a checksum and nickname kept in sync
/// with every mutation.
#[derive(Clone, Debug)]
pub struct FleetState {
    local: Option<PeerIdentity>,
    /// Included in the checksum when the local node is itself a peer
    local_record: Option<Member>,
    nodes: BTreeMap<PeerIdentity, Member>,
    checksum: FleetChecksum,
    nickname: Option<Nickname>,
    updated_at: Option<SystemTime>,
}

impl FleetState {
    /// An empty fleet. Records claiming the `local` identity are never admitted.
    pub fn new(local: Option<PeerIdentity>) -> Self {
        Self {
            local,
            local_record: None,
            nodes: BTreeMap::new(),
            checksum: FleetChecksum::NoKnownNodes,
            nickname: None,
            updated_at: None,
        }
    }

    /// Include the local node's own record in the checksum.
    pub fn set_local_record(&mut self, record: PeerRecord) -> Result<(), CodecError> {
        let encoded = record.to_bytes()?;

        self.local = Some(record.identity());
        self.local_record = Some(Member { record, encoded });
        self.recompute();

        Ok(())
    }

    pub fn local(&self) -> Option<PeerIdentity> {
        self.local
    }

    /// Merge `record`, replacing a known record only if it is strictly newer.
    pub fn upsert(&mut self, record: PeerRecord) -> Outcome {
        let identity = record.identity();

        if self.local == Some(identity) {
            return Outcome::RejectedSelf;
        }

        let outcome = match self.nodes.get(&identity) {
            Some(known) if known.record.timestamp() >= record.timestamp() => {
                debug!(
                    %identity,
                    known = known.record.timestamp(),
                    received = record.timestamp(),
                    "Skipping stale record"
                );
                return Outcome::RejectedStale;
            }
            Some(_) => Outcome::Updated,
            None => Outcome::Inserted,
        };

        let Ok(encoded) = record.to_bytes() else {
            return Outcome::RejectedUnsigned;
        };

        self.nodes.insert(identity, Member { record, encoded });
        self.recompute();

        outcome
    }

    /// Record contact with a known node. Does not affect the checksum.
    pub fn touch(&mut self, identity: &PeerIdentity, at: SystemTime) -> bool {
        match self.nodes.get_mut(identity) {
            Some(member) => {
                member.record.mark_seen(at);
                true
            }
            None => false,
        }
    }

    /// Digest over the known records sorted by identity.
    ///
    /// Only depends on the set of records, not on the order they were merged in.
    pub fn checksum_snapshot(&self) -> FleetChecksum {
        if self.nodes.is_empty() {
            return FleetChecksum::NoKnownNodes;
        }

        let mut members = self
            .nodes
            .iter()
            .map(|(identity, member)| (*identity, member))
            .collect::<Vec<_>>();

        if let Some(local) = &self.local_record {
            members.push((local.record.identity(), local));
            members.sort_by_key(|(identity, _)| *identity);
        }

        let mut hasher = Keccak256::new();
        for (_, member) in members {
            hasher.update(&member.encoded);
        }

        FleetChecksum::Known(hasher.finalize().into())
    }

    pub fn checksum(&self) -> FleetChecksum {
        self.checksum
    }

    pub fn nickname(&self) -> Option<&Nickname> {
        self.nickname.as_ref()
    }

    pub fn updated_at(&self) -> Option<SystemTime> {
        self.updated_at
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.nodes.contains_key(identity)
    }

    pub fn contains_all<'a>(&self, identities: impl IntoIterator<Item = &'a PeerIdentity>) -> bool {
        identities.into_iter().all(|identity| self.contains(identity))
    }

    pub fn get(&self, identity: &PeerIdentity) -> Option<&PeerRecord> {
        self.nodes.get(identity).map(|member| &member.record)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Known identities, in ascending order.
    pub fn identities(&self) -> impl Iterator<Item = PeerIdentity> + '_ {
        self.nodes.keys().copied()
    }

    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.nodes.values().map(|member| &member.record)
    }

    /// Known identities in random order.
    pub fn shuffled(&self, rng: &mut dyn RngCore) -> Vec<PeerIdentity> {
        let mut identities = self.identities().collect::<Vec<_>>();
        identities.shuffle(rng);
        identities
    }

    fn recompute(&mut self) {
        self.checksum = self.checksum_snapshot();
        self.nickname = match &self.checksum {
            FleetChecksum::NoKnownNodes => None,
            FleetChecksum::Known(digest) => Some(Nickname::from_digest(digest)),
        };
        self.updated_at = Some(SystemTime::now());
    }
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.checksum, &self.nickname) {
            (FleetChecksum::Known(digest), Some(nickname)) => write!(
                f,
                "{nickname} ({}, {} nodes)",
                hex::encode(&digest[..4]),
                self.nodes.len()
            ),
            _ => f.write_str("NO_KNOWN_NODES"),
        }
    }
}
