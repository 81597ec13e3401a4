use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;

use fleetlearn_peer::PeerIdentity;

use crate::codec::CodecError;
use crate::record::PeerRecord;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("failed to encode record: {0}")]
    Encode(#[from] CodecError),

    #[error("stored record {identity} is corrupted: {source}")]
    Corrupted {
        identity: PeerIdentity,
        source: CodecError,
    },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Persistence of node metadata across restarts.
pub trait NodeStore: Send + Sync {
    /// Save `record`, replacing any record with the same identity.
    fn save(&self, record: &PeerRecord) -> Result<PeerIdentity, StoreError>;

    /// All stored records, as unverified strangers.
    fn load_all(&self) -> Result<Vec<PeerRecord>, StoreError>;
}

/// Node store keeping encoded records in memory.
#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    records: DashMap<PeerIdentity, Bytes>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn save(&self, record: &PeerRecord) -> Result<PeerIdentity, StoreError> {
        let identity = record.identity();
        self.records.insert(identity, record.to_bytes()?);
        Ok(identity)
    }

    fn load_all(&self) -> Result<Vec<PeerRecord>, StoreError> {
        let mut records = self
            .records
            .iter()
            .map(|entry| {
                PeerRecord::from_bytes(entry.value().clone()).map_err(|source| {
                    StoreError::Corrupted {
                        identity: *entry.key(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        records.sort_by_key(|record| record.identity());

        Ok(records)
    }
}
