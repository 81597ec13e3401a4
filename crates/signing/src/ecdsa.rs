use core::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use fleetlearn_peer::PeerIdentity;

use crate::{keccak_digest, SigningError};

/// `r || s || v`
pub const EVIDENCE_LENGTH: usize = 65;

/// Offset added to the recovery id in the `v` byte, as wallets do.
const RECOVERY_ID_OFFSET: u8 = 27;

/// Evidence of decentralized identity: a recoverable signature over the stamp
/// made with the key that controls the canonical address.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct IdentityEvidence([u8; EVIDENCE_LENGTH]);

impl IdentityEvidence {
    pub const fn from_bytes(bytes: [u8; EVIDENCE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; EVIDENCE_LENGTH] {
        &self.0
    }

    /// Recover the identity that signed `stamp`.
    pub fn recover(&self, stamp: &[u8]) -> Result<PeerIdentity, SigningError> {
        let signature = Signature::from_slice(&self.0[..64])
            .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;

        let v = self.0[64];
        let v = v.checked_sub(RECOVERY_ID_OFFSET).unwrap_or(v);
        let recovery_id = RecoveryId::from_byte(v)
            .ok_or_else(|| SigningError::MalformedSignature(format!("bad recovery byte {v}")))?;

        let prehash = keccak_digest(stamp);
        let key = VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
            .map_err(|e| SigningError::Unrecoverable(e.to_string()))?;

        identity_of(&key)
    }
}

impl fmt::Debug for IdentityEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityEvidence({}..)", hex::encode(&self.0[..8]))
    }
}

/// Secret key controlling a canonical address.
#[derive(Clone)]
pub struct IdentityKey {
    key: SigningKey,
}

impl IdentityKey {
    pub fn from_secret(secret: &[u8]) -> Result<Self, SigningError> {
        let key =
            SigningKey::from_slice(secret).map_err(|e| SigningError::MalformedKey(e.to_string()))?;

        Ok(Self { key })
    }

    #[cfg(feature = "rand")]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        // A valid signing key always yields a valid uncompressed point.
        identity_of(self.key.verifying_key()).unwrap_or_else(|_| unreachable!())
    }

    /// Produce evidence that this key controls the identity owning `stamp`.
    pub fn sign_stamp(&self, stamp: &[u8]) -> Result<IdentityEvidence, SigningError> {
        let prehash = keccak_digest(stamp);

        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;

        let mut bytes = [0u8; EVIDENCE_LENGTH];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte() + RECOVERY_ID_OFFSET;

        Ok(IdentityEvidence(bytes))
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

fn identity_of(key: &VerifyingKey) -> Result<PeerIdentity, SigningError> {
    let point = key.to_encoded_point(false);
    PeerIdentity::from_public_key(point.as_bytes())
        .map_err(|e| SigningError::MalformedKey(e.to_string()))
}
