use core::fmt;

use ed25519_consensus::{Signature, SigningKey, VerificationKey};

use crate::{Signer, SigningError};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

/// Public half of a node's stamp.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SigningPublicKey([u8; PUBLIC_KEY_LENGTH]);

impl SigningPublicKey {
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn verify(&self, message: &[u8], signature: &InterfaceSignature) -> Result<(), SigningError> {
        let key = VerificationKey::try_from(self.0)
            .map_err(|e| SigningError::MalformedKey(e.to_string()))?;

        key.verify(&Signature::from(signature.0), message)
            .map_err(|_| SigningError::InvalidSignature)
    }
}

impl fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningPublicKey({})", hex::encode(self.0))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceSignature([u8; SIGNATURE_LENGTH]);

impl InterfaceSignature {
    pub const fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for InterfaceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceSignature({}..)", hex::encode(&self.0[..8]))
    }
}

/// In-process stamp backed by an Ed25519 secret key.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from(secret),
        }
    }

    #[cfg(feature = "rand")]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::new(rand::rngs::OsRng),
        }
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> SigningPublicKey {
        SigningPublicKey(self.key.verification_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> InterfaceSignature {
        InterfaceSignature(self.key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
