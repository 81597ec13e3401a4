//! Binary encoding of node metadata, batches of records and signed peer lists.
//!
//! ```text
//! timestamp            u32 BE
//! interface_signature  [u8; 64]
//! evidence_flag        u8 (0 = absent, 1 = present)
//! evidence             [u8; 65] if present
//! signing_key          [u8; 32]
//! encrypting_key       u16 BE length || bytes
//! canonical_address    [u8; 20]
//! certificate          u32 BE length || bytes
//! rest_host            u16 BE length || UTF-8
//! rest_port            u16 BE
//! ```
//!
//! A batch is a sequence of `u32 BE length || record`, and a signed peer list
//! is `teacher_signature || batch`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use fleetlearn_peer::{PeerIdentity, IDENTITY_LENGTH};
use fleetlearn_signing::{
    IdentityEvidence, InterfaceSignature, Signer, SigningPublicKey, EVIDENCE_LENGTH,
    PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};

use crate::record::{NodeMetadata, PeerRecord, RestInterface};

const EVIDENCE_ABSENT: u8 = 0;
const EVIDENCE_PRESENT: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated {field}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{field} is too long to encode ({len} bytes)")]
    TooLong { field: &'static str, len: usize },

    #[error("invalid identity evidence flag {0}")]
    InvalidEvidenceFlag(u8),

    #[error("rest host is not valid UTF-8")]
    InvalidHost,

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    #[error("record of {0} has no interface signature")]
    MissingSignature(PeerIdentity),
}

pub(crate) fn encode_metadata(meta: &NodeMetadata, buf: &mut BytesMut) -> Result<(), CodecError> {
    let signature = meta
        .interface_signature
        .ok_or(CodecError::MissingSignature(meta.identity))?;

    let encrypting_key_len = length::<u16>("encrypting key", meta.encrypting_key.len())?;
    let certificate_len = length::<u32>("certificate", meta.certificate.len())?;
    let host_len = length::<u16>("rest host", meta.rest.host.len())?;

    buf.put_u32(meta.timestamp);
    buf.put_slice(signature.as_bytes());

    match &meta.evidence {
        Some(evidence) => {
            buf.put_u8(EVIDENCE_PRESENT);
            buf.put_slice(evidence.as_bytes());
        }
        None => buf.put_u8(EVIDENCE_ABSENT),
    }

    buf.put_slice(meta.signing_key.as_bytes());
    buf.put_u16(encrypting_key_len);
    buf.put_slice(&meta.encrypting_key);
    buf.put_slice(meta.identity.as_bytes());
    buf.put_u32(certificate_len);
    buf.put_slice(&meta.certificate);
    buf.put_u16(host_len);
    buf.put_slice(meta.rest.host.as_bytes());
    buf.put_u16(meta.rest.port);

    Ok(())
}

pub(crate) fn decode_metadata(buf: &mut Bytes) -> Result<NodeMetadata, CodecError> {
    let timestamp = get_u32(buf, "timestamp")?;
    let signature = InterfaceSignature::from_bytes(get_array(buf, "interface signature")?);

    let evidence = match get_u8(buf, "evidence flag")? {
        EVIDENCE_ABSENT => None,
        EVIDENCE_PRESENT => Some(IdentityEvidence::from_bytes(get_array::<EVIDENCE_LENGTH>(
            buf, "evidence",
        )?)),
        flag => return Err(CodecError::InvalidEvidenceFlag(flag)),
    };

    let signing_key = SigningPublicKey::from_bytes(get_array::<PUBLIC_KEY_LENGTH>(buf, "signing key")?);

    let len = get_u16(buf, "encrypting key length")? as usize;
    let encrypting_key = get_bytes(buf, "encrypting key", len)?;

    let identity = PeerIdentity::from_bytes(get_array::<IDENTITY_LENGTH>(buf, "canonical address")?);

    let len = get_u32(buf, "certificate length")? as usize;
    let certificate = get_bytes(buf, "certificate", len)?;

    let len = get_u16(buf, "rest host length")? as usize;
    let host = get_bytes(buf, "rest host", len)?;
    let host = String::from_utf8(host.to_vec()).map_err(|_| CodecError::InvalidHost)?;
    let port = get_u16(buf, "rest port")?;

    Ok(NodeMetadata {
        timestamp,
        interface_signature: Some(signature),
        evidence,
        signing_key,
        encrypting_key,
        identity,
        certificate,
        rest: RestInterface { host, port },
    })
}

pub(crate) fn decode_metadata_exact(mut bytes: Bytes) -> Result<NodeMetadata, CodecError> {
    let metadata = decode_metadata(&mut bytes)?;

    if bytes.has_remaining() {
        return Err(CodecError::TrailingBytes(bytes.remaining()));
    }

    Ok(metadata)
}

/// Encode records as a batch of length-prefixed records.
pub fn encode_batch<'a>(
    records: impl IntoIterator<Item = &'a PeerRecord>,
) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();

    for record in records {
        let bytes = record.to_bytes()?;
        buf.put_u32(length::<u32>("record", bytes.len())?);
        buf.put_slice(&bytes);
    }

    Ok(buf.freeze())
}

/// Decode a batch into stranger records.
pub fn decode_batch(mut bytes: Bytes) -> Result<Vec<PeerRecord>, CodecError> {
    let mut records = Vec::new();

    while bytes.has_remaining() {
        let len = get_u32(&mut bytes, "record length")? as usize;
        let record = get_bytes(&mut bytes, "record", len)?;
        records.push(PeerRecord::from_bytes(record)?);
    }

    Ok(records)
}

/// Prefix a batch with the teacher's signature over it.
pub fn sign_peer_list(signer: &dyn Signer, batch: Bytes) -> Bytes {
    let signature = signer.sign(&batch);

    let mut buf = BytesMut::with_capacity(SIGNATURE_LENGTH + batch.len());
    buf.put_slice(signature.as_bytes());
    buf.put_slice(&batch);
    buf.freeze()
}

/// Split a signed peer list into the teacher's signature and the batch it covers.
pub fn split_signed_peer_list(mut bytes: Bytes) -> Result<(InterfaceSignature, Bytes), CodecError> {
    let signature = InterfaceSignature::from_bytes(get_array(&mut bytes, "peer list signature")?);
    Ok((signature, bytes))
}

fn length<T: TryFrom<usize>>(field: &'static str, len: usize) -> Result<T, CodecError> {
    T::try_from(len).map_err(|_| CodecError::TooLong { field, len })
}

fn ensure(buf: &Bytes, field: &'static str, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }

    Ok(())
}

fn get_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, CodecError> {
    ensure(buf, field, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes, field: &'static str) -> Result<u16, CodecError> {
    ensure(buf, field, 2)?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes, field: &'static str) -> Result<u32, CodecError> {
    ensure(buf, field, 4)?;
    Ok(buf.get_u32())
}

fn get_array<const N: usize>(buf: &mut Bytes, field: &'static str) -> Result<[u8; N], CodecError> {
    ensure(buf, field, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_bytes(buf: &mut Bytes, field: &'static str, len: usize) -> Result<Bytes, CodecError> {
    ensure(buf, field, len)?;
    Ok(buf.split_to(len))
}
