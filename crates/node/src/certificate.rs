use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use fleetlearn_peer::PeerIdentity;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("cannot write certificate to {path}: {reason}", path = .path.display())]
    Io { path: PathBuf, reason: String },
}

/// Where the certificate of `identity` is pinned.
pub fn certificate_path(dir: &Path, identity: &PeerIdentity) -> PathBuf {
    dir.join(format!("{}.pem", identity.to_checksum_address()))
}

/// Where the certificate of a seed node of unknown identity is pinned.
pub fn seed_certificate_path(dir: &Path, host: &str) -> PathBuf {
    dir.join(format!("{host}.pem"))
}

/// Where the certificate meant for `path` is kept while its node is being verified.
/// Certificates of unverified nodes never land at their final path.
pub fn pending_certificate_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => dir.join("pending").join(name),
        _ => path.with_extension("pending"),
    }
}

/// Persistence of peer certificates for later TLS pinning.
pub trait CertificateSink: Send + Sync {
    /// Write `certificate` to `path`. An existing file is only replaced if
    /// `force` is set.
    fn write(&self, certificate: &[u8], path: &Path, force: bool) -> Result<(), CertificateError>;

    /// Remove the certificate at `path`, if any.
    fn discard(&self, path: &Path) -> Result<(), CertificateError>;
}

/// Certificate sink writing to the local filesystem.
#[derive(Copy, Clone, Debug, Default)]
pub struct FsCertificateSink;

impl CertificateSink for FsCertificateSink {
    fn write(&self, certificate: &[u8], path: &Path, force: bool) -> Result<(), CertificateError> {
        let io_error = |e: std::io::Error| CertificateError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if !force && path.exists() {
            debug!(path = %path.display(), "Certificate already pinned");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        fs::write(path, certificate).map_err(io_error)
    }

    fn discard(&self, path: &Path) -> Result<(), CertificateError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CertificateError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
}
