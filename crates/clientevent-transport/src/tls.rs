//! TLS key material.
//!
//! A key store is a PEM file holding the server certificate chain followed
//! by its private key. Relative paths are resolved against the process
//! working directory.

use rustls::pki_types::CertificateDer;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// TLS configuration errors.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The key store file does not exist.
    #[error("Key store not found: {}", .0.display())]
    KeyStoreNotFound(PathBuf),

    /// The key store exists but could not be read.
    #[error("Failed to read key store {}: {source}", path.display())]
    KeyStoreRead {
        /// Resolved key store path.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key store contents are not usable.
    #[error("Invalid key store: {0}")]
    InvalidKeyStore(String),
}

/// Source of key-store bytes.
pub trait KeyStoreLoader: Send + Sync {
    /// Read the key store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::KeyStoreNotFound`] if the file is absent.
    fn load(&self, path: &Path) -> Result<Vec<u8>, TlsError>;
}

/// Loads key stores from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsKeyStoreLoader {
    base_dir: Option<PathBuf>,
}

impl FsKeyStoreLoader {
    /// Resolve relative paths against the current working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `dir` instead of the working directory.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        Ok(base.join(path))
    }
}

impl KeyStoreLoader for FsKeyStoreLoader {
    fn load(&self, path: &Path) -> Result<Vec<u8>, TlsError> {
        let resolved = self.resolve(path).map_err(|source| TlsError::KeyStoreRead {
            path: path.to_path_buf(),
            source,
        })?;

        match std::fs::read(&resolved) {
            Ok(bytes) => {
                debug!(path = %resolved.display(), bytes = bytes.len(), "Loaded key store");
                Ok(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TlsError::KeyStoreNotFound(resolved))
            }
            Err(source) => Err(TlsError::KeyStoreRead {
                path: resolved,
                source,
            }),
        }
    }
}

/// Build a rustls server configuration from a PEM key store.
///
/// # Errors
///
/// Returns [`TlsError::InvalidKeyStore`] if the PEM holds no certificate, no
/// usable private key, or a key rustls rejects.
pub fn server_config_from_pem(pem: &[u8]) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::InvalidKeyStore(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(TlsError::InvalidKeyStore("no certificates found".into()));
    }

    let key = rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::InvalidKeyStore(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| {
            let encrypted = pem
                .windows(b"ENCRYPTED PRIVATE KEY".len())
                .any(|w| w == b"ENCRYPTED PRIVATE KEY");
            if encrypted {
                TlsError::InvalidKeyStore("encrypted private keys are not supported".into())
            } else {
                TlsError::InvalidKeyStore("no private key found".into())
            }
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::InvalidKeyStore(format!("invalid TLS config: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::InvalidKeyStore(format!("invalid TLS config: {e}")))?;

    Ok(Arc::new(config))
}

/// Load a key store and build a TLS acceptor from it.
///
/// # Errors
///
/// Returns the loader's error, or [`TlsError::InvalidKeyStore`].
pub fn load_acceptor(loader: &dyn KeyStoreLoader, path: &Path) -> Result<TlsAcceptor, TlsError> {
    let pem = loader.load(path)?;
    let config = server_config_from_pem(&pem)?;
    Ok(TlsAcceptor::from(config))
}
