//! Server errors.

use crate::config::ConfigError;
use clientevent_transport::{TlsError, TransportError};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration snapshot is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// TLS is enabled but the key store file does not exist.
    #[error("Key store not found: {}", .0.display())]
    KeyStoreNotFound(PathBuf),

    /// The key store could not be turned into a TLS configuration.
    #[error("TLS configuration failed: {0}")]
    TlsConfig(#[source] TlsError),

    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address the server tried to bind.
        addr: SocketAddr,
        #[source]
        source: TransportError,
    },
}

impl From<TlsError> for ServerError {
    fn from(e: TlsError) -> Self {
        match e {
            TlsError::KeyStoreNotFound(path) => ServerError::KeyStoreNotFound(path),
            other => ServerError::TlsConfig(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_store_maps_to_dedicated_variant() {
        let err = ServerError::from(TlsError::KeyStoreNotFound(PathBuf::from("ks.pem")));
        assert!(matches!(err, ServerError::KeyStoreNotFound(path) if path == PathBuf::from("ks.pem")));
    }

    #[test]
    fn test_invalid_key_store_maps_to_tls_config() {
        let err = ServerError::from(TlsError::InvalidKeyStore("no private key found".into()));
        assert!(matches!(err, ServerError::TlsConfig(_)));
        assert!(err.to_string().contains("no private key found"));
    }
}
