//! Transport error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while establishing a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The host name did not resolve to any address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// TCP or TLS setup did not finish in time.
    #[error("connection to {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: String,
        timeout: Duration,
    },

    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The host cannot be used as a TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// TLS settings could not be turned into a client configuration.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] TlsConfigError),

    /// The server certificate was rejected.
    #[error("TLS certificate verification failed: {0}")]
    TlsVerification(#[source] rustls::Error),
}

impl ConnectError {
    /// Errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectError::InvalidServerName(_)
                | ConnectError::TlsConfig(_)
                | ConnectError::TlsVerification(_)
        )
    }

    /// Classify an error returned by the TLS handshake.
    pub(crate) fn from_handshake(err: io::Error) -> Self {
        let rejected = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .filter(|inner| {
                matches!(
                    inner,
                    rustls::Error::InvalidCertificate(_)
                        | rustls::Error::InvalidCertRevocationList(_)
                )
            })
            .cloned();
        match rejected {
            Some(inner) => ConnectError::TlsVerification(inner),
            None => ConnectError::Io(err),
        }
    }
}

/// Problems building the TLS client configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("certificate verifier: {0}")]
    Verifier(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
