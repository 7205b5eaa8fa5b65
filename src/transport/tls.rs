//! TLS client configuration.
//!
//! Only TLS 1.2 and 1.3 are offered; rustls has no compression and session
//! resumption is turned off. With verification on, the chain is checked
//! against the platform roots plus any configured CA files, revocation lists
//! are honoured, and the hostname is matched by the handshake. With it off,
//! any certificate is accepted but handshake signatures are still checked.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, ServerName, UnixTime,
};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::warn;

use super::error::TlsConfigError;
use crate::config::TlsOptions;

/// Build a rustls client configuration from [`TlsOptions`].
pub fn client_config(options: &TlsOptions) -> Result<Arc<ClientConfig>, TlsConfigError> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?;

    let builder = if options.verify {
        let roots = root_store(options)?;
        let mut crls = Vec::new();
        for path in &options.crl_files {
            crls.extend(load_crls(path)?);
        }
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .with_crls(crls)
            .build()
            .map_err(|e| TlsConfigError::Verifier(e.to_string()))?;
        builder.with_webpki_verifier(verifier)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
    };

    let mut config = match &options.client_cert {
        Some(cert_path) => {
            let chain = load_certs(cert_path)?;
            let key_path = options.client_key.as_deref().unwrap_or(cert_path);
            let key = load_key(key_path)?;
            builder.with_client_auth_cert(chain, key)?
        }
        None => builder.with_no_client_auth(),
    };
    config.resumption = Resumption::disabled();
    Ok(Arc::new(config))
}

fn root_store(options: &TlsOptions) -> Result<RootCertStore, TlsConfigError> {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (_, ignored) = roots.add_parsable_certificates(certs);
            if ignored > 0 {
                warn!(ignored, "skipped unparsable platform certificates");
            }
        }
        Err(e) => warn!("could not load platform certificates: {}", e),
    }
    for path in &options.ca_files {
        roots.add_parsable_certificates(load_certs(path)?);
    }
    Ok(roots)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsConfigError::Read {
            path: path.to_owned(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<_, _>>()
        .map_err(|source| TlsConfigError::Read {
            path: path.to_owned(),
            source,
        })
}

fn load_crls(path: &Path) -> Result<Vec<CertificateRevocationListDer<'static>>, TlsConfigError> {
    rustls_pemfile::crls(&mut open(path)?)
        .collect::<Result<_, _>>()
        .map_err(|source| TlsConfigError::Read {
            path: path.to_owned(),
            source,
        })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsConfigError::Read {
            path: path.to_owned(),
            source,
        })?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(path.to_owned()))
}

/// Accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unverified_config_builds() {
        let options = TlsOptions {
            verify: false,
            ..TlsOptions::default()
        };
        let config = client_config(&options).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_missing_client_cert_is_config_error() {
        let options = TlsOptions {
            verify: false,
            client_cert: Some("/nonexistent/client.pem".into()),
            ..TlsOptions::default()
        };
        assert!(matches!(
            client_config(&options),
            Err(TlsConfigError::Read { .. })
        ));
    }
}
