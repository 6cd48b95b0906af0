//! Raw TLS certificate inspection. The handshake deliberately accepts any
//! certificate: the goal is to read expiry facts off the leaf, not to vouch
//! for the chain. Probe-level TLS failures are classified elsewhere.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::warn;
use x509_parser::prelude::*;

/// Days before expiry at which a certificate counts as expiring soon.
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Facts read off the presented leaf certificate. `valid` means the leaf
/// was captured and parsed, nothing more; an expired certificate still
/// reads as valid here and is classified downstream by its expiry. Failed
/// inspections report `valid: false` with no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateInfo {
    pub valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CertificateInfo {
    fn invalid() -> Self {
        Self {
            valid: false,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SslStatus {
    Valid,
    ExpiringSoon,
    Expired,
    Invalid,
}

/// Downstream classification of a recorded certificate observation.
pub fn classify_expiry(
    valid: bool,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SslStatus {
    if !valid {
        return SslStatus::Invalid;
    }
    match expires_at {
        Some(expires_at) if expires_at <= now => SslStatus::Expired,
        Some(expires_at) if expires_at <= now + chrono::Duration::days(EXPIRY_WARNING_DAYS) => {
            SslStatus::ExpiringSoon
        }
        _ => SslStatus::Valid,
    }
}

#[derive(Error, Debug)]
enum TlsInspectError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("url has no host")]
    MissingHost,
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("tls configuration: {0}")]
    Config(#[from] rustls::Error),
    #[error("connect: {0}")]
    Connect(#[from] std::io::Error),
    #[error("peer presented no certificate")]
    NoCertificate,
    #[error("certificate parse: {0}")]
    Parse(String),
}

/// Connects to the url's host, reads the leaf certificate and reports its
/// validity window. Every failure mode collapses into `valid: false`; the
/// caller only ever records facts, never an inspection error.
pub async fn inspect_certificate(url: &str, timeout: Duration) -> CertificateInfo {
    match tokio::time::timeout(timeout, try_inspect(url)).await {
        Ok(Ok(info)) => info,
        Ok(Err(err)) => {
            warn!(url, error = %err, "certificate inspection failed");
            CertificateInfo::invalid()
        }
        Err(_) => {
            warn!(url, "certificate inspection timed out");
            CertificateInfo::invalid()
        }
    }
}

async fn try_inspect(url: &str) -> Result<CertificateInfo, TlsInspectError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|err| TlsInspectError::InvalidUrl(err.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or(TlsInspectError::MissingHost)?
        .to_string();
    let port = parsed.port().unwrap_or(443);

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.clone())
        .map_err(|err| TlsInspectError::InvalidServerName(err.to_string()))?;

    let tcp = TcpStream::connect((host.as_str(), port)).await?;
    let stream = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await?;

    let (_, session) = stream.get_ref();
    let leaf = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or(TlsInspectError::NoCertificate)?;

    let (_, certificate) = parse_x509_certificate(leaf.as_ref())
        .map_err(|err| TlsInspectError::Parse(err.to_string()))?;
    let not_after = certificate.validity().not_after.timestamp();

    Ok(CertificateInfo {
        valid: true,
        expires_at: Utc.timestamp_opt(not_after, 0).single(),
    })
}

/// Verifier that waves every certificate through. Inspection wants the
/// certificate bytes even when the chain would never verify.
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
