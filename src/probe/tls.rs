//! The pinned TLS client and handshake-state extraction.
//!
//! The ClientHello is constrained so the handshake itself filters
//! endpoints: ALPN offers `h2` first and the only key-exchange group
//! offered is X25519. Certificate verification is disabled; the chain is
//! inspected, not authenticated.

use anyhow::{anyhow, Context};
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme, ALL_VERSIONS,
};
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

/// The single key-exchange group offered; a completed handshake implies it.
const PINNED_GROUP: &str = "X25519";

/// What the classifier needs out of a completed handshake.
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    pub tls_version: String,
    pub alpn: String,
    pub curve: String,
    pub cert_domain: String,
    pub cert_issuer: String,
}

/// Certificate verifier that accepts every chain. The scan enumerates
/// candidate fronts; it does not authenticate them.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

fn tls_connector() -> anyhow::Result<&'static TlsConnector> {
    static CONNECTOR: OnceLock<anyhow::Result<TlsConnector>> = OnceLock::new();

    CONNECTOR
        .get_or_init(|| {
            let provider = CryptoProvider {
                kx_groups: vec![ring::kx_group::X25519],
                ..ring::default_provider()
            };
            let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
                .with_protocol_versions(ALL_VERSIONS)
                .map_err(|err| anyhow!("unsupported protocol versions: {err}"))?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth();
            config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
            Ok(TlsConnector::from(Arc::new(config)))
        })
        .as_ref()
        .map_err(|err| anyhow!("failed to build TLS connector: {err}"))
}

/// Runs the constrained handshake over an established TCP stream and
/// extracts the negotiated state. SNI carries the origin domain when there
/// is one; probes of bare IPs send no server name.
pub async fn handshake(
    stream: TcpStream,
    ip: IpAddr,
    sni: Option<&str>,
) -> anyhow::Result<HandshakeInfo> {
    let connector = tls_connector()?;
    let server_name = match sni {
        Some(host) => ServerName::try_from(host.to_string())
            .with_context(|| format!("invalid server name {host}"))?,
        None => ServerName::IpAddress(ip.into()),
    };

    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .context("handshake rejected")?;

    Ok(extract_info(&tls_stream))
}

fn extract_info(stream: &TlsStream<TcpStream>) -> HandshakeInfo {
    let (_, session) = stream.get_ref();

    let mut info = HandshakeInfo {
        tls_version: session
            .protocol_version()
            .map(version_label)
            .unwrap_or_else(|| "Unknown(0x0000)".to_string()),
        alpn: session
            .alpn_protocol()
            .map(|proto| String::from_utf8_lossy(proto).into_owned())
            .unwrap_or_default(),
        curve: session
            .negotiated_key_exchange_group()
            .map(|group| format!("{:?}", group.name()))
            .unwrap_or_else(|| PINNED_GROUP.to_string()),
        ..HandshakeInfo::default()
    };

    if let Some(certs) = session.peer_certificates() {
        if let Some(leaf) = certs.first() {
            let (domain, issuer) = extract_cert_fields(leaf.as_ref());
            info.cert_domain = domain;
            info.cert_issuer = issuer;
        }
    }

    info
}

/// Canonical protocol-version label.
pub fn version_label(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_0 => "TLS 1.0".to_string(),
        ProtocolVersion::TLSv1_1 => "TLS 1.1".to_string(),
        ProtocolVersion::TLSv1_2 => "TLS 1.2".to_string(),
        ProtocolVersion::TLSv1_3 => "TLS 1.3".to_string(),
        other => format!("Unknown(0x{:04x})", u16::from(other)),
    }
}

/// Pulls (certificate domain, issuer) out of a DER-encoded leaf: the DNS
/// SANs joined with commas, else the subject CN; the issuer CN, else the
/// first issuer organization. Unparseable certificates yield empty fields.
fn extract_cert_fields(der: &[u8]) -> (String, String) {
    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        return (String::new(), String::new());
    };

    let sans: Vec<&str> = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(*dns),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let domain = if sans.is_empty() {
        first_attribute(cert.subject().iter_common_name())
    } else {
        sans.join(",")
    };

    let mut issuer = first_attribute(cert.issuer().iter_common_name());
    if issuer.is_empty() {
        issuer = first_attribute(cert.issuer().iter_organization());
    }

    (domain, issuer)
}

fn first_attribute<'a>(
    mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'a>>,
) -> String {
    attrs
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
        .unwrap_or_default()
}
