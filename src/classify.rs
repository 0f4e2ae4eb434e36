//! The feasibility verdict: does a completed handshake look like a usable
//! stealth-proxy front?

use crate::model::ProbeResult;
use crate::probe::{cdn, ping};

pub const REQUIRED_TLS_VERSION: &str = "TLS 1.3";
pub const REQUIRED_ALPN: &str = "h2";
pub const REQUIRED_CURVE: &str = "X25519";

/// The cheap, purely local prefix of the feasibility chain, in
/// short-circuit order: TLS 1.3, ALPN h2, X25519, a certificate domain
/// that passes the front-candidate gate, and a non-empty issuer.
pub fn meets_protocol_pins(result: &ProbeResult) -> bool {
    if result.tls_version != REQUIRED_TLS_VERSION {
        return false;
    }
    if result.alpn != REQUIRED_ALPN {
        return false;
    }
    if result.curve != REQUIRED_CURVE {
        return false;
    }
    if result.cert_domain.is_empty() {
        return false;
    }
    if !is_front_candidate(&result.cert_domain) {
        return false;
    }
    if result.cert_issuer.is_empty() {
        return false;
    }
    true
}

/// Quality gate for the certificate domain. Any non-empty domain passes
/// today; kept as its own hook so a stricter rule (popularity ranking,
/// blocklists) can land without touching callers.
fn is_front_candidate(cert_domain: &str) -> bool {
    !cert_domain.is_empty()
}

/// Full verdict. The live-I/O tail (Cloudflare probe, optional ping) only
/// runs once every local check has passed.
pub async fn is_feasible(result: &ProbeResult, ping_enabled: bool) -> bool {
    if !result.error.is_empty() {
        return false;
    }
    if !meets_protocol_pins(result) {
        return false;
    }

    let san = first_san(&result.cert_domain);
    if cdn::is_cloudflare(san).await {
        return false;
    }
    if ping_enabled && !ping::ping_ok(san).await {
        return false;
    }
    true
}

fn first_san(cert_domain: &str) -> &str {
    cert_domain.split(',').next().unwrap_or_default()
}
