use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// A concrete probe subject produced by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: TargetAddress,
    /// The user-supplied string this target came from, preserved verbatim.
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Ip(IpAddr),
    Domain(String),
}

impl Target {
    pub fn ip(ip: IpAddr, origin: impl Into<String>) -> Self {
        Target {
            address: TargetAddress::Ip(ip),
            origin: origin.into(),
        }
    }

    pub fn domain(name: impl Into<String>, origin: impl Into<String>) -> Self {
        Target {
            address: TargetAddress::Domain(name.into()),
            origin: origin.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub workers: usize,
    pub timeout: Duration,
    pub ipv6: bool,
    /// Feasible-match quota; 0 means unlimited.
    pub max_matches: usize,
    pub stop_on_quota: bool,
    pub ping: bool,
    pub verbose: bool,
    pub output: PathBuf,
    pub geo_db: Option<PathBuf>,
    pub export: Option<PathBuf>,
}

/// Outcome of one TCP+TLS probe against a single endpoint.
///
/// Exactly one of `error` or the handshake fields is populated; `feasible`
/// implies an empty `error`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeResult {
    pub ip: String,
    pub origin: String,
    pub port: u16,
    /// Leaf certificate DNS names joined with commas, or the subject CN.
    pub cert_domain: String,
    pub cert_issuer: String,
    pub tls_version: String,
    pub alpn: String,
    pub curve: String,
    pub geo_code: String,
    pub feasible: bool,
    pub response_time_ms: u64,
    pub error: String,
}

impl ProbeResult {
    pub fn skeleton(ip: String, origin: &str, port: u16) -> Self {
        ProbeResult {
            ip,
            origin: origin.to_string(),
            port,
            ..ProbeResult::default()
        }
    }

    pub fn failure(ip: &str, origin: &str, port: u16, error: String) -> Self {
        ProbeResult {
            ip: ip.to_string(),
            origin: origin.to_string(),
            port,
            error,
            ..ProbeResult::default()
        }
    }
}

/// Final counters reported when a scan terminates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    pub total: usize,
    pub feasible: usize,
    pub errors: usize,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_results_carry_no_handshake_state() {
        let result =
            ProbeResult::failure("", "example.com", 443, "dns failure: no addresses".into());
        assert!(result.error.starts_with("dns failure"));
        assert!(!result.feasible);
        assert!(result.tls_version.is_empty());
        assert!(result.cert_domain.is_empty());
    }

    #[test]
    fn origin_is_preserved() {
        let target = Target::ip("10.0.0.1".parse().unwrap(), "10.0.0.0/30");
        assert_eq!(target.origin, "10.0.0.0/30");
    }
}
