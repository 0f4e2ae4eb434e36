//! ICMP reachability check for candidate front domains.

use crate::addr;
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::Command;

const PACKET_COUNT: &str = "3";
const PACKET_TIMEOUT_SECS: &str = "5";

/// True when the domain answers an ICMP echo. The check is a domain
/// liveness signal: empty input, bare IPs, and grammar failures are all
/// false without touching the network.
pub async fn ping_ok(domain: &str) -> bool {
    if domain.is_empty() || domain.parse::<IpAddr>().is_ok() {
        return false;
    }
    if !addr::is_valid_domain(domain) {
        return false;
    }

    let status = Command::new("ping")
        .args(["-c", PACKET_COUNT, "-W", PACKET_TIMEOUT_SECS])
        .arg(domain)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    matches!(status, Ok(code) if code.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_domain_input_without_pinging() {
        assert!(!ping_ok("").await);
        assert!(!ping_ok("192.0.2.1").await);
        assert!(!ping_ok("2001:db8::1").await);
        assert!(!ping_ok("not a domain").await);
        assert!(!ping_ok("-bad.example.com").await);
    }
}
