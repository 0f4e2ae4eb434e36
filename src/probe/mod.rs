pub mod cdn;
pub mod ping;
mod tls;

pub use tls::version_label;

use crate::model::{Config, ProbeResult, Target, TargetAddress};
use anyhow::{bail, Context};
use std::net::IpAddr;
use std::time::Instant;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// Probes one target. A domain target fans out into one result per resolved
/// address; a resolution failure produces a single `dns failure` result.
pub async fn probe_target(target: &Target, cfg: &Config) -> Vec<ProbeResult> {
    match &target.address {
        TargetAddress::Ip(ip) => vec![probe_ip(*ip, None, &target.origin, cfg).await],
        TargetAddress::Domain(name) => {
            let ips = match resolve_domain(name, cfg.port, cfg.ipv6).await {
                Ok(ips) => ips,
                Err(err) => {
                    return vec![ProbeResult::failure(
                        "",
                        &target.origin,
                        cfg.port,
                        format!("dns failure: {err}"),
                    )]
                }
            };
            let mut results = Vec::with_capacity(ips.len());
            for ip in ips {
                results.push(probe_ip(ip, Some(name), &target.origin, cfg).await);
            }
            results
        }
    }
}

/// Resolves a name to probe addresses, IPv4-only unless IPv6 is enabled.
async fn resolve_domain(name: &str, port: u16, ipv6: bool) -> anyhow::Result<Vec<IpAddr>> {
    let addrs = lookup_host((name, port))
        .await
        .with_context(|| format!("cannot resolve {name}"))?;
    let ips: Vec<IpAddr> = addrs
        .map(|addr| addr.ip())
        .filter(|ip| ipv6 || ip.is_ipv4())
        .collect();
    if ips.is_empty() {
        bail!("no usable addresses for {name}");
    }
    Ok(ips)
}

/// One probe: TCP dial, pinned TLS handshake, state extraction. Both the
/// dial and the handshake run under the per-probe deadline; the response
/// time spans dial start to handshake completion.
async fn probe_ip(ip: IpAddr, sni: Option<&str>, origin: &str, cfg: &Config) -> ProbeResult {
    let start = Instant::now();
    let mut result = ProbeResult::skeleton(ip.to_string(), origin, cfg.port);

    let stream = match timeout(cfg.timeout, TcpStream::connect((ip, cfg.port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            result.error = format!("tcp connect: {err}");
            return result;
        }
        Err(_) => {
            result.error = format!("tcp connect: timed out after {:?}", cfg.timeout);
            return result;
        }
    };

    let info = match timeout(cfg.timeout, tls::handshake(stream, ip, sni)).await {
        Ok(Ok(info)) => info,
        Ok(Err(err)) => {
            result.error = format!("tls handshake: {err:#}");
            return result;
        }
        Err(_) => {
            result.error = format!("tls handshake: timed out after {:?}", cfg.timeout);
            return result;
        }
    };

    result.response_time_ms = start.elapsed().as_millis() as u64;
    result.tls_version = info.tls_version;
    result.alpn = info.alpn;
    result.curve = info.curve;
    result.cert_domain = info.cert_domain;
    result.cert_issuer = info.cert_issuer;
    result
}
