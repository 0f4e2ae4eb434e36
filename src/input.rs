use crate::addr::{self, Direction};
use crate::model::{Target, TargetAddress};
use anyhow::{bail, Context};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// Most addresses a single CIDR expansion will emit.
pub const CIDR_HOST_CAP: usize = 65_536;

const CHANNEL_DEPTH: usize = 100;

/// Where the scan's targets come from: one spec string or a file of them.
#[derive(Debug, Clone)]
pub enum TargetSource {
    Spec(String),
    File(PathBuf),
}

/// One parsed target specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    Ip(IpAddr),
    Cidr(IpNetwork),
    Domain(String),
}

/// Classifies a spec string as an IP literal, a CIDR block, or a domain,
/// in that order.
pub fn parse_host(input: &str) -> anyhow::Result<HostSpec> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("unparseable host: empty input");
    }
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(HostSpec::Ip(ip));
    }
    if trimmed.contains('/') {
        if let Ok(net) = trimmed.parse::<IpNetwork>() {
            return Ok(HostSpec::Cidr(net));
        }
    }
    if addr::is_valid_domain(trimmed) {
        return Ok(HostSpec::Domain(trimmed.to_string()));
    }
    bail!("unparseable host: {trimmed}")
}

/// Builds the target stream for a scan, plus the expected target count when
/// the stream is finite and known up front.
pub async fn stream_targets(
    source: &TargetSource,
) -> anyhow::Result<(ReceiverStream<Target>, Option<usize>)> {
    match source {
        TargetSource::Spec(spec) => match parse_host(spec)? {
            HostSpec::Ip(ip) => {
                info!(seed = %ip, "expanding outward from seed address");
                Ok((from_seed(ip), None))
            }
            HostSpec::Cidr(net) => {
                let total = cidr_target_count(&net);
                info!(cidr = %spec, hosts = total, "scanning CIDR block");
                Ok((from_cidr(net, spec.clone()), Some(total)))
            }
            HostSpec::Domain(name) => Ok((singleton(Target::domain(name, spec.clone())), Some(1))),
        },
        TargetSource::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open input {}", path.display()))?;
            Ok((from_list(tokio::io::BufReader::new(file)), None))
        }
    }
}

pub fn cidr_target_count(net: &IpNetwork) -> usize {
    let host_bits = match net {
        IpNetwork::V4(n) => 32 - u32::from(n.prefix()),
        IpNetwork::V6(n) => 128 - u32::from(n.prefix()),
    };
    if host_bits > 16 {
        CIDR_HOST_CAP
    } else {
        1usize << host_bits
    }
}

/// Reads target lines, skipping blanks and `#` comments. Unparseable lines
/// are logged and skipped; CIDR lines expand in place.
pub fn from_list<R>(reader: R) -> ReceiverStream<Target>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_host(trimmed) {
                Ok(HostSpec::Ip(ip)) => {
                    if tx.send(Target::ip(ip, trimmed)).await.is_err() {
                        return;
                    }
                }
                Ok(HostSpec::Cidr(net)) => {
                    if !expand_cidr(net, trimmed, &tx).await {
                        return;
                    }
                }
                Ok(HostSpec::Domain(name)) => {
                    if tx.send(Target::domain(name, trimmed)).await.is_err() {
                        return;
                    }
                }
                Err(err) => warn!(line = %trimmed, error = %err, "skipping target line"),
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Expands a CIDR block into per-address targets, ascending from the network
/// address, capped at [`CIDR_HOST_CAP`].
pub fn from_cidr(net: IpNetwork, origin: String) -> ReceiverStream<Target> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        expand_cidr(net, &origin, &tx).await;
    });
    ReceiverStream::new(rx)
}

async fn expand_cidr(net: IpNetwork, origin: &str, tx: &mpsc::Sender<Target>) -> bool {
    let host_bits = match net {
        IpNetwork::V4(n) => 32 - u32::from(n.prefix()),
        IpNetwork::V6(n) => 128 - u32::from(n.prefix()),
    };
    if host_bits > 16 {
        warn!(cidr = %origin, cap = CIDR_HOST_CAP, "cidr too large, scan capped");
    }

    let mut ip = net.network();
    let mut count = 0usize;
    while count < CIDR_HOST_CAP && addr::cidr_contains(&net, ip) {
        if tx.send(Target::ip(ip, origin)).await.is_err() {
            return false;
        }
        ip = addr::next_ip(ip, Direction::Up);
        count += 1;
    }
    true
}

/// Endless outward expansion around a seed address: the seed itself, then
/// alternately one step below and one step above. Unusable addresses are
/// skipped without stalling the cursors; the engine cancels the stream by
/// dropping its receiver.
pub fn from_seed(seed: IpAddr) -> ReceiverStream<Target> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let origin = seed.to_string();
        if tx.send(Target::ip(seed, &origin)).await.is_err() {
            return;
        }
        let mut low = seed;
        let mut high = seed;
        loop {
            low = addr::next_ip(low, Direction::Down);
            if addr::is_usable(low) && tx.send(Target::ip(low, &origin)).await.is_err() {
                return;
            }
            high = addr::next_ip(high, Direction::Up);
            if addr::is_usable(high) && tx.send(Target::ip(high, &origin)).await.is_err() {
                return;
            }
        }
    });
    ReceiverStream::new(rx)
}

fn singleton(target: Target) -> ReceiverStream<Target> {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(target);
    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn parser_prefers_ip_then_cidr_then_domain() {
        assert_eq!(
            parse_host("192.0.2.1").unwrap(),
            HostSpec::Ip("192.0.2.1".parse().unwrap())
        );
        assert_eq!(
            parse_host(" 2001:db8::1 ").unwrap(),
            HostSpec::Ip("2001:db8::1".parse().unwrap())
        );
        assert_eq!(
            parse_host("10.0.0.0/24").unwrap(),
            HostSpec::Cidr("10.0.0.0/24".parse().unwrap())
        );
        assert_eq!(
            parse_host("example.com").unwrap(),
            HostSpec::Domain("example.com".into())
        );
    }

    #[test]
    fn parser_rejects_garbage() {
        for bad in ["", "   ", "not a host", "300.1.2.3.4", "bad_host"] {
            let err = parse_host(bad).unwrap_err();
            assert!(err.to_string().starts_with("unparseable host"), "{bad}");
        }
    }

    #[tokio::test]
    async fn cidr_expansion_is_ascending_and_keeps_origin() {
        let net: IpNetwork = "192.0.2.0/30".parse().unwrap();
        let targets: Vec<Target> = from_cidr(net, "192.0.2.0/30".into()).collect().await;
        let ips: Vec<String> = targets
            .iter()
            .map(|t| match &t.address {
                TargetAddress::Ip(ip) => ip.to_string(),
                TargetAddress::Domain(_) => unreachable!(),
            })
            .collect();
        assert_eq!(ips, ["192.0.2.0", "192.0.2.1", "192.0.2.2", "192.0.2.3"]);
        assert!(targets.iter().all(|t| t.origin == "192.0.2.0/30"));
    }

    #[tokio::test]
    async fn seed_expands_outward_in_alternating_order() {
        let stream = from_seed("192.0.2.50".parse().unwrap());
        let targets: Vec<Target> = stream.take(5).collect().await;
        let ips: Vec<String> = targets
            .iter()
            .map(|t| match &t.address {
                TargetAddress::Ip(ip) => ip.to_string(),
                TargetAddress::Domain(_) => unreachable!(),
            })
            .collect();
        assert_eq!(
            ips,
            ["192.0.2.50", "192.0.2.49", "192.0.2.51", "192.0.2.48", "192.0.2.52"]
        );
        assert!(targets.iter().all(|t| t.origin == "192.0.2.50"));
    }

    #[tokio::test]
    async fn seed_skips_unusable_addresses_without_stalling() {
        // 127.255.255.255 steps down into loopback space, which is filtered;
        // the upward side keeps emitting.
        let stream = from_seed("128.0.0.0".parse().unwrap());
        let targets: Vec<Target> = stream.take(4).collect().await;
        let ips: Vec<String> = targets
            .iter()
            .map(|t| match &t.address {
                TargetAddress::Ip(ip) => ip.to_string(),
                TargetAddress::Domain(_) => unreachable!(),
            })
            .collect();
        assert_eq!(ips, ["128.0.0.0", "128.0.0.1", "128.0.0.2", "128.0.0.3"]);
    }

    #[tokio::test]
    async fn list_skips_comments_and_bad_lines() {
        let data: &[u8] = b"# comment\n\n192.0.2.7\nnot a host\nexample.org\n192.0.2.8/31\n";
        let targets: Vec<Target> = from_list(data).collect().await;
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0], Target::ip("192.0.2.7".parse().unwrap(), "192.0.2.7"));
        assert_eq!(targets[1], Target::domain("example.org", "example.org"));
        assert_eq!(targets[2].origin, "192.0.2.8/31");
        assert_eq!(targets[3].origin, "192.0.2.8/31");
    }

    #[test]
    fn cidr_counts_cap_at_sixteen_host_bits() {
        let small: IpNetwork = "10.0.0.0/30".parse().unwrap();
        assert_eq!(cidr_target_count(&small), 4);
        let large: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert_eq!(cidr_target_count(&large), CIDR_HOST_CAP);
    }
}
