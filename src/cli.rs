use crate::input::TargetSource;
use crate::model::Config;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

const MAX_WORKERS: usize = 1000;

#[derive(Debug, Parser)]
#[command(author, version, about = "TLS 1.3 stealth-proxy front scanner", long_about = None)]
pub struct Cli {
    /// Target spec: an IP (expanded outward), a CIDR block, or a domain
    #[arg(short = 't', long = "target", value_name = "TARGET")]
    pub target: Option<String>,

    /// File of target specs, one per line (# starts a comment)
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// TCP port to probe
    #[arg(short = 'p', long = "port", default_value_t = 443)]
    pub port: u16,

    /// Concurrent probe workers
    #[arg(short = 'w', long = "workers", default_value_t = 2)]
    pub workers: usize,

    /// Per-probe deadline in seconds, applied to the dial and the handshake
    #[arg(long = "timeout", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Include IPv6 addresses when resolving domain targets
    #[arg(long = "ipv6", action = ArgAction::SetTrue)]
    pub ipv6: bool,

    /// Feasible matches to collect before stopping (0 = unlimited)
    #[arg(long = "max-matches", default_value_t = 0)]
    pub max_matches: usize,

    /// Terminate the scan once the match quota is reached
    #[arg(long = "stop-on-quota", action = ArgAction::SetTrue)]
    pub stop_on_quota: bool,

    /// Skip the ICMP reachability check on candidate domains
    #[arg(long = "no-ping", action = ArgAction::SetTrue)]
    pub no_ping: bool,

    /// Output CSV path
    #[arg(short = 'o', long = "output", default_value = "out.csv")]
    pub output: PathBuf,

    /// GeoLite2 country database path
    #[arg(long = "geo-db", value_name = "FILE")]
    pub geo_db: Option<PathBuf>,

    /// Write a proxy-config stanza per feasible target to this file
    #[arg(long = "export", value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Log one line per completed probe
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<(Config, TargetSource)> {
        let Cli {
            target,
            input,
            port,
            workers,
            timeout_secs,
            ipv6,
            max_matches,
            stop_on_quota,
            no_ping,
            output,
            geo_db,
            export,
            verbose,
        } = self;

        let source = match (target, input) {
            (Some(spec), None) => TargetSource::Spec(spec),
            (None, Some(path)) => TargetSource::File(path),
            (Some(_), Some(_)) => anyhow::bail!("--target and --input are mutually exclusive"),
            (None, None) => anyhow::bail!("either --target or --input is required"),
        };

        if port == 0 {
            anyhow::bail!("port must be in 1..=65535");
        }
        if workers == 0 || workers > MAX_WORKERS {
            anyhow::bail!("workers must be in 1..={MAX_WORKERS}");
        }
        if timeout_secs == 0 {
            anyhow::bail!("timeout must be at least 1 second");
        }

        let cfg = Config {
            port,
            workers,
            timeout: Duration::from_secs(timeout_secs),
            ipv6,
            max_matches,
            stop_on_quota,
            ping: !no_ping,
            verbose,
            output,
            geo_db,
            export,
        };
        Ok((cfg, source))
    }
}
