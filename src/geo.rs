//! Country-code lookups against a GeoLite2 database.
//!
//! The reader is not reentrant, so all lookups serialize behind one mutex;
//! the check is cheap next to a network probe.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

pub const UNKNOWN: &str = "UNKNOWN";

const DB_FILENAME: &str = "GeoLite2-Country.mmdb";
const DB_MIRROR: &str =
    "https://github.com/P3TERX/GeoLite.mmdb/raw/download/GeoLite2-Country.mmdb";

#[derive(Debug)]
pub struct GeoReader {
    reader: Mutex<Reader<Vec<u8>>>,
}

impl GeoReader {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::open_readfile(path)
            .with_context(|| format!("cannot open geo database {}", path.display()))?;
        Ok(GeoReader {
            reader: Mutex::new(reader),
        })
    }

    /// ISO country code for an address, `"UNKNOWN"` on any lookup failure.
    pub fn lookup(&self, ip: IpAddr) -> String {
        let Ok(reader) = self.reader.lock() else {
            return UNKNOWN.to_string();
        };
        match reader.lookup::<geoip2::Country>(ip) {
            Ok(record) => record
                .country
                .and_then(|country| country.iso_code)
                .map(str::to_string)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            Err(_) => UNKNOWN.to_string(),
        }
    }
}

/// Finds a usable country database: the explicit path if given, then the
/// conventional locations, then a one-shot mirror download into the working
/// directory. Returns `None` when nothing loads; the scan then runs with
/// every `geo_code` set to `"UNKNOWN"`.
pub async fn locate(explicit: Option<&Path>) -> Option<GeoReader> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.extend([
        PathBuf::from("Country.mmdb"),
        PathBuf::from(DB_FILENAME),
        PathBuf::from("/usr/share/GeoIP").join(DB_FILENAME),
        PathBuf::from("/var/lib/GeoIP").join(DB_FILENAME),
    ]);

    for candidate in &candidates {
        if let Ok(reader) = GeoReader::open(candidate) {
            info!(path = %candidate.display(), "geo database loaded");
            return Some(reader);
        }
    }

    info!("no geo database found, attempting download");
    let download_path = PathBuf::from(DB_FILENAME);
    match download(&download_path).await {
        Ok(()) => match GeoReader::open(&download_path) {
            Ok(reader) => {
                info!(path = %download_path.display(), "geo database downloaded");
                Some(reader)
            }
            Err(err) => {
                warn!(error = %err, "downloaded geo database failed to load");
                None
            }
        },
        Err(err) => {
            warn!(error = %err, "geo database download failed, running without geolocation");
            None
        }
    }
}

async fn download(path: &Path) -> Result<()> {
    let response = reqwest::get(DB_MIRROR)
        .await
        .context("geo database request failed")?
        .error_for_status()
        .context("geo database request rejected")?;
    let body = response
        .bytes()
        .await
        .context("geo database download interrupted")?;
    tokio::fs::write(path, &body)
        .await
        .with_context(|| format!("cannot write geo database {}", path.display()))?;
    Ok(())
}
