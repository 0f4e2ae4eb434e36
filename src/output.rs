use crate::model::{ProbeResult, ScanSummary};
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

const STATUS_INTERVAL: Duration = Duration::from_secs(3);

/// One CSV row. Field order is the output contract.
#[derive(Serialize)]
struct Record<'a> {
    #[serde(rename = "IP")]
    ip: &'a str,
    #[serde(rename = "ORIGIN")]
    origin: &'a str,
    #[serde(rename = "PORT")]
    port: u16,
    #[serde(rename = "CERT_DOMAIN")]
    cert_domain: &'a str,
    #[serde(rename = "CERT_ISSUER")]
    cert_issuer: &'a str,
    #[serde(rename = "TLS_VERSION")]
    tls_version: &'a str,
    #[serde(rename = "ALPN")]
    alpn: &'a str,
    #[serde(rename = "CURVE")]
    curve: &'a str,
    #[serde(rename = "GEO_CODE")]
    geo_code: &'a str,
    #[serde(rename = "FEASIBLE")]
    feasible: bool,
    #[serde(rename = "RESPONSE_TIME_MS")]
    response_time_ms: u64,
    #[serde(rename = "ERROR")]
    error: &'a str,
    #[serde(rename = "SCAN_TIME")]
    scan_time: String,
}

/// Append-only CSV sink with live counters. Owned by the engine's single
/// consumer loop; no locking on the file handle.
pub struct CsvSink {
    writer: csv::Writer<File>,
    export: Option<PathBuf>,
    expected_total: Option<usize>,
    feasible_rows: Vec<ProbeResult>,
    total: usize,
    feasible: usize,
    errors: usize,
    started: Instant,
    last_status: Instant,
}

impl CsvSink {
    pub fn create(
        path: &Path,
        export: Option<PathBuf>,
        expected_total: Option<usize>,
    ) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot create output file {}", path.display()))?;
        Ok(CsvSink {
            writer: csv::Writer::from_writer(file),
            export,
            expected_total,
            feasible_rows: Vec::new(),
            total: 0,
            feasible: 0,
            errors: 0,
            started: Instant::now(),
            last_status: Instant::now(),
        })
    }

    /// Appends one record, updates the counters, and emits the periodic
    /// status line and the immediate feasible line.
    pub fn write(&mut self, result: &ProbeResult) -> Result<()> {
        self.writer
            .serialize(Record {
                ip: &result.ip,
                origin: &result.origin,
                port: result.port,
                cert_domain: &result.cert_domain,
                cert_issuer: &result.cert_issuer,
                tls_version: &result.tls_version,
                alpn: &result.alpn,
                curve: &result.curve,
                geo_code: &result.geo_code,
                feasible: result.feasible,
                response_time_ms: result.response_time_ms,
                error: &result.error,
                scan_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .context("cannot write scan record")?;
        self.writer.flush().context("cannot flush scan record")?;

        self.total += 1;
        if !result.error.is_empty() {
            self.errors += 1;
        } else if result.feasible {
            self.feasible += 1;
            info!(
                ip = %result.ip,
                cert = %result.cert_domain,
                geo = %result.geo_code,
                ms = result.response_time_ms,
                "feasible front found"
            );
            self.feasible_rows.push(result.clone());
        }

        if self.last_status.elapsed() >= STATUS_INTERVAL {
            self.print_status();
            self.last_status = Instant::now();
        }
        Ok(())
    }

    pub fn feasible_count(&self) -> usize {
        self.feasible
    }

    fn print_status(&self) {
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let rate = format!("{:.1}/s", self.total as f64 / elapsed);
        match self.expected_total {
            Some(expected) => info!(
                scanned = self.total,
                feasible = self.feasible,
                remaining = expected.saturating_sub(self.total),
                rate = %rate,
                "scan status"
            ),
            None => info!(
                scanned = self.total,
                feasible = self.feasible,
                rate = %rate,
                "scan status"
            ),
        }
    }

    /// Flushes, writes the optional feasible-target export, and reports the
    /// final totals.
    pub fn finish(mut self) -> Result<ScanSummary> {
        self.writer.flush().context("cannot flush output file")?;

        if let Some(path) = self.export.take() {
            write_export(&path, &self.feasible_rows)?;
            info!(path = %path.display(), targets = self.feasible_rows.len(), "export written");
        }

        let summary = ScanSummary {
            total: self.total,
            feasible: self.feasible,
            errors: self.errors,
            elapsed: self.started.elapsed(),
        };
        let elapsed = format!("{:.1}s", summary.elapsed.as_secs_f64());
        info!(
            total = summary.total,
            feasible = summary.feasible,
            errors = summary.errors,
            elapsed = %elapsed,
            "scan complete"
        );
        Ok(summary)
    }
}

/// Writes the proxy-config stanza for each feasible target: a `dest` line
/// plus the certificate names as `serverNames`.
fn write_export(path: &Path, rows: &[ProbeResult]) -> Result<()> {
    let mut out = String::new();
    writeln!(out, "# stealth-proxy front targets").ok();
    writeln!(
        out,
        "# generated: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
    .ok();
    writeln!(out, "# {} feasible target(s)", rows.len()).ok();

    for (index, row) in rows.iter().enumerate() {
        let names: Vec<String> = row
            .cert_domain
            .split(',')
            .filter(|name| !name.is_empty())
            .map(|name| format!("\"{name}\""))
            .collect();
        writeln!(out).ok();
        writeln!(out, "# target {}", index + 1).ok();
        writeln!(out, "dest: {}:{}", row.ip, row.port).ok();
        writeln!(out, "serverNames: [{}]", names.join(", ")).ok();
        writeln!(
            out,
            "# geo: {} issuer: {} response: {}ms",
            row.geo_code, row.cert_issuer, row.response_time_ms
        )
        .ok();
    }

    std::fs::write(path, out)
        .with_context(|| format!("cannot write export file {}", path.display()))
}
