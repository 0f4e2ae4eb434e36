use crate::classify;
use crate::geo::{self, GeoReader};
use crate::model::{Config, ProbeResult, ScanSummary, Target};
use crate::output::CsvSink;
use crate::probe;
use async_trait::async_trait;
use futures::future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

const RESULT_CHANNEL_DEPTH: usize = 1000;

/// Seam between the worker loop and the probe itself, so tests can feed the
/// engine synthetic outcomes.
#[async_trait]
pub trait ProbeRunner: Send + Sync + 'static {
    async fn run(&self, target: Target, cfg: &Config, geo: Option<&GeoReader>) -> Vec<ProbeResult>;
}

/// The production runner: TLS probe, geo lookup, feasibility verdict.
pub struct TlsProbeRunner;

#[async_trait]
impl ProbeRunner for TlsProbeRunner {
    async fn run(&self, target: Target, cfg: &Config, geo: Option<&GeoReader>) -> Vec<ProbeResult> {
        let mut results = probe::probe_target(&target, cfg).await;
        for result in &mut results {
            result.geo_code = match (geo, result.ip.parse().ok()) {
                (Some(geo), Some(ip)) => geo.lookup(ip),
                _ => geo::UNKNOWN.to_string(),
            };
            if result.error.is_empty() {
                result.feasible = classify::is_feasible(result, cfg.ping).await;
            }
            if cfg.verbose {
                info!(
                    ip = %result.ip,
                    port = result.port,
                    tls = %result.tls_version,
                    alpn = %result.alpn,
                    cert = %result.cert_domain,
                    feasible = result.feasible,
                    error = %result.error,
                    ms = result.response_time_ms,
                    "probed"
                );
            } else {
                debug!(ip = %result.ip, port = result.port, feasible = result.feasible, "probed");
            }
        }
        results
    }
}

/// Worker pool pulling targets from the enumerator and feeding results to
/// the sink through one bounded channel.
pub struct Engine {
    cfg: Arc<Config>,
    sink: CsvSink,
    geo: Option<Arc<GeoReader>>,
    runner: Arc<dyn ProbeRunner>,
}

impl Engine {
    pub fn new(cfg: Config, sink: CsvSink, geo: Option<GeoReader>) -> Self {
        Engine::with_runner(cfg, sink, geo, Arc::new(TlsProbeRunner))
    }

    pub fn with_runner(
        cfg: Config,
        sink: CsvSink,
        geo: Option<GeoReader>,
        runner: Arc<dyn ProbeRunner>,
    ) -> Self {
        Engine {
            cfg: Arc::new(cfg),
            sink,
            geo: geo.map(Arc::new),
            runner,
        }
    }

    /// Runs the scan to completion or to the match quota.
    ///
    /// Quota shutdown works by dropping the result receiver: the next send
    /// from each worker fails, the workers return, and with them goes the
    /// shared target receiver, which stops the enumerator's producer. Each
    /// worker finishes at most the probe it already has in flight.
    pub async fn run(mut self, targets: ReceiverStream<Target>) -> anyhow::Result<ScanSummary> {
        // One batch per target keeps a domain's fanout contiguous in the
        // output even with several workers interleaving.
        let (result_tx, mut result_rx) = mpsc::channel::<Vec<ProbeResult>>(RESULT_CHANNEL_DEPTH);
        let target_rx = Arc::new(Mutex::new(targets.into_inner()));

        let mut workers = Vec::with_capacity(self.cfg.workers);
        for id in 0..self.cfg.workers {
            let targets = Arc::clone(&target_rx);
            let results = result_tx.clone();
            let cfg = Arc::clone(&self.cfg);
            let geo = self.geo.clone();
            let runner = Arc::clone(&self.runner);
            workers.push(tokio::spawn(async move {
                loop {
                    let target = { targets.lock().await.recv().await };
                    let Some(target) = target else {
                        break;
                    };
                    let outcomes = runner.run(target, &cfg, geo.as_deref()).await;
                    if results.send(outcomes).await.is_err() {
                        return;
                    }
                }
                debug!(worker = id, "worker drained");
            }));
        }
        drop(result_tx);

        'consume: while let Some(batch) = result_rx.recv().await {
            for result in batch {
                self.sink.write(&result)?;
                if self.cfg.stop_on_quota
                    && self.cfg.max_matches > 0
                    && self.sink.feasible_count() >= self.cfg.max_matches
                {
                    info!(
                        feasible = self.sink.feasible_count(),
                        "match quota reached, stopping scan"
                    );
                    break 'consume;
                }
            }
        }
        drop(result_rx);

        future::join_all(workers).await;
        self.sink.finish()
    }
}
