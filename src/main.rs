use clap::Parser;
use reality_scan::cli::Cli;
use reality_scan::engine::Engine;
use reality_scan::output::CsvSink;
use reality_scan::{geo, input};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let (cfg, source) = cli.into_config()?;

    let geo = geo::locate(cfg.geo_db.as_deref()).await;
    let (targets, total) = input::stream_targets(&source).await?;
    let sink = CsvSink::create(&cfg.output, cfg.export.clone(), total)?;

    let engine = Engine::new(cfg, sink, geo);
    engine.run(targets).await?;

    Ok(())
}
