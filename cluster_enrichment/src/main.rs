use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::enrichr::EnrichrClient;

mod aggregate;
mod config;
mod diffexp;
mod enrichr;
mod errors;
mod helper_functions;
mod pipeline;
mod selection;
mod symbols;

const USAGE: &str = "usage: cluster_enrichment <analysis_dir> <output_dir> [config.json]";

fn main() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let base_dir = PathBuf::from(args.next().context(USAGE)?);
    let output_dir = PathBuf::from(args.next().context(USAGE)?);
    let config_path = args.next().map(PathBuf::from);

    let config = PipelineConfig::load(config_path.as_deref()).context("loading configuration")?;
    info!("Starting the cluster enrichment pipeline against {}", config.enrichr_url);

    let client = EnrichrClient::from_config(&config).context("building the Enrichr client")?;
    let summary = pipeline::run(&config, &base_dir, &output_dir, &client)
        .with_context(|| format!("enrichment pipeline on {}", base_dir.display()))?;

    info!(
        "Done: {} clusters, {} enrichment rows, {} failed submissions, {} failed library fetches",
        summary.clusters, summary.enrichment_rows, summary.failed_units, summary.failed_fetches
    );
    for output in &summary.outputs {
        info!("  {}", output.display());
    }

    Ok(())
}
