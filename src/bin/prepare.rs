use anyhow::{Context, Result};
use clap::Parser;
use pathviz::{Cli, HttpEmbedder, Pipeline, ReductionService};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pathviz=debug,pathviz_prepare=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.build_config()?;
    let embedder =
        HttpEmbedder::new(cli.embedder_config()).context("failed to build embedding client")?;
    let mut pipeline = Pipeline::new(config, embedder);
    if let Some(service) = cli.reduction_service_config() {
        let service = ReductionService::new(service).context("failed to build reduction client")?;
        pipeline = pipeline.with_reduction_service(service);
    }

    let run = pipeline
        .run()
        .with_context(|| format!("pipeline run over {:?} failed", cli.input))?;
    let summary = run.summary;
    info!(
        records = summary.records,
        embedding_dim = ?summary.embedding_dim,
        embeddings_cached = summary.embeddings.is_cached(),
        reduction_cached = summary.reduction.is_cached(),
        reduced = %summary.reduced_path.display(),
        "run complete"
    );
    if let Some(plot) = &summary.plot_path {
        println!("{}", plot.display());
    }
    Ok(())
}
