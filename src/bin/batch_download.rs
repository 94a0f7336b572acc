use anyhow::{Context, Result};
use clap::Parser;
use cohort_harvester::candidates::load_candidates;
use cohort_harvester::{BatchScheduler, Config};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Download every listed video without any selection
#[derive(Parser)]
#[command(name = "batch-download")]
#[command(about = "Download video and audio streams plus subtitles for a list of ids")]
struct Cli {
    /// Parquet snapshot or CSV file listing video ids
    #[arg(short, long)]
    input: PathBuf,

    /// Column holding the ids
    #[arg(long, default_value = "bvid")]
    column: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of parallel downloads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Only download the first N ids
    #[arg(long)]
    limit: Option<usize>,

    /// Skip subtitle downloads
    #[arg(long)]
    no_subtitles: bool,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cohort_harvester=info,batch_download=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.output_dir {
        config.download.output_root = dir;
    }
    if let Some(workers) = cli.workers {
        config.download.max_workers = workers;
    }
    if cli.no_subtitles {
        config.download.fetch_subtitles = false;
    }
    config.validate()?;

    let mut ids = load_candidates(&cli.input, &cli.column)
        .with_context(|| format!("Cannot read id list {}", cli.input.display()))?;
    if let Some(limit) = cli.limit {
        ids.truncate(limit);
    }

    let mut scheduler = BatchScheduler::from_config(&config)?;
    info!(
        "🚀 Downloading {} videos with {} workers into {}",
        ids.len(),
        scheduler.max_workers(),
        config.download.output_root.display()
    );

    let start_time = Instant::now();
    let outcomes = scheduler.run_batch(ids).await;
    let elapsed = start_time.elapsed();

    let stats = scheduler.statistics();
    info!("🎉 {} downloads finished in {:.1}s", outcomes.len(), elapsed.as_secs_f64());
    info!("📊 Outcome table: {}", scheduler.log().path().display());
    info!("  Total:     {}", stats.total_videos);
    info!("  Success:   {}", stats.successful_downloads);
    info!("  Partial:   {}", stats.partial_downloads);
    info!("  Failed:    {}", stats.failed_downloads);
    info!("  Skipped:   {}", stats.skipped_downloads);
    info!("  Subtitles: {}", stats.total_subtitles);

    Ok(())
}
