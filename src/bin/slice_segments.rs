use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cohort_harvester::candidates::load_candidates;
use cohort_harvester::segments::{clean_slices, clean_temp_files};
use cohort_harvester::config::clamp_workers;
use cohort_harvester::{ArtifactLayout, Config, MediaTool, SegmentExtractor};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slice-segments")]
#[command(about = "Cut fixed-duration slices from downloaded videos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root of the downloaded tree
    #[arg(long, default_value = "./video_data")]
    root: PathBuf,

    /// Write slices here instead of next to each input
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Number of concurrent ffmpeg processes
    #[arg(short, long)]
    workers: Option<usize>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Slice every merged file and elementary stream found under the root
    All,
    /// Slice only the videos listed in an id file
    Ids {
        /// Parquet snapshot or CSV file listing video ids
        file: PathBuf,
        /// Column holding the ids
        #[arg(long, default_value = "bvid")]
        column: String,
    },
    /// Delete all slice files under the root
    Clean {
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cohort_harvester=info,slice_segments=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(workers) = cli.workers {
        config.media.max_workers = clamp_workers(workers);
    }

    if !cli.root.is_dir() {
        anyhow::bail!("Root directory does not exist: {}", cli.root.display());
    }

    let inputs = match cli.command {
        Commands::Clean { dry_run } => {
            let count = clean_slices(&cli.root, dry_run)?;
            info!("🧹 {} slice files {}", count, if dry_run { "found" } else { "deleted" });
            return Ok(());
        }
        Commands::All => SegmentExtractor::find_inputs(&cli.root),
        Commands::Ids { file, column } => {
            let ids = load_candidates(&file, &column)
                .with_context(|| format!("Cannot read id list {}", file.display()))?;
            SegmentExtractor::inputs_for_ids(&ArtifactLayout::new(&cli.root), &ids)
        }
    };

    let stale = clean_temp_files(&cli.root)?;
    if stale > 0 {
        warn!("Removed {} temporary files from an earlier run", stale);
    }

    if inputs.is_empty() {
        warn!("No inputs found under {}", cli.root.display());
        return Ok(());
    }

    info!(
        "🚀 Slicing {} files into durations {:?}",
        inputs.len(),
        config.media.durations
    );
    let extractor = SegmentExtractor::new(MediaTool::new(config.media));
    let summary = extractor.run(&inputs, cli.output_dir.as_deref()).await;

    if !summary.errors.is_empty() {
        anyhow::bail!("{} of {} inputs failed", summary.errors.len(), summary.inputs);
    }
    Ok(())
}
