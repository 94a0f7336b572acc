use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cohort_harvester::candidates::{load_candidates, shuffle};
use cohort_harvester::config::{clamp_workers, Config};
use cohort_harvester::{
    ArtifactLayout, BatchScheduler, FfprobeFrameProbe, MediaTool, PortraitClassifier, SelectionLoop,
};

fn cli() -> Command {
    Command::new("Cohort Harvester")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Download candidate videos until enough portrait clips are collected")
        .arg(
            Arg::new("candidates")
                .short('c')
                .long("candidates")
                .value_name("FILE")
                .help("Parquet snapshot or CSV file listing candidate video ids")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory for downloaded items")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("NUM")
                .help("Number of portrait videos to collect")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("batch-size")
                .short('b')
                .long("batch-size")
                .value_name("NUM")
                .help("Videos downloaded per wave")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Number of parallel downloads")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("checkpoint")
                .long("checkpoint")
                .value_name("FILE")
                .help("Progress file listing accepted ids")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("NUM")
                .help("Seed for the candidate shuffle")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("no-merge")
                .long("no-merge")
                .help("Keep video and audio streams separate")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-subtitles")
                .long("no-subtitles")
                .help("Skip subtitle downloads")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "cohort_harvester=debug,info"
    } else {
        "cohort_harvester=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(dir) = matches.get_one::<PathBuf>("output-dir") {
        config.download.output_root = dir.clone();
    }
    if let Some(&target) = matches.get_one::<usize>("target") {
        config.selection.target_count = target;
    }
    if let Some(&batch_size) = matches.get_one::<usize>("batch-size") {
        config.selection.batch_size = batch_size;
    }
    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.download.max_workers = workers;
    }
    if let Some(checkpoint) = matches.get_one::<PathBuf>("checkpoint") {
        config.selection.rejected_file = checkpoint.with_extension("rejected.txt");
        config.selection.checkpoint_file = checkpoint.clone();
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.selection.shuffle_seed = Some(seed);
    }
    if matches.get_flag("no-merge") {
        config.media.merge_streams = false;
    }
    if matches.get_flag("no-subtitles") {
        config.download.fetch_subtitles = false;
    }
    config.download.max_workers = clamp_workers(config.download.max_workers);
    config.media.max_workers = clamp_workers(config.media.max_workers);

    // Both fatal before any work is dispatched
    config.validate()?;
    let candidates_path = matches
        .get_one::<PathBuf>("candidates")
        .context("--candidates is required")?;
    let mut candidates = load_candidates(candidates_path, &config.selection.candidate_column)
        .with_context(|| format!("Cannot read candidate list {}", candidates_path.display()))?;
    shuffle(&mut candidates, config.selection.shuffle_seed);

    info!("🚀 Cohort Harvester starting...");
    for line in config.summary().lines() {
        info!("{}", line);
    }

    let scheduler = BatchScheduler::from_config(&config)?;
    let probe = FfprobeFrameProbe::new(config.media.ffprobe.clone(), config.media.probe_timeout());
    let classifier = PortraitClassifier::new(Arc::new(probe));
    let merger = config
        .media
        .merge_streams
        .then(|| MediaTool::new(config.media.clone()));

    let mut selection = SelectionLoop::new(
        config.selection.clone(),
        ArtifactLayout::new(&config.download.output_root),
        scheduler,
        classifier,
        merger,
    )?;

    let start_time = Instant::now();
    let report = selection.run(candidates).await?;
    let elapsed = start_time.elapsed().as_secs_f64();

    let stats = selection.scheduler().statistics();
    info!("🎉 Finished in {:.1}s: {}", elapsed, report);
    info!(
        "📊 Downloads: {} total, {} success, {} partial, {} failed, {} skipped, {} subtitles",
        stats.total_videos,
        stats.successful_downloads,
        stats.partial_downloads,
        stats.failed_downloads,
        stats.skipped_downloads,
        stats.total_subtitles
    );
    if report.accepted > 0 {
        info!("⏱️ Average {:.1}s per accepted video", elapsed / report.accepted as f64);
    }

    Ok(())
}
