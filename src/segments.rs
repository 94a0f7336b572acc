//! Batch segment extraction over an output tree
//!
//! Finds slicing inputs (by scanning the tree or by id), slices them through
//! the bounded media stage, and cleans slice files up again on request.

use futures::future::join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::artifacts::{is_merged_file, is_slice_file, ArtifactLayout};
use crate::error::{HarvestError, Result};
use crate::media::{MediaTool, SliceReport};

const VIDEO_STREAM_SUFFIX: &str = "_video.mp4";
const AUDIO_STREAM_SUFFIX: &str = "_audio.mp4";
const REPORTED_ERRORS: usize = 5;

/// Totals over one extraction run
#[derive(Debug, Clone, Default)]
pub struct ExtractionSummary {
    pub inputs: usize,
    pub slices: usize,
    pub failed_slices: usize,
    /// Inputs that could not be sliced at all
    pub errors: Vec<(PathBuf, String)>,
}

impl ExtractionSummary {
    fn absorb(&mut self, input: &Path, result: Result<SliceReport>) {
        self.inputs += 1;
        match result {
            Ok(report) => {
                self.slices += report.produced.len();
                self.failed_slices += report.failed.len();
            }
            Err(e) => self.errors.push((input.to_path_buf(), e.to_string())),
        }
    }
}

pub struct SegmentExtractor {
    tool: MediaTool,
    batch_size: usize,
}

impl SegmentExtractor {
    pub fn new(tool: MediaTool) -> Self {
        let batch_size = tool.config().batch_size.max(1);
        Self { tool, batch_size }
    }

    /// Every playable file under `root`: merged files and audio streams, plus
    /// video streams of items that have no merged file
    pub fn find_inputs(root: &Path) -> Vec<PathBuf> {
        let found = files_matching(root, |name| {
            is_merged_file(name)
                || name.ends_with(VIDEO_STREAM_SUFFIX)
                || name.ends_with(AUDIO_STREAM_SUFFIX)
        });
        let merged_dirs: HashSet<PathBuf> = found
            .iter()
            .filter(|path| path.file_name().and_then(|n| n.to_str()).map_or(false, is_merged_file))
            .filter_map(|path| path.parent().map(Path::to_path_buf))
            .collect();

        let mut inputs: Vec<PathBuf> = found
            .into_iter()
            .filter(|path| {
                let is_video = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |name| name.ends_with(VIDEO_STREAM_SUFFIX));
                !(is_video && path.parent().map_or(false, |dir| merged_dirs.contains(dir)))
            })
            .collect();
        inputs.sort();
        inputs
    }

    /// Inputs for the given ids: the merged file (else the video stream),
    /// plus the audio stream when present
    pub fn inputs_for_ids(layout: &ArtifactLayout, ids: &[String]) -> Vec<PathBuf> {
        let mut inputs = Vec::new();
        for id in ids {
            match layout.locate_playable(id) {
                Some(path) => inputs.push(path),
                None => warn!("No video found for {}", id),
            }
            let audio = layout.audio_stream(id);
            if audio.is_file() {
                inputs.push(audio);
            }
        }
        inputs
    }

    /// Slice every input, a batch at a time
    pub async fn run(&self, inputs: &[PathBuf], output_dir: Option<&Path>) -> ExtractionSummary {
        let start_time = Instant::now();
        let mut summary = ExtractionSummary::default();
        let batches = inputs.len().div_ceil(self.batch_size);

        for (n, batch) in inputs.chunks(self.batch_size).enumerate() {
            info!("📦 Slicing batch {}/{} ({} files)", n + 1, batches, batch.len());

            let results = join_all(batch.iter().map(|input| self.tool.slice(input, output_dir))).await;
            for (input, result) in batch.iter().zip(results) {
                summary.absorb(input, result);
            }

            info!(
                "Progress: {}/{} files, {} slices",
                summary.inputs,
                inputs.len(),
                summary.slices
            );
        }

        if !summary.errors.is_empty() {
            error!("❌ {} inputs failed", summary.errors.len());
            for (path, e) in summary.errors.iter().take(REPORTED_ERRORS) {
                error!("  {}: {}", path.display(), e);
            }
        }

        info!(
            "✅ Extraction finished: {} inputs, {} slices ({} failed) in {:.1}s",
            summary.inputs,
            summary.slices,
            summary.failed_slices,
            start_time.elapsed().as_secs_f64()
        );
        summary
    }
}

fn files_matching(root: &Path, predicate: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().map_or(false, &predicate))
        .map(|entry| entry.into_path())
        .collect()
}

fn remove_files(files: &[PathBuf]) -> Result<usize> {
    for file in files {
        std::fs::remove_file(file).map_err(|e| HarvestError::io(file, e))?;
    }
    Ok(files.len())
}

/// Remove every slice file under `root`; with `dry_run` only count them
pub fn clean_slices(root: &Path, dry_run: bool) -> Result<usize> {
    let slices = files_matching(root, is_slice_file);
    if dry_run {
        for slice in &slices {
            debug!("Would delete {}", slice.display());
        }
        info!("🧹 Dry run: {} slice files would be deleted", slices.len());
        return Ok(slices.len());
    }

    let removed = remove_files(&slices)?;
    info!("🧹 Deleted {} slice files", removed);
    Ok(removed)
}

/// Remove temporary slice sources left behind by an interrupted run
pub fn clean_temp_files(root: &Path) -> Result<usize> {
    let temps = files_matching(root, |name| name.contains("_temp_") && is_slice_file(name));
    let removed = remove_files(&temps)?;
    if removed > 0 {
        info!("🧹 Deleted {} temporary files", removed);
    }
    Ok(removed)
}
