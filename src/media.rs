use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{clamp_workers, MediaConfig};
use crate::error::{HarvestError, Result};

/// Longest slice still encoded straight from the source, one call per duration
const DIRECT_SLICE_LIMIT: u32 = 10;

/// Run an external tool, killing it when `timeout` elapses.
///
/// A non-zero exit status is an error, reported with the tail of stderr.
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Executing command: {:?}", cmd);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(HarvestError::Media(format!("failed to spawn {}: {}", program, e))),
        Err(_) => {
            return Err(HarvestError::Media(format!(
                "{} timed out after {}s",
                program,
                timeout.as_secs()
            )))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
        return Err(HarvestError::Media(format!(
            "{} exited with {}: {}",
            program, output.status, tail
        )));
    }

    Ok(output)
}

/// Name of the slice covering `[0, duration)` seconds of `stem{ext}`
pub fn slice_file_name(stem: &str, duration: u32, ext: &str) -> String {
    format!("{}_0-{}s{}", stem, duration, ext)
}

/// Result of slicing one input
#[derive(Debug, Clone, Default)]
pub struct SliceReport {
    pub input: PathBuf,
    /// Slices present after the call, including ones that already existed
    pub produced: Vec<PathBuf>,
    /// Durations that could not be produced
    pub failed: Vec<u32>,
}

/// Bounded stage for local mux/slice work.
///
/// Owns its own semaphore so slow transcodes never hold a network worker.
#[derive(Clone)]
pub struct MediaTool {
    config: MediaConfig,
    permits: Arc<Semaphore>,
}

impl MediaTool {
    pub fn new(mut config: MediaConfig) -> Self {
        config.max_workers = clamp_workers(config.max_workers);
        let permits = Arc::new(Semaphore::new(config.max_workers));
        Self { config, permits }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Concurrent ffmpeg processes this tool allows
    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    async fn ffmpeg(&self, args: Vec<OsString>) -> Result<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HarvestError::Media("media stage closed".to_string()))?;
        run_tool(&self.config.ffmpeg, args, self.config.timeout()).await?;
        Ok(())
    }

    /// Mux separately downloaded video and audio streams into `output`
    pub async fn merge_streams(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            video.into(),
            "-i".into(),
            audio.into(),
            "-c".into(),
            "copy".into(),
            output.into(),
        ];

        if let Err(e) = self.ffmpeg(args).await {
            let _ = tokio::fs::remove_file(output).await;
            return Err(e);
        }

        if !self.config.keep_streams {
            for stream in [video, audio] {
                if let Err(e) = tokio::fs::remove_file(stream).await {
                    warn!("Could not remove merged stream {}: {}", stream.display(), e);
                }
            }
        }

        debug!("🎞️ Merged {}", output.display());
        Ok(())
    }

    /// Check the input has a readable stream of the expected kind
    async fn probe_readable(&self, input: &Path, is_audio: bool) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            if is_audio { "a:0" } else { "v:0" }.into(),
            "-show_entries".into(),
            "stream=duration".into(),
            "-of".into(),
            "csv=p=0".into(),
            input.into(),
        ];
        run_tool(&self.config.ffprobe, args, self.config.probe_timeout()).await?;
        Ok(())
    }

    fn encode_args(&self, input: &Path, duration: u32, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            input.into(),
            "-ss".into(),
            "0".into(),
            "-t".into(),
            duration.to_string().into(),
            "-c:v".into(),
            "libx264".into(),
            "-crf".into(),
            self.config.crf.to_string().into(),
            "-preset".into(),
            self.config.preset.clone().into(),
            "-c:a".into(),
            "aac".into(),
            "-threads".into(),
            self.config.threads.to_string().into(),
            output.into(),
        ]
    }

    fn copy_args(input: &Path, duration: u32, output: &Path, codec_flag: &str) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            input.into(),
            "-ss".into(),
            "0".into(),
            "-t".into(),
            duration.to_string().into(),
            codec_flag.into(),
            "copy".into(),
            output.into(),
        ]
    }

    /// Produce `{stem}_0-{N}s{ext}` for every configured duration next to
    /// the input (or in `output_dir`), skipping slices that already exist
    pub async fn slice(&self, input: &Path, output_dir: Option<&Path>) -> Result<SliceReport> {
        let start_time = Instant::now();
        if !input.is_file() {
            return Err(HarvestError::Media(format!("input does not exist: {}", input.display())));
        }

        let output_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| HarvestError::io(&output_dir, e))?;

        let file_name = input.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let is_audio = file_name.contains("_audio");
        let slice_path = |duration: u32| output_dir.join(slice_file_name(stem, duration, &ext));

        let mut report = SliceReport {
            input: input.to_path_buf(),
            ..SliceReport::default()
        };
        let mut missing = Vec::new();
        for &duration in &self.config.durations {
            let path = slice_path(duration);
            if path.exists() {
                report.produced.push(path);
            } else {
                missing.push(duration);
            }
        }

        if missing.is_empty() {
            debug!("All slices already exist for {}", stem);
            return Ok(report);
        }

        if let Err(e) = self.probe_readable(input, is_audio).await {
            warn!("Cannot read {}, keeping existing slices only: {}", input.display(), e);
            report.failed = missing;
            return Ok(report);
        }

        info!("✂️ Slicing {} ({} slices to produce)", stem, missing.len());
        let longest = missing.iter().copied().max().unwrap_or_default();

        if is_audio || longest <= DIRECT_SLICE_LIMIT {
            for duration in missing {
                let output = slice_path(duration);
                let args = if is_audio {
                    Self::copy_args(input, duration, &output, "-c:a")
                } else {
                    self.encode_args(input, duration, &output)
                };
                self.record(&mut report, duration, output, self.ffmpeg(args).await);
            }
        } else {
            let temp = output_dir.join(format!("{}_temp_0-{}s{}", stem, longest, ext));
            match self.ffmpeg(self.encode_args(input, longest, &temp)).await {
                Ok(()) => {
                    for duration in missing {
                        let output = slice_path(duration);
                        let args = Self::copy_args(&temp, duration, &output, "-c");
                        self.record(&mut report, duration, output, self.ffmpeg(args).await);
                    }
                }
                Err(e) => {
                    warn!("Prefix extraction failed for {}, encoding each slice: {}", stem, e);
                    for duration in missing {
                        let output = slice_path(duration);
                        let args = self.encode_args(input, duration, &output);
                        self.record(&mut report, duration, output, self.ffmpeg(args).await);
                    }
                }
            }
            if temp.exists() {
                let _ = tokio::fs::remove_file(&temp).await;
            }
        }

        let total = self.config.durations.len();
        info!(
            "✅ Sliced {}: {}/{} ({:.1}%) in {:.1}s",
            stem,
            report.produced.len(),
            total,
            report.produced.len() as f64 / total as f64 * 100.0,
            start_time.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    fn record(&self, report: &mut SliceReport, duration: u32, output: PathBuf, result: Result<()>) {
        match result {
            Ok(()) => report.produced.push(output),
            Err(e) => {
                warn!("Slice 0-{}s failed for {}: {}", duration, report.input.display(), e);
                report.failed.push(duration);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slice_file_name() {
        assert_eq!(slice_file_name("BV1_video", 12, ".mp4"), "BV1_video_0-12s.mp4");
        assert_eq!(slice_file_name("clip", 2, ""), "clip_0-2s");
    }

    #[test]
    fn test_worker_count_is_clamped() {
        let tool = MediaTool::new(MediaConfig {
            max_workers: 10_000,
            ..MediaConfig::default()
        });
        assert_eq!(tool.max_workers(), crate::config::worker_ceiling());
        assert_eq!(tool.permits.available_permits(), tool.max_workers());

        let tool = MediaTool::new(MediaConfig {
            max_workers: 0,
            ..MediaConfig::default()
        });
        assert_eq!(tool.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_is_media_error() {
        let result = run_tool(
            "definitely-not-an-installed-tool",
            ["-version"],
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(HarvestError::Media(_))));
    }

    #[tokio::test]
    async fn test_existing_slices_need_no_tool() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("A_audio.mp4");
        std::fs::write(&input, b"a").unwrap();
        for d in [2, 4] {
            std::fs::write(temp_dir.path().join(slice_file_name("A_audio", d, ".mp4")), b"s").unwrap();
        }

        let tool = MediaTool::new(MediaConfig {
            ffmpeg: "definitely-not-an-installed-tool".to_string(),
            ffprobe: "definitely-not-an-installed-tool".to_string(),
            durations: vec![2, 4],
            ..MediaConfig::default()
        });

        let report = tool.slice(&input, None).await.unwrap();
        assert_eq!(report.produced.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_input_keeps_existing_slices() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("A_video.mp4");
        std::fs::write(&input, b"v").unwrap();
        std::fs::write(temp_dir.path().join(slice_file_name("A_video", 2, ".mp4")), b"s").unwrap();

        let tool = MediaTool::new(MediaConfig {
            ffmpeg: "definitely-not-an-installed-tool".to_string(),
            ffprobe: "definitely-not-an-installed-tool".to_string(),
            durations: vec![2, 4, 6],
            ..MediaConfig::default()
        });

        let report = tool.slice(&input, None).await.unwrap();
        assert_eq!(report.produced.len(), 1);
        assert_eq!(report.failed, vec![4, 6]);
    }
}
