use chrono::{DateTime, Local, NaiveDateTime};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};

/// Final state of one download task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Both elementary streams downloaded
    Success,
    /// Exactly one of the two streams downloaded
    Partial,
    /// Nothing usable was produced
    Failed,
    /// Artifacts were already on disk; no network call was made
    Skipped,
}

/// Outcome record of one download task execution.
///
/// `status == Success` iff both transfer flags are set, and
/// `status == Partial` iff exactly one is. Use the constructors; they are the
/// only way the crate builds outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadOutcome {
    pub bvid: String,
    pub status: DownloadStatus,
    #[serde(deserialize_with = "lenient_flag")]
    pub video_downloaded: bool,
    #[serde(deserialize_with = "lenient_flag")]
    pub audio_downloaded: bool,
    pub subtitle_count: u32,
    pub error_message: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Local>,
}

/// Column names of the outcome table, in serialization order
const OUTCOME_COLUMNS: [&str; 7] = [
    "bvid",
    "status",
    "video_downloaded",
    "audio_downloaded",
    "subtitle_count",
    "error_message",
    "timestamp",
];

/// Accepts `true`/`false` in any case as well as `1`/`0`
fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(de::Error::custom(format!("invalid transfer flag '{}'", other))),
    }
}

/// Accepts RFC 3339 as well as naive local `YYYY-MM-DD HH:MM:SS` timestamps
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Local>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Local));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

impl DownloadOutcome {
    fn new(id: &str, status: DownloadStatus) -> Self {
        Self {
            bvid: id.to_string(),
            status,
            video_downloaded: false,
            audio_downloaded: false,
            subtitle_count: 0,
            error_message: String::new(),
            timestamp: Local::now(),
        }
    }

    pub fn skipped(id: &str) -> Self {
        Self::new(id, DownloadStatus::Skipped)
    }

    pub fn failed(id: &str, error: impl Into<String>) -> Self {
        let mut outcome = Self::new(id, DownloadStatus::Failed);
        outcome.error_message = error.into();
        outcome
    }

    /// Derive the status from the two stream transfers
    pub fn from_transfers(
        id: &str,
        video: std::result::Result<(), String>,
        audio: std::result::Result<(), String>,
        subtitle_count: u32,
    ) -> Self {
        let video_downloaded = video.is_ok();
        let audio_downloaded = audio.is_ok();
        let status = match (video_downloaded, audio_downloaded) {
            (true, true) => DownloadStatus::Success,
            (true, false) | (false, true) => DownloadStatus::Partial,
            (false, false) => DownloadStatus::Failed,
        };

        let errors: Vec<String> = [("video", video), ("audio", audio)]
            .into_iter()
            .filter_map(|(kind, result)| result.err().map(|e| format!("{} download failed: {}", kind, e)))
            .collect();

        let mut outcome = Self::new(id, status);
        outcome.video_downloaded = video_downloaded;
        outcome.audio_downloaded = audio_downloaded;
        outcome.subtitle_count = subtitle_count;
        outcome.error_message = errors.join("; ");
        outcome
    }

    /// Whether the record satisfies the status/flag invariant
    pub fn is_consistent(&self) -> bool {
        let both = self.video_downloaded && self.audio_downloaded;
        let one = self.video_downloaded != self.audio_downloaded;
        (self.status == DownloadStatus::Success) == both
            && (self.status == DownloadStatus::Partial) == one
    }
}

/// Aggregated counts over an outcome table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStatistics {
    pub total_videos: usize,
    pub successful_downloads: usize,
    pub partial_downloads: usize,
    pub failed_downloads: usize,
    pub skipped_downloads: usize,
    pub total_subtitles: u64,
}

/// Durable outcome table, rewritten in full on every flush
#[derive(Debug)]
pub struct OutcomeLog {
    path: PathBuf,
    records: Vec<DownloadOutcome>,
}

impl OutcomeLog {
    /// Open the table at `path`, keeping rows a previous run flushed.
    ///
    /// A table that cannot be parsed is moved aside to `<name>.corrupt` so the
    /// next flush never overwrites it. Fails if it cannot be moved.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self { path, records: Vec::new() });
        }

        let records = match Self::read_records(&path) {
            Ok(records) => {
                debug!("📋 Loaded {} outcome records from {}", records.len(), path.display());
                records
            }
            Err(e) => {
                let aside = corrupt_path(&path);
                std::fs::rename(&path, &aside).map_err(|e| HarvestError::io(&aside, e))?;
                warn!(
                    "⚠️ Unreadable outcome table {} moved to {}: {}",
                    path.display(),
                    aside.display(),
                    e
                );
                Vec::new()
            }
        };

        Ok(Self { path, records })
    }

    fn read_records(path: &Path) -> Result<Vec<DownloadOutcome>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, outcome: DownloadOutcome) {
        self.records.push(outcome);
    }

    pub fn records(&self) -> &[DownloadOutcome] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the whole table to a sibling file and rename it into place
    pub async fn flush(&self) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if self.records.is_empty() {
            writer.write_record(OUTCOME_COLUMNS)?;
        }
        for record in &self.records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| HarvestError::io(&self.path, e.into_error()))?;

        write_atomically(&self.path, &bytes).await
    }

    pub fn statistics(&self) -> DownloadStatistics {
        let mut stats = DownloadStatistics {
            total_videos: self.records.len(),
            ..DownloadStatistics::default()
        };
        for record in &self.records {
            match record.status {
                DownloadStatus::Success => stats.successful_downloads += 1,
                DownloadStatus::Partial => stats.partial_downloads += 1,
                DownloadStatus::Failed => stats.failed_downloads += 1,
                DownloadStatus::Skipped => stats.skipped_downloads += 1,
            }
            stats.total_subtitles += u64::from(record.subtitle_count);
        }
        stats
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// Replace `path` with `bytes` via a temporary sibling and a rename
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| HarvestError::io(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| HarvestError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| HarvestError::io(path, e))?;
    Ok(())
}
