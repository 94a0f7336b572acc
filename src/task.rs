use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactLayout;
use crate::client::{RemoteFetch, StreamDescriptor, SubtitleTrack};
use crate::error::HarvestError;
use crate::outcome::DownloadOutcome;
use crate::retry::{run_with_retry, RetryPolicy};

/// Downloads everything for one work item.
///
/// Holds no durable state of its own; every side effect is a file under the
/// item's directory, so executing the same id again is safe.
#[derive(Clone)]
pub struct DownloadTask {
    remote: Arc<dyn RemoteFetch>,
    layout: ArtifactLayout,
    retry: RetryPolicy,
    fetch_subtitles: bool,
}

impl DownloadTask {
    pub fn new(
        remote: Arc<dyn RemoteFetch>,
        layout: ArtifactLayout,
        retry: RetryPolicy,
        fetch_subtitles: bool,
    ) -> Self {
        Self {
            remote,
            layout,
            retry,
            fetch_subtitles,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Run the whole item pipeline. Never fails: every error ends up in the
    /// returned outcome.
    pub async fn execute(&self, id: &str) -> DownloadOutcome {
        if self.layout.has_complete_artifacts(id) {
            debug!("⏭️ Artifacts already present for {}, skipping", id);
            return DownloadOutcome::skipped(id);
        }

        let metadata = match run_with_retry(&self.retry, "metadata", || self.remote.fetch_metadata(id)).await {
            Ok(metadata) => metadata,
            Err(e) => return DownloadOutcome::failed(id, format!("Failed to get video info: {}", e)),
        };
        debug!(
            "🎬 {} \"{}\" ({}s, declared {})",
            id,
            metadata.title,
            metadata.duration,
            metadata
                .dimension
                .map_or_else(|| "unknown size".to_string(), |d| d.to_string())
        );

        let streams = match run_with_retry(&self.retry, "playback urls", || {
            self.remote.fetch_stream_descriptors(id, metadata.cid)
        })
        .await
        {
            Ok(streams) => streams,
            Err(e) => return DownloadOutcome::failed(id, format!("Failed to get play URL: {}", e)),
        };

        if let Err(e) = self.layout.ensure_item_dir(id).await {
            return DownloadOutcome::failed(id, e.to_string());
        }

        let video_path = self.layout.video_stream(id);
        let audio_path = self.layout.audio_stream(id);
        let (video, audio) = tokio::join!(
            self.fetch_stream(&streams.video, &video_path),
            self.fetch_stream(&streams.audio, &audio_path),
        );

        let subtitle_count = if self.fetch_subtitles {
            self.fetch_subtitles_for(id, metadata.cid).await
        } else {
            0
        };

        let outcome = DownloadOutcome::from_transfers(id, video, audio, subtitle_count);
        info!(
            "📦 {} \"{}\": {:?} (video={}, audio={}, subtitles={})",
            id,
            metadata.title,
            outcome.status,
            outcome.video_downloaded,
            outcome.audio_downloaded,
            outcome.subtitle_count
        );
        outcome
    }

    async fn fetch_stream(&self, stream: &StreamDescriptor, dest: &Path) -> Result<(), String> {
        let label = format!("{:?} stream", stream.kind);
        match run_with_retry(&self.retry, &label, || self.remote.download_to_file(&stream.url, dest)).await {
            Ok(bytes) => {
                debug!("✅ {} saved to {} ({} bytes)", label, dest.display(), bytes);
                Ok(())
            }
            Err(e) => {
                warn!("❌ {} download failed for {}: {}", label, dest.display(), e);
                remove_partial(dest).await;
                Err(e.to_string())
            }
        }
    }

    /// Subtitle failures never affect the item status; they only lower the count
    async fn fetch_subtitles_for(&self, id: &str, cid: u64) -> u32 {
        let tracks = match run_with_retry(&self.retry, "subtitle list", || {
            self.remote.fetch_subtitle_list(id, cid)
        })
        .await
        {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("Subtitle list unavailable for {}: {}", id, e);
                return 0;
            }
        };

        let mut count = 0;
        for track in &tracks {
            match self.save_subtitle(id, track).await {
                Ok(()) => count += 1,
                Err(e) => warn!("Subtitle download failed: {} ({}): {}", id, track.language, e),
            }
        }
        count
    }

    async fn save_subtitle(&self, id: &str, track: &SubtitleTrack) -> Result<(), HarvestError> {
        let document = run_with_retry(&self.retry, "subtitle", || self.remote.fetch_subtitle(track)).await?;
        let path = self.layout.subtitle(id, &track.language);
        tokio::fs::write(&path, document.to_plain_text())
            .await
            .map_err(|e| HarvestError::io(&path, e))
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial file {}: {}", path.display(), e);
        }
    }
}
