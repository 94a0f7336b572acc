//! Resumable selection loop
//!
//! Drives download waves until enough portrait items have been accepted or
//! the candidate list runs dry. Accepted ids survive restarts through the
//! checkpoint; rejected ids through the ledger; merged items a previous run
//! left on disk through the startup scan.

use futures::future::join_all;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactLayout, ExistingArtifactIndex};
use crate::checkpoint::{AcceptedSet, RejectedLedger};
use crate::classifier::{PortraitClassifier, Verdict};
use crate::config::SelectionConfig;
use crate::error::Result;
use crate::media::MediaTool;
use crate::outcome::DownloadStatus;
use crate::scheduler::BatchScheduler;

/// How the loop ended. Both are successful exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Target count reached
    Done,
    /// Candidates ran out below the target
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionReport {
    pub terminal: Terminal,
    pub accepted: usize,
    pub target: usize,
    pub waves: usize,
    /// Items of this run with at least one stream downloaded
    pub downloaded: usize,
    /// Items rejected by this run
    pub rejected: usize,
}

impl fmt::Display for SelectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.terminal {
            Terminal::Done => "target reached",
            Terminal::Exhausted => "candidates exhausted",
        };
        write!(
            f,
            "{}: {}/{} accepted after {} waves ({} downloaded, {} rejected)",
            state, self.accepted, self.target, self.waves, self.downloaded, self.rejected
        )
    }
}

pub struct SelectionLoop {
    config: SelectionConfig,
    layout: ArtifactLayout,
    scheduler: BatchScheduler,
    classifier: PortraitClassifier,
    merger: Option<MediaTool>,
    accepted: AcceptedSet,
    rejected: RejectedLedger,
    last_save: Instant,
    rejected_this_run: usize,
}

impl SelectionLoop {
    /// Load the checkpoint and rejected ledger. No work is dispatched here.
    pub fn new(
        config: SelectionConfig,
        layout: ArtifactLayout,
        scheduler: BatchScheduler,
        classifier: PortraitClassifier,
        merger: Option<MediaTool>,
    ) -> Result<Self> {
        let accepted = AcceptedSet::load(&config.checkpoint_file);
        let rejected = RejectedLedger::read_or_create(&config.rejected_file)?;

        Ok(Self {
            config,
            layout,
            scheduler,
            classifier,
            merger,
            accepted,
            rejected,
            last_save: Instant::now(),
            rejected_this_run: 0,
        })
    }

    pub fn accepted(&self) -> &AcceptedSet {
        &self.accepted
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    fn target_met(&self) -> bool {
        self.accepted.len() >= self.config.target_count
    }

    /// Run until the target is met or `candidates` is exhausted
    pub async fn run(&mut self, candidates: Vec<String>) -> Result<SelectionReport> {
        let index = self.layout.scan_existing()?;
        self.classify_existing(&index).await;

        let mut queue: VecDeque<String> = candidates.into();
        let mut waves = 0;
        let mut downloaded = 0;

        info!(
            "🎯 Selection starting: {}/{} accepted, {} candidates, {} already on disk",
            self.accepted.len(),
            self.config.target_count,
            queue.len(),
            index.len()
        );

        let terminal = loop {
            if self.target_met() {
                break Terminal::Done;
            }

            let batch = self.next_batch(&mut queue, &index);
            if batch.is_empty() {
                break Terminal::Exhausted;
            }

            waves += 1;
            info!(
                "🌊 Wave {}: {} items ({} accepted, {} to go, {} candidates left)",
                waves,
                batch.len(),
                self.accepted.len(),
                self.config.target_count - self.accepted.len(),
                queue.len()
            );

            let outcomes = self.scheduler.run_batch(batch.clone()).await;
            downloaded += outcomes
                .iter()
                .filter(|o| matches!(o.status, DownloadStatus::Success | DownloadStatus::Partial))
                .count();

            self.merge_wave(&batch).await;

            for id in &batch {
                if self.target_met() {
                    info!("🎯 Target reached mid-wave, stopping early");
                    break;
                }
                if self.layout.locate_playable(id).is_some() {
                    self.classify_item(id).await;
                    self.maybe_checkpoint().await;
                }
            }

            self.checkpoint().await;
        };

        self.checkpoint().await;

        let report = SelectionReport {
            terminal,
            accepted: self.accepted.len(),
            target: self.config.target_count,
            waves,
            downloaded,
            rejected: self.rejected_this_run,
        };
        match terminal {
            Terminal::Done => info!("🎉 {}", report),
            Terminal::Exhausted => warn!("⚠️ {}", report),
        }
        Ok(report)
    }

    /// Classify items a previous run materialized but never decided on
    async fn classify_existing(&mut self, index: &ExistingArtifactIndex) {
        let pending: Vec<String> = index
            .iter()
            .filter(|id| !self.accepted.contains(id) && !self.rejected.contains(id))
            .cloned()
            .collect();

        if pending.is_empty() {
            return;
        }

        info!("🔍 Classifying {} items already on disk", pending.len());
        for id in &pending {
            self.classify_item(id).await;
        }
        self.checkpoint().await;
    }

    /// Pop up to `batch_size` ids nobody has decided on yet
    fn next_batch(&self, queue: &mut VecDeque<String>, index: &ExistingArtifactIndex) -> Vec<String> {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        while batch.len() < self.config.batch_size {
            let Some(id) = queue.pop_front() else {
                break;
            };
            if self.accepted.contains(&id) || index.contains(&id) || self.rejected.contains(&id) {
                debug!("⏭️ {} already decided, not dispatching", id);
                continue;
            }
            batch.push(id);
        }
        batch
    }

    /// Mux every item of the wave that has both streams but no merged file
    async fn merge_wave(&self, batch: &[String]) {
        let Some(merger) = &self.merger else {
            return;
        };

        let pending: Vec<&String> = batch
            .iter()
            .filter(|id| self.layout.has_stream_pair(id) && self.layout.find_merged(id).is_none())
            .collect();
        if pending.is_empty() {
            return;
        }

        info!("🎞️ Merging {} items", pending.len());
        let merges = pending.iter().map(|id| async move {
            let result = merger
                .merge_streams(
                    &self.layout.video_stream(id),
                    &self.layout.audio_stream(id),
                    &self.layout.merged(id),
                )
                .await;
            (*id, result)
        });

        for (id, result) in join_all(merges).await {
            if let Err(e) = result {
                warn!("Merge failed for {}, classifying the video stream: {}", id, e);
            }
        }
    }

    async fn classify_item(&mut self, id: &str) {
        let Some(path) = self.layout.locate_playable(id) else {
            debug!("No playable artifact for {}", id);
            return;
        };

        match self.classifier.classify(&path).await {
            Verdict::Accept { width, height } => {
                self.accepted.insert(id);
                info!(
                    "✅ Accepted {} ({}x{}), {}/{}",
                    id,
                    width,
                    height,
                    self.accepted.len(),
                    self.config.target_count
                );
            }
            Verdict::Reject { reason } => {
                info!("🗑️ Rejected {}: {}", id, reason);
                if let Err(e) = self.layout.remove_item(id).await {
                    warn!("Could not delete rejected item {}: {}", id, e);
                }
                if let Err(e) = self.rejected.push(id) {
                    error!("Failed to record rejection of {}: {}", id, e);
                }
                self.rejected_this_run += 1;
            }
        }
    }

    async fn maybe_checkpoint(&mut self) {
        let interval = Duration::from_secs(self.config.save_interval_secs);
        if self.last_save.elapsed() >= interval {
            self.checkpoint().await;
        }
    }

    async fn checkpoint(&mut self) {
        match self.accepted.persist().await {
            Ok(()) => {
                self.last_save = Instant::now();
                info!("💾 Progress saved: {} accepted", self.accepted.len());
            }
            Err(e) => error!(
                "Failed to save checkpoint {}: {}",
                self.accepted.path().display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let report = SelectionReport {
            terminal: Terminal::Exhausted,
            accepted: 2,
            target: 3,
            waves: 2,
            downloaded: 4,
            rejected: 2,
        };
        assert_eq!(
            report.to_string(),
            "candidates exhausted: 2/3 accepted after 2 waves (4 downloaded, 2 rejected)"
        );
    }
}
