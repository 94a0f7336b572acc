use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::artifacts::ArtifactLayout;
use crate::client::BilibiliClient;
use crate::config::{clamp_workers, Config};
use crate::error::Result;
use crate::outcome::{DownloadOutcome, DownloadStatistics, DownloadStatus, OutcomeLog};
use crate::task::DownloadTask;

/// Runs download tasks over a work list with bounded concurrency
pub struct BatchScheduler {
    task: DownloadTask,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    log: OutcomeLog,
}

impl BatchScheduler {
    pub fn new(task: DownloadTask, max_workers: usize, log: OutcomeLog) -> Self {
        let max_workers = max_workers.max(1);
        info!("🔧 Initializing BatchScheduler with {} workers", max_workers);

        Self {
            task,
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            max_concurrent: max_workers,
            log,
        }
    }

    /// Wire the HTTP client, task and outcome table from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let remote = Arc::new(BilibiliClient::new(&config.api)?);
        let layout = ArtifactLayout::new(&config.download.output_root);
        let task = DownloadTask::new(
            remote,
            layout,
            config.api.retry.policy(),
            config.download.fetch_subtitles,
        );
        let log = OutcomeLog::open(config.download.records_path())?;

        Ok(Self::new(task, clamp_workers(config.download.max_workers), log))
    }

    /// Download every id, returning this batch's outcomes in completion order.
    ///
    /// The outcome table is flushed after every completed task, so a crash
    /// loses at most the tasks still in flight.
    pub async fn run_batch(&mut self, ids: Vec<String>) -> Vec<DownloadOutcome> {
        let total = ids.len();
        if total == 0 {
            return Vec::new();
        }

        let start_time = Instant::now();
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);

        for id in ids {
            let task = self.task.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);

            tokio::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let _ = tx.send(DownloadOutcome::failed(&id, "worker pool closed")).await;
                        return;
                    }
                };

                // Run the item in its own task so a panic is contained to it
                let worker_id = id.clone();
                let handle = tokio::spawn(async move { task.execute(&worker_id).await });
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("💥 Download task for {} aborted: {}", id, e);
                        DownloadOutcome::failed(&id, format!("task aborted: {}", e))
                    }
                };
                drop(permit);

                if let Err(e) = tx.send(outcome).await {
                    error!("Failed to send result: {}", e);
                }
            });
        }

        // Drop the original sender to close the channel when all tasks complete
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            match outcome.status {
                DownloadStatus::Failed | DownloadStatus::Partial => {
                    warn!("⚠️ {}: {:?} - {}", outcome.bvid, outcome.status, outcome.error_message);
                }
                _ => {}
            }

            self.log.push(outcome.clone());
            if let Err(e) = self.log.flush().await {
                error!("Failed to persist outcome table {}: {}", self.log.path().display(), e);
            }

            outcomes.push(outcome);
            info!("📥 Download progress: {}/{}", outcomes.len(), total);
        }

        info!(
            "🏁 Batch of {} finished in {:.1}s",
            total,
            start_time.elapsed().as_secs_f64()
        );
        outcomes
    }

    pub fn log(&self) -> &OutcomeLog {
        &self.log
    }

    pub fn statistics(&self) -> DownloadStatistics {
        self.log.statistics()
    }

    pub fn max_workers(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.worker_semaphore.available_permits()
    }
}
