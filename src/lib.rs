/// Cohort Harvester
///
/// Concurrent batch downloader for short-form video with resumable progress
/// tracking and a portrait-orientation selection loop.

pub mod artifacts;
pub mod candidates;
pub mod checkpoint;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod ids;
pub mod media;
pub mod outcome;
pub mod retry;
pub mod scheduler;
pub mod segments;
pub mod selection;
pub mod subtitle;
pub mod task;

// Re-export main types for easy access
pub use crate::artifacts::{ArtifactLayout, ExistingArtifactIndex};
pub use crate::checkpoint::{AcceptedSet, RejectedLedger};
pub use crate::classifier::{FfprobeFrameProbe, FrameDimensions, FrameProbe, PortraitClassifier, Verdict};
pub use crate::client::{BilibiliClient, RemoteFetch};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{HarvestError, RemoteError, Result};
pub use crate::media::{MediaTool, SliceReport};
pub use crate::outcome::{DownloadOutcome, DownloadStatistics, DownloadStatus, OutcomeLog};
pub use crate::retry::RetryPolicy;
pub use crate::scheduler::BatchScheduler;
pub use crate::segments::SegmentExtractor;
pub use crate::selection::{SelectionLoop, SelectionReport, Terminal};
pub use crate::task::DownloadTask;
