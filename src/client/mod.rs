/// Remote fetch client
///
/// The [`RemoteFetch`] trait is the seam between download tasks and the
/// platform. [`BilibiliClient`] talks HTTP; tests substitute in-process fakes.
pub mod bilibili;

pub use bilibili::BilibiliClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{HarvestError, RemoteError};
use crate::subtitle::SubtitleDocument;

/// Metadata of one work item
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VideoMetadata {
    /// Internal content id, required by the playback and subtitle endpoints
    pub cid: u64,
    #[serde(default)]
    pub title: String,
    /// Duration in seconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub dimension: Option<Dimension>,
}

/// Declared frame size of a work item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub rotate: u32,
}

impl Dimension {
    /// Width and height as played back; `rotate == 1` swaps the stored pair
    pub fn displayed(&self) -> (u32, u32) {
        if self.rotate == 1 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.displayed();
        write!(f, "{}x{}", width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

/// Resolved, time-limited stream URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub url: String,
}

/// The two elementary streams of a work item
#[derive(Debug, Clone)]
pub struct StreamPair {
    pub video: StreamDescriptor,
    pub audio: StreamDescriptor,
}

/// One available subtitle track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    pub url: String,
    pub language: String,
}

/// Operations against the remote platform.
///
/// Implementations never retry; callers decide on retry policy.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch_metadata(&self, id: &str) -> Result<VideoMetadata, RemoteError>;

    async fn fetch_stream_descriptors(&self, id: &str, cid: u64) -> Result<StreamPair, RemoteError>;

    async fn fetch_subtitle_list(&self, id: &str, cid: u64) -> Result<Vec<SubtitleTrack>, RemoteError>;

    async fn fetch_subtitle(&self, track: &SubtitleTrack) -> Result<SubtitleDocument, RemoteError>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// A failure mid-stream leaves a partial file behind; cleaning it up is
    /// the caller's job.
    async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, HarvestError>;
}
