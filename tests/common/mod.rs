#![allow(dead_code)]

use async_trait::async_trait;
use cohort_harvester::client::{
    RemoteFetch, StreamDescriptor, StreamKind, StreamPair, SubtitleTrack, VideoMetadata,
};
use cohort_harvester::subtitle::{SubtitleDocument, SubtitleLine};
use cohort_harvester::{
    ArtifactLayout, BatchScheduler, DownloadTask, FrameDimensions, FrameProbe, HarvestError,
    OutcomeLog, PortraitClassifier, RemoteError, RetryPolicy,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process platform: every id exists unless configured otherwise
#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
    api_errors: HashSet<String>,
    failing_audio: HashSet<String>,
    panicking: HashSet<String>,
    delays: HashMap<String, Duration>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    subtitles: bool,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_error(mut self, id: &str) -> Self {
        self.api_errors.insert(id.to_string());
        self
    }

    pub fn with_failing_audio(mut self, id: &str) -> Self {
        self.failing_audio.insert(id.to_string());
        self
    }

    pub fn with_panic(mut self, id: &str) -> Self {
        self.panicking.insert(id.to_string());
        self
    }

    pub fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    /// Metadata latency for every id without its own delay
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Most metadata requests ever outstanding at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn with_subtitles(mut self) -> Self {
        self.subtitles = true;
        self
    }

    /// Network calls of any kind made for `id`
    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn record(&self, id: &str) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(id.to_string()).or_default() += 1;
    }
}

fn id_from_url(url: &str) -> &str {
    url.trim_start_matches("fake://").split('/').next().unwrap_or_default()
}

#[async_trait]
impl RemoteFetch for FakeRemote {
    async fn fetch_metadata(&self, id: &str) -> Result<VideoMetadata, RemoteError> {
        self.record(id);
        if self.panicking.contains(id) {
            panic!("metadata handler crashed for {}", id);
        }
        if self.api_errors.contains(id) {
            return Err(RemoteError::Api {
                code: -404,
                message: "video does not exist".to_string(),
            });
        }
        if let Some(delay) = self.delays.get(id).copied().or(self.latency) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(VideoMetadata {
            cid: 1000 + id.len() as u64,
            title: format!("title of {}", id),
            ..VideoMetadata::default()
        })
    }

    async fn fetch_stream_descriptors(&self, id: &str, _cid: u64) -> Result<StreamPair, RemoteError> {
        self.record(id);
        Ok(StreamPair {
            video: StreamDescriptor {
                kind: StreamKind::Video,
                url: format!("fake://{}/video", id),
            },
            audio: StreamDescriptor {
                kind: StreamKind::Audio,
                url: format!("fake://{}/audio", id),
            },
        })
    }

    async fn fetch_subtitle_list(&self, id: &str, _cid: u64) -> Result<Vec<SubtitleTrack>, RemoteError> {
        self.record(id);
        if !self.subtitles {
            return Ok(Vec::new());
        }
        Ok(vec![
            SubtitleTrack {
                url: format!("fake://{}/sub/zh", id),
                language: "中文（自动生成）".to_string(),
            },
            SubtitleTrack {
                url: format!("fake://{}/sub/broken", id),
                language: "en/US".to_string(),
            },
        ])
    }

    async fn fetch_subtitle(&self, track: &SubtitleTrack) -> Result<SubtitleDocument, RemoteError> {
        self.record(id_from_url(&track.url));
        if track.url.ends_with("broken") {
            return Err(RemoteError::Malformed("truncated subtitle".to_string()));
        }
        Ok(SubtitleDocument {
            body: vec![
                SubtitleLine {
                    from: 0.0,
                    to: 1.5,
                    content: "first line".to_string(),
                },
                SubtitleLine {
                    from: 1.5,
                    to: 3.0,
                    content: "second line".to_string(),
                },
            ],
        })
    }

    async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, HarvestError> {
        let id = id_from_url(url);
        self.record(id);
        if url.ends_with("/audio") && self.failing_audio.contains(id) {
            tokio::fs::write(dest, b"partial").await.map_err(|e| HarvestError::io(dest, e))?;
            return Err(HarvestError::io(
                dest,
                std::io::Error::new(std::io::ErrorKind::Other, "stream cut off"),
            ));
        }
        let body = url.as_bytes();
        tokio::fs::write(dest, body).await.map_err(|e| HarvestError::io(dest, e))?;
        Ok(body.len() as u64)
    }
}

/// Frame probe answering from a table keyed by the id prefix of the file name
#[derive(Default)]
pub struct FakeProbe {
    dimensions: HashMap<String, FrameDimensions>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn portrait(mut self, id: &str) -> Self {
        self.dimensions.insert(id.to_string(), FrameDimensions::new(720, 1280));
        self
    }

    pub fn landscape(mut self, id: &str) -> Self {
        self.dimensions.insert(id.to_string(), FrameDimensions::new(1920, 1080));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameProbe for FakeProbe {
    async fn first_frame_dimensions(&self, path: &Path) -> cohort_harvester::Result<FrameDimensions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let id = stem.split('_').next().unwrap_or_default();
        self.dimensions
            .get(id)
            .copied()
            .ok_or_else(|| HarvestError::Classify(format!("cannot decode {}", path.display())))
    }
}

pub fn task(remote: Arc<FakeRemote>, root: &Path) -> DownloadTask {
    DownloadTask::new(remote, ArtifactLayout::new(root), RetryPolicy::none(), true)
}

pub fn scheduler(remote: Arc<FakeRemote>, root: &Path, workers: usize) -> BatchScheduler {
    BatchScheduler::new(
        task(remote, root),
        workers,
        OutcomeLog::open(root.join("download_records.csv")).unwrap(),
    )
}

pub fn classifier(probe: Arc<FakeProbe>) -> PortraitClassifier {
    PortraitClassifier::new(probe)
}
