//! Portrait classifier: accept an artifact when its first frame is no wider
//! than it is tall.

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};
use crate::media::run_tool;

/// Width and height of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some(f64::from(self.width) / f64::from(self.height))
        }
    }
}

/// Reads the dimensions of the first frame of a media file
#[async_trait]
pub trait FrameProbe: Send + Sync {
    async fn first_frame_dimensions(&self, path: &Path) -> Result<FrameDimensions>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    frames: Vec<ProbeFrame>,
}

#[derive(Debug, Deserialize)]
struct ProbeFrame {
    width: Option<u32>,
    height: Option<u32>,
}

/// [`FrameProbe`] that decodes the first video frame with ffprobe
#[derive(Debug, Clone)]
pub struct FfprobeFrameProbe {
    ffprobe: String,
    timeout: Duration,
}

impl FfprobeFrameProbe {
    pub fn new(ffprobe: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FrameProbe for FfprobeFrameProbe {
    async fn first_frame_dimensions(&self, path: &Path) -> Result<FrameDimensions> {
        let mut args: Vec<OsString> = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-read_intervals",
            "%+#1",
            "-show_entries",
            "frame=width,height",
            "-of",
            "json",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(path.into());

        let output = run_tool(&self.ffprobe, args, self.timeout)
            .await
            .map_err(|e| HarvestError::Classify(e.to_string()))?;

        parse_probe_output(&output.stdout)
    }
}

fn parse_probe_output(stdout: &[u8]) -> Result<FrameDimensions> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| HarvestError::Classify(format!("unparseable probe output: {}", e)))?;

    let frame = parsed
        .frames
        .into_iter()
        .next()
        .ok_or_else(|| HarvestError::Classify("no decodable frame".to_string()))?;

    match (frame.width, frame.height) {
        (Some(width), Some(height)) => Ok(FrameDimensions::new(width, height)),
        _ => Err(HarvestError::Classify("frame has no dimensions".to_string())),
    }
}

/// Decision for one artifact
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept { width: u32, height: u32 },
    Reject { reason: String },
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

/// Fail-closed classifier: anything that cannot be measured is rejected
#[derive(Clone)]
pub struct PortraitClassifier {
    probe: Arc<dyn FrameProbe>,
}

impl PortraitClassifier {
    pub fn new(probe: Arc<dyn FrameProbe>) -> Self {
        Self { probe }
    }

    pub async fn classify(&self, path: &Path) -> Verdict {
        let dimensions = match self.probe.first_frame_dimensions(path).await {
            Ok(dimensions) => dimensions,
            Err(e) => {
                warn!("🔍 Could not probe {}: {}", path.display(), e);
                return Verdict::Reject {
                    reason: e.to_string(),
                };
            }
        };

        let verdict = match dimensions.aspect_ratio() {
            Some(ratio) if ratio <= 1.0 => Verdict::Accept {
                width: dimensions.width,
                height: dimensions.height,
            },
            Some(ratio) => Verdict::Reject {
                reason: format!(
                    "landscape {}x{} (ratio {:.2})",
                    dimensions.width, dimensions.height, ratio
                ),
            },
            None => Verdict::Reject {
                reason: format!("zero dimension {}x{}", dimensions.width, dimensions.height),
            },
        };

        debug!("🔍 {}: {:?}", path.display(), verdict);
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedProbe(std::result::Result<FrameDimensions, String>);

    #[async_trait]
    impl FrameProbe for FixedProbe {
        async fn first_frame_dimensions(&self, _path: &Path) -> Result<FrameDimensions> {
            self.0.clone().map_err(HarvestError::Classify)
        }
    }

    fn classifier(result: std::result::Result<FrameDimensions, String>) -> PortraitClassifier {
        PortraitClassifier::new(Arc::new(FixedProbe(result)))
    }

    #[tokio::test]
    async fn test_portrait_and_square_accepted() {
        let path = PathBuf::from("a.mp4");
        assert!(classifier(Ok(FrameDimensions::new(720, 1280))).classify(&path).await.is_accept());
        assert!(classifier(Ok(FrameDimensions::new(1080, 1080))).classify(&path).await.is_accept());
    }

    #[tokio::test]
    async fn test_landscape_zero_and_errors_rejected() {
        let path = PathBuf::from("a.mp4");
        assert!(!classifier(Ok(FrameDimensions::new(1920, 1080))).classify(&path).await.is_accept());
        assert!(!classifier(Ok(FrameDimensions::new(0, 1080))).classify(&path).await.is_accept());
        assert!(!classifier(Err("corrupt".into())).classify(&path).await.is_accept());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{"frames":[{"width":720,"height":1280}]}"#;
        assert_eq!(parse_probe_output(json).unwrap(), FrameDimensions::new(720, 1280));

        assert!(parse_probe_output(br#"{"frames":[]}"#).is_err());
        assert!(parse_probe_output(br#"{}"#).is_err());
        assert!(parse_probe_output(b"garbage").is_err());
    }
}
