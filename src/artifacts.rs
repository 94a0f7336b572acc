//! On-disk layout of harvested items and the existing-artifact scan

use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{HarvestError, Result};
use crate::subtitle::sanitize_filename;

const VIDEO_SUFFIX: &str = "_video.mp4";
const AUDIO_SUFFIX: &str = "_audio.mp4";
const MEDIA_EXTENSION: &str = "mp4";

fn slice_pattern() -> &'static Regex {
    static SLICE: OnceLock<Regex> = OnceLock::new();
    SLICE.get_or_init(|| Regex::new(r"(_temp)?_0-\d+s\.[^.]+$").expect("valid regex"))
}

/// Whether a file name is a slice (or a temporary slice source)
pub fn is_slice_file(name: &str) -> bool {
    slice_pattern().is_match(name)
}

/// Whether a file name is a merged, playable media file
pub fn is_merged_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case(MEDIA_EXTENSION))
        && !name.ends_with(VIDEO_SUFFIX)
        && !name.ends_with(AUDIO_SUFFIX)
        && !is_slice_file(name)
}

/// Paths of everything stored for one work item under `{root}/{id}/`
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn video_stream(&self, id: &str) -> PathBuf {
        self.item_dir(id).join(format!("{}{}", id, VIDEO_SUFFIX))
    }

    pub fn audio_stream(&self, id: &str) -> PathBuf {
        self.item_dir(id).join(format!("{}{}", id, AUDIO_SUFFIX))
    }

    /// Where the merge step writes its output
    pub fn merged(&self, id: &str) -> PathBuf {
        self.item_dir(id).join(format!("{}.{}", id, MEDIA_EXTENSION))
    }

    pub fn subtitle(&self, id: &str, language: &str) -> PathBuf {
        self.item_dir(id)
            .join(format!("{}_{}.txt", id, sanitize_filename(language)))
    }

    /// Any merged media file already in the item directory
    pub fn find_merged(&self, id: &str) -> Option<PathBuf> {
        let preferred = self.merged(id);
        if preferred.is_file() {
            return Some(preferred);
        }

        let entries = std::fs::read_dir(self.item_dir(id)).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map_or(false, is_merged_file)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    pub fn has_stream_pair(&self, id: &str) -> bool {
        self.video_stream(id).is_file() && self.audio_stream(id).is_file()
    }

    /// Both target artifacts are present, either as the two elementary
    /// streams or as their merge
    pub fn has_complete_artifacts(&self, id: &str) -> bool {
        self.has_stream_pair(id) || self.find_merged(id).is_some()
    }

    /// File the classifier should look at: the merge, else the video stream
    pub fn locate_playable(&self, id: &str) -> Option<PathBuf> {
        self.find_merged(id).or_else(|| {
            let video = self.video_stream(id);
            video.is_file().then_some(video)
        })
    }

    pub async fn ensure_item_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.item_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| HarvestError::io(&dir, e))?;
        Ok(dir)
    }

    /// Delete everything stored for an item
    pub async fn remove_item(&self, id: &str) -> Result<()> {
        let dir = self.item_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarvestError::io(&dir, e)),
        }
    }

    /// Build the index of items a previous run already materialized.
    ///
    /// Must complete before any download of the same run starts.
    pub fn scan_existing(&self) -> Result<ExistingArtifactIndex> {
        let mut ids = BTreeSet::new();
        if !self.root.exists() {
            return Ok(ExistingArtifactIndex { ids });
        }

        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str() else {
                continue;
            };
            if self.find_merged(id).is_some() {
                ids.insert(id.to_string());
            }
        }

        debug!("📁 Found {} existing items under {}", ids.len(), self.root.display());
        Ok(ExistingArtifactIndex { ids })
    }
}

/// Ids whose merged media file is already on disk, captured once at startup
#[derive(Debug, Clone, Default)]
pub struct ExistingArtifactIndex {
    ids: BTreeSet<String>,
}

impl ExistingArtifactIndex {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }
}

impl FromIterator<String> for ExistingArtifactIndex {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_classes() {
        assert!(is_merged_file("BV1xx411c7mD.mp4"));
        assert!(!is_merged_file("BV1xx411c7mD_video.mp4"));
        assert!(!is_merged_file("BV1xx411c7mD_audio.mp4"));
        assert!(!is_merged_file("BV1xx411c7mD_video_0-12s.mp4"));
        assert!(!is_merged_file("BV1xx411c7mD_temp_0-24s.mp4"));
        assert!(!is_merged_file("BV1xx411c7mD_中文.txt"));
        assert!(is_slice_file("x_audio_0-2s.mp4"));
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("/data");
        assert_eq!(layout.video_stream("A"), PathBuf::from("/data/A/A_video.mp4"));
        assert_eq!(layout.audio_stream("A"), PathBuf::from("/data/A/A_audio.mp4"));
        assert_eq!(layout.merged("A"), PathBuf::from("/data/A/A.mp4"));
        assert_eq!(layout.subtitle("A", "en/US"), PathBuf::from("/data/A/A_en_US.txt"));
    }

    #[tokio::test]
    async fn test_scan_existing_only_counts_merged_items() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());

        layout.ensure_item_dir("merged").await.unwrap();
        std::fs::write(layout.merged("merged"), b"m").unwrap();

        layout.ensure_item_dir("streams").await.unwrap();
        std::fs::write(layout.video_stream("streams"), b"v").unwrap();
        std::fs::write(layout.audio_stream("streams"), b"a").unwrap();

        layout.ensure_item_dir("renamed").await.unwrap();
        std::fs::write(layout.item_dir("renamed").join("other.mp4"), b"m").unwrap();

        std::fs::write(temp_dir.path().join("download_records.csv"), b"").unwrap();

        let index = layout.scan_existing().unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains("merged"));
        assert!(index.contains("renamed"));
        assert!(!index.contains("streams"));
    }

    #[tokio::test]
    async fn test_locate_playable_prefers_merge() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        layout.ensure_item_dir("A").await.unwrap();

        assert_eq!(layout.locate_playable("A"), None);
        std::fs::write(layout.video_stream("A"), b"v").unwrap();
        assert_eq!(layout.locate_playable("A"), Some(layout.video_stream("A")));
        assert!(!layout.has_complete_artifacts("A"));

        std::fs::write(layout.merged("A"), b"m").unwrap();
        assert_eq!(layout.locate_playable("A"), Some(layout.merged("A")));
        assert!(layout.has_complete_artifacts("A"));
    }

    #[tokio::test]
    async fn test_remove_item_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        layout.ensure_item_dir("A").await.unwrap();
        std::fs::write(layout.video_stream("A"), b"v").unwrap();

        layout.remove_item("A").await.unwrap();
        assert!(!layout.item_dir("A").exists());
        layout.remove_item("A").await.unwrap();
    }
}
