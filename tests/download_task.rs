mod common;

use cohort_harvester::{ArtifactLayout, DownloadStatus};
use common::{task, FakeRemote};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_successful_download_writes_streams_and_subtitles() {
    let temp_dir = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::new().with_subtitles());
    let task = task(remote.clone(), temp_dir.path());
    let layout = ArtifactLayout::new(temp_dir.path());

    let outcome = task.execute("BV1ok").await;

    assert_eq!(outcome.status, DownloadStatus::Success);
    assert!(outcome.video_downloaded && outcome.audio_downloaded);
    assert!(outcome.error_message.is_empty());
    assert!(layout.video_stream("BV1ok").is_file());
    assert!(layout.audio_stream("BV1ok").is_file());

    // The broken track is logged and skipped
    assert_eq!(outcome.subtitle_count, 1);
    let text = std::fs::read_to_string(layout.subtitle("BV1ok", "中文（自动生成）")).unwrap();
    assert_eq!(text, "first line\nsecond line\n");
    assert!(!layout.subtitle("BV1ok", "en/US").exists());
}

#[tokio::test]
async fn test_rerun_is_skipped_without_network_calls() {
    let temp_dir = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::new());
    let task = task(remote.clone(), temp_dir.path());

    let first = task.execute("BV1again").await;
    assert_eq!(first.status, DownloadStatus::Success);
    let calls_after_first = remote.calls_for("BV1again");

    for _ in 0..2 {
        let outcome = task.execute("BV1again").await;
        assert_eq!(outcome.status, DownloadStatus::Skipped);
        assert!(!outcome.video_downloaded && !outcome.audio_downloaded);
        assert!(outcome.is_consistent());
    }
    assert_eq!(remote.calls_for("BV1again"), calls_after_first);
}

#[tokio::test]
async fn test_merged_file_counts_as_complete() {
    let temp_dir = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::new());
    let layout = ArtifactLayout::new(temp_dir.path());
    layout.ensure_item_dir("BV1merged").await.unwrap();
    std::fs::write(layout.merged("BV1merged"), b"muxed").unwrap();

    let outcome = task(remote.clone(), temp_dir.path()).execute("BV1merged").await;

    assert_eq!(outcome.status, DownloadStatus::Skipped);
    assert_eq!(remote.total_calls(), 0);
}

#[tokio::test]
async fn test_api_error_code_fails_before_any_download() {
    let temp_dir = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::new().with_api_error("BV1gone"));
    let layout = ArtifactLayout::new(temp_dir.path());

    let outcome = task(remote.clone(), temp_dir.path()).execute("BV1gone").await;

    assert_eq!(outcome.status, DownloadStatus::Failed);
    assert!(!outcome.video_downloaded);
    assert!(!outcome.audio_downloaded);
    assert!(outcome.error_message.contains("-404"), "{}", outcome.error_message);
    assert_eq!(remote.calls_for("BV1gone"), 1);
    assert!(!layout.item_dir("BV1gone").exists());
    assert!(!layout.scan_existing().unwrap().contains("BV1gone"));
}

#[tokio::test]
async fn test_one_failed_stream_is_partial() {
    let temp_dir = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::new().with_failing_audio("BV1half"));
    let layout = ArtifactLayout::new(temp_dir.path());

    let outcome = task(remote, temp_dir.path()).execute("BV1half").await;

    assert_eq!(outcome.status, DownloadStatus::Partial);
    assert!(outcome.video_downloaded);
    assert!(!outcome.audio_downloaded);
    assert!(outcome.error_message.starts_with("audio download failed"));
    assert!(outcome.is_consistent());

    // The partial audio file is cleaned up so a rerun does not skip the item
    assert!(!layout.audio_stream("BV1half").exists());
    assert!(!layout.has_complete_artifacts("BV1half"));
}
