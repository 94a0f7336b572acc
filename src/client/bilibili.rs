use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{RemoteFetch, StreamDescriptor, StreamKind, StreamPair, SubtitleTrack, VideoMetadata};
use crate::config::ApiConfig;
use crate::error::{HarvestError, RemoteError};
use crate::subtitle::SubtitleDocument;

/// `{code, message, data}` wrapper around every API payload
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn into_data(self) -> Result<T, RemoteError> {
        if self.code != 0 {
            return Err(RemoteError::Api {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| RemoteError::Malformed("response has no data field".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct PlayUrlData {
    dash: Option<Dash>,
}

#[derive(Debug, Deserialize)]
struct Dash {
    #[serde(default)]
    video: Vec<DashStream>,
    #[serde(default)]
    audio: Option<Vec<DashStream>>,
}

#[derive(Debug, Deserialize)]
struct DashStream {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    subtitle: Option<SubtitleInfo>,
}

#[derive(Debug, Deserialize)]
struct SubtitleInfo {
    #[serde(default)]
    subtitles: Vec<RawSubtitle>,
}

#[derive(Debug, Deserialize)]
struct RawSubtitle {
    subtitle_url: String,
    lan_doc: String,
}

/// HTTP implementation of [`RemoteFetch`]
#[derive(Clone)]
pub struct BilibiliClient {
    client: Client,
    base_url: String,
    quality: u32,
    fnval: u32,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl BilibiliClient {
    pub fn new(config: &ApiConfig) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| HarvestError::Config(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&config.referer)
                .map_err(|e| HarvestError::Config(format!("invalid referer: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(RemoteError::from)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            quality: config.quality,
            fnval: config.fnval,
            request_timeout: config.request_timeout(),
            download_timeout: config.download_timeout(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::Malformed(format!("{} from {}", e, url)))
    }

    async fn get_api<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let envelope: ApiEnvelope<T> = self.get_json(&url, query).await?;
        envelope.into_data()
    }
}

/// Subtitle URLs come back protocol-relative
fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

fn stream_error(dest: &Path, err: reqwest::Error) -> HarvestError {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::ConnectionAborted
    };
    HarvestError::io(dest, io::Error::new(kind, err))
}

#[async_trait]
impl RemoteFetch for BilibiliClient {
    async fn fetch_metadata(&self, id: &str) -> Result<VideoMetadata, RemoteError> {
        self.get_api("/x/web-interface/view", &[("bvid", id.to_string())])
            .await
    }

    async fn fetch_stream_descriptors(&self, id: &str, cid: u64) -> Result<StreamPair, RemoteError> {
        let data: PlayUrlData = self
            .get_api(
                "/x/player/playurl",
                &[
                    ("bvid", id.to_string()),
                    ("cid", cid.to_string()),
                    ("qn", self.quality.to_string()),
                    ("fnval", self.fnval.to_string()),
                ],
            )
            .await?;

        let dash = data
            .dash
            .ok_or_else(|| RemoteError::Malformed(format!("no DASH streams for {}", id)))?;
        let video = dash
            .video
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Malformed(format!("no video stream for {}", id)))?;
        let audio = dash
            .audio
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Malformed(format!("no audio stream for {}", id)))?;

        Ok(StreamPair {
            video: StreamDescriptor {
                kind: StreamKind::Video,
                url: video.base_url,
            },
            audio: StreamDescriptor {
                kind: StreamKind::Audio,
                url: audio.base_url,
            },
        })
    }

    async fn fetch_subtitle_list(&self, id: &str, cid: u64) -> Result<Vec<SubtitleTrack>, RemoteError> {
        let data: PlayerData = self
            .get_api(
                "/x/player/v2",
                &[("bvid", id.to_string()), ("cid", cid.to_string())],
            )
            .await?;

        Ok(data
            .subtitle
            .map(|info| info.subtitles)
            .unwrap_or_default()
            .into_iter()
            .map(|raw| SubtitleTrack {
                url: absolute_url(&raw.subtitle_url),
                language: raw.lan_doc,
            })
            .collect())
    }

    async fn fetch_subtitle(&self, track: &SubtitleTrack) -> Result<SubtitleDocument, RemoteError> {
        self.get_json(&track.url, &[]).await
    }

    async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, HarvestError> {
        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(RemoteError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| HarvestError::io(dest, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|e| stream_error(dest, e))?;
            file.write_all(&data)
                .await
                .map_err(|e| HarvestError::io(dest, e))?;
            written += data.len() as u64;
        }
        file.flush().await.map_err(|e| HarvestError::io(dest, e))?;

        debug!("💾 Wrote {} bytes to {}", written, dest.display());
        Ok(written)
    }
}
