//! yt-dlp backed extractor
//!
//! `yt-dlp --dump-single-json` resolves the source page to a direct media URL
//! plus metadata without downloading anything; the media itself is then
//! streamed over HTTP with the request headers yt-dlp reports.

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ExtractError, ExtractedMedia, MediaExtractor, MediaMetadata};
use crate::config::env_or;

pub const DEFAULT_BINARY: &str = "yt-dlp";
pub const DEFAULT_FORMAT: &str = "bestaudio/best";
pub const DEFAULT_MAX_DURATION_SECS: u64 = 600;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// YouTube watch and short links, e.g. `https://youtu.be/dQw4w9WgXcQ`
pub const YOUTUBE_SOURCE_PATTERN: &str =
    r"^(https?://)?(www\.)?(youtube\.com/watch\?v=|youtu\.be/)[A-Za-z0-9_-]{11}(&.*)?$";

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub binary: String,
    pub format: String,
    pub max_duration_secs: u64,
    /// Regex a source reference must match; any http(s) URL when unset
    pub allowed_sources: Option<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            allowed_sources: None,
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            binary: env::var("EXTRACTOR_BINARY").unwrap_or_else(|_| DEFAULT_BINARY.to_string()),
            format: env::var("EXTRACTOR_FORMAT").unwrap_or_else(|_| DEFAULT_FORMAT.to_string()),
            max_duration_secs: env_or("EXTRACTOR_MAX_DURATION_SECS", DEFAULT_MAX_DURATION_SECS)?,
            allowed_sources: env::var("EXTRACTOR_ALLOWED_SOURCES")
                .ok()
                .filter(|p| !p.trim().is_empty()),
        })
    }
}

/// The subset of yt-dlp's info JSON this extractor reads
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    acodec: Option<String>,
    ext: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

/// Everything needed to open the media stream
#[derive(Debug, Clone, PartialEq)]
struct ResolvedSource {
    media_url: String,
    headers: HashMap<String, String>,
    ext: Option<String>,
    size_hint: Option<u64>,
    metadata: MediaMetadata,
}

pub struct YtDlpExtractor {
    config: ExtractorConfig,
    allowed_sources: Option<Regex>,
    http: reqwest::Client,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> anyhow::Result<Self> {
        let allowed_sources = config
            .allowed_sources
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| anyhow::anyhow!("Invalid EXTRACTOR_ALLOWED_SOURCES pattern: {}", e))?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            config,
            allowed_sources,
            http,
        })
    }

    fn validate_source(&self, source_ref: &str) -> Result<(), ExtractError> {
        let url = Url::parse(source_ref)
            .map_err(|e| ExtractError::UnresolvableSource(format!("not a URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExtractError::UnresolvableSource(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        if let Some(pattern) = &self.allowed_sources {
            if !pattern.is_match(source_ref) {
                return Err(ExtractError::UnresolvableSource(
                    "source is not on the allow-list".to_string(),
                ));
            }
        }

        Ok(())
    }

    async fn inspect(&self, source_ref: &str) -> Result<YtDlpInfo, ExtractError> {
        let output = tokio::process::Command::new(&self.config.binary)
            .arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--format")
            .arg(&self.config.format)
            .arg("--")
            .arg(source_ref)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ExtractError::UnresolvableSource(format!(
                    "failed to run {}: {e}",
                    self.config.binary
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output")
                .trim()
                .to_string();
            return Err(ExtractError::UnresolvableSource(reason));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ExtractError::UnresolvableSource(format!("unreadable yt-dlp output: {e}"))
        })
    }

    fn check_info(&self, info: YtDlpInfo) -> Result<ResolvedSource, ExtractError> {
        let media_url = info.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            ExtractError::UnresolvableSource("no direct media URL for the requested format".into())
        })?;

        if let Some(duration) = info.duration {
            if duration > self.config.max_duration_secs as f64 {
                return Err(ExtractError::UnresolvableSource(format!(
                    "duration {duration:.0}s exceeds the {}s limit",
                    self.config.max_duration_secs
                )));
            }
        }

        Ok(ResolvedSource {
            media_url,
            headers: info.http_headers,
            ext: info.ext,
            size_hint: info.filesize.or(info.filesize_approx),
            metadata: MediaMetadata {
                title: info.title,
                duration_secs: info.duration,
                codec: info.acodec.filter(|c| c != "none"),
            },
        })
    }

    async fn open_stream(&self, source: ResolvedSource) -> Result<ExtractedMedia, ExtractError> {
        let response = self
            .http
            .get(&source.media_url)
            .headers(header_map(&source.headers))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::ExtractionTimeout
                } else {
                    ExtractError::UnresolvableSource(format!("media request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::UnresolvableSource(format!(
                "media request returned {status}"
            )));
        }

        let header_mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .filter(|m| *m != mime::APPLICATION_OCTET_STREAM)
            .map(|m| m.essence_str().to_string());
        let mime_type = header_mime
            .unwrap_or_else(|| mime_for_extension(source.ext.as_deref()).to_string());

        let size_bytes = response.content_length().or(source.size_hint);

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(std::io::Error::other))
            .boxed();

        Ok(ExtractedMedia {
            stream,
            size_bytes,
            mime_type,
            metadata: source.metadata,
        })
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    #[instrument(skip(self))]
    async fn resolve(&self, source_ref: &str) -> Result<ExtractedMedia, ExtractError> {
        self.validate_source(source_ref)?;

        let info = self.inspect(source_ref).await?;
        let source = self.check_info(info)?;
        debug!(
            title = ?source.metadata.title,
            duration_secs = ?source.metadata.duration_secs,
            "Resolved media source"
        );

        let media = self.open_stream(source).await?;
        info!(
            mime_type = %media.mime_type,
            size_bytes = ?media.size_bytes,
            "Opened media stream"
        );
        Ok(media)
    }
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            },
            _ => warn!(header = %name, "Skipping unusable header reported by yt-dlp"),
        }
    }
    map
}

fn mime_for_extension(ext: Option<&str>) -> &'static str {
    match ext.map(str::to_ascii_lowercase).as_deref() {
        Some("webm") | Some("weba") => "audio/webm",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("opus") | Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}
