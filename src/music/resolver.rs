use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No results found for `{0}`")]
    NotFound(String),
    #[error("Could not resolve `{query}`: {reason}")]
    Transient { query: String, reason: String },
}

/// What a resolver hands back for a single query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub stream_url: String,
    pub title: String,
    pub external_id: Option<String>,
    pub duration_secs: u64,
}

/// Translates a search query or URL into a playable stream descriptor.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolveError>;
}

/// yt-dlp backed resolver. One process invocation per call, no retries;
/// transient network failures are not distinguished from bad queries beyond
/// what the exit status tells us.
pub struct YtDlpResolver {
    binary: String,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        YtDlpResolver {
            binary: "yt-dlp".to_string(),
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolveError> {
        let target = if query.starts_with("http") {
            query.to_string()
        } else {
            format!("ytsearch1:{query}")
        };

        info!("Resolving {target}");

        let output = Command::new(&self.binary)
            .args([
                "-j",
                "--no-playlist",
                "-f",
                "bestaudio[abr<=96]/bestaudio",
                &target,
            ])
            .output()
            .await
            .map_err(|e| ResolveError::Transient {
                query: query.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Transient {
                query: query.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| ResolveError::NotFound(query.to_string()))?;

        parse_entry(query, line)
    }
}

#[derive(Deserialize)]
struct YtDlpEntry {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";

fn parse_entry(query: &str, line: &str) -> Result<ResolvedTrack, ResolveError> {
    let entry: YtDlpEntry =
        serde_json::from_str(line).map_err(|e| ResolveError::Transient {
            query: query.to_string(),
            reason: format!("unreadable yt-dlp output: {e}"),
        })?;

    Ok(ResolvedTrack {
        stream_url: entry.url,
        title: entry.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        external_id: entry.id,
        duration_secs: entry.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
    })
}
