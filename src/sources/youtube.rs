use anyhow::{Context, Result};
use async_process::Command;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

use super::MusicSource;
use crate::audio::queue::Track;

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "music.youtube.com", "youtu.be"];

/// Resolves YouTube searches and links through the `yt-dlp` binary.
pub struct YouTubeClient {
    // Limit concurrent yt-dlp processes to stay clear of rate limiting
    rate_limiter: Semaphore,
}

/// Subset of the `yt-dlp --dump-json` output we use.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
}

impl YouTubeClient {
    pub fn new() -> Self {
        Self {
            rate_limiter: Semaphore::new(3),
        }
    }

    pub fn is_youtube_url(url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(|host| YOUTUBE_HOSTS.contains(&host)))
            .unwrap_or(false)
    }

    async fn dump_json(&self, target: &str, flat: bool) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let mut args = vec!["--no-playlist", "--dump-json", "--skip-download", "--no-warnings"];
        if flat {
            args.push("--flat-playlist");
        }
        args.push(target);

        let output = Command::new("yt-dlp")
            .args(&args)
            .output()
            .await
            .context("failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for YouTubeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn info_to_track(info: YtDlpInfo, fallback_url: Option<&str>, requested_by: UserId) -> Option<Track> {
    let url = info.webpage_url.or(info.url).or_else(|| fallback_url.map(str::to_string))?;
    let track = Track::new(info.title, url, requested_by);

    match info.duration {
        Some(seconds) if !info.is_live.unwrap_or(false) && seconds > 0.0 => {
            Some(track.with_duration(Duration::from_secs_f64(seconds)))
        }
        _ => Some(track),
    }
}

fn parse_search_output(stdout: &str, requested_by: UserId) -> Vec<Track> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
        .filter_map(|info| info_to_track(info, None, requested_by))
        .collect()
}

#[async_trait::async_trait]
impl MusicSource for YouTubeClient {
    async fn search(&self, query: &str, limit: usize, requested_by: UserId) -> Result<Vec<Track>> {
        info!("🔍 Searching YouTube: {}", query);

        let stdout = self.dump_json(&format!("ytsearch{}:{}", limit, query), true).await?;
        let tracks = parse_search_output(&stdout, requested_by);

        debug!("Found {} results for '{}'", tracks.len(), query);
        Ok(tracks)
    }

    async fn get_track(&self, url: &str, requested_by: UserId) -> Result<Track> {
        debug!("📊 Fetching info for: {}", url);

        let stdout = self.dump_json(url, false).await?;
        let info: YtDlpInfo = serde_json::from_str(stdout.trim()).context("failed to parse yt-dlp output")?;

        info_to_track(info, Some(url), requested_by).context("yt-dlp returned no playable url")
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn youtube_url_detection() {
        assert!(YouTubeClient::is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url("https://music.youtube.com/watch?v=test"));
        assert!(!YouTubeClient::is_youtube_url("https://example.com/video"));
        assert!(!YouTubeClient::is_youtube_url("not a url"));
    }

    #[test]
    fn parses_flat_search_lines() {
        let stdout = concat!(
            r#"{"title": "Song A", "duration": 215.0, "url": "https://www.youtube.com/watch?v=a"}"#,
            "\n",
            "garbage line\n",
            r#"{"title": "Radio", "duration": null, "is_live": true, "webpage_url": "https://www.youtube.com/watch?v=r"}"#,
            "\n",
        );

        let tracks = parse_search_output(stdout, UserId::new(5));
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title(), "Song A");
        assert_eq!(tracks[0].duration(), Some(Duration::from_secs(215)));
        assert_eq!(tracks[0].source_ref(), "https://www.youtube.com/watch?v=a");
        assert_eq!(tracks[1].duration(), None);
        assert_eq!(tracks[1].requested_by(), UserId::new(5));
    }
}
