//! Where tracks come from.
//!
//! A [`MusicSource`] turns a user query into [`Track`]s with enough metadata
//! to queue and announce them. Streaming the audio is the voice backend's job;
//! a source only resolves what to stream.

pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;
use url::Url;

use crate::audio::queue::Track;

pub use youtube::YouTubeClient;

#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Free-text search, best match first.
    async fn search(&self, query: &str, limit: usize, requested_by: UserId) -> Result<Vec<Track>>;

    /// Metadata for a single URL.
    async fn get_track(&self, url: &str, requested_by: UserId) -> Result<Track>;

    fn is_valid_url(&self, url: &str) -> bool;

    fn source_name(&self) -> &'static str;

    /// Resolves a query the way the `play` command expects: URLs directly,
    /// anything else through search.
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        if is_url(query) {
            if !self.is_valid_url(query) {
                anyhow::bail!("{} cannot play {}", self.source_name(), query);
            }
            return Ok(vec![self.get_track(query, requested_by).await?]);
        }
        self.search(query, 1, requested_by).await
    }
}

/// Whether the query should be treated as a link instead of search terms.
pub fn is_url(query: &str) -> bool {
    Url::parse(query.trim())
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_search_terms() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("http://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ftp://files.example.com/song.mp3"));
        assert!(!is_url("youtube.com/watch?v=abc"));
    }
}
