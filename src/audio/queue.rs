use serenity::model::id::UserId;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::debug;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one queued request, distinct even for two requests of the same song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

/// A playable item resolved by the audio backend.
///
/// Tracks are immutable once built; the queue only moves them around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    id: TrackId,
    title: String,
    duration: Option<Duration>,
    source_ref: String,
    requested_by: UserId,
}

impl Track {
    pub fn new(title: impl Into<String>, source_ref: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            id: TrackId(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)),
            title: title.into(),
            duration: None,
            source_ref: source_ref.into(),
            requested_by,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    // Getters
    pub fn id(&self) -> TrackId {
        self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    /// `None` for live streams and sources that do not report a length.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
}

/// FIFO of tracks for one guild. The head is the track currently playing.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track to the tail.
    pub fn enqueue(&mut self, track: Track) {
        debug!("➕ Queued: {}", track.title);
        self.items.push_back(track);
    }

    /// Removes the head and returns it; the next track becomes the head.
    ///
    /// `None` means there was nothing left to play.
    pub fn advance(&mut self) -> Option<Track> {
        let finished = self.items.pop_front();
        if let Some(next) = self.items.front() {
            debug!("➡️ Next in queue: {}", next.title);
        }
        finished
    }

    /// The track after the head, without touching the queue.
    pub fn peek_upcoming(&self) -> Option<&Track> {
        self.items.get(1)
    }

    pub fn current(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Tracks after the head, in play order.
    pub fn upcoming(&self) -> impl Iterator<Item = &Track> {
        self.items.iter().skip(1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    /// Index of a queued track; `0` is the head.
    pub fn position(&self, id: TrackId) -> Option<usize> {
        self.items.iter().position(|track| track.id == id)
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            debug!("🗑️ Cleared {} tracks", self.items.len());
        }
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> Track {
        Track::new(title, format!("https://example.com/{title}"), UserId::new(7))
    }

    fn titles<'a>(tracks: impl Iterator<Item = &'a Track>) -> Vec<&'a str> {
        tracks.map(Track::title).collect()
    }

    #[test]
    fn enqueue_preserves_arrival_order() {
        let mut queue = TrackQueue::new();
        for title in ["a", "b", "c", "d"] {
            queue.enqueue(track(title));
        }

        assert_eq!(titles(queue.iter()), vec!["a", "b", "c", "d"]);
        assert_eq!(queue.current().map(Track::title), Some("a"));
        assert_eq!(titles(queue.upcoming()), vec!["b", "c", "d"]);
    }

    #[test]
    fn advance_returns_head_and_exposes_next() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));

        let upcoming = queue.peek_upcoming().cloned();
        let finished = queue.advance();

        assert_eq!(finished.map(|t| t.title().to_string()), Some("a".to_string()));
        assert_eq!(queue.current().cloned(), upcoming);
        assert!(queue.peek_upcoming().is_none());
    }

    #[test]
    fn advance_on_empty_queue_signals_nothing_left() {
        let mut queue = TrackQueue::new();
        assert!(queue.advance().is_none());

        queue.enqueue(track("only"));
        assert!(queue.advance().is_some());
        assert!(queue.advance().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn peek_upcoming_never_returns_current() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("only"));
        assert!(queue.peek_upcoming().is_none());

        // Same song requested twice is still two distinct entries
        let again = track("only");
        queue.enqueue(again.clone());
        let upcoming = queue.peek_upcoming().unwrap();
        assert_eq!(upcoming.id(), again.id());
        assert_ne!(upcoming.id(), queue.current().unwrap().id());
    }

    #[test]
    fn position_and_clear() {
        let mut queue = TrackQueue::new();
        let a = track("a");
        let b = track("b");
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());

        assert_eq!(queue.position(a.id()), Some(0));
        assert_eq!(queue.position(b.id()), Some(1));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.position(a.id()), None);
    }

    #[test]
    fn tracks_get_unique_ids() {
        let first = track("same");
        let second = track("same");
        assert_ne!(first.id(), second.id());
        assert_ne!(first, second);
    }
}
