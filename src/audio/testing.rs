//! In-memory collaborators for session tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{collections::HashMap, time::Duration};
use tokio::sync::{mpsc, Semaphore};

use super::{
    backend::{AudioBackend, BackendEvent, Connection, EventSink},
    notifier::NotificationSink,
    queue::Track,
};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Connect { guild_id: GuildId, channel_id: ChannelId },
    Disconnect,
    Search(String),
    StartPlayback(String),
    StopCurrent,
    Pause,
    Resume,
    SetVolume(u8),
}

/// Backend that records every call and lets tests drive events by hand.
pub struct FakeBackend {
    calls: Mutex<Vec<BackendCall>>,
    events: Mutex<Option<EventSink>>,
    search_failures: Mutex<HashMap<String, BackendError>>,
    broken_tracks: Mutex<Vec<String>>,
    fail_connects: Mutex<bool>,
    gate: Option<Semaphore>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            search_failures: Mutex::new(HashMap::new()),
            broken_tracks: Mutex::new(Vec::new()),
            fail_connects: Mutex::new(false),
            gate: None,
        }
    }

    /// Connects block until [`open_gate`](Self::open_gate) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn fail_connects(&self, fail: bool) {
        *self.fail_connects.lock() = fail;
    }

    pub fn fail_search(&self, query: &str, error: BackendError) {
        self.search_failures.lock().insert(query.to_string(), error);
    }

    pub fn fail_playback_of(&self, title: &str) {
        self.broken_tracks.lock().push(title.to_string());
    }

    pub fn count(&self, filter: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| filter(call)).count()
    }

    /// Titles passed to `start_playback`, in order.
    pub fn started(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::StartPlayback(title) => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    /// Delivers an event through the sink of the latest connection.
    pub fn emit(&self, event: BackendEvent) {
        let events = self.events.lock().clone();
        let delivered = events.map(|sink| sink.emit(event)).unwrap_or(false);
        assert!(delivered, "no live session to deliver the event to");
    }

    pub async fn wait_for(&self, condition: impl Fn(&[BackendCall]) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition(self.calls.lock().as_slice()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("backend never reached the expected state");
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSink,
    ) -> Result<Connection, BackendError> {
        self.record(BackendCall::Connect { guild_id, channel_id });
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Connect(e.to_string()))?;
        }
        if *self.fail_connects.lock() {
            return Err(BackendError::Connect("voice gateway timed out".into()));
        }
        *self.events.lock() = Some(events);
        Ok(Connection::new(guild_id, channel_id))
    }

    async fn disconnect(&self, _connection: &Connection) -> Result<(), BackendError> {
        self.record(BackendCall::Disconnect);
        Ok(())
    }

    async fn search(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>, BackendError> {
        self.record(BackendCall::Search(query.to_string()));
        if let Some(error) = self.search_failures.lock().get(query) {
            return Err(error.clone());
        }
        let track = Track::new(query, format!("https://www.youtube.com/watch?v={query}"), requested_by)
            .with_duration(Duration::from_secs(180));
        Ok(vec![track])
    }

    async fn start_playback(
        &self,
        _connection: &Connection,
        track: &Track,
        _volume: u8,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::StartPlayback(track.title().to_string()));
        if self.broken_tracks.lock().iter().any(|title| title == track.title()) {
            return Err(BackendError::Playback(format!("{} is unavailable", track.title())));
        }
        Ok(())
    }

    async fn stop_current(&self, _connection: &Connection) -> Result<(), BackendError> {
        self.record(BackendCall::StopCurrent);
        Ok(())
    }

    async fn pause(&self, _connection: &Connection) -> Result<(), BackendError> {
        self.record(BackendCall::Pause);
        Ok(())
    }

    async fn resume(&self, _connection: &Connection) -> Result<(), BackendError> {
        self.record(BackendCall::Resume);
        Ok(())
    }

    async fn set_volume(&self, _connection: &Connection, volume: u8) -> Result<(), BackendError> {
        self.record(BackendCall::SetVolume(volume));
        Ok(())
    }
}

/// Captures notifications instead of posting them.
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<(ChannelId, String)>,
}

impl RecordingSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ChannelId, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, channel_id: ChannelId, content: String) -> anyhow::Result<()> {
        let _ = self.tx.send((channel_id, content));
        Ok(())
    }
}
