//! The capability set a session needs from whatever actually streams audio.
//!
//! Swapping songbird for another player means implementing [`AudioBackend`];
//! session logic does not change.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::{queue::Track, session::SessionMessage};
use crate::error::BackendError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An established voice connection for one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: u64,
    guild_id: GuildId,
    channel_id: ChannelId,
}

impl Connection {
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            guild_id,
            channel_id,
        }
    }

    /// Same connection, now in `channel_id`.
    pub fn moved_to(&self, channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            ..self.clone()
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

/// Low level playback events a backend reports for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    TrackStarted(Track),
    TrackFinished(Track),
    PlaybackError {
        track: Option<Track>,
        message: String,
    },
    /// Every listener left the voice channel.
    ChannelBecameEmpty,
    /// The bot was removed from voice by something other than the session.
    ConnectionLost,
}

/// Where a backend delivers [`BackendEvent`]s for one connection.
///
/// Events land in the owning session's mailbox, tagged so the session can
/// drop anything belonging to a connection it already abandoned.
#[derive(Debug, Clone)]
pub struct EventSink {
    guild_id: GuildId,
    epoch: u64,
    mailbox: mpsc::UnboundedSender<SessionMessage>,
}

impl EventSink {
    pub(crate) fn new(guild_id: GuildId, epoch: u64, mailbox: mpsc::UnboundedSender<SessionMessage>) -> Self {
        Self {
            guild_id,
            epoch,
            mailbox,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Whether the owning session has stopped reading its mailbox.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Returns `false` once the session is gone.
    pub fn emit(&self, event: BackendEvent) -> bool {
        self.mailbox
            .send(SessionMessage::Backend {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Joins a voice channel. Events for the new connection go to `events`.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSink,
    ) -> Result<Connection, BackendError>;

    async fn disconnect(&self, connection: &Connection) -> Result<(), BackendError>;

    /// Resolves a URL or free-text query into candidate tracks, best first.
    async fn search(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>, BackendError>;

    /// Replaces whatever is playing on `connection` with `track`.
    async fn start_playback(
        &self,
        connection: &Connection,
        track: &Track,
        volume: u8,
    ) -> Result<(), BackendError>;

    async fn stop_current(&self, connection: &Connection) -> Result<(), BackendError>;

    async fn pause(&self, connection: &Connection) -> Result<(), BackendError>;

    async fn resume(&self, connection: &Connection) -> Result<(), BackendError>;

    async fn set_volume(&self, connection: &Connection, volume: u8) -> Result<(), BackendError>;
}
