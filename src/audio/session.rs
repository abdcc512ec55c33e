//! Per-guild playback state machine.
//!
//! A [`Session`] runs as its own task and owns everything about one guild's
//! playback: queue, voice connection, volume. Commands and backend events
//! reach it through a single mailbox and are applied strictly one at a time,
//! in arrival order. Other guilds run in their own tasks and never wait on
//! this one.
//!
//! Joining a voice channel runs off the task so that `Stop` can cancel it;
//! every other command that arrives while the join is pending is held back
//! and replayed once it resolves, so there is never more than one
//! connect/disconnect in flight per guild.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{
    backend::{AudioBackend, BackendEvent, Connection, EventSink},
    notifier::{Notification, NotifierHandle},
    queue::{Track, TrackId, TrackQueue},
    registry::SessionRegistry,
};
use crate::{
    config::{Config, LeavePolicy},
    error::{BackendError, MusicError, MusicResult, ValidationError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Playing,
    Paused,
    Disconnected,
}

/// Knobs every session of the process shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub leave_policy: LeavePolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_volume: 50,
            max_queue_size: 1000,
            leave_policy: LeavePolicy::OnEmpty,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
            leave_policy: config.leave_policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRequest {
    pub query: String,
    pub voice_channel: ChannelId,
    pub text_channel: ChannelId,
    pub requested_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Play(PlayRequest),
    Skip,
    Stop,
    Pause,
    Resume,
    /// `None` only reports the current volume.
    Volume(Option<u8>),
    NowPlaying,
    ShowQueue,
}

/// Queue contents as of the moment a `ShowQueue` was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub state: SessionState,
    pub now_playing: Option<Track>,
    pub upcoming: Vec<Track>,
}

impl QueueSnapshot {
    /// Sum of known upcoming durations; live tracks count as zero.
    pub fn upcoming_duration(&self) -> Duration {
        self.upcoming.iter().filter_map(Track::duration).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    NowPlaying(Track),
    /// `position` counts from the playing track, so `1` plays next.
    Queued { track: Track, position: usize },
    Skipped { skipped: Track, next: Option<Track> },
    Paused(Track),
    Resumed(Track),
    Volume { level: u8, changed: bool },
    Current { track: Track, upcoming: Option<Track>, paused: bool },
    Queue(QueueSnapshot),
    Stopped,
    /// A `Stop` overtook the command before it could take effect.
    Cancelled,
}

pub type CommandReply = MusicResult<CommandOutcome>;

pub(crate) enum SessionMessage {
    Command {
        command: SessionCommand,
        reply: oneshot::Sender<CommandReply>,
    },
    Connected {
        epoch: u64,
        result: Result<Connection, BackendError>,
    },
    Backend {
        epoch: u64,
        event: BackendEvent,
    },
}

/// Address of a running session. Cheap to clone; holds no session state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl SessionHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Queues a command. `None` if the session already shut down.
    pub(crate) fn submit(&self, command: SessionCommand) -> Option<oneshot::Receiver<CommandReply>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionMessage::Command { command, reply }).ok()?;
        Some(rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub(crate) struct Session {
    id: u64,
    guild_id: GuildId,
    state: SessionState,
    queue: TrackQueue,
    connection: Option<Connection>,
    voice_channel: Option<ChannelId>,
    text_channel: Option<ChannelId>,
    volume: u8,
    /// Bumped whenever a connection is abandoned; older tagged messages are stale.
    epoch: u64,
    /// Replies owed to the `Play` commands waiting on the pending join.
    awaiting_connect: Vec<(TrackId, oneshot::Sender<CommandReply>)>,
    deferred: VecDeque<SessionMessage>,
    settings: SessionSettings,
    backend: Arc<dyn AudioBackend>,
    notifier: NotifierHandle,
    mailbox: mpsc::UnboundedSender<SessionMessage>,
    registry: Weak<SessionRegistry>,
}

impl Session {
    /// Spawns the session task and returns its handle.
    pub(crate) fn spawn(
        id: u64,
        guild_id: GuildId,
        settings: SessionSettings,
        backend: Arc<dyn AudioBackend>,
        notifier: NotifierHandle,
        registry: Weak<SessionRegistry>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id,
            guild_id,
            state: SessionState::Idle,
            queue: TrackQueue::new(),
            connection: None,
            voice_channel: None,
            text_channel: None,
            volume: settings.default_volume,
            epoch: 0,
            awaiting_connect: Vec::new(),
            deferred: VecDeque::new(),
            settings,
            backend,
            notifier,
            mailbox: tx.clone(),
            registry,
        };
        tokio::spawn(session.run(rx));

        SessionHandle { id, guild_id, tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMessage>) {
        debug!("🎛️ Session {} started for guild {}", self.id, self.guild_id);

        while let Some(message) = rx.recv().await {
            self.handle(message).await;

            while self.state != SessionState::Connecting {
                let Some(message) = self.deferred.pop_front() else {
                    break;
                };
                self.handle(message).await;
            }

            if self.state == SessionState::Disconnected && self.release(&mut rx) {
                break;
            }
        }

        // Anything that slipped in through a cloned handle before the close
        while let Ok(message) = rx.try_recv() {
            self.reject(message).await;
        }
        debug!("🎛️ Session {} for guild {} closed", self.id, self.guild_id);
    }

    /// Leaves the registry if nothing else is waiting in the mailbox.
    fn release(&self, rx: &mut mpsc::UnboundedReceiver<SessionMessage>) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.release(self.guild_id, self.id, rx),
            None => {
                rx.close();
                true
            }
        }
    }

    async fn reject(&self, message: SessionMessage) {
        match message {
            SessionMessage::Command { reply, .. } => {
                let _ = reply.send(Err(MusicError::SessionClosed));
            }
            SessionMessage::Connected {
                result: Ok(connection),
                ..
            } => self.release_connection(&connection).await,
            _ => {}
        }
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Command { command, reply } => {
                if self.state == SessionState::Connecting && command != SessionCommand::Stop {
                    debug!("⏳ Deferring {:?} until the voice join resolves", command);
                    self.deferred.push_back(SessionMessage::Command { command, reply });
                    return;
                }
                self.apply(command, reply).await;
            }
            SessionMessage::Connected { epoch, result } => self.on_connected(epoch, result).await,
            SessionMessage::Backend { epoch, event } => {
                if epoch != self.epoch {
                    debug!("Ignoring stale backend event for guild {}: {:?}", self.guild_id, event);
                    return;
                }
                self.on_backend_event(event).await;
            }
        }
    }

    async fn apply(&mut self, command: SessionCommand, reply: oneshot::Sender<CommandReply>) {
        let result = match command {
            SessionCommand::Play(request) => return self.play(request, reply).await,
            SessionCommand::Skip => self.skip().await,
            SessionCommand::Stop => {
                self.teardown().await;
                info!("⏹️ Playback stopped in guild {}", self.guild_id);
                Ok(CommandOutcome::Stopped)
            }
            SessionCommand::Pause => self.pause().await,
            SessionCommand::Resume => self.resume().await,
            SessionCommand::Volume(level) => self.volume(level).await,
            SessionCommand::NowPlaying => self.now_playing(),
            SessionCommand::ShowQueue => Ok(CommandOutcome::Queue(self.snapshot())),
        };
        let _ = reply.send(result);
    }

    async fn play(&mut self, request: PlayRequest, reply: oneshot::Sender<CommandReply>) {
        if self.queue.len() >= self.settings.max_queue_size {
            let _ = reply.send(Err(ValidationError::QueueFull(self.settings.max_queue_size).into()));
            return;
        }

        let track = match self.backend.search(&request.query, request.requested_by).await {
            Ok(results) => match results.into_iter().next() {
                Some(track) => track,
                None => {
                    let _ = reply.send(Err(BackendError::NoResults(request.query).into()));
                    return;
                }
            },
            Err(e) => {
                warn!("🔍 Search for '{}' failed in guild {}: {}", request.query, self.guild_id, e);
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        if self.connection.is_none() {
            self.text_channel = Some(request.text_channel);
            self.queue.enqueue(track.clone());
            self.awaiting_connect.push((track.id(), reply));
            self.begin_connect(request.voice_channel);
            return;
        }

        self.queue.enqueue(track.clone());
        let result = match self.state {
            SessionState::Playing | SessionState::Paused => {
                let position = self.queue.len() - 1;
                self.notifier.notify(
                    self.text_channel,
                    Notification::TrackAdded {
                        track: track.clone(),
                        upcoming: self.queue.peek_upcoming().cloned(),
                    },
                );
                Ok(CommandOutcome::Queued { track, position })
            }
            _ => match self.start_current().await {
                Some(started) if started.id() == track.id() => Ok(CommandOutcome::NowPlaying(started)),
                Some(started) => {
                    let position = self.queue.position(track.id()).unwrap_or_default();
                    debug!("Resumed {} ahead of the new request", started.title());
                    Ok(CommandOutcome::Queued { track, position })
                }
                None => {
                    self.queue_drained().await;
                    Err(BackendError::Playback(format!("could not start {}", track.title())).into())
                }
            },
        };
        let _ = reply.send(result);
    }

    fn begin_connect(&mut self, channel_id: ChannelId) {
        self.state = SessionState::Connecting;
        self.voice_channel = Some(channel_id);
        info!("🔗 Joining voice channel {} in guild {}", channel_id, self.guild_id);

        let backend = self.backend.clone();
        let mailbox = self.mailbox.clone();
        let events = EventSink::new(self.guild_id, self.epoch, self.mailbox.clone());
        let guild_id = self.guild_id;
        let epoch = self.epoch;

        tokio::spawn(async move {
            let result = backend.connect(guild_id, channel_id, events).await;
            if let Err(mpsc::error::SendError(SessionMessage::Connected {
                result: Ok(connection),
                ..
            })) = mailbox.send(SessionMessage::Connected { epoch, result })
            {
                debug!("Session for guild {} ended mid-join, leaving again", guild_id);
                let _ = backend.disconnect(&connection).await;
            }
        });
    }

    async fn on_connected(&mut self, epoch: u64, result: Result<Connection, BackendError>) {
        if epoch != self.epoch || self.state != SessionState::Connecting {
            if let Ok(connection) = result {
                debug!("Discarding stale voice connection in guild {}", self.guild_id);
                self.release_connection(&connection).await;
            }
            return;
        }

        let waiting = std::mem::take(&mut self.awaiting_connect);
        match result {
            Ok(connection) => {
                info!("🔊 Connected to voice in guild {}", self.guild_id);
                self.connection = Some(connection);
                self.state = SessionState::Idle;

                let started = self.start_current().await;
                for (track_id, reply) in waiting {
                    let _ = reply.send(self.connect_outcome(track_id, started.as_ref()));
                }
                if started.is_none() {
                    self.queue_drained().await;
                }
            }
            Err(e) => {
                warn!("❌ Could not join voice in guild {}: {}", self.guild_id, e);
                // Queue is kept so the next Play picks up where this one left off
                self.state = SessionState::Idle;
                self.voice_channel = None;
                for (_, reply) in waiting {
                    let _ = reply.send(Err(e.clone().into()));
                }
            }
        }
    }

    fn connect_outcome(&self, track_id: TrackId, started: Option<&Track>) -> CommandReply {
        if let Some(track) = started.filter(|track| track.id() == track_id) {
            return Ok(CommandOutcome::NowPlaying(track.clone()));
        }
        match self.queue.position(track_id) {
            Some(position) => {
                let track = self.queue.iter().nth(position).cloned();
                match track {
                    Some(track) => Ok(CommandOutcome::Queued { track, position }),
                    None => Err(BackendError::Playback("track vanished from the queue".into()).into()),
                }
            }
            None => Err(BackendError::Playback("the track could not be played".into()).into()),
        }
    }

    /// Starts the head of the queue, dropping tracks the backend refuses.
    ///
    /// `None` when the queue ran dry; the caller decides what that means.
    async fn start_current(&mut self) -> Option<Track> {
        let connection = self.connection.clone()?;

        while let Some(track) = self.queue.current().cloned() {
            match self.backend.start_playback(&connection, &track, self.volume).await {
                Ok(()) => {
                    info!("🎵 Playing {} in guild {}", track.title(), self.guild_id);
                    self.state = SessionState::Playing;
                    self.notifier.notify(
                        self.text_channel,
                        Notification::NowPlaying {
                            track: track.clone(),
                            upcoming: self.queue.peek_upcoming().cloned(),
                        },
                    );
                    return Some(track);
                }
                Err(e) => {
                    error!("❌ Could not start {} in guild {}: {}", track.title(), self.guild_id, e);
                    self.notifier.notify(
                        self.text_channel,
                        Notification::PlaybackError {
                            track: Some(track),
                            message: e.to_string(),
                        },
                    );
                    self.queue.advance();
                }
            }
        }
        None
    }

    /// Playback ran out on its own.
    async fn queue_drained(&mut self) {
        info!("📭 Queue finished in guild {}", self.guild_id);
        self.notifier.notify(self.text_channel, Notification::QueueFinished);

        if self.settings.leave_policy == LeavePolicy::OnQueueEnd {
            self.teardown().await;
        } else {
            self.state = SessionState::Idle;
        }
    }

    async fn skip(&mut self) -> CommandReply {
        let connection = match (self.state, &self.connection) {
            (SessionState::Playing | SessionState::Paused, Some(connection)) => connection.clone(),
            _ => return Err(ValidationError::NothingPlaying.into()),
        };
        let skipped = self.queue.advance().ok_or(ValidationError::NothingPlaying)?;
        info!("⏭️ Skipping {} in guild {}", skipped.title(), self.guild_id);

        if let Err(e) = self.backend.stop_current(&connection).await {
            warn!("Could not stop {} in guild {}: {}", skipped.title(), self.guild_id, e);
        }

        let next = self.start_current().await;
        if next.is_none() {
            self.state = SessionState::Idle;
        }
        Ok(CommandOutcome::Skipped { skipped, next })
    }

    async fn pause(&mut self) -> CommandReply {
        let (Some(connection), Some(track)) = (self.playing_connection(), self.queue.current().cloned()) else {
            return Err(ValidationError::NothingPlaying.into());
        };
        if self.state == SessionState::Paused {
            return Err(ValidationError::AlreadyPaused.into());
        }
        self.backend.pause(&connection).await?;
        self.state = SessionState::Paused;
        info!("⏸️ Paused in guild {}", self.guild_id);
        Ok(CommandOutcome::Paused(track))
    }

    async fn resume(&mut self) -> CommandReply {
        if self.state != SessionState::Paused {
            return Err(ValidationError::NotPaused.into());
        }
        let (Some(connection), Some(track)) = (self.playing_connection(), self.queue.current().cloned()) else {
            return Err(ValidationError::NothingPlaying.into());
        };
        self.backend.resume(&connection).await?;
        self.state = SessionState::Playing;
        info!("▶️ Resumed in guild {}", self.guild_id);
        Ok(CommandOutcome::Resumed(track))
    }

    async fn volume(&mut self, level: Option<u8>) -> CommandReply {
        let Some(level) = level else {
            return Ok(CommandOutcome::Volume {
                level: self.volume,
                changed: false,
            });
        };
        if let Some(connection) = self.playing_connection() {
            self.backend.set_volume(&connection, level).await?;
        }
        self.volume = level;
        info!("🔊 Volume set to {}% in guild {}", level, self.guild_id);
        Ok(CommandOutcome::Volume { level, changed: true })
    }

    fn now_playing(&self) -> CommandReply {
        match (self.state, self.queue.current()) {
            (SessionState::Playing | SessionState::Paused, Some(track)) => Ok(CommandOutcome::Current {
                track: track.clone(),
                upcoming: self.queue.peek_upcoming().cloned(),
                paused: self.state == SessionState::Paused,
            }),
            _ => Err(ValidationError::NothingPlaying.into()),
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        let playing = matches!(self.state, SessionState::Playing | SessionState::Paused);
        if playing {
            QueueSnapshot {
                state: self.state,
                now_playing: self.queue.current().cloned(),
                upcoming: self.queue.upcoming().cloned().collect(),
            }
        } else {
            // Tracks kept after a failed join have not started yet
            QueueSnapshot {
                state: self.state,
                now_playing: None,
                upcoming: self.queue.iter().cloned().collect(),
            }
        }
    }

    fn playing_connection(&self) -> Option<Connection> {
        match self.state {
            SessionState::Playing | SessionState::Paused => self.connection.clone(),
            _ => None,
        }
    }

    async fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::TrackStarted(track) => {
                debug!("Backend started {} in guild {}", track.title(), self.guild_id);
            }
            BackendEvent::TrackFinished(track) => {
                if !self.is_current(&track) {
                    debug!("Ignoring end of {} in guild {}, no longer current", track.title(), self.guild_id);
                    return;
                }
                self.advance_after(track).await;
            }
            BackendEvent::PlaybackError { track, message } => {
                let failed = match track {
                    Some(track) if !self.is_current(&track) => {
                        debug!("Ignoring error for {} in guild {}: {}", track.title(), self.guild_id, message);
                        return;
                    }
                    Some(track) => Some(track),
                    None => self.queue.current().cloned(),
                };
                warn!("❌ Playback error in guild {}: {}", self.guild_id, message);
                self.notifier.notify(
                    self.text_channel,
                    Notification::PlaybackError {
                        track: failed.clone(),
                        message,
                    },
                );
                if let Some(track) = failed.filter(|track| self.is_current(track)) {
                    self.advance_after(track).await;
                }
            }
            BackendEvent::ChannelBecameEmpty => {
                if self.settings.leave_policy != LeavePolicy::OnEmpty {
                    debug!("Voice channel emptied in guild {}, staying", self.guild_id);
                    return;
                }
                info!("🚪 Leaving empty voice channel in guild {}", self.guild_id);
                self.teardown().await;
                self.notifier.notify(self.text_channel, Notification::LeftEmptyChannel);
            }
            BackendEvent::ConnectionLost => {
                info!("🔌 Lost voice connection in guild {}", self.guild_id);
                self.teardown().await;
                self.notifier.notify(self.text_channel, Notification::ConnectionLost);
            }
        }
    }

    fn is_current(&self, track: &Track) -> bool {
        matches!(self.state, SessionState::Playing | SessionState::Paused)
            && self.queue.current().map(Track::id) == Some(track.id())
    }

    async fn advance_after(&mut self, finished: Track) {
        debug!("Finished {} in guild {}", finished.title(), self.guild_id);
        self.queue.advance();
        if self.start_current().await.is_none() {
            self.queue_drained().await;
        }
    }

    /// Drops the queue and the voice connection. Always ends `Disconnected`.
    async fn teardown(&mut self) {
        self.epoch += 1;
        self.queue.clear();
        self.volume = self.settings.default_volume;
        self.voice_channel = None;

        if let Some(connection) = self.connection.take() {
            self.release_connection(&connection).await;
        }
        for (_, reply) in self.awaiting_connect.drain(..) {
            let _ = reply.send(Ok(CommandOutcome::Cancelled));
        }
        for message in self.deferred.drain(..) {
            if let SessionMessage::Command { reply, .. } = message {
                let _ = reply.send(Ok(CommandOutcome::Cancelled));
            }
        }
        self.state = SessionState::Disconnected;
    }

    async fn release_connection(&self, connection: &Connection) {
        if let Err(e) = self.backend.disconnect(connection).await {
            warn!("⚠️ Could not leave voice in guild {}: {}", self.guild_id, e);
        }
    }
}
