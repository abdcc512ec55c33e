use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{
    backend::AudioBackend,
    notifier::EventNotifier,
    session::{CommandReply, Session, SessionCommand, SessionHandle, SessionMessage, SessionSettings},
};

/// Owns the one live session per guild.
///
/// Creating, looking up and retiring a session all go through the same
/// map entry lock, so a command can never be handed to a session that is in
/// the middle of leaving the map.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    backend: Arc<dyn AudioBackend>,
    notifier: EventNotifier,
    settings: SessionSettings,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>, notifier: EventNotifier, settings: SessionSettings) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            backend,
            notifier,
            settings,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Returns the live session for `guild_id`, starting one if needed.
    pub fn get_or_create(self: &Arc<Self>, guild_id: GuildId) -> SessionHandle {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let handle = self.spawn(guild_id);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(guild_id)).clone(),
        }
    }

    /// Hands `command` to the guild's session while holding its entry.
    ///
    /// With `create` unset, `None` means the guild has no session.
    pub(crate) fn submit(
        self: &Arc<Self>,
        guild_id: GuildId,
        command: SessionCommand,
        create: bool,
    ) -> Option<oneshot::Receiver<CommandReply>> {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                if let Some(rx) = entry.get().submit(command.clone()) {
                    return Some(rx);
                }
                // Mailbox closed without deregistering, e.g. the task panicked
                if !create {
                    entry.remove();
                    return None;
                }
                let handle = self.spawn(guild_id);
                entry.insert(handle.clone());
                handle.submit(command)
            }
            Entry::Vacant(entry) if create => {
                let handle = self.spawn(guild_id);
                entry.insert(handle).submit(command)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Stops the guild's session and waits for it to let go of its connection.
    ///
    /// Returns `false` if there was no session.
    pub async fn remove(self: &Arc<Self>, guild_id: GuildId) -> bool {
        let Some(reply) = self.submit(guild_id, SessionCommand::Stop, false) else {
            return false;
        };
        let _ = reply.await;
        info!("🗑️ Removed session for guild {}", guild_id);
        true
    }

    /// Called by a `Disconnected` session that wants to exit.
    ///
    /// The mailbox is closed under the entry lock only when it is empty, so no
    /// command can slip in between the check and the removal. Returns `true`
    /// when the session should stop running.
    pub(crate) fn release(
        &self,
        guild_id: GuildId,
        session_id: u64,
        rx: &mut mpsc::UnboundedReceiver<SessionMessage>,
    ) -> bool {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) if entry.get().id() == session_id => {
                if !rx.is_empty() {
                    return false;
                }
                rx.close();
                entry.remove();
                debug!("Session {} for guild {} released", session_id, guild_id);
                true
            }
            // Already replaced or removed; nobody can reach this session any more
            _ => {
                rx.close();
                true
            }
        }
    }

    /// Stops every session, used on process shutdown.
    pub async fn shutdown(self: &Arc<Self>) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        info!("⏹️ Stopping {} sessions", guilds.len());
        join_all(guilds.into_iter().map(|guild_id| self.remove(guild_id))).await;
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn spawn(self: &Arc<Self>, guild_id: GuildId) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("🆕 Creating session {} for guild {}", id, guild_id);
        Session::spawn(
            id,
            guild_id,
            self.settings.clone(),
            self.backend.clone(),
            self.notifier.attach(guild_id),
            Arc::downgrade(self),
        )
    }

    #[cfg(test)]
    pub(crate) async fn wait_until_released(&self, guild_id: GuildId) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while self.sessions.contains_key(&guild_id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session was never released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        backend::{Connection, MockAudioBackend},
        queue::Track,
        session::{CommandOutcome, PlayRequest},
        testing::RecordingSink,
    };
    use serenity::model::id::{ChannelId, UserId};

    fn registry(backend: MockAudioBackend) -> Arc<SessionRegistry> {
        let (sink, _sent) = RecordingSink::new();
        SessionRegistry::new(
            Arc::new(backend),
            EventNotifier::new(Arc::new(sink)),
            SessionSettings::default(),
        )
    }

    fn play(query: &str) -> SessionCommand {
        SessionCommand::Play(PlayRequest {
            query: query.into(),
            voice_channel: ChannelId::new(10),
            text_channel: ChannelId::new(20),
            requested_by: UserId::new(100),
        })
    }

    #[tokio::test]
    async fn concurrent_plays_share_one_session_and_one_connection() {
        let mut backend = MockAudioBackend::new();
        backend
            .expect_search()
            .returning(|query, user| Ok(vec![Track::new(query, query, user)]));
        backend
            .expect_connect()
            .times(1)
            .returning(|guild_id, channel_id, _| Ok(Connection::new(guild_id, channel_id)));
        backend.expect_start_playback().times(1).returning(|_, _, _| Ok(()));
        let registry = registry(backend);
        let guild = GuildId::new(1);

        let replies: Vec<_> = (0..5)
            .map(|i| registry.submit(guild, play(&format!("track{i}")), true).unwrap())
            .collect();
        assert_eq!(registry.len(), 1);

        let mut queued = 0;
        for reply in replies {
            match reply.await.unwrap().unwrap() {
                CommandOutcome::NowPlaying(_) => {}
                CommandOutcome::Queued { .. } => queued += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(queued, 4);
    }

    #[tokio::test]
    async fn commands_without_a_session_never_touch_the_backend() {
        // No expectations: any backend call fails the test
        let registry = registry(MockAudioBackend::new());
        let guild = GuildId::new(2);

        assert!(registry.submit(guild, SessionCommand::Skip, false).is_none());
        assert!(registry.submit(guild, SessionCommand::Stop, false).is_none());
        assert!(!registry.remove(guild).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stop_on_idle_session_retires_it() {
        let registry = registry(MockAudioBackend::new());
        let guild = GuildId::new(3);

        let first = registry.get_or_create(guild);
        assert!(registry.remove(guild).await);
        registry.wait_until_released(guild).await;

        let second = registry.get_or_create(guild);
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn shutdown_releases_every_connection() {
        let mut backend = MockAudioBackend::new();
        backend
            .expect_search()
            .returning(|query, user| Ok(vec![Track::new(query, query, user)]));
        backend
            .expect_connect()
            .times(2)
            .returning(|guild_id, channel_id, _| Ok(Connection::new(guild_id, channel_id)));
        backend.expect_start_playback().returning(|_, _, _| Ok(()));
        backend.expect_disconnect().times(2).returning(|_| Ok(()));
        let registry = registry(backend);

        for guild in [GuildId::new(4), GuildId::new(5)] {
            registry.submit(guild, play("song"), true).unwrap().await.unwrap().unwrap();
        }
        registry.shutdown().await;

        registry.wait_until_released(GuildId::new(4)).await;
        registry.wait_until_released(GuildId::new(5)).await;
    }
}
