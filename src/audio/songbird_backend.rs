//! [`AudioBackend`] on top of songbird voice connections and yt-dlp inputs.

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::{input::YoutubeDl, tracks::TrackHandle, Event, Songbird, TrackEvent};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    backend::{AudioBackend, BackendEvent, Connection, EventSink},
    queue::Track,
    track_events::TrackEventForwarder,
};
use crate::{error::BackendError, sources::MusicSource};

struct ActiveConnection {
    connection: Connection,
    events: EventSink,
    current: Option<TrackHandle>,
}

pub struct SongbirdBackend {
    songbird: Arc<Songbird>,
    http_client: reqwest::Client,
    source: Arc<dyn MusicSource>,
    search_timeout: Duration,
    connections: DashMap<GuildId, ActiveConnection>,
}

impl SongbirdBackend {
    pub fn new(songbird: Arc<Songbird>, source: Arc<dyn MusicSource>, search_timeout: Duration) -> Self {
        Self {
            songbird,
            http_client: reqwest::Client::new(),
            source,
            search_timeout,
            connections: DashMap::new(),
        }
    }

    /// Voice channel the bot currently sits in for `guild_id`.
    pub fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.connections
            .get(&guild_id)
            .map(|active| active.connection.channel_id())
    }

    /// Reports that every listener left the bot's voice channel.
    pub fn channel_emptied(&self, guild_id: GuildId) {
        let events = self.connections.get(&guild_id).map(|active| active.events.clone());
        if let Some(events) = events {
            debug!("👥 Voice channel empty in guild {}", guild_id);
            events.emit(BackendEvent::ChannelBecameEmpty);
        }
    }

    /// Reports that the bot was removed from voice from outside.
    ///
    /// No-op when the session itself asked to leave, since that already
    /// dropped the connection from the map.
    pub fn connection_lost(&self, guild_id: GuildId) {
        if let Some((_, active)) = self.connections.remove(&guild_id) {
            warn!("🔌 Voice connection lost in guild {}", guild_id);
            active.events.emit(BackendEvent::ConnectionLost);
        }
    }

    /// Bot was moved to another voice channel from outside.
    pub fn channel_moved(&self, guild_id: GuildId, channel_id: ChannelId) {
        if let Some(mut active) = self.connections.get_mut(&guild_id) {
            if active.connection.channel_id() != channel_id {
                info!("🔀 Moved to voice channel {} in guild {}", channel_id, guild_id);
                active.connection = active.connection.moved_to(channel_id);
            }
        }
    }

    /// Records a fresh join, unless it would displace a live session's connection.
    fn adopt(&self, connection: &Connection, events: EventSink) -> Result<(), BackendError> {
        if events.is_closed() {
            return Err(BackendError::Connect("the session ended before the join completed".into()));
        }
        match self.connections.entry(connection.guild_id()) {
            Entry::Occupied(active) if !active.get().events.is_closed() => Err(BackendError::Connect(format!(
                "guild {} already has a live voice connection",
                connection.guild_id()
            ))),
            entry => {
                entry.insert(ActiveConnection {
                    connection: connection.clone(),
                    events,
                    current: None,
                });
                Ok(())
            }
        }
    }

    /// Drops `connection` from the map; `false` if it was not the current one.
    fn forget(&self, connection: &Connection) -> bool {
        self.connections
            .remove_if(&connection.guild_id(), |_, active| active.connection.id() == connection.id())
            .is_some()
    }

    fn active_events(&self, connection: &Connection) -> Result<EventSink, BackendError> {
        self.connections
            .get(&connection.guild_id())
            .filter(|active| active.connection.id() == connection.id())
            .map(|active| active.events.clone())
            .ok_or(BackendError::NotConnected)
    }

    fn current_track(&self, connection: &Connection) -> Result<TrackHandle, BackendError> {
        self.connections
            .get(&connection.guild_id())
            .filter(|active| active.connection.id() == connection.id())
            .and_then(|active| active.current.clone())
            .ok_or(BackendError::NotConnected)
    }
}

fn volume_scale(volume: u8) -> f32 {
    f32::from(volume) / 100.0
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSink,
    ) -> Result<Connection, BackendError> {
        if let Err(e) = self.songbird.join(guild_id, channel_id).await {
            // A failed join can leave a half-open call behind
            let _ = self.songbird.remove(guild_id).await;
            return Err(BackendError::Connect(e.to_string()));
        }

        let connection = Connection::new(guild_id, channel_id);
        if let Err(e) = self.adopt(&connection, events) {
            warn!("Dropping late voice join in guild {}: {}", guild_id, e);
            // The call belongs to whoever holds the map entry, if anyone
            if !self.connections.contains_key(&guild_id) {
                let _ = self.songbird.remove(guild_id).await;
            }
            return Err(e);
        }
        info!("🔊 Joined voice channel {} in guild {}", channel_id, guild_id);
        Ok(connection)
    }

    async fn disconnect(&self, connection: &Connection) -> Result<(), BackendError> {
        let guild_id = connection.guild_id();
        if !self.forget(connection) {
            debug!("Connection {} in guild {} is no longer current", connection.id(), guild_id);
            return Ok(());
        }

        match self.songbird.remove(guild_id).await {
            Ok(()) => {
                info!("👋 Left voice in guild {}", guild_id);
                Ok(())
            }
            Err(songbird::error::JoinError::NoCall) => Ok(()),
            Err(e) => Err(BackendError::Connect(e.to_string())),
        }
    }

    async fn search(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>, BackendError> {
        let resolved = tokio::time::timeout(self.search_timeout, self.source.resolve(query, requested_by))
            .await
            .map_err(|_| {
                BackendError::Search(format!(
                    "{} did not answer within {}",
                    self.source.source_name(),
                    humantime::format_duration(self.search_timeout)
                ))
            })?;

        match resolved {
            Ok(tracks) if tracks.is_empty() => Err(BackendError::NoResults(query.to_string())),
            Ok(tracks) => Ok(tracks),
            Err(e) => {
                warn!("🔍 Search for '{}' failed: {:?}", query, e);
                Err(BackendError::Search(e.to_string()))
            }
        }
    }

    async fn start_playback(
        &self,
        connection: &Connection,
        track: &Track,
        volume: u8,
    ) -> Result<(), BackendError> {
        let events = self.active_events(connection)?;
        let call = self
            .songbird
            .get(connection.guild_id())
            .ok_or(BackendError::NotConnected)?;

        let input = YoutubeDl::new(self.http_client.clone(), track.source_ref().to_string());
        let handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(input.into())
        };

        handle
            .set_volume(volume_scale(volume))
            .map_err(|e| BackendError::Playback(e.to_string()))?;
        for kind in [TrackEvent::Play, TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(kind),
                    TrackEventForwarder::new(track.clone(), events.clone(), kind),
                )
                .map_err(|e| BackendError::Playback(e.to_string()))?;
        }

        if let Some(mut active) = self.connections.get_mut(&connection.guild_id()) {
            if active.connection.id() == connection.id() {
                active.current = Some(handle);
            }
        }
        debug!("▶️ Streaming {} in guild {}", track.source_ref(), connection.guild_id());
        Ok(())
    }

    async fn stop_current(&self, connection: &Connection) -> Result<(), BackendError> {
        let handle = self.current_track(connection)?;
        if let Some(mut active) = self.connections.get_mut(&connection.guild_id()) {
            active.current = None;
        }
        handle.stop().map_err(|e| BackendError::Playback(e.to_string()))
    }

    async fn pause(&self, connection: &Connection) -> Result<(), BackendError> {
        self.current_track(connection)?
            .pause()
            .map_err(|e| BackendError::Playback(e.to_string()))
    }

    async fn resume(&self, connection: &Connection) -> Result<(), BackendError> {
        self.current_track(connection)?
            .play()
            .map_err(|e| BackendError::Playback(e.to_string()))
    }

    async fn set_volume(&self, connection: &Connection, volume: u8) -> Result<(), BackendError> {
        self.current_track(connection)?
            .set_volume(volume_scale(volume))
            .map_err(|e| BackendError::Playback(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::SessionMessage;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    struct StaticSource {
        results: Vec<&'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl MusicSource for StaticSource {
        async fn search(&self, _query: &str, _limit: usize, requested_by: UserId) -> anyhow::Result<Vec<Track>> {
            tokio::time::sleep(self.delay).await;
            Ok(self
                .results
                .iter()
                .map(|title| Track::new(*title, format!("https://youtu.be/{title}"), requested_by))
                .collect())
        }

        async fn get_track(&self, url: &str, requested_by: UserId) -> anyhow::Result<Track> {
            Ok(Track::new("linked", url, requested_by))
        }

        fn is_valid_url(&self, url: &str) -> bool {
            url.contains("youtu")
        }

        fn source_name(&self) -> &'static str {
            "static"
        }
    }

    fn backend(results: Vec<&'static str>, delay: Duration) -> SongbirdBackend {
        SongbirdBackend::new(
            Songbird::serenity(),
            Arc::new(StaticSource { results, delay }),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn search_maps_results_and_empty_answers() {
        let found = backend(vec!["a", "b"], Duration::ZERO)
            .search("anything", UserId::new(1))
            .await
            .unwrap();
        assert_eq!(found.iter().map(Track::title).collect::<Vec<_>>(), vec!["a", "b"]);

        let linked = backend(vec![], Duration::ZERO)
            .search("https://youtu.be/xyz", UserId::new(1))
            .await
            .unwrap();
        assert_eq!(linked[0].title(), "linked");

        let empty = backend(vec![], Duration::ZERO).search("nothing", UserId::new(1)).await;
        assert_eq!(empty, Err(BackendError::NoResults("nothing".into())));
    }

    #[tokio::test]
    async fn slow_search_times_out() {
        let result = backend(vec!["late"], Duration::from_secs(5))
            .search("slow", UserId::new(1))
            .await;
        assert!(matches!(result, Err(BackendError::Search(ref msg)) if msg.contains("200ms")));
    }

    #[tokio::test]
    async fn playback_controls_need_a_connection() {
        let backend = backend(vec![], Duration::ZERO);
        let stranger = Connection::new(GuildId::new(9), ChannelId::new(90));

        assert_eq!(backend.pause(&stranger).await, Err(BackendError::NotConnected));
        assert_eq!(backend.set_volume(&stranger, 80).await, Err(BackendError::NotConnected));
        assert!(backend.voice_channel(GuildId::new(9)).is_none());
        // Unknown guilds are ignored rather than reported
        backend.channel_emptied(GuildId::new(9));
        backend.connection_lost(GuildId::new(9));
    }

    fn sink(guild_id: GuildId) -> (EventSink, mpsc::UnboundedReceiver<SessionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(guild_id, 0, tx), rx)
    }

    #[tokio::test]
    async fn late_join_never_displaces_a_live_connection() {
        let backend = backend(vec![], Duration::ZERO);
        let guild = GuildId::new(3);

        // The first session is stopped while its join is still pending
        let (stale_events, stale_rx) = sink(guild);
        drop(stale_rx);
        let (live_events, _live_rx) = sink(guild);

        let live = Connection::new(guild, ChannelId::new(30));
        assert_eq!(backend.adopt(&live, live_events), Ok(()));

        let stale = Connection::new(guild, ChannelId::new(31));
        assert!(matches!(backend.adopt(&stale, stale_events), Err(BackendError::Connect(_))));
        assert_eq!(backend.voice_channel(guild), Some(ChannelId::new(30)));

        let (other_events, _other_rx) = sink(guild);
        let other = Connection::new(guild, ChannelId::new(32));
        assert!(matches!(backend.adopt(&other, other_events), Err(BackendError::Connect(_))));

        // Leaving with the stale connection keeps the live entry
        assert!(!backend.forget(&stale));
        assert_eq!(backend.voice_channel(guild), Some(ChannelId::new(30)));
        assert!(backend.forget(&live));
        assert!(backend.voice_channel(guild).is_none());
    }

    #[tokio::test]
    async fn join_replaces_an_entry_whose_session_is_gone() {
        let backend = backend(vec![], Duration::ZERO);
        let guild = GuildId::new(4);

        let (old_events, old_rx) = sink(guild);
        backend
            .adopt(&Connection::new(guild, ChannelId::new(40)), old_events)
            .unwrap();
        drop(old_rx);

        let (events, _rx) = sink(guild);
        let fresh = Connection::new(guild, ChannelId::new(41));
        assert_eq!(backend.adopt(&fresh, events), Ok(()));
        assert_eq!(backend.voice_channel(guild), Some(ChannelId::new(41)));
    }

    #[tokio::test]
    async fn moving_channels_updates_the_watched_channel() {
        let backend = backend(vec![], Duration::ZERO);
        let guild = GuildId::new(5);
        let (events, _rx) = sink(guild);
        let connection = Connection::new(guild, ChannelId::new(50));
        backend.adopt(&connection, events).unwrap();

        backend.channel_moved(guild, ChannelId::new(51));
        assert_eq!(backend.voice_channel(guild), Some(ChannelId::new(51)));

        // The session still leaves with the connection it was handed
        assert!(backend.forget(&connection));
    }

    #[test]
    fn volume_is_a_percentage() {
        assert_eq!(volume_scale(100), 1.0);
        assert_eq!(volume_scale(50), 0.5);
        assert_eq!(volume_scale(200), 2.0);
    }
}
