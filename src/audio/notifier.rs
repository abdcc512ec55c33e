use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::queue::Track;
use crate::ui::messages;

/// Outbound message capability (a Discord text channel in production).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel_id: ChannelId, content: String) -> anyhow::Result<()>;
}

/// Something the text channel should hear about without having asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A track started; `upcoming` comes from the queue at that moment.
    NowPlaying {
        track: Track,
        upcoming: Option<Track>,
    },
    /// A track was queued behind the one playing.
    TrackAdded {
        track: Track,
        upcoming: Option<Track>,
    },
    PlaybackError {
        track: Option<Track>,
        message: String,
    },
    QueueFinished,
    LeftEmptyChannel,
    ConnectionLost,
}

/// Formats notifications and routes them to each guild's text channel.
///
/// Every guild gets its own forwarding task so a slow channel never delays
/// another guild, while one guild's notifications keep their order.
#[derive(Clone)]
pub struct EventNotifier {
    sink: Arc<dyn NotificationSink>,
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Starts the forwarding task for one guild. It ends when the handle is dropped.
    pub fn attach(&self, guild_id: GuildId) -> NotifierHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ChannelId, Notification)>();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            while let Some((channel_id, notification)) = rx.recv().await {
                let content = messages::notification(&notification);
                if let Err(e) = sink.send(channel_id, content).await {
                    warn!("⚠️ Could not notify channel {} in guild {}: {:?}", channel_id, guild_id, e);
                }
            }
            debug!("Notifier for guild {} closed", guild_id);
        });

        NotifierHandle { guild_id, tx }
    }
}

#[derive(Debug, Clone)]
pub struct NotifierHandle {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<(ChannelId, Notification)>,
}

impl NotifierHandle {
    pub fn notify(&self, channel_id: Option<ChannelId>, notification: Notification) {
        let Some(channel_id) = channel_id else {
            debug!("No text channel for guild {}, dropping {:?}", self.guild_id, notification);
            return;
        };
        let _ = self.tx.send((channel_id, notification));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::RecordingSink;
    use serenity::model::id::UserId;

    #[tokio::test]
    async fn forwards_formatted_notifications_in_order() {
        let (sink, mut sent) = RecordingSink::new();
        let notifier = EventNotifier::new(Arc::new(sink));
        let handle = notifier.attach(GuildId::new(1));
        let channel = ChannelId::new(50);

        let first = Track::new("First", "ref-1", UserId::new(9));
        let second = Track::new("Second", "ref-2", UserId::new(9));
        handle.notify(
            Some(channel),
            Notification::NowPlaying {
                track: first.clone(),
                upcoming: Some(second.clone()),
            },
        );
        handle.notify(
            Some(channel),
            Notification::PlaybackError {
                track: Some(first),
                message: "decoder exploded".into(),
            },
        );

        let (to, content) = sent.recv().await.unwrap();
        assert_eq!(to, channel);
        assert!(content.contains("Now playing: **First**"));
        assert!(content.contains("Next in queue: **Second**"));

        let (_, content) = sent.recv().await.unwrap();
        assert_eq!(content, "❌ An error encountered: decoder exploded");
    }

    #[tokio::test]
    async fn notifications_without_channel_are_dropped() {
        let (sink, mut sent) = RecordingSink::new();
        let handle = EventNotifier::new(Arc::new(sink)).attach(GuildId::new(1));

        handle.notify(None, Notification::QueueFinished);
        handle.notify(Some(ChannelId::new(2)), Notification::LeftEmptyChannel);

        let (to, _) = sent.recv().await.unwrap();
        assert_eq!(to, ChannelId::new(2));
    }
}
