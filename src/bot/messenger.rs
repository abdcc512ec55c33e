use async_trait::async_trait;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;

use crate::audio::notifier::NotificationSink;

/// Posts notifications as plain messages in a Discord text channel.
pub struct ChannelMessenger {
    http: Arc<Http>,
}

impl ChannelMessenger {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationSink for ChannelMessenger {
    async fn send(&self, channel_id: ChannelId, content: String) -> anyhow::Result<()> {
        channel_id
            .send_message(&self.http, CreateMessage::new().content(content))
            .await?;
        Ok(())
    }
}
