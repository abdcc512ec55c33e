//! # Bot Module
//!
//! Discord side of the bot: it turns gateway events into session commands and
//! backend events, and owns nothing about playback itself.
//!
//! - [`commands`] registers the slash command vocabulary
//! - [`handlers`] parses interactions and replies with the dispatch outcome
//! - [`messenger`] posts session notifications to text channels
//!
//! Voice state updates are watched here to report two things to the
//! [`SongbirdBackend`]: the bot being removed from voice, and the bot's
//! channel losing its last listener.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod messenger;

use crate::{
    audio::{dispatcher::CommandDispatcher, songbird_backend::SongbirdBackend},
    config::Config,
};

/// Serenity event handler for the music bot.
///
/// Cheap to share: everything stateful sits behind the dispatcher's session
/// registry or inside the backend.
pub struct MusicBot {
    config: Arc<Config>,
    pub dispatcher: Arc<CommandDispatcher>,
    backend: Arc<SongbirdBackend>,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, dispatcher: Arc<CommandDispatcher>, backend: Arc<SongbirdBackend>) -> Self {
        Self {
            config,
            dispatcher,
            backend,
        }
    }

    /// Registers slash commands on the configured guild, or globally.
    ///
    /// Guild commands show up within seconds; global ones can take up to an
    /// hour to propagate.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ Bot is not a member of guild {}, skipping registration", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registering guild commands: {:?}", e);
                    anyhow::anyhow!("Could not register guild commands. Check the 'applications.commands' permission.")
                })?;
                info!("✅ Guild commands registered for: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registering global commands: {:?}", e);
                    anyhow::anyhow!("Could not register global commands. Check the 'applications.commands' permission.")
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    fn listeners_in(&self, ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Option<usize> {
        let bot_id = ctx.cache.current_user().id;
        let guild = guild_id.to_guild_cached(&ctx.cache)?;

        let count = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id) && state.user_id != bot_id)
            .filter(|state| state.member.as_ref().map_or(true, |member| !member.user.bot))
            .count();
        Some(count)
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    /// Watches voice movement that matters to a session.
    ///
    /// - **Bot disconnected** by someone else: the session is told the
    ///   connection is gone and clears its queue.
    /// - **Bot moved** to another channel: the backend watches the new one.
    /// - **Last listener left** the bot's channel: the session decides,
    ///   according to its leave policy, whether to leave too.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id {
            match new.channel_id {
                None if old.is_some() => {
                    info!("🔌 Bot disconnected from voice in guild {}", guild_id);
                    self.backend.connection_lost(guild_id);
                }
                Some(channel_id) if self.backend.voice_channel(guild_id).is_some_and(|c| c != channel_id) => {
                    self.backend.channel_moved(guild_id, channel_id);
                    if self.listeners_in(&ctx, guild_id, channel_id) == Some(0) {
                        info!("🚪 Moved into empty voice channel {} in guild {}", channel_id, guild_id);
                        self.backend.channel_emptied(guild_id);
                    }
                }
                _ => {}
            }
            return;
        }

        let Some(bot_channel) = self.backend.voice_channel(guild_id) else {
            return;
        };
        let left_bot_channel = old.and_then(|state| state.channel_id) == Some(bot_channel)
            && new.channel_id != Some(bot_channel);
        if !left_bot_channel {
            return;
        }

        if self.listeners_in(&ctx, guild_id, bot_channel) == Some(0) {
            info!("🚪 Voice channel {} in guild {} is now empty", bot_channel, guild_id);
            self.backend.channel_emptied(guild_id);
        }
    }
}
