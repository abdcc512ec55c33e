//! Turns validated chat commands into session commands.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    registry::SessionRegistry,
    session::{CommandReply, PlayRequest, SessionCommand},
};
use crate::{
    error::{MusicError, ValidationError, MAX_VOLUME},
    ui::messages,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Play { query: String },
    Skip,
    Stop,
    ShowQueue,
    Pause,
    Resume,
    NowPlaying,
    Volume { level: Option<i64> },
}

/// A command as received from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Voice channel the invoking user sits in, if any.
    pub invoking_user_voice_channel: Option<ChannelId>,
    pub reply_channel: ChannelId,
}

pub struct CommandDispatcher {
    registry: Arc<SessionRegistry>,
    display_limit: usize,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            display_limit: 10,
        }
    }

    /// Number of upcoming tracks rendered by the queue command.
    pub fn with_display_limit(mut self, display_limit: usize) -> Self {
        self.display_limit = display_limit;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Checks everything that can be checked without a session.
    pub fn validate(command: &Command) -> Result<(), ValidationError> {
        match &command.kind {
            CommandKind::Play { query } => {
                if query.trim().is_empty() {
                    return Err(ValidationError::EmptyQuery);
                }
                if command.invoking_user_voice_channel.is_none() {
                    return Err(ValidationError::NotInVoiceChannel);
                }
            }
            CommandKind::Volume { level: Some(level) } => {
                if !(0..=i64::from(MAX_VOLUME)).contains(level) {
                    return Err(ValidationError::VolumeOutOfRange(*level));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Runs a command against its guild's session and waits for the outcome.
    ///
    /// Only `Play` may create a session; anything else on a guild without
    /// one fails with [`ValidationError::NoSession`].
    pub async fn execute(&self, command: Command) -> CommandReply {
        Self::validate(&command)?;

        let create = matches!(command.kind, CommandKind::Play { .. });
        let guild_id = command.guild_id;
        let session_command = into_session_command(command)?;
        debug!("📨 {:?} for guild {}", session_command, guild_id);

        let reply = self
            .registry
            .submit(guild_id, session_command, create)
            .ok_or(ValidationError::NoSession)?;

        reply.await.unwrap_or_else(|_| {
            warn!("⚠️ Session for guild {} dropped a reply", guild_id);
            Err(MusicError::SessionClosed)
        })
    }

    /// Like [`execute`](Self::execute), rendered as the reply text.
    pub async fn dispatch(&self, command: Command) -> String {
        match self.execute(command).await {
            Ok(outcome) => messages::outcome(&outcome, self.display_limit),
            Err(e) => messages::error(&e),
        }
    }
}

fn into_session_command(command: Command) -> Result<SessionCommand, ValidationError> {
    Ok(match command.kind {
        CommandKind::Play { query } => SessionCommand::Play(PlayRequest {
            query: query.trim().to_string(),
            voice_channel: command
                .invoking_user_voice_channel
                .ok_or(ValidationError::NotInVoiceChannel)?,
            text_channel: command.reply_channel,
            requested_by: command.user_id,
        }),
        CommandKind::Skip => SessionCommand::Skip,
        CommandKind::Stop => SessionCommand::Stop,
        CommandKind::ShowQueue => SessionCommand::ShowQueue,
        CommandKind::Pause => SessionCommand::Pause,
        CommandKind::Resume => SessionCommand::Resume,
        CommandKind::NowPlaying => SessionCommand::NowPlaying,
        CommandKind::Volume { level } => SessionCommand::Volume(
            level
                .map(|level| u8::try_from(level).map_err(|_| ValidationError::VolumeOutOfRange(level)))
                .transpose()?,
        ),
    })
}
