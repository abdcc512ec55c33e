use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::info;

use crate::{
    audio::dispatcher::{Command, CommandDispatcher, CommandKind},
    bot::MusicBot,
    error::MusicError,
    ui::messages,
};

/// Handles a slash command end to end: parse, validate, run, reply.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside of a server"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    let query = option_str(&command, "query");
    let level = option_i64(&command, "level");
    let Some(kind) = parse_kind(&command.data.name, query, level) else {
        return reply_ephemeral(ctx, &command, "❌ Unknown command").await;
    };

    let request = Command {
        kind,
        guild_id,
        user_id: command.user.id,
        invoking_user_voice_channel: user_voice_channel(ctx, guild_id, command.user.id),
        reply_channel: command.channel_id,
    };

    // Reject bad input before deferring so the error stays private
    if let Err(e) = CommandDispatcher::validate(&request) {
        return reply_ephemeral(ctx, &command, &messages::error(&MusicError::from(e))).await;
    }

    // Searching and joining voice can outlast the interaction deadline
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let content = bot.dispatcher.dispatch(request).await;
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

/// Maps a slash command name and its options onto a [`CommandKind`].
pub fn parse_kind(name: &str, query: Option<&str>, level: Option<i64>) -> Option<CommandKind> {
    Some(match name {
        "play" => CommandKind::Play {
            query: query.unwrap_or_default().to_string(),
        },
        "skip" => CommandKind::Skip,
        "stop" => CommandKind::Stop,
        "queue" => CommandKind::ShowQueue,
        "pause" => CommandKind::Pause,
        "resume" => CommandKind::Resume,
        "nowplaying" => CommandKind::NowPlaying,
        "volume" => CommandKind::Volume { level },
        _ => return None,
    })
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn option_i64(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn reply_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_known_commands() {
        assert_eq!(
            parse_kind("play", Some("lofi beats"), None),
            Some(CommandKind::Play {
                query: "lofi beats".into()
            })
        );
        assert_eq!(parse_kind("queue", None, None), Some(CommandKind::ShowQueue));
        assert_eq!(
            parse_kind("volume", None, Some(75)),
            Some(CommandKind::Volume { level: Some(75) })
        );
        assert_eq!(parse_kind("volume", None, None), Some(CommandKind::Volume { level: None }));
        assert_eq!(parse_kind("shuffle", None, None), None);
    }

    #[test]
    fn play_without_query_fails_validation() {
        let kind = parse_kind("play", None, None).unwrap();
        let command = Command {
            kind,
            guild_id: GuildId::new(1),
            user_id: UserId::new(2),
            invoking_user_voice_channel: Some(ChannelId::new(3)),
            reply_channel: ChannelId::new(4),
        };
        assert!(CommandDispatcher::validate(&command).is_err());
    }
}
