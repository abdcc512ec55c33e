use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use guild_music::{
    audio::{
        dispatcher::CommandDispatcher, notifier::EventNotifier, registry::SessionRegistry,
        session::SessionSettings, songbird_backend::SongbirdBackend,
    },
    bot::{messenger::ChannelMessenger, MusicBot},
    config::Config,
    sources::YouTubeClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting guild-music v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let songbird = Songbird::serenity();
    let backend = Arc::new(SongbirdBackend::new(
        songbird.clone(),
        Arc::new(YouTubeClient::new()),
        config.search_timeout,
    ));

    let http = Arc::new(Http::new(&config.discord_token));
    let notifier = EventNotifier::new(Arc::new(ChannelMessenger::new(http)));
    let registry = SessionRegistry::new(backend.clone(), notifier, SessionSettings::from(config.as_ref()));
    let dispatcher = Arc::new(CommandDispatcher::new(registry.clone()).with_display_limit(config.queue_display_limit));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = MusicBot::new(config.clone(), dispatcher, backend);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Leave every voice channel before the gateway goes away
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, stopping {} sessions...", registry.len());
        registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
