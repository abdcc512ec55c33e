//! # Audio Module
//!
//! Per-guild playback sessions and the voice backend they drive.
//!
//! ## Architecture
//!
//! ### [`registry`] and [`session`]
//! - One [`session::Session`] task per guild owns the queue, the voice
//!   connection and the volume
//! - Commands and backend events share the session's mailbox, so they apply
//!   one at a time in arrival order
//! - [`registry::SessionRegistry`] guarantees a single live session per guild
//!
//! ### [`dispatcher`]
//! - Validates chat commands and routes them to the right session
//!
//! ### [`backend`] and [`songbird_backend`]
//! - [`backend::AudioBackend`] is everything a session needs from a player
//! - The songbird implementation streams yt-dlp inputs and reports track
//!   events back through [`backend::EventSink`]
//!
//! ### [`notifier`]
//! - Formats session notifications and posts them to each guild's text channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use guild_music::audio::{
//!     dispatcher::{Command, CommandDispatcher, CommandKind},
//!     notifier::EventNotifier,
//!     registry::SessionRegistry,
//!     session::SessionSettings,
//! };
//! # use std::sync::Arc;
//! # use serenity::all::{ChannelId, GuildId, UserId};
//!
//! # async fn example(
//! #     backend: Arc<dyn guild_music::audio::backend::AudioBackend>,
//! #     notifier: EventNotifier,
//! # ) {
//! let registry = SessionRegistry::new(backend, notifier, SessionSettings::default());
//! let dispatcher = CommandDispatcher::new(registry);
//!
//! let reply = dispatcher
//!     .dispatch(Command {
//!         kind: CommandKind::Play { query: "lofi beats".into() },
//!         guild_id: GuildId::new(1),
//!         user_id: UserId::new(2),
//!         invoking_user_voice_channel: Some(ChannelId::new(3)),
//!         reply_channel: ChannelId::new(4),
//!     })
//!     .await;
//! println!("{reply}");
//! # }
//! ```

pub mod backend;
pub mod dispatcher;
pub mod notifier;
pub mod queue;
pub mod registry;
pub mod session;
pub mod songbird_backend;
mod track_events;

#[cfg(test)]
pub(crate) mod testing;
