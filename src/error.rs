//! Error taxonomy for guild playback.
//!
//! Every failure a command can produce falls into one of three groups:
//! - [`ValidationError`]: rejected before any session state is touched
//! - [`BackendError`]: the audio backend failed to search, connect or play
//! - [`MusicError::SessionClosed`]: the session went away while the command was in flight
//!
//! The `Display` text of a [`ValidationError`] is shown to the user verbatim.

use thiserror::Error;

/// Highest volume a session accepts, in percent.
pub const MAX_VOLUME: u8 = 200;

/// Preconditions a command failed before reaching a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please provide a valid YouTube URL or search term.")]
    EmptyQuery,

    #[error("You need to be in a Voice Channel to play music.")]
    NotInVoiceChannel,

    #[error("Nothing is playing in this server.")]
    NoSession,

    #[error("Nothing is playing right now.")]
    NothingPlaying,

    #[error("Playback is not paused.")]
    NotPaused,

    #[error("Playback is already paused.")]
    AlreadyPaused,

    #[error("The queue is full (maximum {0} tracks).")]
    QueueFull(usize),

    #[error("Volume must be between 0 and {max}, got {0}.", max = MAX_VOLUME)]
    VolumeOutOfRange(i64),
}

/// Failures reported by an [`AudioBackend`](crate::audio::backend::AudioBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("No results found for `{0}`.")]
    NoResults(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Could not join the voice channel: {0}")]
    Connect(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Not connected to a voice channel.")]
    NotConnected,
}

impl BackendError {
    /// Whether re-issuing the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Search(_) | Self::Connect(_))
    }
}

/// Error returned to the caller of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MusicError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("The player for this server shut down, please try again.")]
    SessionClosed,
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;
