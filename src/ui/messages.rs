//! Every user-facing string the bot sends, for replies and notifications alike.

use std::time::Duration;

use crate::audio::{
    notifier::Notification,
    queue::Track,
    session::{CommandOutcome, QueueSnapshot, SessionState},
};
use crate::error::MusicError;

const NO_MORE_SONGS: &str = "No more songs in queue";

pub fn notification(notification: &Notification) -> String {
    match notification {
        Notification::NowPlaying { track, upcoming } => format!(
            "🎶 Now playing: **{}** - `{}`\nNext in queue: **{}**",
            track.title(),
            track_duration(track),
            upcoming_title(upcoming.as_ref())
        ),
        Notification::TrackAdded { track, upcoming } => format!(
            "✅ Added to queue: **{}** - `{}`\nNext in queue: **{}**",
            track.title(),
            track_duration(track),
            upcoming_title(upcoming.as_ref())
        ),
        Notification::PlaybackError { message, .. } => format!("❌ An error encountered: {}", message),
        Notification::QueueFinished => "📭 The queue has finished.".to_string(),
        Notification::LeftEmptyChannel => "👋 Everyone left the voice channel, so I left too.".to_string(),
        Notification::ConnectionLost => "🔌 I was disconnected from the voice channel and cleared the queue.".to_string(),
    }
}

/// Reply text for a successful command.
///
/// `play` only gets a short acknowledgement; the channel notification
/// carries the details.
pub fn outcome(outcome: &CommandOutcome, display_limit: usize) -> String {
    match outcome {
        CommandOutcome::NowPlaying(track) => format!("🔍 Found **{}**, starting playback.", track.title()),
        CommandOutcome::Queued { track, position } => {
            format!("✅ Queued **{}** at position {}.", track.title(), position)
        }
        CommandOutcome::Skipped { skipped, next } => match next {
            Some(next) => format!("⏭️ Skipped **{}**. Now playing: **{}**", skipped.title(), next.title()),
            None => format!("⏭️ Skipped **{}**. {}.", skipped.title(), NO_MORE_SONGS),
        },
        CommandOutcome::Paused(track) => format!("⏸️ Paused **{}**.", track.title()),
        CommandOutcome::Resumed(track) => format!("▶️ Resumed **{}**.", track.title()),
        CommandOutcome::Volume { level, changed: true } => format!("🔊 Volume set to {}%.", level),
        CommandOutcome::Volume { level, changed: false } => format!("🔊 Volume is {}%.", level),
        CommandOutcome::Current {
            track,
            upcoming,
            paused,
        } => format!(
            "{} **{}** - `{}`\nNext in queue: **{}**",
            if *paused { "⏸️ Paused:" } else { "🎶 Now playing:" },
            track.title(),
            track_duration(track),
            upcoming_title(upcoming.as_ref())
        ),
        CommandOutcome::Queue(snapshot) => queue(snapshot, display_limit),
        CommandOutcome::Stopped => "⏹️ Stopped playback and cleared the queue.".to_string(),
        CommandOutcome::Cancelled => "⏹️ Playback was stopped before this request could start.".to_string(),
    }
}

pub fn error(error: &MusicError) -> String {
    format!("❌ {}", error)
}

fn queue(snapshot: &QueueSnapshot, display_limit: usize) -> String {
    if snapshot.now_playing.is_none() && snapshot.upcoming.is_empty() {
        return "📭 The queue is empty.".to_string();
    }

    let mut lines = Vec::new();
    match &snapshot.now_playing {
        Some(track) => {
            let label = if snapshot.state == SessionState::Paused {
                "⏸️ Paused"
            } else {
                "🎶 Now playing"
            };
            lines.push(format!("{}: **{}** - `{}`", label, track.title(), track_duration(track)));
        }
        None => lines.push("⏳ Waiting to start:".to_string()),
    }

    if snapshot.upcoming.is_empty() {
        lines.push(NO_MORE_SONGS.to_string());
        return lines.join("\n");
    }

    lines.push(String::new());
    for (index, track) in snapshot.upcoming.iter().take(display_limit).enumerate() {
        lines.push(format!("{}. **{}** - `{}`", index + 1, track.title(), track_duration(track)));
    }
    if snapshot.upcoming.len() > display_limit {
        lines.push(format!("…and {} more", snapshot.upcoming.len() - display_limit));
    }
    lines.push(format!(
        "\n📋 {} in queue, total `{}`",
        snapshot.upcoming.len(),
        format_duration(snapshot.upcoming_duration())
    ));

    lines.join("\n")
}

fn upcoming_title(upcoming: Option<&Track>) -> &str {
    upcoming.map(Track::title).unwrap_or(NO_MORE_SONGS)
}

fn track_duration(track: &Track) -> String {
    match track.duration() {
        Some(duration) => format_duration(duration),
        None => "🔴 Live".to_string(),
    }
}

/// `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
