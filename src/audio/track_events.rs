use songbird::{
    tracks::PlayMode, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use tracing::debug;

use super::{
    backend::{BackendEvent, EventSink},
    queue::Track,
};

/// Forwards songbird's events for one track into its session's mailbox.
pub(crate) struct TrackEventForwarder {
    track: Track,
    events: EventSink,
    kind: TrackEvent,
}

impl TrackEventForwarder {
    pub(crate) fn new(track: Track, events: EventSink, kind: TrackEvent) -> Self {
        Self { track, events, kind }
    }

    fn to_backend_event(&self, ctx: &EventContext<'_>) -> Option<BackendEvent> {
        match self.kind {
            TrackEvent::Play => Some(BackendEvent::TrackStarted(self.track.clone())),
            TrackEvent::End => Some(BackendEvent::TrackFinished(self.track.clone())),
            TrackEvent::Error => Some(BackendEvent::PlaybackError {
                track: Some(self.track.clone()),
                message: error_message(ctx).unwrap_or_else(|| "the audio stream failed".to_string()),
            }),
            _ => None,
        }
    }
}

fn error_message(ctx: &EventContext<'_>) -> Option<String> {
    let EventContext::Track(states) = ctx else {
        return None;
    };
    states.iter().find_map(|(state, _)| match &state.playing {
        PlayMode::Errored(e) => Some(format!("{:?}", e)),
        _ => None,
    })
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let event = self.to_backend_event(ctx)?;
        if !self.events.emit(event) {
            debug!("Session for guild {} is gone, dropping track events", self.events.guild_id());
            return Some(Event::Cancel);
        }
        None
    }
}
