//! The canonical event vocabulary.
//!
//! Every inbound signal a session receives collapses into one of the variants of
//! [`CanonicalEvent`]. Each variant wraps a payload type implementing [`Event`], so
//! subscribers can register for a single event by type and receive the payload
//! shape that belongs to it.

use serde_json::{Map, Value};

use crate::audio::AudioFrame;
use crate::error::SessionError;
use crate::transcript::TranscriptEntry;

/// Name of a canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionConnected,
    SessionDisconnected,
    MicPermissionDenied,
    AgentSpeechStarted,
    AgentSpeechEnded,
    TranscriptUpdated,
    SessionMetadata,
    AudioStream,
    SessionError,
    ConnectionLost,
    ConnectionRestored,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionConnected => "session_connected",
            EventKind::SessionDisconnected => "session_disconnected",
            EventKind::MicPermissionDenied => "mic_permission_denied",
            EventKind::AgentSpeechStarted => "agent_speech_started",
            EventKind::AgentSpeechEnded => "agent_speech_ended",
            EventKind::TranscriptUpdated => "transcript_updated",
            EventKind::SessionMetadata => "session_metadata",
            EventKind::AudioStream => "audio_stream",
            EventKind::SessionError => "session_error",
            EventKind::ConnectionLost => "connection_lost",
            EventKind::ConnectionRestored => "connection_restored",
        }
    }
}

/// A payload type bound to exactly one [`EventKind`].
pub trait Event: Into<CanonicalEvent> + Clone + Send + Sync + 'static {
    const KIND: EventKind;

    /// Borrows the payload out of a canonical event of the matching kind.
    fn from_canonical(event: &CanonicalEvent) -> Option<&Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConnected;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionDisconnected;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicPermissionDenied {
    error: SessionError,
}

impl MicPermissionDenied {
    pub fn new(error: SessionError) -> Self {
        Self { error }
    }

    pub fn error(&self) -> &SessionError {
        &self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentSpeechStarted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentSpeechEnded;

/// The full transcript at emission time. Entries are chronological and are not
/// merged with earlier snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUpdated {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptUpdated {
    pub fn new(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }
}

/// Server metadata, passed through verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    metadata: Map<String, Value>,
}

impl SessionMetadata {
    pub fn new(metadata: Map<String, Value>) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    frame: AudioFrame,
}

impl AudioStream {
    pub fn new(frame: AudioFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &AudioFrame {
        &self.frame
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionErrorEvent {
    cause: SessionError,
}

impl SessionErrorEvent {
    pub fn new(cause: SessionError) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &SessionError {
        &self.cause
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionLost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionRestored;

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    SessionConnected(SessionConnected),
    SessionDisconnected(SessionDisconnected),
    MicPermissionDenied(MicPermissionDenied),
    AgentSpeechStarted(AgentSpeechStarted),
    AgentSpeechEnded(AgentSpeechEnded),
    TranscriptUpdated(TranscriptUpdated),
    SessionMetadata(SessionMetadata),
    AudioStream(AudioStream),
    SessionError(SessionErrorEvent),
    ConnectionLost(ConnectionLost),
    ConnectionRestored(ConnectionRestored),
}

macro_rules! canonical_events {
    ($($variant:ident => $payload:ty),* $(,)?) => {
        impl CanonicalEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(CanonicalEvent::$variant(_) => EventKind::$variant,)*
                }
            }
        }

        $(
            impl From<$payload> for CanonicalEvent {
                fn from(payload: $payload) -> Self {
                    CanonicalEvent::$variant(payload)
                }
            }

            impl Event for $payload {
                const KIND: EventKind = EventKind::$variant;

                fn from_canonical(event: &CanonicalEvent) -> Option<&Self> {
                    match event {
                        CanonicalEvent::$variant(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )*
    };
}

canonical_events! {
    SessionConnected => SessionConnected,
    SessionDisconnected => SessionDisconnected,
    MicPermissionDenied => MicPermissionDenied,
    AgentSpeechStarted => AgentSpeechStarted,
    AgentSpeechEnded => AgentSpeechEnded,
    TranscriptUpdated => TranscriptUpdated,
    SessionMetadata => SessionMetadata,
    AudioStream => AudioStream,
    SessionError => SessionErrorEvent,
    ConnectionLost => ConnectionLost,
    ConnectionRestored => ConnectionRestored,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;

    #[test]
    fn test_kind_matches_payload() {
        let event: CanonicalEvent = TranscriptUpdated::new(vec![TranscriptEntry::new(Role::Agent, "hello")]).into();
        assert_eq!(event.kind(), EventKind::TranscriptUpdated);
        assert_eq!(event.kind(), TranscriptUpdated::KIND);

        let payload = TranscriptUpdated::from_canonical(&event).unwrap();
        assert_eq!(payload.entries()[0].content(), "hello");
        assert!(AudioStream::from_canonical(&event).is_none());
    }

    #[test]
    fn test_error_event_kind() {
        let event: CanonicalEvent = SessionErrorEvent::new(SessionError::Unknown("boom".into())).into();
        assert_eq!(event.kind(), EventKind::SessionError);
        assert_eq!(event.kind().as_str(), "session_error");
    }
}
