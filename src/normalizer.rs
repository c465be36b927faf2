//! Translation of raw transport signals into canonical events.
//!
//! Everything here is pure. Signals that affect the session itself (disconnects,
//! the agent leaving, a remote audio track) come back as [`Control`] for the
//! controller to act on; everything else either becomes a [`CanonicalEvent`] or is
//! dropped.
//!
//! Data messages are free-form JSON. A payload that is not UTF-8, not a JSON
//! object, or of a kind we do not know is dropped without an error: the channel
//! also carries heartbeats and newer server message kinds.

use serde_json::Value;
use voice_session_types::events::{
    AgentSpeechEnded, AgentSpeechStarted, ConnectionLost, ConnectionRestored, SessionMetadata,
    TranscriptUpdated,
};
use voice_session_types::transcript::UnknownRole;
use voice_session_types::{CanonicalEvent, RawServerMessage, Role, TranscriptEntry};

use crate::transport::{RemoteAudioTrack, TranscriptionSegment, TransportSignal};

/// Identity the agent joins the room with.
pub const SERVER_IDENTITY: &str = "server";

/// Candidate fields naming a data message's kind, highest priority first.
pub const KIND_FIELDS: [&str; 4] = ["event_type", "type", "eventType", "event"];

/// Candidate fields holding the transcript of an `update`, highest priority first.
pub const TRANSCRIPT_FIELDS: [&str; 3] = ["transcript", "transcripts", "entries"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Metadata,
    Update,
    AgentStartTalking,
    AgentStopTalking,
}

impl MessageKind {
    pub fn classify(message: &RawServerMessage) -> Option<Self> {
        match message.first_str(&KIND_FIELDS)? {
            "metadata" => Some(MessageKind::Metadata),
            "update" => Some(MessageKind::Update),
            "agent_start_talking" => Some(MessageKind::AgentStartTalking),
            "agent_stop_talking" => Some(MessageKind::AgentStopTalking),
            _ => None,
        }
    }
}

/// Signals the controller handles itself.
#[derive(Debug)]
pub enum Control {
    Disconnected { reason: Option<String> },
    AgentLeft { identity: String },
    AudioTrack(RemoteAudioTrack),
}

#[derive(Debug)]
pub enum Normalized {
    Event(CanonicalEvent),
    Control(Control),
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("field `{0}` is not an array")]
    NotAnArray(&'static str),
    #[error("transcript entry {index} has no string `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("transcript entry {index}: {source}")]
    Role { index: usize, source: UnknownRole },
}

/// Guesses whether a participant is the agent from its identity alone.
///
/// Nothing in the transport guarantees this naming; it matches the reserved server
/// identity or any identity containing "agent" (case-sensitive).
pub fn is_agent_identity(identity: &str) -> bool {
    identity == SERVER_IDENTITY || identity.contains("agent")
}

pub fn normalize(signal: TransportSignal) -> Normalized {
    match signal {
        TransportSignal::Disconnected { reason } => Normalized::Control(Control::Disconnected { reason }),
        TransportSignal::Reconnecting => Normalized::Event(ConnectionLost.into()),
        TransportSignal::Reconnected => Normalized::Event(ConnectionRestored.into()),
        TransportSignal::ParticipantLeft { identity } => {
            if is_agent_identity(&identity) {
                Normalized::Control(Control::AgentLeft { identity })
            } else {
                tracing::debug!("participant {} left", identity);
                Normalized::Ignored
            }
        }
        TransportSignal::TrackSubscribed(track) => Normalized::Control(Control::AudioTrack(track)),
        TransportSignal::DataReceived { payload, .. } => {
            decode_data_message(&payload).map_or(Normalized::Ignored, Normalized::Event)
        }
        TransportSignal::TranscriptionReceived {
            participant_identity,
            segments,
        } => {
            if segments.is_empty() {
                Normalized::Ignored
            } else {
                Normalized::Event(transcription_event(&participant_identity, &segments))
            }
        }
    }
}

fn transcription_event(participant_identity: &str, segments: &[TranscriptionSegment]) -> CanonicalEvent {
    let role = if is_agent_identity(participant_identity) {
        Role::Agent
    } else {
        Role::User
    };
    let entries = segments
        .iter()
        .map(|segment| TranscriptEntry::new(role, &segment.text))
        .collect();
    TranscriptUpdated::new(entries).into()
}

/// Decodes one application data message. `None` means the message is dropped.
pub fn decode_data_message(payload: &[u8]) -> Option<CanonicalEvent> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("dropping non-utf8 data message: {}", e);
            return None;
        }
    };
    let Some(message) = RawServerMessage::from_json(text) else {
        tracing::debug!("dropping data message that is not a json object: {:?}", text);
        return None;
    };
    let Some(kind) = MessageKind::classify(&message) else {
        tracing::debug!(
            "ignoring data message of unknown kind: {}",
            message.first_str(&KIND_FIELDS).unwrap_or("unknown")
        );
        return None;
    };

    match interpret(kind, message) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("failed to interpret {:?} message: {}", kind, e);
            None
        }
    }
}

fn interpret(kind: MessageKind, message: RawServerMessage) -> Result<CanonicalEvent, InterpretError> {
    Ok(match kind {
        MessageKind::Metadata => SessionMetadata::new(message.into_fields()).into(),
        MessageKind::Update => TranscriptUpdated::new(transcript_entries(&message)?).into(),
        MessageKind::AgentStartTalking => AgentSpeechStarted.into(),
        MessageKind::AgentStopTalking => AgentSpeechEnded.into(),
    })
}

fn transcript_entries(message: &RawServerMessage) -> Result<Vec<TranscriptEntry>, InterpretError> {
    let Some((field, value)) = message.first_present(&TRANSCRIPT_FIELDS) else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or(InterpretError::NotAnArray(field))?;
    // Each update is a full snapshot, so one bad entry must not hide the rest.
    let entries = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match transcript_entry(index, item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("skipping transcript entry: {}", e);
                None
            }
        })
        .collect();
    Ok(entries)
}

fn transcript_entry(index: usize, item: &Value) -> Result<TranscriptEntry, InterpretError> {
    let role = item
        .get("role")
        .and_then(Value::as_str)
        .ok_or(InterpretError::MissingField { index, field: "role" })?
        .parse::<Role>()
        .map_err(|source| InterpretError::Role { index, source })?;
    let content = item
        .get("content")
        .or_else(|| item.get("text"))
        .and_then(Value::as_str)
        .ok_or(InterpretError::MissingField { index, field: "content" })?;
    Ok(TranscriptEntry::new(role, content))
}
