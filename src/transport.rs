//! The boundary to the real-time transport.
//!
//! A [`Transport`] owns the connection to the remote agent. It reports what happens
//! on that connection as raw [`TransportSignal`]s pushed through the [`SignalSink`]
//! it was handed at connect time.

use std::fmt;

use async_trait::async_trait;
use ringbuf::HeapCons;
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::controller::Inbound;

pub mod ws;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to publish microphone: {0}")]
    Publish(String),
    #[error("failed to disconnect: {0}")]
    Disconnect(String),
    #[error("not connected")]
    NotConnected,
}

/// Connection parameters handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub audio_sample_rate: u32,
    pub input_device_id: Option<String>,
    pub output_device_id: Option<String>,
}

#[derive(Debug)]
pub struct ConnectRequest {
    pub token: SecretString,
    pub options: ConnectOptions,
}

/// One piece of a native transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionSegment {
    pub id: String,
    pub text: String,
    pub is_final: bool,
}

/// A subscribed remote audio source. `source` yields mono samples at the session
/// sample rate as they arrive.
pub struct RemoteAudioTrack {
    pub sid: String,
    pub participant_identity: String,
    pub source: HeapCons<f32>,
}

impl fmt::Debug for RemoteAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAudioTrack")
            .field("sid", &self.sid)
            .field("participant_identity", &self.participant_identity)
            .finish_non_exhaustive()
    }
}

/// Raw signals reported by a transport.
#[derive(Debug)]
pub enum TransportSignal {
    Disconnected { reason: Option<String> },
    Reconnecting,
    Reconnected,
    ParticipantLeft { identity: String },
    TrackSubscribed(RemoteAudioTrack),
    DataReceived {
        payload: Vec<u8>,
        participant_identity: Option<String>,
    },
    TranscriptionReceived {
        participant_identity: String,
        segments: Vec<TranscriptionSegment>,
    },
}

/// Delivers signals for one session into the controller's inbound queue.
#[derive(Debug, Clone)]
pub struct SignalSink {
    session: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl SignalSink {
    pub(crate) fn new(session: u64, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the controller is gone.
    pub fn send(&self, signal: TransportSignal) -> bool {
        self.tx.send(Inbound::signal(self.session, signal)).is_ok()
    }
}

#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self, request: ConnectRequest, signals: SignalSink) -> Result<(), TransportError>;

    async fn set_microphone_enabled(&mut self, enabled: bool) -> Result<(), TransportError>;

    /// Must succeed as a no-op when nothing is connected.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
