//! The session controller.
//!
//! Owns the only mutable session state: the transport connection, the audio
//! sampler and the pending capture tick. Transport signals and capture ticks are
//! queued on a single inbound channel and handled one at a time by whoever drives
//! the controller ([`SessionController::run`], [`SessionController::process_next`]).
//!
//! Every input is tagged with the session it belongs to, so anything still queued
//! for a superseded session is dropped instead of leaking into the next one.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use voice_session_types::events::{
    AudioStream, MicPermissionDenied, SessionConnected, SessionDisconnected, SessionErrorEvent,
};
use voice_session_types::{CanonicalEvent, SessionError};

use crate::bus::EventBus;
use crate::capture::{CaptureLoop, FrameScheduler, IntervalScheduler};
use crate::devices::MediaDevices;
use crate::normalizer::{self, Control, Normalized};
use crate::sampler::{AudioSampler, RingBufferSamplerFactory, SamplerFactory};
use crate::transport::{ConnectRequest, RemoteAudioTrack, SignalSink, Transport, TransportError, TransportSignal};

mod config;
mod consts;
mod stats;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use stats::SessionStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connected,
}

#[derive(Debug)]
pub(crate) enum SessionInput {
    Signal(TransportSignal),
    CaptureTick,
}

/// One item of the inbound queue.
#[derive(Debug)]
pub(crate) struct Inbound {
    session: u64,
    input: SessionInput,
}

impl Inbound {
    pub(crate) fn signal(session: u64, signal: TransportSignal) -> Self {
        Self {
            session,
            input: SessionInput::Signal(signal),
        }
    }

    pub(crate) fn capture_tick(session: u64) -> Self {
        Self {
            session,
            input: SessionInput::CaptureTick,
        }
    }

    #[cfg(test)]
    pub(crate) fn into_parts(self) -> (u64, SessionInput) {
        (self.session, self.input)
    }
}

/// Resources owned by one session.
struct ActiveSession {
    id: u64,
    enable_raw_audio: bool,
    frame_size: usize,
    sampler: Option<Box<dyn AudioSampler>>,
    capture: Option<CaptureLoop>,
}

impl ActiveSession {
    fn new(id: u64, config: &SessionConfig) -> Self {
        Self {
            id,
            enable_raw_audio: config.enable_raw_audio(),
            frame_size: config.analysis_frame_size(),
            sampler: None,
            capture: None,
        }
    }
}

pub struct SessionController<T: Transport, D: MediaDevices> {
    transport: T,
    devices: D,
    samplers: Box<dyn SamplerFactory>,
    scheduler: Arc<dyn FrameScheduler>,
    bus: EventBus,
    state: SessionState,
    agent_speaking: bool,
    session: Option<ActiveSession>,
    // Set from the moment a connect is attempted until the transport is
    // disconnected, including when an initiate future was dropped half-way.
    transport_live: bool,
    last_session_id: u64,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    stats: SessionStats,
}

impl<T: Transport, D: MediaDevices> SessionController<T, D> {
    pub fn new(transport: T, devices: D) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            devices,
            samplers: Box::new(RingBufferSamplerFactory),
            scheduler: Arc::new(IntervalScheduler::default()),
            bus: EventBus::new(),
            state: SessionState::Idle,
            agent_speaking: false,
            session: None,
            transport_live: false,
            last_session_id: 0,
            inbox_tx,
            inbox_rx,
            stats: SessionStats::new(),
        }
    }

    pub fn with_sampler_factory<F: SamplerFactory + 'static>(mut self, samplers: F) -> Self {
        self.samplers = Box::new(samplers);
        self
    }

    pub fn with_scheduler<S: FrameScheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    /// Starts a new session, first tearing down any existing one.
    ///
    /// On failure a `SessionError` event is emitted and everything acquired so far
    /// is released before the error is returned. A configuration error returns
    /// before any of that, with no events and the current session untouched.
    pub async fn initiate_session(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        config.validate()?;
        self.terminate_session().await;

        self.last_session_id += 1;
        let id = self.last_session_id;
        self.session = Some(ActiveSession::new(id, &config));
        self.stats.session_started();
        tracing::info!("starting session {}", id);

        match self.establish(id, &config).await {
            Ok(()) => {
                self.state = SessionState::Connected;
                tracing::info!("session {} connected", id);
                self.bus.emit(SessionConnected);
                Ok(())
            }
            Err(cause) => {
                tracing::error!("session {} failed to start: {}", id, cause);
                if cause.is_permission() {
                    self.bus.emit(MicPermissionDenied::new(cause.clone()));
                }
                self.bus.emit(SessionErrorEvent::new(cause.clone()));
                self.teardown().await;
                Err(cause)
            }
        }
    }

    async fn establish(&mut self, id: u64, config: &SessionConfig) -> Result<(), SessionError> {
        self.devices
            .probe_microphone(config.input_device_id().map(str::to_string))
            .await?;

        let request = ConnectRequest {
            token: SecretString::from(config.session_token().expose_secret().to_string()),
            options: config.connect_options(),
        };
        self.transport_live = true;
        self.transport
            .connect(request, SignalSink::new(id, self.inbox_tx.clone()))
            .await
            .map_err(|e| SessionError::TransportConnect(e.to_string()))?;

        self.transport
            .set_microphone_enabled(true)
            .await
            .map_err(|e| SessionError::TransportConnect(e.to_string()))?;
        Ok(())
    }

    /// Ends the session. Safe to call at any time; only emits `SessionDisconnected`
    /// when a session was connected.
    pub async fn terminate_session(&mut self) {
        if self.teardown().await {
            self.bus.emit(SessionDisconnected);
        }
    }

    /// Releases everything the session owns. Returns whether it was connected.
    async fn teardown(&mut self) -> bool {
        let was_connected = self.state == SessionState::Connected;

        if let Some(mut session) = self.session.take() {
            if let Some(mut capture) = session.capture.take() {
                capture.cancel();
            }
            if let Some(mut sampler) = session.sampler.take() {
                sampler.release();
            }
            tracing::debug!("released session {}", session.id);
        }

        if self.transport_live {
            if let Err(e) = self.transport.disconnect().await {
                tracing::warn!("ignoring transport disconnect failure: {}", e);
            }
            self.transport_live = false;
        }

        self.state = SessionState::Idle;
        self.agent_speaking = false;
        was_connected
    }

    pub async fn mute(&mut self) -> Result<(), TransportError> {
        self.set_microphone(false).await
    }

    pub async fn unmute(&mut self) -> Result<(), TransportError> {
        self.set_microphone(true).await
    }

    async fn set_microphone(&mut self, enabled: bool) -> Result<(), TransportError> {
        if self.state != SessionState::Connected {
            return Ok(());
        }
        self.transport.set_microphone_enabled(enabled).await
    }

    /// Waits for the next inbound signal or capture tick and handles it.
    pub async fn process_next(&mut self) {
        if let Some(inbound) = self.inbox_rx.recv().await {
            self.handle(inbound).await;
        }
    }

    /// Handles everything already queued without waiting. Returns how many items
    /// were taken off the queue.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            self.handle(inbound).await;
            handled += 1;
        }
        handled
    }

    /// Drives the session until it is no longer connected.
    pub async fn run(&mut self) {
        while self.state == SessionState::Connected {
            self.process_next().await;
        }
    }

    async fn handle(&mut self, inbound: Inbound) {
        if self.session.as_ref().map(|s| s.id) != Some(inbound.session) {
            tracing::trace!("dropping input for stale session {}", inbound.session);
            return;
        }
        // A session whose initiate never completed is not live yet.
        if self.state != SessionState::Connected {
            tracing::debug!("dropping input for session {} that is not connected", inbound.session);
            return;
        }
        match inbound.input {
            SessionInput::Signal(signal) => self.on_signal(signal).await,
            SessionInput::CaptureTick => self.on_capture_tick(),
        }
    }

    async fn on_signal(&mut self, signal: TransportSignal) {
        let is_data = matches!(signal, TransportSignal::DataReceived { .. });
        let normalized = normalizer::normalize(signal);
        if is_data {
            self.stats.data_message(matches!(normalized, Normalized::Ignored));
        }

        match normalized {
            Normalized::Event(event) => self.publish(event),
            Normalized::Control(Control::Disconnected { reason }) => {
                if self.state == SessionState::Connected {
                    tracing::info!("transport disconnected: {}", reason.as_deref().unwrap_or("no reason"));
                    self.terminate_session().await;
                }
            }
            Normalized::Control(Control::AgentLeft { identity }) => {
                if self.state == SessionState::Connected {
                    tracing::info!("agent {} left the session", identity);
                    self.terminate_session().await;
                }
            }
            Normalized::Control(Control::AudioTrack(track)) => self.attach_audio(track),
            Normalized::Ignored => {}
        }
    }

    fn publish(&mut self, event: CanonicalEvent) {
        match event {
            CanonicalEvent::AgentSpeechStarted(_) => self.agent_speaking = true,
            CanonicalEvent::AgentSpeechEnded(_) => self.agent_speaking = false,
            _ => {}
        }
        self.bus.emit(event);
    }

    fn attach_audio(&mut self, track: RemoteAudioTrack) {
        let connected = self.state == SessionState::Connected;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !connected || !session.enable_raw_audio {
            tracing::debug!("raw audio disabled, ignoring track {}", track.sid);
            return;
        }
        if session.sampler.is_some() {
            tracing::debug!("already sampling, ignoring track {}", track.sid);
            return;
        }

        match self.samplers.create(track, session.frame_size) {
            Ok(sampler) => {
                session.sampler = Some(sampler);
                let id = session.id;
                let inbox = self.inbox_tx.clone();
                let mut capture = CaptureLoop::new(self.scheduler.clone(), move || {
                    let _ = inbox.send(Inbound::capture_tick(id));
                });
                capture.start();
                session.capture = Some(capture);
            }
            Err(e) => {
                // The session carries on without raw audio.
                tracing::warn!("failed to create audio sampler: {}", e);
                self.bus.emit(SessionErrorEvent::new(e.into()));
            }
        }
    }

    fn on_capture_tick(&mut self) {
        let connected = self.state == SessionState::Connected;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (Some(capture), Some(sampler)) = (session.capture.as_mut(), session.sampler.as_mut()) else {
            return;
        };
        if let Some(frame) = capture.on_tick(connected, &mut **sampler) {
            self.stats.audio_frame();
            self.bus.emit(AudioStream::new(frame));
        }
    }
}
