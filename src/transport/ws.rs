//! WebSocket transport.
//!
//! Speaks a minimal protocol with the voice server at `{base_url}/session`: text
//! frames carry the JSON data messages, binary frames carry mono PCM16 little-endian
//! audio at the session sample rate in both directions. The agent's audio shows up
//! as a single remote track owned by the reserved `server` identity.

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapProd;
use rubato::{FastFixedIn, Resampler};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use voice_session_utils::audio;
use voice_session_utils::stream::{InputCapture, OutputPlayback};

use super::{ConnectRequest, RemoteAudioTrack, SignalSink, Transport, TransportError, TransportSignal};
use crate::normalizer::SERVER_IDENTITY;

pub const BASE_URL_ENV: &str = "VOICE_SESSION_URL";
pub const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8080";
pub const DEFAULT_CAPACITY: usize = 1024;

pub const AUTHORIZATION_HEADER: &str = "Authorization";

const SESSION_PATH: &str = "/session";
const PLAYBACK_BUFFER_SAMPLES: usize = 48_000 * 2;
const ANALYSIS_BUFFER_SECONDS: usize = 2;
const RESAMPLER_CHUNK_SIZE: usize = 100;
const CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct WsConfig {
    base_url: String,
    capacity: usize,
    playback: bool,
}

pub struct WsConfigBuilder {
    config: WsConfig,
}

impl Default for WsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WsConfig::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    /// Whether the agent's audio is played on the output device.
    pub fn with_playback(mut self, playback: bool) -> Self {
        self.config.playback = playback;
        self
    }

    pub fn build(self) -> WsConfig {
        self.config
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConfig {
    /// Base URL from `VOICE_SESSION_URL`, falling back to a local server.
    pub fn new() -> Self {
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            capacity: DEFAULT_CAPACITY,
            playback: true,
        }
    }

    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn playback(&self) -> bool {
        self.playback
    }
}

pub fn build_request(config: &WsConfig, token: &SecretString) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}{}", config.base_url(), SESSION_PATH).into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION_HEADER,
        format!("Bearer {}", token.expose_secret()).as_str().parse()?,
    );
    Ok(request)
}

/// Streams the local microphone to the server while it lives.
struct Microphone {
    _capture: InputCapture,
    encode_handle: JoinHandle<()>,
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.encode_handle.abort();
    }
}

struct Connection {
    out_tx: mpsc::Sender<Message>,
    send_handle: JoinHandle<()>,
    recv_handle: JoinHandle<()>,
    sample_rate: u32,
    input_device_id: Option<String>,
    microphone: Option<Microphone>,
    _playback: Option<OutputPlayback>,
}

impl Connection {
    /// The server ended the connection and the receive loop has returned.
    fn peer_closed(&self) -> bool {
        self.recv_handle.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.send_handle.abort();
        self.recv_handle.abort();
    }
}

/// Where incoming agent audio goes: the analysis track, raised on the first
/// audio frame, and optionally the speakers.
struct AudioRouter {
    sample_rate: u32,
    track: Option<HeapProd<f32>>,
    playback: Option<(HeapProd<f32>, FastFixedIn<f32>)>,
}

impl AudioRouter {
    fn new(sample_rate: u32, playback: Option<(HeapProd<f32>, FastFixedIn<f32>)>) -> Self {
        Self {
            sample_rate,
            track: None,
            playback,
        }
    }

    /// Returns false once the controller is gone.
    fn route(&mut self, bytes: &[u8], signals: &SignalSink) -> bool {
        let samples = audio::pcm16_to_f32(bytes);

        if self.track.is_none() {
            let size = self.sample_rate as usize * ANALYSIS_BUFFER_SECONDS;
            let (producer, consumer) = audio::shared_buffer(size).split();
            self.track = Some(producer);
            let track = RemoteAudioTrack {
                sid: format!("TR_{}", signals.session()),
                participant_identity: SERVER_IDENTITY.to_string(),
                source: consumer,
            };
            tracing::debug!("remote audio track subscribed: {}", track.sid);
            if !signals.send(TransportSignal::TrackSubscribed(track)) {
                return false;
            }
        }

        if let Some(track) = self.track.as_mut() {
            let pushed = track.push_slice(&samples);
            if pushed < samples.len() {
                tracing::trace!("analysis buffer full, dropped {} samples", samples.len() - pushed);
            }
        }

        if let Some((out_tx, resampler)) = self.playback.as_mut() {
            let chunk_size = resampler.input_frames_next();
            for chunk in audio::split_for_chunks(&samples, chunk_size) {
                match resampler.process(&[chunk.as_slice()], None) {
                    Ok(resampled) => {
                        if let Some(resampled) = resampled.first() {
                            let pushed = out_tx.push_slice(resampled);
                            if pushed < resampled.len() {
                                tracing::warn!("playback buffer full, dropped {} samples", resampled.len() - pushed);
                            }
                        }
                    }
                    Err(e) => tracing::error!("failed to resample output: {}", e),
                }
            }
        }
        true
    }
}

async fn receive(mut read: WsRead, signals: SignalSink, mut router: AudioRouter) {
    let reason = loop {
        let message = match read.next().await {
            None => break None,
            Some(Err(e)) => {
                tracing::error!("failed to read message: {}", e);
                break Some(e.to_string());
            }
            Some(Ok(message)) => message,
        };
        match message {
            Message::Text(text) => {
                tracing::debug!("received data message: {} bytes", text.len());
                let delivered = signals.send(TransportSignal::DataReceived {
                    payload: text.into_bytes(),
                    participant_identity: Some(SERVER_IDENTITY.to_string()),
                });
                if !delivered {
                    return;
                }
            }
            Message::Binary(bytes) => {
                if !router.route(&bytes, &signals) {
                    return;
                }
            }
            Message::Close(frame) => {
                tracing::info!("connection closed: {:?}", frame);
                break frame.map(|frame| frame.reason.to_string()).filter(|reason| !reason.is_empty());
            }
            _ => {}
        }
    };
    signals.send(TransportSignal::Disconnected { reason });
}

type Playback = (OutputPlayback, HeapProd<f32>, FastFixedIn<f32>);

fn start_playback(config: &WsConfig, sample_rate: u32, output_device_id: Option<String>) -> Option<Playback> {
    if !config.playback() {
        return None;
    }
    let (producer, consumer) = audio::shared_buffer(PLAYBACK_BUFFER_SAMPLES).split();
    let started = OutputPlayback::start(output_device_id, consumer).and_then(|playback| {
        let resampler = audio::create_resampler(sample_rate as f64, playback.sample_rate() as f64, RESAMPLER_CHUNK_SIZE)?;
        Ok((playback, resampler))
    });
    match started {
        Ok((playback, resampler)) => Some((playback, producer, resampler)),
        Err(e) => {
            tracing::warn!("continuing without playback: {}", e);
            None
        }
    }
}

async fn start_microphone(
    input_device_id: Option<String>,
    sample_rate: u32,
    out_tx: mpsc::Sender<Message>,
) -> anyhow::Result<Microphone> {
    let (samples_tx, mut samples_rx) = mpsc::unbounded_channel::<Vec<f32>>();
    let capture = tokio::task::spawn_blocking(move || {
        InputCapture::start(input_device_id, move |samples| {
            let _ = samples_tx.send(samples.to_vec());
        })
    })
    .await??;

    let mut resampler = audio::create_resampler(capture.sample_rate() as f64, sample_rate as f64, RESAMPLER_CHUNK_SIZE)?;
    let encode_handle = tokio::spawn(async move {
        let mut pending: Vec<f32> = Vec::new();
        while let Some(samples) = samples_rx.recv().await {
            pending.extend_from_slice(&samples);
            let chunk_size = resampler.input_frames_next();
            while pending.len() >= chunk_size {
                let chunk: Vec<f32> = pending.drain(..chunk_size).collect();
                let resampled = match resampler.process(&[chunk.as_slice()], None) {
                    Ok(resampled) => resampled,
                    Err(e) => {
                        tracing::error!("failed to resample input: {}", e);
                        continue;
                    }
                };
                let Some(resampled) = resampled.first() else {
                    continue;
                };
                if out_tx.send(Message::Binary(audio::f32_to_pcm16(resampled))).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok(Microphone {
        _capture: capture,
        encode_handle,
    })
}

pub struct WsTransport {
    config: WsConfig,
    connection: Option<Connection>,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(WsConfig::new())
    }
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self, request: ConnectRequest, signals: SignalSink) -> Result<(), TransportError> {
        if self.connection.is_some() {
            return Err(TransportError::Connect("already connected".to_string()));
        }

        let ws_request =
            build_request(&self.config, &request.token).map_err(|e| TransportError::Connect(e.to_string()))?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::info!("connected to {}", self.config.base_url());

        let (mut write, read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(self.config.capacity());

        let send_handle = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    if closing {
                        tracing::debug!("connection already closed: {}", e);
                    } else {
                        tracing::error!("failed to send message: {}", e);
                    }
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let sample_rate = request.options.audio_sample_rate;
        let (playback, router) = match start_playback(&self.config, sample_rate, request.options.output_device_id.clone()) {
            Some((playback, producer, resampler)) => {
                (Some(playback), AudioRouter::new(sample_rate, Some((producer, resampler))))
            }
            None => (None, AudioRouter::new(sample_rate, None)),
        };
        let recv_handle = tokio::spawn(receive(read, signals, router));

        self.connection = Some(Connection {
            out_tx,
            send_handle,
            recv_handle,
            sample_rate,
            input_device_id: request.options.input_device_id,
            microphone: None,
            _playback: playback,
        });
        Ok(())
    }

    async fn set_microphone_enabled(&mut self, enabled: bool) -> Result<(), TransportError> {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        if !enabled {
            if connection.microphone.take().is_some() {
                tracing::debug!("microphone unpublished");
            }
            return Ok(());
        }
        if connection.microphone.is_some() {
            return Ok(());
        }
        let microphone = start_microphone(
            connection.input_device_id.clone(),
            connection.sample_rate,
            connection.out_tx.clone(),
        )
        .await
        .map_err(|e| TransportError::Publish(e.to_string()))?;
        connection.microphone = Some(microphone);
        tracing::debug!("microphone published");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        connection.microphone = None;
        if connection.peer_closed() {
            tracing::info!("connection to {} was already closed", self.config.base_url());
            return Ok(());
        }
        connection.recv_handle.abort();

        let closed = connection.out_tx.send(Message::Close(None)).await;
        if closed.is_ok() && tokio::time::timeout(CLOSE_TIMEOUT, &mut connection.send_handle).await.is_err() {
            tracing::warn!("timed out closing the connection");
        }
        tracing::info!("disconnected from {}", self.config.base_url());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ringbuf::traits::Consumer;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request as ServerRequest, Response};

    use super::*;
    use crate::controller::{Inbound, SessionInput};
    use crate::transport::ConnectOptions;

    fn local_config(base_url: &str) -> WsConfig {
        WsConfig::builder().with_base_url(base_url).with_playback(false).build()
    }

    fn connect_request(token: &str) -> ConnectRequest {
        ConnectRequest {
            token: SecretString::from(token.to_string()),
            options: ConnectOptions {
                audio_sample_rate: 24000,
                input_device_id: None,
                output_device_id: None,
            },
        }
    }

    fn signal(inbound: Inbound) -> TransportSignal {
        match inbound.into_parts() {
            (_, SessionInput::Signal(signal)) => signal,
            (_, SessionInput::CaptureTick) => panic!("unexpected capture tick"),
        }
    }

    #[test]
    fn test_build_request() {
        let config = local_config("ws://example.test:9000/");
        let request = build_request(&config, &SecretString::from("abc".to_string())).unwrap();

        assert_eq!(request.uri().to_string(), "ws://example.test:9000/session");
        assert_eq!(request.headers().get(AUTHORIZATION_HEADER).unwrap(), "Bearer abc");
    }

    #[test]
    fn test_config_builder() {
        let config = WsConfig::builder()
            .with_base_url("wss://voice.example.test")
            .with_capacity(0)
            .with_playback(false)
            .build();

        assert_eq!(config.base_url(), "wss://voice.example.test");
        assert_eq!(config.capacity(), 1);
        assert!(!config.playback());
    }

    #[test]
    fn test_router_raises_track_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signals = SignalSink::new(3, tx);
        let mut router = AudioRouter::new(24000, None);

        assert!(router.route(&audio::f32_to_pcm16(&[0.5, -0.5]), &signals));
        assert!(router.route(&audio::f32_to_pcm16(&[0.25]), &signals));

        let TransportSignal::TrackSubscribed(mut track) = signal(rx.try_recv().unwrap()) else {
            panic!("expected a track");
        };
        assert!(rx.try_recv().is_err());
        assert_eq!(track.sid, "TR_3");
        assert_eq!(track.participant_identity, SERVER_IDENTITY);

        let samples: Vec<f32> = track.source.pop_iter().collect();
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[2] - 0.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut transport = WsTransport::new(local_config(DEFAULT_BASE_URL));

        transport.disconnect().await.unwrap();
        assert!(matches!(
            transport.set_microphone_enabled(true).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_session_over_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(None));

        let seen_by_server = seen.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |request: &ServerRequest, response: Response| -> Result<Response, ErrorResponse> {
                let auth = request
                    .headers()
                    .get(AUTHORIZATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *seen_by_server.lock().unwrap() = Some((request.uri().path().to_string(), auth));
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
            ws.send(Message::Text(r#"{"type":"agent_start_talking"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Binary(audio::f32_to_pcm16(&[0.1; 8]))).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(local_config(&format!("ws://{}", addr)));
        transport
            .connect(connect_request("secret"), SignalSink::new(1, tx))
            .await
            .unwrap();
        assert!(transport.is_connected());

        let TransportSignal::DataReceived { payload, participant_identity } = signal(rx.recv().await.unwrap()) else {
            panic!("expected a data message");
        };
        assert_eq!(payload, br#"{"type":"agent_start_talking"}"#.to_vec());
        assert_eq!(participant_identity.as_deref(), Some(SERVER_IDENTITY));

        assert!(matches!(signal(rx.recv().await.unwrap()), TransportSignal::TrackSubscribed(_)));
        assert!(matches!(signal(rx.recv().await.unwrap()), TransportSignal::Disconnected { .. }));

        // The server hung up first: disconnecting must not try to close again.
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !transport.connection.as_ref().is_some_and(Connection::peer_closed) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        server.await.unwrap();
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(("/session".to_string(), Some("Bearer secret".to_string())))
        );

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }
}
