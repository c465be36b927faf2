//! Client-side façade over a real-time voice-agent session.
//!
//! [`SessionController`] owns the session lifecycle and publishes everything the
//! application needs as typed events on an [`EventBus`].

pub mod bus;
pub mod capture;
pub mod controller;
pub mod devices;
pub mod normalizer;
pub mod sampler;
pub mod transport;

pub use voice_session_types as types;
pub use voice_session_utils as utils;

pub use bus::{EventBus, SubscriptionId};
pub use capture::{FrameScheduler, IntervalScheduler};
pub use controller::{SessionConfig, SessionConfigBuilder, SessionController, SessionState, SessionStats};
pub use devices::{MediaDevices, NativeDevices};
pub use transport::ws::{WsConfig, WsTransport};
pub use transport::{Transport, TransportError};
