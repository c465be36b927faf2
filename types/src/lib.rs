pub mod audio;
pub mod error;
pub mod events;
pub mod message;
pub mod transcript;

pub use audio::AudioFrame;
pub use error::SessionError;
pub use events::{CanonicalEvent, Event, EventKind};
pub use message::RawServerMessage;
pub use transcript::{Role, TranscriptEntry};
