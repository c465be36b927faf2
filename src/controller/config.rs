use secrecy::{ExposeSecret, SecretString};
use voice_session_types::audio::{DEFAULT_ANALYSIS_FRAME_SIZE, DEFAULT_SAMPLE_RATE};
use voice_session_types::SessionError;

use crate::controller::consts;
use crate::transport::ConnectOptions;

/// Parameters of one session.
#[derive(Debug)]
pub struct SessionConfig {
    session_token: SecretString,
    audio_sample_rate: u32,
    input_device_id: Option<String>,
    output_device_id: Option<String>,
    enable_raw_audio: bool,
    analysis_frame_size: usize,
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::new(),
        }
    }

    /// Starts from the `VOICE_SESSION_*` environment variables.
    pub fn from_env() -> Self {
        let mut builder = Self::new().with_session_token(&std::env::var(consts::SESSION_TOKEN).unwrap_or_default());

        if let Some(rate) = std::env::var(consts::SAMPLE_RATE).ok().and_then(|v| v.trim().parse().ok()) {
            builder = builder.with_audio_sample_rate(rate);
        }
        if let Ok(device) = std::env::var(consts::INPUT_DEVICE) {
            builder = builder.with_input_device_id(&device);
        }
        if let Ok(device) = std::env::var(consts::OUTPUT_DEVICE) {
            builder = builder.with_output_device_id(&device);
        }
        if let Some(raw) = std::env::var(consts::RAW_AUDIO).ok().and_then(|v| v.trim().parse().ok()) {
            builder = builder.with_raw_audio(raw);
        }
        builder
    }

    pub fn with_session_token(mut self, session_token: &str) -> Self {
        self.config.session_token = SecretString::from(session_token.to_string());
        self
    }

    pub fn with_audio_sample_rate(mut self, audio_sample_rate: u32) -> Self {
        self.config.audio_sample_rate = audio_sample_rate;
        self
    }

    pub fn with_input_device_id(mut self, input_device_id: &str) -> Self {
        self.config.input_device_id = Some(input_device_id.to_string());
        self
    }

    pub fn with_output_device_id(mut self, output_device_id: &str) -> Self {
        self.config.output_device_id = Some(output_device_id.to_string());
        self
    }

    pub fn with_raw_audio(mut self, enable_raw_audio: bool) -> Self {
        self.config.enable_raw_audio = enable_raw_audio;
        self
    }

    pub fn with_analysis_frame_size(mut self, analysis_frame_size: usize) -> Self {
        self.config.analysis_frame_size = analysis_frame_size;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Defaults with no token. Such a config does not validate.
    pub fn new() -> Self {
        Self {
            session_token: SecretString::from(String::new()),
            audio_sample_rate: DEFAULT_SAMPLE_RATE,
            input_device_id: None,
            output_device_id: None,
            enable_raw_audio: false,
            analysis_frame_size: DEFAULT_ANALYSIS_FRAME_SIZE,
        }
    }

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Reads the `VOICE_SESSION_*` environment variables. Values that do not parse
    /// keep their defaults.
    pub fn from_env() -> Self {
        SessionConfigBuilder::from_env().build()
    }

    /// Fails without side effects on a missing token or a zero sample rate.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.session_token.expose_secret().trim().is_empty() {
            return Err(SessionError::Configuration("session token is required".to_string()));
        }
        if self.audio_sample_rate == 0 {
            return Err(SessionError::Configuration("audio sample rate must be positive".to_string()));
        }
        Ok(())
    }

    pub fn session_token(&self) -> &SecretString {
        &self.session_token
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.audio_sample_rate
    }

    pub fn input_device_id(&self) -> Option<&str> {
        self.input_device_id.as_deref()
    }

    pub fn output_device_id(&self) -> Option<&str> {
        self.output_device_id.as_deref()
    }

    pub fn enable_raw_audio(&self) -> bool {
        self.enable_raw_audio
    }

    pub fn analysis_frame_size(&self) -> usize {
        self.analysis_frame_size
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            audio_sample_rate: self.audio_sample_rate,
            input_device_id: self.input_device_id.clone(),
            output_device_id: self.output_device_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::builder().with_session_token("tok").build();
        assert_eq!(config.audio_sample_rate(), 24000);
        assert_eq!(config.analysis_frame_size(), 2048);
        assert!(!config.enable_raw_audio());
        assert_eq!(config.input_device_id(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(SessionConfig::new().validate(), Err(SessionError::Configuration(_))));
        let config = SessionConfig::builder().with_session_token("   ").build();
        assert!(matches!(config.validate(), Err(SessionError::Configuration(_))));
    }

    #[test]
    fn test_zero_sample_rate() {
        let config = SessionConfig::builder()
            .with_session_token("tok")
            .with_audio_sample_rate(0)
            .build();
        assert!(matches!(config.validate(), Err(SessionError::Configuration(_))));
    }

    #[test]
    fn test_connect_options() {
        let config = SessionConfig::builder()
            .with_session_token("tok")
            .with_audio_sample_rate(16000)
            .with_input_device_id("USB Mic")
            .with_output_device_id("Speakers")
            .build();
        assert_eq!(
            config.connect_options(),
            ConnectOptions {
                audio_sample_rate: 16000,
                input_device_id: Some("USB Mic".to_string()),
                output_device_id: Some("Speakers".to_string()),
            }
        );
    }

    #[test]
    fn test_token_is_not_logged() {
        let config = SessionConfig::builder().with_session_token("super-secret").build();
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
