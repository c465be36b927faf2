/// Failures surfaced by a session, both to the caller of `initiate_session` and
/// as the cause inside a `SessionError` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Missing or invalid configuration. Raised before any side effect.
    #[error("invalid session configuration: {0}")]
    Configuration(String),
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("audio input device not found: {0}")]
    DeviceNotFound(String),
    #[error("audio input device busy: {0}")]
    DeviceBusy(String),
    /// Transport connect or microphone publish failed.
    #[error("transport connection failed: {0}")]
    TransportConnect(String),
    /// The audio sampler could not be created. Non-fatal: the session stays up.
    #[error("audio analyzer initialization failed: {0}")]
    AnalyzerInit(String),
    #[error("{0}")]
    Unknown(String),
}

impl SessionError {
    /// Whether the failure came from the microphone pre-flight.
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_)
                | SessionError::DeviceNotFound(_)
                | SessionError::DeviceBusy(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_class() {
        assert!(SessionError::PermissionDenied("x".into()).is_permission());
        assert!(SessionError::DeviceNotFound("x".into()).is_permission());
        assert!(SessionError::DeviceBusy("x".into()).is_permission());
        assert!(!SessionError::TransportConnect("x".into()).is_permission());
        assert!(!SessionError::Configuration("x".into()).is_permission());
    }

    #[test]
    fn test_display() {
        let err = SessionError::Configuration("session token is required".into());
        assert_eq!(err.to_string(), "invalid session configuration: session token is required");
    }
}
