use async_trait::async_trait;
use voice_session_types::SessionError;
use voice_session_utils::device::{self, ProbeError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Busy(String),
    #[error("{0}")]
    Other(String),
}

impl From<DeviceError> for SessionError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            DeviceError::NotFound(msg) => SessionError::DeviceNotFound(msg),
            DeviceError::Busy(msg) => SessionError::DeviceBusy(msg),
            DeviceError::Other(msg) => SessionError::Unknown(msg),
        }
    }
}

impl From<ProbeError> for DeviceError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::PermissionDenied(msg) => DeviceError::PermissionDenied(msg),
            ProbeError::NotFound(msg) => DeviceError::NotFound(msg),
            ProbeError::Busy(msg) => DeviceError::Busy(msg),
            ProbeError::Other(e) => DeviceError::Other(e.to_string()),
        }
    }
}

/// Access to local media devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Opens the microphone and releases it straight away. Used as a pre-flight
    /// check so permission problems surface before the transport handshake.
    async fn probe_microphone(&self, input_device_id: Option<String>) -> Result<(), DeviceError>;
}

/// Devices of the local audio host.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDevices;

#[async_trait]
impl MediaDevices for NativeDevices {
    async fn probe_microphone(&self, input_device_id: Option<String>) -> Result<(), DeviceError> {
        let probe = tokio::task::spawn_blocking(move || device::probe_input(input_device_id.as_deref()));
        match probe.await {
            Ok(result) => result.map_err(DeviceError::from),
            Err(e) => Err(DeviceError::Other(format!("microphone probe task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_maps_to_taxonomy() {
        assert_eq!(
            SessionError::from(DeviceError::PermissionDenied("no".into())),
            SessionError::PermissionDenied("no".into())
        );
        assert_eq!(
            SessionError::from(DeviceError::NotFound("mic".into())),
            SessionError::DeviceNotFound("mic".into())
        );
        assert_eq!(
            SessionError::from(DeviceError::Busy("mic".into())),
            SessionError::DeviceBusy("mic".into())
        );
        assert_eq!(
            SessionError::from(DeviceError::Other("?".into())),
            SessionError::Unknown("?".into())
        );
    }

    #[test]
    fn test_probe_error_conversion() {
        let e = DeviceError::from(ProbeError::Busy("in use".into()));
        assert_eq!(e, DeviceError::Busy("in use".into()));
    }
}
