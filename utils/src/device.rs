use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, DefaultStreamConfigError, Device, PlayStreamError};

/// Why a microphone could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Busy(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device")),
        Some(target) => host
            .input_devices()?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow!("No input device named {}", target)),
    }
}

pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device")),
        Some(target) => host
            .output_devices()?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow!("No output device named {}", target)),
    }
}

/// Opens the input device, starts a capture stream and releases it at once.
pub fn probe_input(device_name: Option<&str>) -> Result<(), ProbeError> {
    let device = get_or_default_input(device_name).map_err(|e| ProbeError::NotFound(e.to_string()))?;
    let supported = device.default_input_config().map_err(|e| match e {
        DefaultStreamConfigError::DeviceNotAvailable => ProbeError::NotFound(e.to_string()),
        DefaultStreamConfigError::BackendSpecific { ref err } => classify_backend(&err.description),
        other => ProbeError::Other(other.into()),
    })?;

    let stream = device
        .build_input_stream_raw(
            &supported.config(),
            supported.sample_format(),
            |_data: &cpal::Data, _: &cpal::InputCallbackInfo| {},
            |err| tracing::warn!("microphone probe stream error: {}", err),
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => ProbeError::Busy(e.to_string()),
            BuildStreamError::BackendSpecific { ref err } => classify_backend(&err.description),
            other => ProbeError::Other(other.into()),
        })?;

    stream.play().map_err(|e| match e {
        PlayStreamError::DeviceNotAvailable => ProbeError::Busy(e.to_string()),
        PlayStreamError::BackendSpecific { ref err } => classify_backend(&err.description),
        #[allow(unreachable_patterns)]
        other => ProbeError::Other(other.into()),
    })?;
    drop(stream);
    Ok(())
}

fn classify_backend(description: &str) -> ProbeError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted") {
        ProbeError::PermissionDenied(description.to_string())
    } else if lower.contains("busy") || lower.contains("in use") {
        ProbeError::Busy(description.to_string())
    } else {
        ProbeError::Other(anyhow!("{}", description))
    }
}

fn describe(device: &Device, default_name: Option<&str>, input: bool) -> Option<String> {
    let name = device.name().ok()?;
    let config = if input {
        device.default_input_config().ok()?
    } else {
        device.default_output_config().ok()?
    };
    let mut d = format!(" * {}({}ch, {}hz)", name, config.channels(), config.sample_rate().0);
    if default_name == Some(name.as_str()) {
        d.push_str(" [default]");
    }
    Some(d)
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host.default_input_device().and_then(|d| d.name().ok());
    let device_names: Vec<String> = host
        .input_devices()?
        .filter_map(|device| describe(&device, default_device.as_deref(), true))
        .collect();
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_device = host.default_output_device().and_then(|d| d.name().ok());
    let device_names: Vec<String> = host
        .output_devices()?
        .filter_map(|device| describe(&device, default_device.as_deref(), false))
        .collect();
    Ok(device_names.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_backend() {
        assert!(matches!(classify_backend("Permission denied by user"), ProbeError::PermissionDenied(_)));
        assert!(matches!(classify_backend("Device or resource busy"), ProbeError::Busy(_)));
        assert!(matches!(classify_backend("ALSA function failed"), ProbeError::Other(_)));
    }
}
