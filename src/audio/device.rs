//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

/// Output device as presented to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Largest output channel count across supported configs
    pub max_channels: u16,
    pub default_sample_rate: Option<u32>,
    /// Whether any supported config covers the fixed synthesis rate
    pub supports_sample_rate: bool,
}

/// List all output devices of the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (max_channels, supports_sample_rate) = output_capabilities(&device);
            let default_sample_rate = device
                .default_output_config()
                .ok()
                .map(|c| c.sample_rate().0);
            Some(OutputDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                name,
                max_channels,
                default_sample_rate,
                supports_sample_rate,
            })
        })
        .filter(|info| info.max_channels > 0)
        .collect()
}

fn output_capabilities(device: &cpal::Device) -> (u16, bool) {
    let Ok(configs) = device.supported_output_configs() else {
        return (0, false);
    };

    let rate = cpal::SampleRate(SAMPLE_RATE);
    configs.fold((0, false), |(channels, supported), config| {
        let covers = rate >= config.min_sample_rate() && rate <= config.max_sample_rate();
        (channels.max(config.channels()), supported || covers)
    })
}

/// Widest f32 output layout the device offers at the fixed sample rate
pub fn output_channels(device: &cpal::Device) -> Result<u16, AudioError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let rate = cpal::SampleRate(SAMPLE_RATE);
    configs
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
        .map(|c| c.channels())
        .max()
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("no f32 output config at {} Hz", SAMPLE_RATE))
        })
}

/// Find an output device by its name
pub fn find_output_device(name: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Get default output device
pub fn default_output_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// Channel names for a device with `count` outputs: `channel_1..channel_N`
pub fn channel_roster(count: u16) -> Vec<String> {
    (1..=count).map(|i| format!("channel_{i}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roster() {
        assert_eq!(channel_roster(2), vec!["channel_1", "channel_2"]);
        assert!(channel_roster(0).is_empty());
    }

    #[test]
    fn test_unknown_device() {
        // Holds on machines with or without audio hardware
        let err = find_output_device("definitely not a real device 7f3a").err().expect("expected an error");
        assert!(matches!(
            err,
            AudioError::DeviceNotFound(_) | AudioError::CpalError(_)
        ));
    }
}
