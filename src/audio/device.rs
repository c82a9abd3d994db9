//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Sample rates checked against each device's supported ranges
const COMMON_SAMPLE_RATES: [u32; 8] = [8000, 16000, 22050, 44100, 48000, 88200, 96000, 192000];

/// Which side of the audio path a device sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Input,
    Output,
}

impl DeviceMode {
    fn prefix(&self) -> &'static str {
        match self {
            DeviceMode::Input => "input:",
            DeviceMode::Output => "output:",
        }
    }

    /// Build the id used to refer to a device by name
    pub fn device_id(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }
}

/// Device as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub mode: DeviceMode,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, mode: DeviceMode) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            mode,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn id(&self) -> String {
        self.mode.device_id(&self.name)
    }
}

/// Split a device id into its mode and name.
///
/// Ids without a prefix are treated as input device names.
pub fn parse_device_id(id: &str) -> (DeviceMode, &str) {
    if let Some(name) = id.strip_prefix(DeviceMode::Input.prefix()) {
        (DeviceMode::Input, name)
    } else if let Some(name) = id.strip_prefix(DeviceMode::Output.prefix()) {
        (DeviceMode::Output, name)
    } else {
        (DeviceMode::Input, id)
    }
}

/// List the devices available for `mode`
pub fn list_devices(mode: DeviceMode) -> Vec<DeviceDescriptor> {
    let host = cpal::default_host();

    let default_name = match mode {
        DeviceMode::Input => host.default_input_device(),
        DeviceMode::Output => host.default_output_device(),
    }
    .and_then(|d| d.name().ok());

    let devices = match mode {
        DeviceMode::Input => host.input_devices(),
        DeviceMode::Output => host.output_devices(),
    };
    let devices = match devices {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate {:?} devices: {}", mode, e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        let (sample_rates, channels) = get_device_capabilities(&device, mode);
        out.push(DeviceDescriptor {
            id: mode.device_id(&name),
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            is_input: mode == DeviceMode::Input,
            is_output: mode == DeviceMode::Output,
            sample_rates,
            channels,
        });
    }
    out
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, mode: DeviceMode) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match mode {
        DeviceMode::Input => device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
        DeviceMode::Output => device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in COMMON_SAMPLE_RATES {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Get a device by its ID
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let (mode, name) = parse_device_id(id);

    let devices = match mode {
        DeviceMode::Input => host.input_devices(),
        DeviceMode::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, mode));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get the host's default device for `mode`
pub fn get_default_device(mode: DeviceMode) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let device = match mode {
        DeviceMode::Input => host.default_input_device(),
        DeviceMode::Output => host.default_output_device(),
    };
    device
        .map(|d| AudioDevice::from_cpal(d, mode))
        .ok_or_else(|| AudioError::DeviceNotFound(format!("No default {:?} device", mode)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_id() {
        assert_eq!(parse_device_id("input:Stereo Mix"), (DeviceMode::Input, "Stereo Mix"));
        assert_eq!(parse_device_id("output:Speakers"), (DeviceMode::Output, "Speakers"));
        assert_eq!(parse_device_id("Line In"), (DeviceMode::Input, "Line In"));
        assert_eq!(DeviceMode::Output.device_id("Speakers"), "output:Speakers");
    }

    #[test]
    fn test_listing_matches_mode() {
        // May be empty on machines without audio hardware
        for device in list_devices(DeviceMode::Input) {
            assert!(device.is_input && !device.is_output);
            assert!(device.id.starts_with("input:"));
        }
    }
}
