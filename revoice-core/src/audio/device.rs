//! Audio device enumeration and name matching.
//!
//! Devices are resolved once at session start, never on the hot path.
//! Matching is by case-insensitive substring so a preference like
//! "cable input" finds "CABLE Input (VB-Audio Virtual Cable)".

use serde::{Deserialize, Serialize};

/// Metadata about one audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
}

/// Case-insensitive substring match used for all device preferences.
pub fn name_matches(name: &str, wanted: &str) -> bool {
    name.to_ascii_lowercase()
        .contains(&wanted.trim().to_ascii_lowercase())
}

#[cfg(feature = "audio-cpal")]
fn collect<I: Iterator<Item = cpal::Device>>(
    devices: I,
    default_name: Option<String>,
) -> Vec<DeviceInfo> {
    use cpal::traits::DeviceTrait;

    devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo { name, is_default }
        })
        .collect()
}

/// List available microphone inputs. Empty when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => collect(devices, default_name),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

/// List available playback outputs. Empty when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => collect(devices, default_name),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::name_matches;

    #[test]
    fn matching_is_case_insensitive_substring() {
        assert!(name_matches(
            "CABLE Input (VB-Audio Virtual Cable)",
            "cable input"
        ));
        assert!(name_matches("Microphone Array (Realtek)", "REALTEK"));
        assert!(!name_matches("Speakers (High Definition Audio)", "cable"));
    }

    #[test]
    fn matching_trims_the_preference() {
        assert!(name_matches("CABLE Input", " cable "));
    }
}
