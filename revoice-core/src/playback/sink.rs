//! cpal output device sink.
//!
//! The output device is selected by case-insensitive name substring so
//! converted audio can be routed into a virtual cable ("cable input");
//! when no match is found we fall back to the default output with a
//! warning. Selection happens once at sink open, never on the hot path.
//!
//! `cpal::Stream` is `!Send`, so a `CpalSink` must be created, begun and
//! dropped on the same thread. The conversion pipeline satisfies this by
//! opening the sink inside its blocking task.

use std::sync::Arc;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleRate, StreamConfig,
};

use crate::error::{Result, RevoiceError};
use crate::playback::{SampleQueue, SampleSink};

#[cfg(feature = "audio-cpal")]
use tracing::{debug, error, warn};

/// Plays queued mono f32 samples through a cpal output device.
#[cfg(feature = "audio-cpal")]
pub struct CpalSink {
    device: cpal::Device,
    config: StreamConfig,
    sample_rate: u32,
    /// Kept alive while playing; dropped after drain.
    stream: Option<cpal::Stream>,
    queue: Option<Arc<SampleQueue>>,
}

#[cfg(feature = "audio-cpal")]
impl CpalSink {
    /// Open an output device, preferring one whose name contains
    /// `preferred_name` (case-insensitive), at the given sample rate.
    pub fn open(preferred_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected = None;

        if let Some(wanted) = preferred_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected = devices.find(|device| {
                        device
                            .name()
                            .map(|name| crate::audio::device::name_matches(&name, wanted))
                            .unwrap_or(false)
                    });
                    if selected.is_none() {
                        warn!("output device matching '{wanted}' not found, using default output");
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = match selected {
            Some(device) => device,
            None => host
                .default_output_device()
                .ok_or(RevoiceError::NoOutputDevice)?,
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| RevoiceError::AudioDevice(e.to_string()))?
            .find(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| {
                RevoiceError::AudioDevice(format!(
                    "no output config supporting {sample_rate} Hz"
                ))
            })?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

        debug!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate,
            channels = config.channels,
            "output device opened"
        );

        Ok(Self {
            device,
            config,
            sample_rate,
            stream: None,
            queue: None,
        })
    }
}

#[cfg(feature = "audio-cpal")]
impl SampleSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn begin(&mut self, queue: Arc<SampleQueue>) -> Result<()> {
        let channels = self.config.channels as usize;
        let callback_queue = Arc::clone(&queue);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _info| {
                    callback_queue.fill(data, channels);
                },
                |err| error!("audio playback error: {err}"),
                None,
            )
            .map_err(|e| RevoiceError::Playback(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RevoiceError::Playback(e.to_string()))?;

        self.stream = Some(stream);
        self.queue = Some(queue);
        Ok(())
    }

    fn wait_until_drained(&mut self) -> Result<()> {
        let queue = match self.queue.as_ref() {
            Some(q) => q,
            None => return Ok(()),
        };

        // Generous ceiling: queued duration plus two seconds of slack.
        let pending_secs = queue.len() as u64 / u64::from(self.sample_rate.max(1));
        let deadline =
            std::time::Instant::now() + std::time::Duration::from_secs(pending_secs + 2);

        while !queue.is_drained() {
            if std::time::Instant::now() >= deadline {
                warn!(
                    remaining = queue.len(),
                    "output device did not drain in time, abandoning playback"
                );
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        // Let the device flush its own internal buffer.
        std::thread::sleep(std::time::Duration::from_millis(100));
        self.stream = None;
        self.queue = None;
        Ok(())
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
pub struct CpalSink;

#[cfg(not(feature = "audio-cpal"))]
impl CpalSink {
    pub fn open(_preferred_name: Option<&str>, _sample_rate: u32) -> Result<Self> {
        Err(RevoiceError::Playback(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl SampleSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        0
    }

    fn begin(&mut self, _queue: Arc<SampleQueue>) -> Result<()> {
        Err(RevoiceError::Playback(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn wait_until_drained(&mut self) -> Result<()> {
        Ok(())
    }
}
