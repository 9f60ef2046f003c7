//! Microphone capture via the cpal backend.
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block on a lock, or perform I/O. The callback here
//! only downmixes into a pre-grown scratch buffer and writes into the
//! lock-free SPSC ring producer; overflow drops samples and logs.
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so `AudioCapture` must be created and dropped on the same thread.
//! The session controller opens it inside `tokio::task::spawn_blocking`.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::buffering::AudioProducer;
#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::error::{Result, RevoiceError};

/// Handle to an active microphone stream.
///
/// **Not `Send`** — bound to the OS thread it was created on.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback no-op without tearing the
    /// stream down.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Capture format the session asks the device for. The device's actual
/// format wins when the request cannot be satisfied.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    pub sample_rate: u32,
    pub channels: u16,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open an input device whose name contains `preferred_name`
    /// (case-insensitive), falling back to the system default and then to
    /// the first enumerable input.
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_name: Option<&str>,
        request: CaptureRequest,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected = None;

        if let Some(wanted) = preferred_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected = devices.find(|d| {
                        d.name()
                            .map(|name| device::name_matches(&name, wanted))
                            .unwrap_or(false)
                    });
                    if selected.is_none() {
                        warn!("input device matching '{wanted}' not found, falling back");
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| RevoiceError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(RevoiceError::NoDefaultInputDevice)?;
            warn!("no default input device, using first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = select_input_config(&device, request)?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut writer = RingWriter::new(producer, running.clone(), channels as usize);
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| writer.write(data, |s| s),
                    |err| error!("audio capture error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut writer = RingWriter::new(producer, running.clone(), channels as usize);
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| writer.write(data, |s| s as f32 / 32768.0),
                    |err| error!("audio capture error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(RevoiceError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| RevoiceError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RevoiceError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Open the system default microphone.
    ///
    /// Must be called from the thread that will also drop this value.
    pub fn open_default(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        request: CaptureRequest,
    ) -> Result<Self> {
        Self::open_with_preference(producer, running, None, request)
    }
}

/// Prefer a supported config that satisfies the request exactly, then one
/// that at least covers the requested rate, then the device default.
#[cfg(feature = "audio-cpal")]
fn select_input_config(
    device: &cpal::Device,
    request: CaptureRequest,
) -> Result<cpal::SupportedStreamConfig> {
    let rate = SampleRate(request.sample_rate);

    if let Ok(mut configs) = device.supported_input_configs() {
        if let Some(c) = configs.find(|c| {
            c.channels() == request.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        }) {
            return Ok(c.with_sample_rate(rate));
        }
    }
    if let Ok(mut configs) = device.supported_input_configs() {
        if let Some(c) = configs.find(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        {
            return Ok(c.with_sample_rate(rate));
        }
    }

    warn!(
        requested_rate = request.sample_rate,
        requested_channels = request.channels,
        "requested capture format unsupported, using device default"
    );
    device
        .default_input_config()
        .map_err(|e| RevoiceError::AudioDevice(e.to_string()))
}

impl AudioCapture {
    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Downmixes interleaved input to mono and pushes it into the ring.
///
/// The scratch buffer reaches its steady-state size after the first callback
/// and is never reallocated afterwards.
#[cfg(feature = "audio-cpal")]
struct RingWriter {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    channels: usize,
    scratch: Vec<f32>,
}

#[cfg(feature = "audio-cpal")]
impl RingWriter {
    fn new(producer: AudioProducer, running: Arc<AtomicBool>, channels: usize) -> Self {
        Self {
            producer,
            running,
            channels: channels.max(1),
            scratch: Vec::new(),
        }
    }

    fn write<S: Copy>(&mut self, data: &[S], to_f32: impl Fn(S) -> f32) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }

        let frames = data.len() / self.channels;
        self.scratch.resize(frames, 0.0);
        if self.channels == 1 {
            for (dst, &src) in self.scratch.iter_mut().zip(data.iter()) {
                *dst = to_f32(src);
            }
        } else {
            for (f, dst) in self.scratch.iter_mut().enumerate() {
                let base = f * self.channels;
                let mut sum = 0f32;
                for c in 0..self.channels {
                    sum += to_f32(data[base + c]);
                }
                *dst = sum / self.channels as f32;
            }
        }

        let written = self.producer.push_slice(&self.scratch);
        if written < self.scratch.len() {
            warn!(
                dropped = self.scratch.len() - written,
                "capture ring full, dropping samples"
            );
        }
    }
}

/// Stubs when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_name: Option<&str>,
        _request: CaptureRequest,
    ) -> Result<Self> {
        Err(RevoiceError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        request: CaptureRequest,
    ) -> Result<Self> {
        Self::open_with_preference(producer, running, None, request)
    }
}
