//! # revoice-core
//!
//! Live voice-changer engine: microphone capture, utterance segmentation,
//! remote voice conversion and incremental playback to a (virtual) output
//! device.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Session(spawn_blocking)
//!                                                    │
//!                                          EnergyVad + Segmenter
//!                                                    │
//!                                         SegmentConsumer::consume
//!                                          (upload → chunk stream)
//!                                                    │
//!                                  decode → resample → PlaybackScheduler
//!                                                    │
//!                                         CpalSink ("cable input")
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens on the session
//! thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod convert;
pub mod engine;
pub mod error;
pub mod events;
pub mod playback;
pub mod store;
pub mod vad;

// Convenience re-exports for downstream crates
pub use convert::{
    ConsumeReport, ConversionPipeline, ConverterHandle, ElevenLabsConfig, ElevenLabsConverter,
    OutputEncoding, SegmentConsumer,
};
pub use engine::{CaptureMode, EngineConfig, RevoiceEngine};
pub use error::{Result, RevoiceError};
pub use events::{ActivityEvent, SessionStatus, SessionStatusEvent};
pub use playback::sink::CpalSink;
pub use store::{Janitor, RecordingStore};
