//! Voice Activity Detection (VAD) and utterance segmentation.
//!
//! The `VoiceActivityDetector` trait is the extensibility point: swap in
//! `EnergyVad` (default) or any future detector without touching the
//! segmenter state machine.

pub mod energy;
pub mod segmenter;

pub use segmenter::{SegmentEvent, Segmenter, SegmenterState};

use crate::buffering::frame::Frame;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The frame contains speech energy above threshold.
    Speech,
    /// The frame is silent (or below threshold, including hangover period).
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, hidden states, etc.).
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse a frame and return a speech/silence decision.
    fn classify(&mut self, frame: &Frame) -> VadDecision;

    /// Reset any internal state (e.g. hangover counters).
    fn reset(&mut self);
}
