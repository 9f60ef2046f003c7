//! Energy-based VAD using RMS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming frame.
//! 2. If RMS > `threshold` → emit `Speech`, reset hangover counter.
//! 3. If RMS ≤ `threshold` and hangover counter > 0 → emit `Speech`,
//!    decrement counter (prevents clipping syllable endings).
//! 4. Otherwise → emit `Silence`.
//!
//! The segmenter layers its own silence-duration timeout on top of this, so
//! the default hangover is zero.

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::frame::Frame;

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Frames above this are considered speech.
    /// Typical range: 0.01–0.05 for a quiet microphone.
    threshold: f32,
    /// How many consecutive below-threshold frames to still emit `Speech`
    /// after real speech ends.
    hangover_frames: u32,
    /// Current hangover countdown.
    hangover_counter: u32,
}

impl EnergyVad {
    /// Create a new `EnergyVad` with the given RMS threshold and hangover.
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.015, 0)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &Frame) -> VadDecision {
        if frame.rms() > self.threshold {
            self.hangover_counter = self.hangover_frames;
            VadDecision::Speech
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_frame(len: usize) -> Frame {
        Frame::new(vec![0.0f32; len], 48_000)
    }

    fn loud_frame(amplitude: f32, len: usize) -> Frame {
        Frame::new(vec![amplitude; len], 48_000)
    }

    #[test]
    fn silence_below_threshold() {
        let mut vad = EnergyVad::new(0.015, 0);
        assert_eq!(vad.classify(&silent_frame(1024)), VadDecision::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let mut vad = EnergyVad::new(0.015, 0);
        assert_eq!(vad.classify(&loud_frame(0.5, 1024)), VadDecision::Speech);
    }

    #[test]
    fn threshold_is_exclusive() {
        // RMS exactly at the threshold is not speech
        let mut vad = EnergyVad::new(0.5, 0);
        assert_eq!(vad.classify(&loud_frame(0.5, 64)), VadDecision::Silence);
    }

    #[test]
    fn hangover_extends_speech() {
        let mut vad = EnergyVad::new(0.015, 2);
        assert_eq!(vad.classify(&loud_frame(0.5, 64)), VadDecision::Speech);
        assert_eq!(vad.classify(&silent_frame(64)), VadDecision::Speech);
        assert_eq!(vad.classify(&silent_frame(64)), VadDecision::Speech);
        assert_eq!(vad.classify(&silent_frame(64)), VadDecision::Silence);
    }

    #[test]
    fn reset_clears_hangover() {
        let mut vad = EnergyVad::new(0.015, 5);
        vad.classify(&loud_frame(0.5, 64));
        vad.reset();
        assert_eq!(vad.classify(&silent_frame(64)), VadDecision::Silence);
    }
}
