//! Typed audio frames and finished segments.

/// A fixed-size block of normalized mono PCM samples captured in one
/// callback period.
///
/// Allocated on the session thread when draining the ring buffer, never
/// inside the audio callback. Immutable once built.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    /// Channel count after downmix. Always 1 for frames built by the session loop.
    pub channels: u16,
}

impl Frame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Root-mean-square amplitude of this frame, the VAD's voice proxy.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One complete spoken utterance: pre-roll frames, then every frame from
/// voice onset through the trailing silence that closed it.
///
/// Owned exclusively by the session controller until handed to the
/// conversion pipeline, then dropped.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Frames in strict capture order.
    pub frames: Vec<Frame>,
    /// Sample rate shared by every frame.
    pub sample_rate: u32,
}

impl Segment {
    pub fn new(frames: Vec<Frame>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Flatten into one contiguous sample vector, consuming the segment.
    pub fn into_samples(self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        for frame in self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let frame = Frame::new(samples, 48_000);
        assert!((frame.rms() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn rms_of_empty_frame_is_zero() {
        let frame = Frame::new(vec![], 48_000);
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn segment_flattens_in_frame_order() {
        let seg = Segment::new(
            vec![
                Frame::new(vec![0.1, 0.2], 48_000),
                Frame::new(vec![0.3], 48_000),
            ],
            48_000,
        );
        assert_eq!(seg.frame_count(), 2);
        assert_eq!(seg.sample_count(), 3);
        assert_eq!(seg.into_samples(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn segment_duration() {
        let seg = Segment::new(vec![Frame::new(vec![0.0; 48_000], 48_000)], 48_000);
        assert!((seg.duration_secs() - 1.0).abs() < 1e-9);
    }
}
