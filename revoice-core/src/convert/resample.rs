//! Deterministic linear-interpolation resampler.
//!
//! For a chunk of length `L` at rate `R_in` mapped to `R_out`, produces
//! exactly `round(L × R_out / R_in)` output samples by interpolating at
//! evenly spaced fractional source indices. Lossy but monotonic in duration
//! scaling: resampling there and back changes length by at most one sample.
//!
//! Stateless per chunk; every converted chunk is resampled independently
//! before it reaches the playback scheduler.

/// Converts f32 mono audio from one fixed sample rate to another.
#[derive(Debug, Clone, Copy)]
pub struct LinearResampler {
    in_rate: u32,
    out_rate: u32,
}

impl LinearResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self { in_rate, out_rate }
    }

    /// Returns `true` when input and output rates match (no work done).
    pub fn is_passthrough(&self) -> bool {
        self.in_rate == self.out_rate
    }

    /// Output length for an input of `len` samples.
    pub fn output_len(&self, len: usize) -> usize {
        (len as f64 * self.out_rate as f64 / self.in_rate as f64).round() as usize
    }

    /// Resample one chunk.
    pub fn resample(&self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.is_passthrough() {
            return input.to_vec();
        }

        let out_len = self.output_len(input.len());
        let mut out = Vec::with_capacity(out_len);
        let step = self.in_rate as f64 / self.out_rate as f64;
        let last = input.len() - 1;

        for i in 0..out_len {
            let pos = i as f64 * step;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = (pos - i0 as f64) as f32;
            out.push(input[i0] + (input[i1] - input[i0]) * frac);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn passthrough_identity() {
        let rs = LinearResampler::new(44_100, 44_100);
        assert!(rs.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rs.resample(&samples), samples);
    }

    #[test]
    fn exact_output_length_contract() {
        let rs = LinearResampler::new(44_100, 48_000);
        // round(1000 * 48000 / 44100) = round(1088.4…) = 1088
        assert_eq!(rs.output_len(1000), 1088);
        assert_eq!(rs.resample(&vec![0.0; 1000]).len(), 1088);
    }

    #[test]
    fn round_trip_length_within_one_sample() {
        let down = LinearResampler::new(48_000, 44_100);
        let up = LinearResampler::new(44_100, 48_000);
        for len in [64usize, 441, 1000, 4800, 12345] {
            let input = vec![0.25f32; len];
            let there = down.resample(&input);
            let back = up.resample(&there);
            let diff = back.len() as isize - len as isize;
            assert!(diff.abs() <= 1, "len={len} came back as {}", back.len());
        }
    }

    #[test]
    fn constant_signal_amplitude_preserved() {
        let rs = LinearResampler::new(44_100, 48_000);
        let out = rs.resample(&vec![0.5f32; 4410]);
        for s in out {
            assert_abs_diff_eq!(s, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn interpolates_between_neighbours() {
        // Halving the rate of a ramp keeps values within the input envelope.
        let rs = LinearResampler::new(48_000, 24_000);
        let ramp: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let out = rs.resample(&ramp);
        assert_eq!(out.len(), 50);
        for w in out.windows(2) {
            assert!(w[1] >= w[0], "ramp must stay monotonic");
        }
        assert!(out.iter().all(|s| (0.0..1.0).contains(s)));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let rs = LinearResampler::new(44_100, 48_000);
        assert!(rs.resample(&[]).is_empty());
    }

    #[test]
    fn single_sample_upsamples_to_constant() {
        let rs = LinearResampler::new(22_050, 44_100);
        let out = rs.resample(&[0.7]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|&s| (s - 0.7).abs() < 1e-6));
    }
}
