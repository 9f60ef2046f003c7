//! Fixed-capacity circular buffer holding the frames just before voice onset.
//!
//! The segmenter fills this while idle so the first syllable of an utterance
//! is not clipped. Capacity is fixed at construction; pushing into a full
//! buffer evicts the oldest frame. Explicit index arithmetic, no deque.

use crate::buffering::frame::Frame;

pub struct PreRollBuffer {
    slots: Vec<Option<Frame>>,
    /// Index of the oldest frame.
    head: usize,
    /// Number of occupied slots.
    len: usize,
}

impl PreRollBuffer {
    /// Create a buffer holding at most `capacity` frames.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pre-roll capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Capacity needed to retain `duration_secs` of audio delivered in
    /// `frame_len`-sample frames at `sample_rate`, plus a few slack slots for
    /// irregular callback periods.
    pub fn capacity_for(duration_secs: f64, sample_rate: u32, frame_len: usize) -> usize {
        let frames = (duration_secs * sample_rate as f64 / frame_len.max(1) as f64).ceil() as usize;
        frames + 5
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a frame, evicting the oldest when full.
    pub fn push(&mut self, frame: Frame) {
        let cap = self.slots.len();
        if self.len == cap {
            // Overwrite the oldest slot and advance head.
            self.slots[self.head] = Some(frame);
            self.head = (self.head + 1) % cap;
        } else {
            let tail = (self.head + self.len) % cap;
            self.slots[tail] = Some(frame);
            self.len += 1;
        }
    }

    /// Remove and return all buffered frames, oldest first.
    pub fn drain(&mut self) -> Vec<Frame> {
        let cap = self.slots.len();
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            let idx = (self.head + i) % cap;
            if let Some(frame) = self.slots[idx].take() {
                out.push(frame);
            }
        }
        self.head = 0;
        self.len = 0;
        out
    }

    /// Drop all buffered frames.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: f32) -> Frame {
        Frame::new(vec![tag; 4], 48_000)
    }

    fn tags(frames: &[Frame]) -> Vec<f32> {
        frames.iter().map(|f| f.samples[0]).collect()
    }

    #[test]
    fn fills_up_to_capacity() {
        let mut buf = PreRollBuffer::new(3);
        buf.push(frame(1.0));
        buf.push(frame(2.0));
        assert_eq!(buf.len(), 2);
        assert_eq!(tags(&buf.drain()), vec![1.0, 2.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut buf = PreRollBuffer::new(3);
        for tag in 1..=5 {
            buf.push(frame(tag as f32));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(tags(&buf.drain()), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut buf = PreRollBuffer::new(4);
        for tag in 0..100 {
            buf.push(frame(tag as f32));
            assert!(buf.len() <= buf.capacity());
        }
    }

    #[test]
    fn preserves_chronological_order_after_wraparound() {
        let mut buf = PreRollBuffer::new(2);
        buf.push(frame(1.0));
        buf.push(frame(2.0));
        buf.push(frame(3.0));
        assert_eq!(tags(&buf.drain()), vec![2.0, 3.0]);

        // Reusable after drain
        buf.push(frame(7.0));
        assert_eq!(tags(&buf.drain()), vec![7.0]);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buf = PreRollBuffer::new(3);
        buf.push(frame(1.0));
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn capacity_matches_duration_math() {
        // 0.5 s at 48 kHz with 1024-sample frames → ceil(23.4) + 5 = 29
        let cap = PreRollBuffer::capacity_for(0.5, 48_000, 1024);
        assert_eq!(cap, 29);
    }
}
