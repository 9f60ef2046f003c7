//! Playback buffering and output-device abstraction.
//!
//! The output callback runs on an OS audio thread and only pops samples
//! from a shared `SampleQueue`; all queueing happens on the conversion
//! thread. Underruns are filled with silence rather than blocking.

pub mod scheduler;
pub mod sink;

pub use scheduler::PlaybackScheduler;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Accumulator of resampled audio samples awaiting output.
///
/// Producer side: `push` / `close` (conversion thread).
/// Consumer side: `fill` (output device callback).
pub struct SampleQueue {
    inner: Mutex<VecDeque<f32>>,
    /// Producer has sent every chunk; no more pushes will arrive.
    closed: AtomicBool,
    /// Consumer has observed an empty queue after close.
    drained: AtomicBool,
}

impl SampleQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
        })
    }

    pub fn push(&self, samples: &[f32]) {
        let mut q = self.inner.lock();
        q.extend(samples.iter().copied());
    }

    /// Signal that no further samples will be pushed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // A queue closed while already empty is immediately drained.
        if self.inner.lock().is_empty() {
            self.drained.store(true, Ordering::Release);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Fill an interleaved output buffer, duplicating each mono sample
    /// across `channels`. Zero-fills on underrun. Marks the queue drained
    /// once it runs empty after `close`.
    pub fn fill(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut q = self.inner.lock();
        for frame in out.chunks_mut(channels) {
            let sample = q.pop_front().unwrap_or(0.0);
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
        if q.is_empty() && self.closed.load(Ordering::Acquire) {
            self.drained.store(true, Ordering::Release);
        }
    }
}

/// External audio output binding. Implemented by `CpalSink` for real
/// devices and by in-memory fakes in tests.
pub trait SampleSink {
    /// Output sample rate the device consumes (Hz). Chunks must be
    /// resampled to this rate before queueing.
    fn sample_rate(&self) -> u32;

    /// Start consuming from `queue`. Called exactly once per segment.
    fn begin(&mut self, queue: Arc<SampleQueue>) -> Result<()>;

    /// Block until the queue has fully drained through the device.
    fn wait_until_drained(&mut self) -> Result<()>;
}
