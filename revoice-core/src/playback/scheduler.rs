//! Lead-threshold playback scheduling.
//!
//! Chunks are queued as they arrive from the conversion pipeline; actual
//! device output starts only once `lead_chunks` have accumulated, so the
//! device is not starved while later chunks are still in flight. If the
//! producer finishes before the threshold is reached, the partial buffer is
//! played immediately (short-utterance path).

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::playback::{SampleQueue, SampleSink};

pub struct PlaybackScheduler {
    sink: Box<dyn SampleSink>,
    queue: Arc<SampleQueue>,
    /// Chunks to buffer before output starts.
    lead_chunks: usize,
    chunks_pushed: usize,
    started: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn SampleSink>, lead_chunks: usize) -> Self {
        Self {
            sink,
            queue: SampleQueue::new(),
            lead_chunks: lead_chunks.max(1),
            chunks_pushed: 0,
            started: false,
        }
    }

    /// Sample rate chunks must be resampled to before pushing.
    pub fn sink_rate(&self) -> u32 {
        self.sink.sample_rate()
    }

    pub fn chunks_pushed(&self) -> usize {
        self.chunks_pushed
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Append one resampled chunk. Starts the sink once the lead threshold
    /// is reached; later chunks extend the queue without restarting output.
    pub fn push_chunk(&mut self, samples: &[f32]) -> Result<()> {
        self.queue.push(samples);
        self.chunks_pushed += 1;

        if !self.started && self.chunks_pushed >= self.lead_chunks {
            debug!(
                chunks = self.chunks_pushed,
                buffered = self.queue.len(),
                "lead threshold reached, starting playback"
            );
            self.sink.begin(Arc::clone(&self.queue))?;
            self.started = true;
        }
        Ok(())
    }

    /// No more chunks will arrive: close the queue, start output if the
    /// lead threshold was never reached, and block until the device has
    /// drained everything.
    pub fn finish(mut self) -> Result<()> {
        self.queue.close();

        if self.chunks_pushed == 0 {
            // Nothing was ever queued; the pipeline reports this condition
            // itself before reaching the scheduler.
            return Ok(());
        }

        if !self.started {
            debug!(
                chunks = self.chunks_pushed,
                "producer finished below lead threshold, playing partial buffer"
            );
            self.sink.begin(Arc::clone(&self.queue))?;
            self.started = true;
        }

        self.sink.wait_until_drained()
    }
}
