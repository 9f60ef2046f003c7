//! Blocking session loop.
//!
//! ## Per-iteration stages
//!
//! ```text
//! 1. Drain up to one frame (1024 samples) from the capture ring
//! 2. Broadcast an activity event (RMS + speech flag)
//! 3. Feed the frame to the segmenter (pre-roll / accumulate)
//! 4. On a fixed polling interval, evaluate the silence timeout
//! 5. When a segment finalizes: convert + play it synchronously, then
//!    settle, flush the ring and resume listening (automatic mode)
//! ```
//!
//! The whole loop runs inside `spawn_blocking`, keeping the Tokio executor
//! free for the shell and the artifact janitor. Conversion is deliberately
//! synchronous here: the microphone ring keeps filling during a conversion,
//! but its contents are flushed before listening resumes, so the device
//! never captures its own playback as a new utterance.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{frame::Frame, frame::Segment, AudioConsumer, Consumer},
    convert::ConverterHandle,
    engine::{CaptureMode, EngineConfig},
    events::{ActivityEvent, SessionStatus, SessionStatusEvent},
    vad::{SegmentEvent, Segmenter},
};

/// Samples drained from the ring per iteration; one VAD frame.
/// ~21 ms at 48 kHz.
pub const FRAME_LEN: usize = 1024;

/// Sleep when the ring is empty, to avoid burning a core.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// How often the silence timeout is evaluated.
const SILENCE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared counters for observability. Written with relaxed ordering from the
/// session thread, read from anywhere via `snapshot`.
#[derive(Default)]
pub struct SessionDiagnostics {
    pub frames_in: AtomicUsize,
    pub speech_frames: AtomicUsize,
    pub segments_started: AtomicUsize,
    pub segments_converted: AtomicUsize,
    pub segments_dropped: AtomicUsize,
    pub conversion_errors: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub samples_queued: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.speech_frames.store(0, Ordering::Relaxed);
        self.segments_started.store(0, Ordering::Relaxed);
        self.segments_converted.store(0, Ordering::Relaxed);
        self.segments_dropped.store(0, Ordering::Relaxed);
        self.conversion_errors.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.samples_queued.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            speech_frames: self.speech_frames.load(Ordering::Relaxed),
            segments_started: self.segments_started.load(Ordering::Relaxed),
            segments_converted: self.segments_converted.load(Ordering::Relaxed),
            segments_dropped: self.segments_dropped.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            samples_queued: self.samples_queued.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub speech_frames: usize,
    pub segments_started: usize,
    pub segments_converted: usize,
    pub segments_dropped: usize,
    pub conversion_errors: usize,
    pub chunks_received: usize,
    pub samples_queued: usize,
}

/// Everything the session loop needs, passed as one struct so the
/// `spawn_blocking` closure stays tidy.
pub struct SessionContext {
    pub config: EngineConfig,
    pub converter: ConverterHandle,
    pub segmenter: Segmenter,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    /// Exclusivity guard: `true` while a segment is being converted/played.
    pub processing: Arc<AtomicBool>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    pub capture_sample_rate: u32,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Run the blocking session loop until `ctx.running` becomes false.
pub fn run(mut ctx: SessionContext) {
    info!(
        sample_rate = ctx.capture_sample_rate,
        mode = ?ctx.config.mode,
        "session started"
    );

    let mut raw = vec![0f32; FRAME_LEN];
    let mut activity_seq = 0u64;
    let mut last_silence_poll = Instant::now();
    let manual = ctx.config.mode == CaptureMode::Manual;
    let mut failed = false;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        let now = Instant::now();

        if n > 0 {
            ctx.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

            let frame = Frame::new(raw[..n].to_vec(), ctx.capture_sample_rate);
            let rms = frame.rms();
            let is_speech = rms > ctx.config.silence_threshold;
            if is_speech {
                ctx.diagnostics.speech_frames.fetch_add(1, Ordering::Relaxed);
            }
            let _ = ctx.activity_tx.send(ActivityEvent {
                seq: activity_seq,
                rms,
                is_speech,
            });
            activity_seq = activity_seq.saturating_add(1);

            match ctx.segmenter.on_frame(frame, now) {
                Ok(Some(SegmentEvent::Started)) => {
                    ctx.diagnostics
                        .segments_started
                        .fetch_add(1, Ordering::Relaxed);
                    set_status(&ctx, SessionStatus::Recording, None);
                }
                Ok(Some(SegmentEvent::Finished(segment))) => {
                    handle_segment(&mut ctx, segment);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("capture format error, ending session: {e}");
                    set_status(&ctx, SessionStatus::Error, Some(e.to_string()));
                    failed = true;
                    break;
                }
            }
        } else {
            std::thread::sleep(EMPTY_SLEEP);
        }

        // Silence timeout runs on its own cadence, decoupled from frame
        // delivery so a stalled microphone still finalizes.
        if now.duration_since(last_silence_poll) >= SILENCE_POLL_INTERVAL {
            last_silence_poll = now;
            if let Some(SegmentEvent::Finished(segment)) = ctx.segmenter.poll_silence(now) {
                handle_segment(&mut ctx, segment);
            }
        }
    }

    // Manual mode: stop is the end-of-utterance trigger.
    if manual && !failed {
        if let Some(SegmentEvent::Finished(segment)) = ctx.segmenter.force_finish() {
            handle_segment(&mut ctx, segment);
            set_status(&ctx, SessionStatus::Stopped, None);
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_in = snap.frames_in,
        speech_frames = snap.speech_frames,
        segments_started = snap.segments_started,
        segments_converted = snap.segments_converted,
        segments_dropped = snap.segments_dropped,
        conversion_errors = snap.conversion_errors,
        "session ended"
    );
}

/// Convert and play one finalized segment, then restore listening state.
///
/// Conversion failures are recoverable: they are counted and logged, and the
/// session keeps listening.
fn handle_segment(ctx: &mut SessionContext, segment: Segment) {
    if segment.is_empty() {
        return;
    }

    if ctx.processing.swap(true, Ordering::SeqCst) {
        ctx.diagnostics
            .segments_dropped
            .fetch_add(1, Ordering::Relaxed);
        warn!(
            duration_secs = format!("{:.2}", segment.duration_secs()).as_str(),
            "segment dropped: a previous conversion is still in progress"
        );
        return;
    }

    set_status(ctx, SessionStatus::Converting, None);
    debug!(
        frames = segment.frame_count(),
        duration_secs = format!("{:.2}", segment.duration_secs()).as_str(),
        "segment finalized"
    );

    let result = {
        let mut consumer = ctx.converter.0.lock();
        consumer.consume(segment)
    };

    match result {
        Ok(report) => {
            ctx.diagnostics
                .segments_converted
                .fetch_add(1, Ordering::Relaxed);
            ctx.diagnostics
                .chunks_received
                .fetch_add(report.chunks, Ordering::Relaxed);
            ctx.diagnostics
                .samples_queued
                .fetch_add(report.samples_queued, Ordering::Relaxed);
            info!(
                chunks = report.chunks,
                bytes = report.bytes,
                samples = report.samples_queued,
                "segment converted and played"
            );
        }
        Err(e) => {
            ctx.diagnostics
                .conversion_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!("conversion failed, continuing to listen: {e}");
            let _ = ctx.status_tx.send(SessionStatusEvent {
                status: SessionStatus::Error,
                detail: Some(e.to_string()),
            });
        }
    }

    ctx.processing.store(false, Ordering::SeqCst);

    if ctx.config.mode == CaptureMode::Automatic && ctx.running.load(Ordering::Relaxed) {
        // Give the output device time to go quiet, then discard everything
        // the microphone picked up in the meantime.
        std::thread::sleep(ctx.config.settle_delay);
        while ctx.consumer.pop_slice(&mut [0f32; FRAME_LEN]) > 0 {}
        ctx.segmenter.reset();
        set_status(ctx, SessionStatus::Listening, None);
    }
}

fn set_status(ctx: &SessionContext, status: SessionStatus, detail: Option<String>) {
    *ctx.status.lock() = status;
    let _ = ctx.status_tx.send(SessionStatusEvent { status, detail });
}
