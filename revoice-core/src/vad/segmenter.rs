//! Utterance segmenter: the Idle/Active state machine that turns a live
//! frame stream into complete spoken segments.
//!
//! ## Algorithm
//!
//! - **Idle**: frames go into the pre-roll buffer (oldest evicted). When the
//!   VAD reports speech, the pre-roll contents plus the triggering frame
//!   become the segment accumulator and the machine goes Active.
//! - **Active**: every frame is appended; speech frames refresh
//!   `last_voice`. `poll_silence` finalizes once the segment has lasted
//!   `min_recording` AND `silence_duration` has elapsed since the last
//!   speech frame.
//!
//! Manual mode is the same machine with explicit triggers: `force_start`
//! skips the VAD gate (every frame is recorded), `force_finish` replaces the
//! silence timeout.
//!
//! Time is passed in as `Instant` arguments so tests drive the clock.
//! The silence timeout is evaluated by the session loop on a fixed polling
//! interval, never from the capture callback.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{
    buffering::{frame::Frame, frame::Segment, preroll::PreRollBuffer},
    error::{Result, RevoiceError},
    vad::VoiceActivityDetector,
};

/// Emitted by the segmenter as utterances begin and end.
#[derive(Debug)]
pub enum SegmentEvent {
    /// Voice onset: recording has begun (pre-roll already captured).
    Started,
    /// Utterance complete, including trailing silence up to the timeout.
    Finished(Segment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No voice detected; pre-roll buffer is filling.
    Idle,
    /// An utterance is being accumulated.
    Active,
}

pub struct Segmenter {
    vad: Box<dyn VoiceActivityDetector>,
    state: SegmenterState,
    pre_roll: PreRollBuffer,
    /// Segment accumulator — owned here until finalization hands it off.
    frames: Vec<Frame>,
    segment_start: Option<Instant>,
    last_voice: Option<Instant>,
    min_recording: Duration,
    silence_duration: Duration,
    /// Sample rate every incoming frame must carry.
    expected_rate: u32,
    /// When true, the VAD gate is bypassed: `force_start`/`force_finish`
    /// drive the transitions instead.
    manual: bool,
}

impl Segmenter {
    pub fn new(
        vad: Box<dyn VoiceActivityDetector>,
        expected_rate: u32,
        pre_roll_capacity: usize,
        min_recording: Duration,
        silence_duration: Duration,
    ) -> Self {
        Self {
            vad,
            state: SegmenterState::Idle,
            pre_roll: PreRollBuffer::new(pre_roll_capacity),
            frames: Vec::new(),
            segment_start: None,
            last_voice: None,
            min_recording,
            silence_duration,
            expected_rate,
            manual: false,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn pre_roll_len(&self) -> usize {
        self.pre_roll.len()
    }

    /// Feed one captured frame. Returns `Started` on voice onset; finished
    /// segments are produced by `poll_silence` or `force_finish`.
    ///
    /// # Errors
    /// `RevoiceError::AudioStream` when the frame's sample rate or channel
    /// count does not match the configured capture format. The session must
    /// fail fast rather than compute RMS over mismatched data.
    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> Result<Option<SegmentEvent>> {
        if frame.sample_rate != self.expected_rate || frame.channels != 1 {
            return Err(RevoiceError::AudioStream(format!(
                "frame format mismatch: got {} Hz / {} ch, expected {} Hz mono",
                frame.sample_rate, frame.channels, self.expected_rate
            )));
        }

        if self.manual {
            // Gating bypassed: record every frame while active.
            if self.state == SegmenterState::Active {
                self.frames.push(frame);
            }
            return Ok(None);
        }

        match self.state {
            SegmenterState::Idle => {
                let decision = self.vad.classify(&frame);
                if decision.is_speech() {
                    // Onset: pre-roll plus the triggering frame seed the segment.
                    self.frames = self.pre_roll.drain();
                    self.frames.push(frame);
                    self.state = SegmenterState::Active;
                    self.segment_start = Some(now);
                    self.last_voice = Some(now);
                    debug!(
                        pre_roll_frames = self.frames.len() - 1,
                        "voice detected, recording"
                    );
                    Ok(Some(SegmentEvent::Started))
                } else {
                    self.pre_roll.push(frame);
                    Ok(None)
                }
            }
            SegmenterState::Active => {
                let decision = self.vad.classify(&frame);
                self.frames.push(frame);
                if decision.is_speech() {
                    self.last_voice = Some(now);
                }
                Ok(None)
            }
        }
    }

    /// Evaluate the silence timeout. Called on a fixed short interval by the
    /// session loop, decoupled from frame delivery.
    pub fn poll_silence(&mut self, now: Instant) -> Option<SegmentEvent> {
        if self.manual || self.state != SegmenterState::Active {
            return None;
        }
        let (start, last_voice) = match (self.segment_start, self.last_voice) {
            (Some(s), Some(v)) => (s, v),
            _ => return None,
        };
        if now.duration_since(start) > self.min_recording
            && now.duration_since(last_voice) > self.silence_duration
        {
            debug!(
                frames = self.frames.len(),
                "silence detected, finalizing segment"
            );
            return Some(SegmentEvent::Finished(self.take_segment()));
        }
        None
    }

    /// Manual-mode start: voice is forced "detected" immediately.
    pub fn force_start(&mut self, now: Instant) {
        self.manual = true;
        self.state = SegmenterState::Active;
        self.frames = Vec::new();
        self.pre_roll.clear();
        self.segment_start = Some(now);
        self.last_voice = Some(now);
    }

    /// Manual-mode stop: finalize whatever has accumulated.
    ///
    /// Calling this while Idle is a no-op returning `None`.
    pub fn force_finish(&mut self) -> Option<SegmentEvent> {
        if self.state != SegmenterState::Active {
            return None;
        }
        if self.frames.is_empty() {
            warn!("stopping with no recorded frames");
            self.reset();
            return None;
        }
        Some(SegmentEvent::Finished(self.take_segment()))
    }

    /// Return to Idle, clearing the accumulator and pre-roll.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.frames.clear();
        self.pre_roll.clear();
        self.segment_start = None;
        self.last_voice = None;
        self.manual = false;
        self.vad.reset();
    }

    fn take_segment(&mut self) -> Segment {
        let frames = std::mem::take(&mut self.frames);
        let segment = Segment::new(frames, self.expected_rate);
        self.state = SegmenterState::Idle;
        self.pre_roll.clear();
        self.segment_start = None;
        self.last_voice = None;
        self.vad.reset();
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::energy::EnergyVad;

    const RATE: u32 = 48_000;
    const FRAME_LEN: usize = 1024;

    fn segmenter(pre_roll_cap: usize) -> Segmenter {
        Segmenter::new(
            Box::new(EnergyVad::new(0.015, 0)),
            RATE,
            pre_roll_cap,
            Duration::from_millis(300),
            Duration::from_millis(1200),
        )
    }

    fn silent() -> Frame {
        Frame::new(vec![0.0; FRAME_LEN], RATE)
    }

    fn loud() -> Frame {
        Frame::new(vec![0.05; FRAME_LEN], RATE)
    }

    #[test]
    fn stays_idle_on_silence_and_bounds_pre_roll() {
        let mut seg = segmenter(8);
        let now = Instant::now();
        for _ in 0..50 {
            let ev = seg.on_frame(silent(), now).unwrap();
            assert!(ev.is_none());
            assert!(seg.pre_roll_len() <= 8);
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert!(seg.poll_silence(now + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn onset_copies_pre_roll_into_segment() {
        let mut seg = segmenter(4);
        let t0 = Instant::now();
        for _ in 0..10 {
            seg.on_frame(silent(), t0).unwrap();
        }
        // Pre-roll is saturated at 4 frames; onset adds the loud frame.
        let ev = seg.on_frame(loud(), t0).unwrap();
        assert!(matches!(ev, Some(SegmentEvent::Started)));
        assert_eq!(seg.state(), SegmenterState::Active);

        // Finalize after enough silence.
        let mut t = t0;
        for _ in 0..30 {
            t += Duration::from_millis(50);
            seg.on_frame(silent(), t).unwrap();
        }
        let finished = seg.poll_silence(t + Duration::from_millis(1300)).unwrap();
        match finished {
            SegmentEvent::Finished(segment) => {
                // 4 pre-roll + 1 onset + 30 trailing silence frames
                assert_eq!(segment.frame_count(), 35);
                assert_eq!(segment.sample_rate, RATE);
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.pre_roll_len(), 0);
    }

    #[test]
    fn spec_scenario_one_segment_per_utterance() {
        // 50 silent frames → zero events; 30 loud frames then silence past
        // the timeout → exactly one Finished containing pre-roll + 30 +
        // trailing frames.
        let mut seg = segmenter(8);
        let mut t = Instant::now();
        let mut events = 0;

        for _ in 0..50 {
            if seg.on_frame(silent(), t).unwrap().is_some() {
                events += 1;
            }
            t += Duration::from_millis(21);
        }
        assert_eq!(events, 0);
        let pre_roll_depth = seg.pre_roll_len();
        assert_eq!(pre_roll_depth, 8);

        let mut started = 0;
        for _ in 0..30 {
            if let Some(SegmentEvent::Started) = seg.on_frame(loud(), t).unwrap() {
                started += 1;
            }
            t += Duration::from_millis(21);
        }
        assert_eq!(started, 1);

        // Trailing silence: poll every frame, collect finals.
        let mut finished: Vec<Segment> = Vec::new();
        let mut trailing = 0;
        for _ in 0..80 {
            seg.on_frame(silent(), t).unwrap();
            trailing += 1;
            t += Duration::from_millis(21);
            if let Some(SegmentEvent::Finished(s)) = seg.poll_silence(t) {
                finished.push(s);
                break;
            }
        }
        assert_eq!(finished.len(), 1);
        // pre-roll depth + 29 continuation frames + onset frame + trailing
        assert_eq!(finished[0].frame_count(), pre_roll_depth + 30 + trailing);

        // No second final from further polling.
        assert!(seg.poll_silence(t + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn min_recording_guard_holds_short_transients() {
        let mut seg = segmenter(4);
        let t0 = Instant::now();
        seg.on_frame(loud(), t0).unwrap();
        // Silence timeout elapsed but the segment is younger than min_recording.
        assert!(seg
            .poll_silence(t0 + Duration::from_millis(200))
            .is_none());
    }

    #[test]
    fn mid_sentence_pause_does_not_truncate() {
        let mut seg = segmenter(4);
        let mut t = Instant::now();
        seg.on_frame(loud(), t).unwrap();
        // 0.8 s pause, below silence_duration
        t += Duration::from_millis(800);
        assert!(seg.poll_silence(t).is_none());
        // Speech resumes, refreshing last_voice
        seg.on_frame(loud(), t).unwrap();
        t += Duration::from_millis(800);
        assert!(seg.poll_silence(t).is_none());
    }

    #[test]
    fn manual_mode_records_regardless_of_level() {
        let mut seg = segmenter(4);
        let t0 = Instant::now();
        seg.force_start(t0);
        assert_eq!(seg.state(), SegmenterState::Active);
        seg.on_frame(silent(), t0).unwrap();
        seg.on_frame(silent(), t0).unwrap();
        // Silence polling is disabled in manual mode.
        assert!(seg.poll_silence(t0 + Duration::from_secs(60)).is_none());

        match seg.force_finish() {
            Some(SegmentEvent::Finished(segment)) => assert_eq!(segment.frame_count(), 2),
            other => panic!("expected Finished, got {other:?}"),
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn force_finish_when_idle_is_noop() {
        let mut seg = segmenter(4);
        assert!(seg.force_finish().is_none());
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn rejects_mismatched_frame_format() {
        let mut seg = segmenter(4);
        let bad = Frame::new(vec![0.0; FRAME_LEN], 16_000);
        let err = seg.on_frame(bad, Instant::now()).unwrap_err();
        assert!(matches!(err, RevoiceError::AudioStream(_)));
    }

    #[test]
    fn reset_returns_to_idle_from_any_state() {
        let mut seg = segmenter(4);
        seg.on_frame(loud(), Instant::now()).unwrap();
        assert_eq!(seg.state(), SegmenterState::Active);
        seg.reset();
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.pre_roll_len(), 0);
    }
}
