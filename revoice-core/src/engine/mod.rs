//! `RevoiceEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RevoiceEngine::new()
//!     └─► set_converter()    → conversion backend installed
//!         └─► start()        → microphone open, session spawned,
//!             │                status = Listening (or Recording in manual mode)
//!             └─► stop()     → running=false, stream dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` in the wrong state return an error rather than
//! panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A sync
//! channel propagates open-device errors back to the `start()` caller.

pub mod session;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::{AudioCapture, CaptureRequest},
    buffering::{create_audio_ring, preroll::PreRollBuffer},
    convert::ConverterHandle,
    error::{Result, RevoiceError},
    events::{ActivityEvent, SessionStatus, SessionStatusEvent},
    vad::{energy::EnergyVad, Segmenter},
};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How an utterance's boundaries are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// `start()` begins the take, `stop()` ends it.
    Manual,
    /// Voice activity starts the take, sustained silence ends it.
    Automatic,
}

impl CaptureMode {
    /// Parse the wire/CLI representation: 0 = manual, 1 = automatic.
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(CaptureMode::Manual),
            1 => Ok(CaptureMode::Automatic),
            other => Err(RevoiceError::InvalidMode(other)),
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            CaptureMode::Manual => 0,
            CaptureMode::Automatic => 1,
        }
    }
}

/// Validated engine configuration. Cloned into each session at `start()`;
/// changes made between sessions apply to the next one.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: CaptureMode,
    /// Capture rate requested from the device (Hz). The device's actual
    /// rate wins when the request is unsupported. Default: 48000.
    pub sample_rate: u32,
    /// Capture channels requested from the device. Frames are always
    /// downmixed to mono regardless. Default: 1.
    pub channels: u16,
    /// RMS level above which a frame counts as voice. Default: 0.015.
    pub silence_threshold: f32,
    /// Trailing silence that ends an utterance. Default: 1.2 s.
    pub silence_duration: Duration,
    /// Utterances shorter than this never finalize early. Default: 0.3 s.
    pub min_recording_duration: Duration,
    /// Audio retained from before voice onset. Default: 0.5 s.
    pub pre_buffer_duration: Duration,
    /// Pause after playback before listening resumes. Default: 0.5 s.
    pub settle_delay: Duration,
    /// EnergyVad hangover frames. Default: 0.
    pub vad_hangover_frames: u32,
    /// Response chunks buffered before playback starts. Default: 3.
    pub lead_chunks: usize,
    /// Case-insensitive substring selecting the microphone.
    pub preferred_input_device: Option<String>,
    /// Case-insensitive substring selecting the playback device
    /// (e.g. "cable input" for a virtual cable).
    pub preferred_output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Automatic,
            sample_rate: 48_000,
            channels: 1,
            silence_threshold: 0.015,
            silence_duration: Duration::from_millis(1200),
            min_recording_duration: Duration::from_millis(300),
            pre_buffer_duration: Duration::from_millis(500),
            settle_delay: Duration::from_millis(500),
            vad_hangover_frames: 0,
            lead_chunks: 3,
            preferred_input_device: None,
            preferred_output_device: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.silence_threshold > 0.0 && self.silence_threshold < 1.0) {
            return Err(RevoiceError::Config(format!(
                "silence threshold must be in (0, 1), got {}",
                self.silence_threshold
            )));
        }
        if self.silence_duration.is_zero() {
            return Err(RevoiceError::Config(
                "silence duration must be non-zero".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(RevoiceError::Config("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(RevoiceError::Config("channel count must be non-zero".into()));
        }
        if self.lead_chunks == 0 {
            return Err(RevoiceError::Config(
                "lead chunk count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// The top-level engine handle.
///
/// `Send + Sync` — all fields use interior mutability. Wrap in
/// `Arc<RevoiceEngine>` to share between the shell and event-forwarding
/// tasks.
pub struct RevoiceEngine {
    config: Mutex<EngineConfig>,
    /// Installed via `set_converter` before the first `start()`.
    converter: Mutex<Option<ConverterHandle>>,
    /// `true` while a session should keep running.
    running: Arc<AtomicBool>,
    /// `true` from session spawn until its thread has fully wound down.
    /// Prevents a second capture stream from opening while the previous
    /// session is still releasing the device.
    session_live: Arc<AtomicBool>,
    /// `true` while a segment is being converted/played.
    processing: Arc<AtomicBool>,
    /// Canonical status (read from commands, written by the session).
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    diagnostics: Arc<session::SessionDiagnostics>,
}

impl RevoiceEngine {
    /// Create an engine. Does not open any device — install a converter,
    /// then call `start()`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            config: Mutex::new(config),
            converter: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            session_live: Arc::new(AtomicBool::new(false)),
            processing: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            activity_tx,
            diagnostics: Arc::new(session::SessionDiagnostics::default()),
        })
    }

    /// Install the conversion backend used by every subsequent session.
    pub fn set_converter(&self, converter: ConverterHandle) {
        *self.converter.lock() = Some(converter);
    }

    /// A hook suitable for `ConversionPipeline::with_playback_hook`: flips
    /// the engine status to `Playing` the moment device output starts.
    pub fn playback_hook(&self) -> impl FnMut() + Send + 'static {
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        move || {
            *status.lock() = SessionStatus::Playing;
            let _ = status_tx.send(SessionStatusEvent {
                status: SessionStatus::Playing,
                detail: None,
            });
        }
    }

    /// Start capturing.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns; the session continues on a background blocking thread.
    ///
    /// # Errors
    /// - `RevoiceError::Busy` while a conversion is still playing out.
    /// - `RevoiceError::AlreadyRunning` if a session is active.
    /// - `RevoiceError::Config` if no converter is installed.
    /// - Device errors from capture open.
    pub fn start(&self) -> Result<()> {
        let converter = self
            .converter
            .lock()
            .clone()
            .ok_or_else(|| RevoiceError::Config("no conversion backend installed".into()))?;

        if self.processing.load(Ordering::SeqCst) {
            return Err(RevoiceError::Busy);
        }
        if self.running.load(Ordering::SeqCst) || self.session_live.load(Ordering::SeqCst) {
            return Err(RevoiceError::AlreadyRunning);
        }

        let config = self.config.lock().clone();
        config.validate()?;

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.session_live.store(true, Ordering::SeqCst);
        let initial = match config.mode {
            CaptureMode::Manual => SessionStatus::Recording,
            CaptureMode::Automatic => SessionStatus::Listening,
        };
        self.set_status(initial, None);

        let (producer, consumer) = create_audio_ring();

        let running = Arc::clone(&self.running);
        let session_live = Arc::clone(&self.session_live);
        let processing = Arc::clone(&self.processing);
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync channel: the session thread confirms device open (with the
        // actual capture rate) or reports the failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Device open must happen on THIS thread — cpal::Stream is !Send.
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                config.preferred_input_device.as_deref(),
                CaptureRequest {
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                },
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    session_live.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;

            let vad = Box::new(EnergyVad::new(
                config.silence_threshold,
                config.vad_hangover_frames,
            ));
            let pre_roll_capacity = PreRollBuffer::capacity_for(
                config.pre_buffer_duration.as_secs_f64(),
                capture_sample_rate,
                session::FRAME_LEN,
            );
            let mut segmenter = Segmenter::new(
                vad,
                capture_sample_rate,
                pre_roll_capacity,
                config.min_recording_duration,
                config.silence_duration,
            );
            if config.mode == CaptureMode::Manual {
                segmenter.force_start(Instant::now());
            }

            session::run(session::SessionContext {
                config,
                converter,
                segmenter,
                consumer,
                running: Arc::clone(&running),
                processing,
                status,
                status_tx,
                activity_tx,
                capture_sample_rate,
                diagnostics,
            });

            // Stream drops here, releasing the device on this thread.
            capture.stop();
            drop(capture);
            running.store(false, Ordering::SeqCst);
            session_live.store(false, Ordering::SeqCst);
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent.
                self.running.store(false, Ordering::SeqCst);
                self.session_live.store(false, Ordering::SeqCst);
                self.set_status(SessionStatus::Error, Some("session failed to start".into()));
                Err(RevoiceError::Other(anyhow::anyhow!(
                    "session task died before confirming device open"
                )))
            }
        }
    }

    /// Stop capturing. In manual mode this also finalizes and converts the
    /// current take before the session thread exits.
    ///
    /// # Errors
    /// `RevoiceError::NotRunning` if no session is active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RevoiceError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(SessionStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Switch capture mode, stopping any active session first. An in-flight
    /// automatic recording is discarded, not converted.
    pub fn set_mode(&self, mode: CaptureMode) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            self.stop()?;
        }
        self.config.lock().mode = mode;
        info!(mode = ?mode, "capture mode changed");
        Ok(())
    }

    pub fn mode(&self) -> CaptureMode {
        self.config.lock().mode
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> EngineConfig {
        self.config.lock().clone()
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to live voice activity events (RMS + speech flag).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of session counters for observability.
    pub fn diagnostics_snapshot(&self) -> session::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_index_round_trip() {
        assert_eq!(CaptureMode::from_index(0).unwrap(), CaptureMode::Manual);
        assert_eq!(CaptureMode::from_index(1).unwrap(), CaptureMode::Automatic);
        assert_eq!(CaptureMode::Manual.index(), 0);
        assert_eq!(CaptureMode::Automatic.index(), 1);
    }

    #[test]
    fn invalid_mode_index_is_rejected() {
        let err = CaptureMode::from_index(7).unwrap_err();
        assert!(matches!(err, RevoiceError::InvalidMode(7)));
    }

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn config_rejects_bad_threshold_and_lead() {
        let mut config = EngineConfig {
            silence_threshold: 0.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        config.silence_threshold = 0.015;
        config.lead_chunks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stop_without_start_is_not_running() {
        let engine = RevoiceEngine::new(EngineConfig::default()).unwrap();
        assert!(matches!(engine.stop(), Err(RevoiceError::NotRunning)));
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[test]
    fn start_without_converter_is_a_config_error() {
        // No tokio runtime needed: the converter check precedes the spawn.
        let engine = RevoiceEngine::new(EngineConfig::default()).unwrap();
        assert!(matches!(engine.start(), Err(RevoiceError::Config(_))));
    }

    #[test]
    fn set_mode_updates_idle_engine() {
        let engine = RevoiceEngine::new(EngineConfig::default()).unwrap();
        engine.set_mode(CaptureMode::Manual).unwrap();
        assert_eq!(engine.mode(), CaptureMode::Manual);
    }
}
