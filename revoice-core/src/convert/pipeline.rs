//! Segment consumption: WAV upload, streamed decode, incremental playback.
//!
//! `consume` is synchronous and runs on the session's blocking thread. The
//! response is processed chunk by chunk: raw bytes are teed aside for
//! persistence, decoded to f32, resampled to the output device rate and
//! pushed into the playback scheduler, which starts the device once enough
//! lead has accumulated.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffering::frame::Segment;
use crate::convert::decode::decoder_for;
use crate::convert::resample::LinearResampler;
use crate::convert::{ConversionService, OutputEncoding};
use crate::error::{Result, RevoiceError};
use crate::playback::{PlaybackScheduler, SampleSink};
use crate::store::RecordingStore;

/// What one conversion did, for diagnostics and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    /// Response chunks received.
    pub chunks: usize,
    /// Raw response bytes received.
    pub bytes: usize,
    /// Decoded samples handed to the playback scheduler, at the device rate.
    pub samples_queued: usize,
}

/// Anything that can take a finished segment and do something with it.
/// The session controller only ever sees this trait; tests script it.
pub trait SegmentConsumer: Send + 'static {
    fn consume(&mut self, segment: Segment) -> Result<ConsumeReport>;
}

/// Shared, lockable handle to the active segment consumer.
///
/// The session thread locks it for the full duration of a conversion, which
/// also serializes conversions across sessions.
#[derive(Clone)]
pub struct ConverterHandle(pub Arc<Mutex<dyn SegmentConsumer>>);

impl ConverterHandle {
    pub fn new(consumer: impl SegmentConsumer) -> Self {
        Self(Arc::new(Mutex::new(consumer)))
    }
}

impl fmt::Debug for ConverterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConverterHandle(..)")
    }
}

/// Opens a fresh output sink for each conversion. `cpal::Stream` is `!Send`,
/// so the sink must be built on the thread that plays it.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn SampleSink>> + Send>;

/// The production segment consumer: remote conversion plus local playback.
pub struct ConversionPipeline {
    service: Arc<dyn ConversionService>,
    encoding: OutputEncoding,
    lead_chunks: usize,
    sink_factory: SinkFactory,
    store: Option<RecordingStore>,
    on_playback_start: Option<Box<dyn FnMut() + Send>>,
}

impl ConversionPipeline {
    pub fn new(
        service: Arc<dyn ConversionService>,
        encoding: OutputEncoding,
        lead_chunks: usize,
        sink_factory: SinkFactory,
    ) -> Self {
        Self {
            service,
            encoding,
            lead_chunks,
            sink_factory,
            store: None,
            on_playback_start: None,
        }
    }

    /// Persist raw response bytes as timestamped artifacts.
    pub fn with_store(mut self, store: RecordingStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Invoked once per conversion, at the moment device output starts.
    pub fn with_playback_hook(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_playback_start = Some(Box::new(hook));
        self
    }
}

impl SegmentConsumer for ConversionPipeline {
    fn consume(&mut self, segment: Segment) -> Result<ConsumeReport> {
        let duration = segment.duration_secs();
        let sample_rate = segment.sample_rate;
        let wav = encode_wav(&segment.into_samples(), sample_rate)?;

        info!(
            duration_secs = format!("{duration:.2}").as_str(),
            sample_rate, "converting segment"
        );

        let mut stream = self.service.convert(wav)?;

        let sink = (self.sink_factory)()?;
        let sink_rate = sink.sample_rate();
        let mut scheduler = PlaybackScheduler::new(sink, self.lead_chunks);
        let resampler = LinearResampler::new(self.encoding.sample_rate(), sink_rate);
        let mut decoder = decoder_for(self.encoding)?;

        let mut report = ConsumeReport::default();
        let mut raw = if self.store.is_some() {
            Some(Vec::new())
        } else {
            None
        };
        let mut playing = false;

        while let Some(chunk) = stream.next_chunk()? {
            report.chunks += 1;
            report.bytes += chunk.len();
            if let Some(raw) = raw.as_mut() {
                raw.extend_from_slice(&chunk);
            }

            let samples = decoder.decode(&chunk)?;
            if !samples.is_empty() {
                let resampled = resampler.resample(&samples);
                report.samples_queued += resampled.len();
                scheduler.push_chunk(&resampled)?;
            }

            if !playing && scheduler.started() {
                playing = true;
                if let Some(hook) = self.on_playback_start.as_mut() {
                    hook();
                }
            }
        }

        let tail = decoder.finish()?;
        if !tail.is_empty() {
            let resampled = resampler.resample(&tail);
            report.samples_queued += resampled.len();
            scheduler.push_chunk(&resampled)?;
        }

        if report.chunks == 0 || report.samples_queued == 0 {
            return Err(RevoiceError::NoAudioProduced);
        }

        // Persist before the drain wait; the write happens off-thread.
        if let (Some(store), Some(raw)) = (self.store.as_ref(), raw) {
            let _ = store.save_detached(raw, self.encoding.extension());
        }

        // Below the lead threshold the device starts inside `finish`.
        if !playing {
            if let Some(hook) = self.on_playback_start.as_mut() {
                hook();
            }
        }

        scheduler.finish()?;

        debug!(
            chunks = report.chunks,
            bytes = report.bytes,
            samples = report.samples_queued,
            "conversion played out"
        );
        Ok(report)
    }
}

/// Encode mono f32 samples as a 16-bit PCM WAV byte blob.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| RevoiceError::Conversion(format!("wav encode: {e}")))?;
        for &sample in samples {
            let clamped = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer
                .write_sample(clamped)
                .map_err(|e| RevoiceError::Conversion(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| RevoiceError::Conversion(format!("wav encode: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::buffering::frame::Frame;
    use crate::convert::{ByteChunkStream, ConversionChunk};
    use crate::playback::SampleQueue;

    /// Replays a scripted list of response chunks.
    struct ScriptedService {
        chunks: Mutex<VecDeque<Vec<u8>>>,
    }

    impl ScriptedService {
        fn new(chunks: Vec<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(chunks.into()),
            })
        }
    }

    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ByteChunkStream for ScriptedStream {
        fn next_chunk(&mut self) -> Result<Option<ConversionChunk>> {
            Ok(self.chunks.pop_front())
        }
    }

    impl ConversionService for ScriptedService {
        fn convert(&self, _segment_wav: Vec<u8>) -> Result<Box<dyn ByteChunkStream>> {
            Ok(Box::new(ScriptedStream {
                chunks: std::mem::take(&mut *self.chunks.lock()),
            }))
        }
    }

    struct RecordingSink {
        begins: Arc<AtomicUsize>,
        consumed: Arc<Mutex<Vec<f32>>>,
        queue: Option<Arc<SampleQueue>>,
    }

    impl SampleSink for RecordingSink {
        fn sample_rate(&self) -> u32 {
            44_100
        }

        fn begin(&mut self, queue: Arc<SampleQueue>) -> Result<()> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.queue = Some(queue);
            Ok(())
        }

        fn wait_until_drained(&mut self) -> Result<()> {
            if let Some(queue) = self.queue.take() {
                let mut out = vec![0.0f32; queue.len()];
                queue.fill(&mut out, 1);
                self.consumed.lock().extend_from_slice(&out);
            }
            Ok(())
        }
    }

    fn sink_factory(
        begins: Arc<AtomicUsize>,
        consumed: Arc<Mutex<Vec<f32>>>,
    ) -> SinkFactory {
        Box::new(move || {
            Ok(Box::new(RecordingSink {
                begins: Arc::clone(&begins),
                consumed: Arc::clone(&consumed),
                queue: None,
            }) as Box<dyn SampleSink>)
        })
    }

    fn pcm_chunk(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn one_frame_segment() -> Segment {
        Segment::new(vec![Frame::new(vec![0.1; 1024], 44_100)], 44_100)
    }

    #[test]
    fn streams_pcm_chunks_into_playback() {
        let service = ScriptedService::new(vec![
            pcm_chunk(&[1000, 2000]),
            pcm_chunk(&[3000]),
            pcm_chunk(&[4000, 5000, 6000]),
        ]);
        let begins = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(Mutex::new(Vec::new()));

        let mut pipeline = ConversionPipeline::new(
            service,
            OutputEncoding::Pcm16 { sample_rate: 44_100 },
            2,
            sink_factory(Arc::clone(&begins), Arc::clone(&consumed)),
        );

        let report = pipeline.consume(one_frame_segment()).unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.bytes, 12);
        assert_eq!(report.samples_queued, 6, "pcm passthrough: bytes / 2");
        assert_eq!(begins.load(Ordering::SeqCst), 1);
        assert_eq!(consumed.lock().len(), 6);
    }

    #[test]
    fn empty_response_is_no_audio_produced() {
        let service = ScriptedService::new(vec![]);
        let begins = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(Mutex::new(Vec::new()));

        let mut pipeline = ConversionPipeline::new(
            service,
            OutputEncoding::default(),
            3,
            sink_factory(Arc::clone(&begins), consumed),
        );

        let err = pipeline.consume(one_frame_segment()).unwrap_err();
        assert!(matches!(err, RevoiceError::NoAudioProduced));
        assert_eq!(begins.load(Ordering::SeqCst), 0, "device never touched");
    }

    #[test]
    fn playback_hook_fires_exactly_once() {
        let service = ScriptedService::new(vec![
            pcm_chunk(&[1, 2]),
            pcm_chunk(&[3, 4]),
            pcm_chunk(&[5, 6]),
        ]);
        let begins = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(Mutex::new(Vec::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_hook = Arc::clone(&fired);

        let mut pipeline = ConversionPipeline::new(
            service,
            OutputEncoding::default(),
            2,
            sink_factory(begins, consumed),
        )
        .with_playback_hook(move || {
            fired_hook.fetch_add(1, Ordering::SeqCst);
        });

        pipeline.consume(one_frame_segment()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_response_still_fires_hook_on_finish() {
        // One chunk, lead threshold of 3: playback starts at finish.
        let service = ScriptedService::new(vec![pcm_chunk(&[9, 9])]);
        let begins = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(Mutex::new(Vec::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_hook = Arc::clone(&fired);

        let mut pipeline = ConversionPipeline::new(
            service,
            OutputEncoding::default(),
            3,
            sink_factory(Arc::clone(&begins), consumed),
        )
        .with_playback_hook(move || {
            fired_hook.fetch_add(1, Ordering::SeqCst);
        });

        pipeline.consume(one_frame_segment()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(begins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persists_raw_response_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(tmp.path()).unwrap();
        let service = ScriptedService::new(vec![pcm_chunk(&[7, 8, 9])]);
        let begins = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(Mutex::new(Vec::new()));

        let mut pipeline = ConversionPipeline::new(
            service,
            OutputEncoding::default(),
            1,
            sink_factory(begins, consumed),
        )
        .with_store(store);

        pipeline.consume(one_frame_segment()).unwrap();

        // The write is detached; give it a moment.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
            if !files.is_empty() {
                let path = files[0].as_ref().unwrap().path();
                assert_eq!(path.extension().unwrap(), "pcm");
                assert_eq!(std::fs::read(&path).unwrap(), pcm_chunk(&[7, 8, 9]));
                break;
            }
            assert!(std::time::Instant::now() < deadline, "artifact never written");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    #[test]
    fn resamples_to_device_rate() {
        // Service at 22050, device at 44100: sample count doubles.
        let service = ScriptedService::new(vec![pcm_chunk(&[0; 100])]);
        let begins = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(Mutex::new(Vec::new()));

        let mut pipeline = ConversionPipeline::new(
            service,
            OutputEncoding::Pcm16 { sample_rate: 22_050 },
            1,
            sink_factory(begins, Arc::clone(&consumed)),
        );

        let report = pipeline.consume(one_frame_segment()).unwrap();
        assert_eq!(report.samples_queued, 200);
        assert_eq!(consumed.lock().len(), 200);
    }

    #[test]
    fn wav_header_is_valid() {
        let wav = encode_wav(&[0.0, 0.5, -0.5], 48_000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 3);
    }
}
