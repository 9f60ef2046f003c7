//! Conversion pipeline: segment upload, chunked response handling,
//! decode + resample, playback hand-off.

pub mod decode;
pub mod elevenlabs;
pub mod pipeline;
pub mod resample;

pub use elevenlabs::{ElevenLabsConverter, ElevenLabsConfig};
pub use pipeline::{ConsumeReport, ConversionPipeline, ConverterHandle, SegmentConsumer};
pub use resample::LinearResampler;

use crate::error::Result;

/// One unit of streamed response audio. Chunks arrive in order; there is no
/// reordering and no sequence numbers beyond arrival order.
pub type ConversionChunk = Vec<u8>;

/// Lazy, finite, non-restartable sequence of response chunks.
pub trait ByteChunkStream: Send {
    /// Next chunk, or `Ok(None)` when the response is exhausted.
    fn next_chunk(&mut self) -> Result<Option<ConversionChunk>>;
}

/// Remote voice-conversion collaborator.
///
/// Takes an encoded segment (WAV) and returns the converted audio as a
/// chunk stream in the encoding this service was configured for.
pub trait ConversionService: Send + Sync + 'static {
    fn convert(&self, segment_wav: Vec<u8>) -> Result<Box<dyn ByteChunkStream>>;
}

/// Response encoding requested from the conversion service.
///
/// Raw PCM is preferred: it decodes with no latency. MP3 goes through the
/// external decoder collaborator (`minimp3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    /// Signed 16-bit little-endian PCM at the given rate.
    Pcm16 { sample_rate: u32 },
    /// MP3 at the given rate.
    Mp3 { sample_rate: u32 },
}

impl OutputEncoding {
    /// The service's native output rate for this encoding.
    pub fn sample_rate(&self) -> u32 {
        match self {
            OutputEncoding::Pcm16 { sample_rate } | OutputEncoding::Mp3 { sample_rate } => {
                *sample_rate
            }
        }
    }

    /// `output_format` parameter value understood by the service.
    pub fn format_param(&self) -> String {
        match self {
            OutputEncoding::Pcm16 { sample_rate } => format!("pcm_{sample_rate}"),
            OutputEncoding::Mp3 { sample_rate } => format!("mp3_{sample_rate}_128"),
        }
    }

    /// File extension for persisted diagnostic artifacts.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputEncoding::Pcm16 { .. } => "pcm",
            OutputEncoding::Mp3 { .. } => "mp3",
        }
    }
}

impl Default for OutputEncoding {
    fn default() -> Self {
        OutputEncoding::Pcm16 {
            sample_rate: 44_100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_params_match_service_convention() {
        assert_eq!(
            OutputEncoding::Pcm16 { sample_rate: 44_100 }.format_param(),
            "pcm_44100"
        );
        assert_eq!(
            OutputEncoding::Mp3 { sample_rate: 44_100 }.format_param(),
            "mp3_44100_128"
        );
    }

    #[test]
    fn default_is_raw_pcm() {
        let enc = OutputEncoding::default();
        assert_eq!(enc, OutputEncoding::Pcm16 { sample_rate: 44_100 });
        assert_eq!(enc.extension(), "pcm");
    }
}
