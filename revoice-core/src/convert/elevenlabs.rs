//! ElevenLabs speech-to-speech client.
//!
//! Blocking HTTP on purpose: conversions run on the session's blocking
//! thread, never on the async executor. The response body is read
//! incrementally so playback can start while later chunks are still on the
//! wire. The request carries a bounded timeout; a hung service surfaces as
//! a recoverable conversion error rather than stalling the session forever.

use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, Response};
use tracing::{debug, info};

use crate::convert::{ByteChunkStream, ConversionChunk, ConversionService, OutputEncoding};
use crate::error::{Result, RevoiceError};

/// Read granularity for the streamed response body.
const RESPONSE_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub voice_id: String,
    /// Conversion model identity.
    pub model_id: String,
    /// Response encoding to request.
    pub encoding: OutputEncoding,
    pub remove_background_noise: bool,
    /// Service-side latency optimization level (0–4), if any.
    pub optimize_streaming_latency: Option<u8>,
    /// Total request timeout, connect through last body byte.
    pub timeout: Duration,
    /// Override for tests / self-hosted gateways.
    pub base_url: String,
}

impl ElevenLabsConfig {
    pub fn new(api_key: String, voice_id: String) -> Self {
        Self {
            api_key,
            voice_id,
            model_id: "eleven_multilingual_sts_v2".into(),
            encoding: OutputEncoding::default(),
            remove_background_noise: true,
            optimize_streaming_latency: Some(3),
            timeout: Duration::from_secs(30),
            base_url: "https://api.elevenlabs.io".into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(RevoiceError::Config("missing API key".into()));
        }
        if self.voice_id.trim().is_empty() {
            return Err(RevoiceError::Config("missing voice identity".into()));
        }
        if self.timeout.is_zero() {
            return Err(RevoiceError::Config("service timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ElevenLabsConverter {
    config: ElevenLabsConfig,
    /// Built lazily on the first conversion so the converter can be
    /// constructed inside an async context (the blocking client spawns its
    /// own internal runtime).
    client: OnceLock<Client>,
}

impl ElevenLabsConverter {
    pub fn new(config: ElevenLabsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: OnceLock::new(),
        })
    }

    pub fn encoding(&self) -> OutputEncoding {
        self.config.encoding
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/speech-to-speech/{}/stream",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        )
    }

    fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| RevoiceError::Conversion(format!("http client init: {e}")))?;
        Ok(self.client.get_or_init(|| built))
    }
}

impl ConversionService for ElevenLabsConverter {
    fn convert(&self, segment_wav: Vec<u8>) -> Result<Box<dyn ByteChunkStream>> {
        let upload_bytes = segment_wav.len();
        let part = multipart::Part::bytes(segment_wav)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| RevoiceError::Conversion(format!("multipart: {e}")))?;

        let mut form = multipart::Form::new()
            .part("audio", part)
            .text("model_id", self.config.model_id.clone());
        if self.config.remove_background_noise {
            form = form.text("remove_background_noise", "true");
        }

        let mut request = self
            .client()?
            .post(self.endpoint())
            .header("xi-api-key", &self.config.api_key)
            .query(&[("output_format", self.config.encoding.format_param())]);
        if let Some(level) = self.config.optimize_streaming_latency {
            request = request.query(&[("optimize_streaming_latency", level.to_string())]);
        }

        info!(
            upload_bytes,
            model = %self.config.model_id,
            format = %self.config.encoding.format_param(),
            "submitting segment to conversion service"
        );

        let response = request
            .multipart(form)
            .send()
            .map_err(|e| RevoiceError::Conversion(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RevoiceError::Conversion(format!(
                "service returned {status}: {body}"
            )));
        }

        debug!("conversion response streaming");
        Ok(Box::new(HttpChunkStream {
            response,
            buf: vec![0u8; RESPONSE_CHUNK_BYTES],
        }))
    }
}

/// Reads the HTTP response body in fixed-size chunks as they arrive.
struct HttpChunkStream {
    response: Response,
    buf: Vec<u8>,
}

impl ByteChunkStream for HttpChunkStream {
    fn next_chunk(&mut self) -> Result<Option<ConversionChunk>> {
        let n = self
            .response
            .read(&mut self.buf)
            .map_err(|e| RevoiceError::Conversion(format!("response read: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }
}
