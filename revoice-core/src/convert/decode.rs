//! Incremental decoding of response chunks to normalized f32 samples.
//!
//! PCM decodes inline with a one-byte carry, since chunk boundaries from the
//! HTTP stream can split a 16-bit sample. MP3 is handed to `minimp3` running
//! on its own decoder thread, fed through a crossbeam channel that
//! implements `Read`; this keeps the frame-structured decoder streaming
//! without re-parsing from the start on every chunk.

use std::io::Read;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::convert::OutputEncoding;
use crate::error::{Result, RevoiceError};

/// Stateful chunk-at-a-time decoder. `decode` may return fewer samples than
/// the chunk implies (data buffered internally); `finish` flushes the rest.
pub trait ChunkDecoder: Send {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<f32>>;
    fn finish(&mut self) -> Result<Vec<f32>>;
}

/// Build the decoder matching a response encoding.
pub fn decoder_for(encoding: OutputEncoding) -> Result<Box<dyn ChunkDecoder>> {
    Ok(match encoding {
        OutputEncoding::Pcm16 { .. } => Box::new(Pcm16Decoder::new()),
        OutputEncoding::Mp3 { .. } => Box::new(Mp3Decoder::spawn()?),
    })
}

// ---------------------------------------------------------------------------
// Raw PCM (s16le)
// ---------------------------------------------------------------------------

/// Decodes signed 16-bit little-endian PCM, carrying a split byte across
/// chunk boundaries.
pub struct Pcm16Decoder {
    carry: Option<u8>,
}

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self { carry: None }
    }
}

impl Default for Pcm16Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder for Pcm16Decoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<f32>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        let mut samples = Vec::with_capacity(chunk.len() / 2 + 1);
        let mut rest = chunk;

        if let Some(lo) = self.carry.take() {
            let hi = rest[0];
            rest = &rest[1..];
            samples.push(i16::from_le_bytes([lo, hi]) as f32 / 32768.0);
        }

        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            samples.push(i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0);
        }
        if let [lo] = pairs.remainder() {
            self.carry = Some(*lo);
        }

        Ok(samples)
    }

    fn finish(&mut self) -> Result<Vec<f32>> {
        if self.carry.take().is_some() {
            warn!("PCM response ended on a half sample, dropping trailing byte");
        }
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// MP3 via minimp3 on a decoder thread
// ---------------------------------------------------------------------------

/// `Read` adapter over a channel of byte chunks. Blocks on `recv` until data
/// arrives; a disconnected channel reads as EOF.
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                // Sender dropped: stream is over.
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Streaming MP3 decoder. Bytes go in per chunk; decoded mono samples come
/// back as soon as whole MP3 frames are available.
pub struct Mp3Decoder {
    bytes_tx: Option<Sender<Vec<u8>>>,
    samples_rx: Receiver<Vec<f32>>,
    worker: Option<JoinHandle<()>>,
}

impl Mp3Decoder {
    pub fn spawn() -> Result<Self> {
        let (bytes_tx, bytes_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let (samples_tx, samples_rx) = crossbeam_channel::unbounded::<Vec<f32>>();

        let worker = std::thread::Builder::new()
            .name("revoice-mp3-decode".into())
            .spawn(move || {
                let reader = ChannelReader {
                    rx: bytes_rx,
                    buf: Vec::new(),
                    pos: 0,
                };
                let mut decoder = minimp3::Decoder::new(reader);
                loop {
                    match decoder.next_frame() {
                        Ok(frame) => {
                            let mono = downmix_i16(&frame.data, frame.channels);
                            if samples_tx.send(mono).is_err() {
                                // Consumer gone, stop decoding.
                                break;
                            }
                        }
                        Err(minimp3::Error::Eof) => break,
                        Err(e) => {
                            warn!("MP3 decode error, ending stream: {e}");
                            break;
                        }
                    }
                }
                debug!("MP3 decoder thread finished");
            })
            .map_err(RevoiceError::Io)?;

        Ok(Self {
            bytes_tx: Some(bytes_tx),
            samples_rx,
            worker: Some(worker),
        })
    }

    fn drain_ready(&self, out: &mut Vec<f32>) {
        loop {
            match self.samples_rx.try_recv() {
                Ok(samples) => out.extend(samples),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl ChunkDecoder for Mp3Decoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<f32>> {
        if let Some(tx) = &self.bytes_tx {
            tx.send(chunk.to_vec()).map_err(|_| {
                RevoiceError::Conversion("MP3 decoder thread exited early".into())
            })?;
        }
        let mut out = Vec::new();
        self.drain_ready(&mut out);
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<f32>> {
        // Closing the byte channel is the decoder's EOF.
        self.bytes_tx = None;

        let mut out = Vec::new();
        // Blocking drain: the worker exits once it hits EOF.
        while let Ok(samples) = self.samples_rx.recv() {
            out.extend(samples);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(out)
    }
}

impl Drop for Mp3Decoder {
    fn drop(&mut self) {
        self.bytes_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn downmix_i16(data: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.iter().map(|&s| s as f32 / 32768.0).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| s as f32 / 32768.0).sum();
            sum / frame.len() as f32
        })
        .collect()
}
