//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::vad::AudioAnalyser;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples handed to the activity monitor per poll (matches a 2048-point analyser)
pub const ANALYSIS_FRAME: usize = 2048;

/// A finalized single-turn recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    /// Encoded audio
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub content_type: String,
}

impl CapturedAudio {
    /// Size of the encoded payload
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the payload is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Opens live microphone recordings
pub trait AudioSource {
    /// Acquire the microphone and start recording
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or access is denied
    fn open(&mut self) -> Result<Box<dyn Recording>>;
}

/// A live recording accumulating audio chunks
///
/// Dropping a recording without calling [`finish`](Self::finish) releases
/// the stream and discards the audio.
pub trait Recording {
    /// Analysis view over the most recent audio, for the activity monitor
    fn analyser(&self) -> Box<dyn AudioAnalyser>;

    /// Stop recording, release the stream and assemble the chunks
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be encoded
    fn finish(self: Box<Self>) -> Result<CapturedAudio>;
}

/// Chunks written by the stream callback
#[derive(Debug, Default)]
struct ChunkBuffer {
    chunks: Vec<Vec<f32>>,
}

impl ChunkBuffer {
    /// Copy out the last `len` samples across chunk boundaries
    fn tail(&self, len: usize) -> Vec<f32> {
        let mut frame = Vec::with_capacity(len);
        for chunk in self.chunks.iter().rev() {
            let needed = len - frame.len();
            if needed == 0 {
                break;
            }
            let start = chunk.len().saturating_sub(needed);
            // collected newest-first, reversed below
            frame.extend(chunk[start..].iter().rev());
        }
        frame.reverse();
        frame
    }
}

/// Captures audio from the default input device
pub struct Microphone {
    frame_len: usize,
}

impl Microphone {
    /// Create a microphone source
    #[must_use]
    pub const fn new(frame_len: usize) -> Self {
        Self { frame_len }
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new(ANALYSIS_FRAME)
    }
}

impl AudioSource for Microphone {
    fn open(&mut self) -> Result<Box<dyn Recording>> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

        // Fall back to whatever the device prefers and downmix
        let supported = match preferred {
            Some(c) => c,
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?,
        };
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels.max(1));

        let buffer = Arc::new(Mutex::new(ChunkBuffer::default()));
        let writer = Arc::clone(&buffer);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let chunk: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        downmix(data, channels)
                    };
                    if let Ok(mut buf) = writer.lock() {
                        buf.chunks.push(chunk);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    Error::Permission("input device not available".to_string())
                }
                other => Error::Audio(other.to_string()),
            })?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture started"
        );

        Ok(Box::new(MicRecording {
            stream: Some(stream),
            buffer,
            sample_rate: config.sample_rate.0,
            frame_len: self.frame_len,
        }))
    }
}

/// Live cpal recording
struct MicRecording {
    stream: Option<Stream>,
    buffer: Arc<Mutex<ChunkBuffer>>,
    sample_rate: u32,
    frame_len: usize,
}

impl MicRecording {
    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Recording for MicRecording {
    fn analyser(&self) -> Box<dyn AudioAnalyser> {
        Box::new(TailAnalyser {
            buffer: Arc::clone(&self.buffer),
            frame_len: self.frame_len,
        })
    }

    fn finish(mut self: Box<Self>) -> Result<CapturedAudio> {
        self.release();

        let chunks = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut buf.chunks))
            .unwrap_or_default();
        let samples: Vec<f32> = chunks.into_iter().flatten().collect();

        tracing::debug!(samples = samples.len(), "recording assembled");

        Ok(CapturedAudio {
            bytes: samples_to_wav(&samples, self.sample_rate)?,
            content_type: "audio/wav".to_string(),
        })
    }
}

impl Drop for MicRecording {
    fn drop(&mut self) {
        self.release();
    }
}

/// Reads the newest samples out of a live recording
struct TailAnalyser {
    buffer: Arc<Mutex<ChunkBuffer>>,
    frame_len: usize,
}

impl AudioAnalyser for TailAnalyser {
    fn latest_frame(&mut self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.tail(self.frame_len))
            .unwrap_or_default()
    }
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
