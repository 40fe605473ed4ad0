//! Reply playback
//!
//! Two tiers: a primary media output that loads the reply into a handle with
//! its own transport controls and tries to autoplay, and a best-effort direct
//! output that decodes the payload and plays it straight to the speakers.
//! The direct tier only runs when the primary handle is still paused after a
//! grace delay and the user has unlocked audio output with a gesture.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::gesture::GestureSignal;
use crate::{Error, Result};

/// Encoded reply audio as received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyAudio {
    /// Encoded audio
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub content_type: String,
}

/// PCM ready for direct output
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

/// Playback state of a loaded media handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    /// Audio is being played
    Playing,
    /// Loaded but not playing (autoplay blocked or failed)
    Paused,
    /// Played to the end
    Ended,
}

/// Primary output: loads a reply into a playable handle
pub trait MediaOutput {
    /// Load `audio` into a new handle without starting it
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be staged
    fn load(&mut self, audio: &ReplyAudio) -> Result<Box<dyn MediaHandle>>;
}

/// A loaded reply with transport controls
#[async_trait(?Send)]
pub trait MediaHandle {
    /// Attempt to start playback without user interaction
    ///
    /// # Errors
    ///
    /// Returns error if autoplay is blocked or the output refused to start
    fn autoplay(&mut self) -> Result<()>;

    /// Current playback state
    fn state(&mut self) -> MediaState;

    /// Expose transport controls so the user can start playback manually
    fn show_controls(&mut self);

    /// Resolve when playback reaches its natural end
    async fn ended(&mut self);

    /// Free everything the handle holds
    fn release(&mut self);
}

/// Fallback output: plays decoded PCM directly
#[async_trait(?Send)]
pub trait DirectOutput {
    /// Play `audio` to completion
    ///
    /// # Errors
    ///
    /// Returns error if no output stream can be opened
    async fn play(&mut self, audio: DecodedAudio) -> Result<()>;
}

/// Owns the single active media handle and releases it exactly once
pub struct PlaybackHandle {
    media: Box<dyn MediaHandle>,
    released: bool,
}

impl PlaybackHandle {
    fn new(media: Box<dyn MediaHandle>) -> Self {
        Self {
            media,
            released: false,
        }
    }

    /// Release the underlying resource (no-op after the first call)
    pub fn release(&mut self) {
        if !self.released {
            self.media.release();
            self.released = true;
            tracing::trace!("playback handle released");
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of a playback request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Primary output played to the end
    Completed,
    /// Primary output stayed paused, the direct output played the reply
    CompletedWithFallback,
    /// Autoplay blocked; the reply is loaded with controls for manual play
    AwaitingManualPlay(String),
    /// Nothing could be played
    Failed(String),
}

impl PlaybackOutcome {
    /// Whether the reply was heard without user action
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithFallback)
    }
}

/// Playback timing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Delay before checking whether the primary output is still paused
    pub grace_delay: Duration,
    /// Upper bound on waiting for the primary output to finish
    pub max_duration: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_millis(400),
            max_duration: Duration::from_secs(120),
        }
    }
}

/// Two-tier playback strategy with single-resource discipline
pub struct PlaybackController {
    primary: Box<dyn MediaOutput>,
    fallback: Option<Box<dyn DirectOutput>>,
    gesture: GestureSignal,
    config: PlaybackConfig,
    active: Option<PlaybackHandle>,
}

impl PlaybackController {
    /// Create a controller
    #[must_use]
    pub fn new(
        primary: Box<dyn MediaOutput>,
        fallback: Option<Box<dyn DirectOutput>>,
        gesture: GestureSignal,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            gesture,
            config,
            active: None,
        }
    }

    /// Check if a reply is still loaded (e.g. waiting for manual play)
    #[must_use]
    pub const fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Release the active handle, if any
    pub fn release_active(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.release();
        }
    }

    /// Play a reply, superseding anything still loaded
    pub async fn play(&mut self, audio: &ReplyAudio) -> PlaybackOutcome {
        self.release_active();

        if audio.bytes.is_empty() {
            tracing::warn!("reply audio is empty");
            return PlaybackOutcome::Failed("Received empty audio from server".to_string());
        }

        let mut handle = match self.primary.load(audio) {
            Ok(media) => PlaybackHandle::new(media),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load reply audio");
                return PlaybackOutcome::Failed(e.to_string());
            }
        };

        tracing::debug!(
            bytes = audio.bytes.len(),
            content_type = %audio.content_type,
            "reply loaded"
        );

        let autoplay = handle.media.autoplay();
        if let Err(e) = &autoplay {
            // Soft error: the reply stays available for manual play
            tracing::warn!(error = %e, "autoplay blocked");
            handle.media.show_controls();
        }

        tokio::time::sleep(self.config.grace_delay).await;

        match handle.media.state() {
            MediaState::Ended => {
                handle.release();
                PlaybackOutcome::Completed
            }
            MediaState::Playing => self.await_end(handle).await,
            MediaState::Paused => {
                if self.try_fallback(audio).await {
                    handle.release();
                    return PlaybackOutcome::CompletedWithFallback;
                }

                if autoplay.is_ok() {
                    handle.media.show_controls();
                }
                self.active = Some(handle);
                PlaybackOutcome::AwaitingManualPlay(
                    "Audio playback blocked; the reply is ready to play manually".to_string(),
                )
            }
        }
    }

    async fn await_end(&mut self, mut handle: PlaybackHandle) -> PlaybackOutcome {
        let finished = tokio::time::timeout(self.config.max_duration, handle.media.ended()).await;
        handle.release();

        if finished.is_ok() {
            tracing::debug!("playback complete");
            PlaybackOutcome::Completed
        } else {
            tracing::warn!(
                limit_secs = self.config.max_duration.as_secs(),
                "playback did not finish in time"
            );
            PlaybackOutcome::Failed("playback timed out".to_string())
        }
    }

    /// Best effort: failures are logged and reported as `false`
    async fn try_fallback(&mut self, audio: &ReplyAudio) -> bool {
        if !self.gesture.is_unlocked() {
            tracing::debug!("direct output not unlocked, skipping fallback");
            return false;
        }
        let Some(fallback) = self.fallback.as_mut() else {
            return false;
        };

        let decoded = match decode(&audio.bytes, &audio.content_type) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(error = %e, "fallback decode failed");
                return false;
            }
        };

        match fallback.play(decoded).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "fallback playback failed");
                false
            }
        }
    }
}

/// Decode a reply payload into PCM
///
/// # Errors
///
/// Returns error if the content type is unsupported or the payload is corrupt
pub fn decode(bytes: &[u8], content_type: &str) -> Result<DecodedAudio> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => decode_mp3(bytes),
        "audio/wav" | "audio/wave" | "audio/x-wav" => decode_wav(bytes),
        other => Err(Error::Playback(format!("unsupported audio type: {other}"))),
    }
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut format = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let frame_format = (frame.sample_rate as u32, frame.channels as u16);
                format.get_or_insert(frame_format);
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    let (sample_rate, channels) =
        format.ok_or_else(|| Error::Playback("MP3 payload has no frames".to_string()))?;

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode WAV bytes to f32 samples
fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Playback(e.to_string()))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect()
        }
    }
    .map_err(|e| Error::Playback(e.to_string()))?;

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// File extension for a staged payload
fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/webm" => "webm",
        _ => "bin",
    }
}

/// Primary output backed by an external media player process
///
/// The reply is staged in a temporary file; the player's own window or
/// terminal UI provides the transport controls.
pub struct PlayerProcess {
    program: String,
    args: Vec<String>,
}

impl PlayerProcess {
    /// Create a player from a command line such as `["mpv", "--no-video"]`
    ///
    /// # Errors
    ///
    /// Returns error if the command is empty
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("player command is empty".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Check if the player program can be found on `PATH`
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

impl MediaOutput for PlayerProcess {
    fn load(&mut self, audio: &ReplyAudio) -> Result<Box<dyn MediaHandle>> {
        let mut file = tempfile::Builder::new()
            .prefix("handsfree-reply-")
            .suffix(&format!(".{}", extension_for(&audio.content_type)))
            .tempfile()?;
        file.write_all(&audio.bytes)?;
        file.flush()?;

        Ok(Box::new(PlayerHandle {
            program: self.program.clone(),
            args: self.args.clone(),
            file: Some(file),
            child: None,
            exited: None,
        }))
    }
}

/// One staged reply and the player process playing it
struct PlayerHandle {
    program: String,
    args: Vec<String>,
    file: Option<tempfile::NamedTempFile>,
    child: Option<tokio::process::Child>,
    exited: Option<bool>,
}

impl PlayerHandle {
    fn path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|f| f.path().to_path_buf())
    }
}

#[async_trait(?Send)]
impl MediaHandle for PlayerHandle {
    fn autoplay(&mut self) -> Result<()> {
        let path = self
            .path()
            .ok_or_else(|| Error::Playback("reply already released".to_string()))?;

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Playback(format!("failed to start {}: {e}", self.program)))?;

        tracing::debug!(player = %self.program, path = %path.display(), "player started");
        self.child = Some(child);
        Ok(())
    }

    fn state(&mut self) -> MediaState {
        if let Some(success) = self.exited {
            return if success { MediaState::Ended } else { MediaState::Paused };
        }
        let Some(child) = self.child.as_mut() else {
            return MediaState::Paused;
        };

        match child.try_wait() {
            Ok(None) => MediaState::Playing,
            Ok(Some(status)) => {
                self.exited = Some(status.success());
                if status.success() {
                    MediaState::Ended
                } else {
                    tracing::debug!(%status, "player exited with failure");
                    MediaState::Paused
                }
            }
            Err(_) => MediaState::Paused,
        }
    }

    fn show_controls(&mut self) {
        if let Some(path) = self.path() {
            tracing::info!(path = %path.display(), "reply ready to play");
        }
    }

    async fn ended(&mut self) {
        if let Some(child) = self.child.as_mut()
            && let Ok(status) = child.wait().await
        {
            self.exited = Some(status.success());
        }
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        self.file.take();
    }
}

/// Direct output to the default speaker
#[derive(Debug, Default)]
pub struct Speaker;

impl Speaker {
    /// Create a speaker output
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl DirectOutput for Speaker {
    async fn play(&mut self, audio: DecodedAudio) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let channels = audio.channels.max(1);
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(audio.sample_rate)
                    && c.max_sample_rate() >= SampleRate(audio.sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;
        let config: StreamConfig = supported
            .with_sample_rate(SampleRate(audio.sample_rate))
            .config();

        let total = audio.samples.len();
        let samples = Arc::new(audio.samples);
        let position = Arc::new(Mutex::new(0usize));
        let reader = Arc::clone(&samples);
        let cursor = Arc::clone(&position);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut pos) = cursor.lock() else {
                        return;
                    };
                    for out in data.iter_mut() {
                        *out = reader.get(*pos).copied().unwrap_or(0.0);
                        if *pos < reader.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let frames = total / usize::from(channels);
        let duration_ms = (frames as u64 * 1000) / u64::from(audio.sample_rate.max(1));
        let deadline = tokio::time::Instant::now() + Duration::from_millis(duration_ms + 500);

        loop {
            let done = position.lock().map_or(true, |pos| *pos >= total);
            if done || tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Small delay to let the device drain
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(stream);
        tracing::debug!(samples = total, "direct playback complete");

        Ok(())
    }
}
