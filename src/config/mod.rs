//! Configuration management for the handsfree controller

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::session::CaptureConfig;
use crate::voice::{ANALYSIS_FRAME, PlaybackConfig, VadConfig, WakeWordConfig};
use crate::{Error, Result};

use self::file::HandsfreeConfigFile;

/// Default trigger phrase
pub const DEFAULT_PHRASE: &str = "Hey Inclusive";

/// Default full-interaction endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/full-interaction";

/// Players tried in order when none is configured
const PLAYER_CANDIDATES: &[&[&str]] = &[
    &["mpv", "--no-video", "--really-quiet"],
    &["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"],
    &["afplay"],
    &["paplay"],
];

/// Handsfree controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Trigger phrase
    pub wake_phrase: String,

    /// Explicit wake word tolerance; scales with the phrase when `None`
    pub max_edit_distance: Option<usize>,

    /// End-of-utterance detection
    pub vad: VadConfig,

    /// Capture duration bounds
    pub capture: CaptureConfig,

    /// Samples per activity monitor frame
    pub analysis_frame: usize,

    /// Reply playback
    pub playback: PlaybackSettings,

    /// Assistant endpoint
    pub server: ServerConfig,

    /// Streaming recognizer
    pub recognizer: RecognizerConfig,

    /// JSONL file mirroring the conversation
    pub conversation_log: Option<PathBuf>,
}

/// Playback settings
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// External player command for the primary tier
    pub player: Vec<String>,

    /// Grace delay and wait bound
    pub timing: PlaybackConfig,

    /// Start with the direct-output fallback unlocked
    pub unlocked: bool,
}

/// Assistant endpoint settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Full-interaction URL
    pub endpoint: String,

    /// Multipart field carrying the recording
    pub upload_field: String,

    /// Request timeout
    pub timeout: Duration,
}

/// Recognizer settings
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Command printing JSON transcript lines; empty means typed input
    pub command: Vec<String>,

    /// Pause before subscribing again after a stream ends
    pub resubscribe_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(HandsfreeConfigFile::default(), |_| None)
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment lookups
    #[must_use]
    pub fn from_sources(fc: HandsfreeConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults_vad = VadConfig::default();
        let defaults_capture = CaptureConfig::default();
        let defaults_playback = PlaybackConfig::default();

        let vad = VadConfig {
            poll_interval: fc
                .vad
                .poll_interval_ms
                .map_or(defaults_vad.poll_interval, Duration::from_millis),
            silence_threshold_rms: fc
                .vad
                .silence_threshold_rms
                .unwrap_or(defaults_vad.silence_threshold_rms),
            required_silence: fc
                .vad
                .required_silence_ms
                .map_or(defaults_vad.required_silence, Duration::from_millis),
        };

        let capture = CaptureConfig {
            min_duration: fc
                .capture
                .min_duration_ms
                .map_or(defaults_capture.min_duration, Duration::from_millis),
            max_duration: fc
                .capture
                .max_duration_ms
                .map_or(defaults_capture.max_duration, Duration::from_millis),
            min_bytes: fc.capture.min_bytes.unwrap_or(defaults_capture.min_bytes),
        };

        let playback = PlaybackSettings {
            player: env("HANDSFREE_PLAYER")
                .map(|s| split_command(&s))
                .or(fc.playback.player)
                .unwrap_or_else(default_player),
            timing: PlaybackConfig {
                grace_delay: fc
                    .playback
                    .grace_ms
                    .map_or(defaults_playback.grace_delay, Duration::from_millis),
                max_duration: fc
                    .playback
                    .max_duration_ms
                    .map_or(defaults_playback.max_duration, Duration::from_millis),
            },
            unlocked: fc.playback.unlocked.unwrap_or(false),
        };

        let server = ServerConfig {
            endpoint: env("HANDSFREE_ENDPOINT")
                .or(fc.server.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            upload_field: fc
                .server
                .upload_field
                .unwrap_or_else(|| "audio_file".to_string()),
            timeout: Duration::from_secs(fc.server.timeout_secs.unwrap_or(60)),
        };

        let recognizer = RecognizerConfig {
            command: env("HANDSFREE_RECOGNIZER")
                .map(|s| split_command(&s))
                .or(fc.recognizer.command)
                .unwrap_or_default(),
            resubscribe_delay: Duration::from_millis(
                fc.recognizer.resubscribe_delay_ms.unwrap_or(250),
            ),
        };

        Self {
            wake_phrase: env("HANDSFREE_WAKE_PHRASE")
                .or(fc.wake_word.phrase)
                .unwrap_or_else(|| DEFAULT_PHRASE.to_string()),
            max_edit_distance: fc.wake_word.max_edit_distance,
            vad,
            capture,
            analysis_frame: fc.capture.analysis_frame.unwrap_or(ANALYSIS_FRAME),
            playback,
            server,
            recognizer,
            conversation_log: env("HANDSFREE_CONVERSATION_LOG")
                .or(fc.conversation_log)
                .map(PathBuf::from),
        }
    }

    /// Check the configuration for values the controller cannot run with
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        self.wake_word()?;

        if self.vad.poll_interval.is_zero() {
            return Err(Error::Config("vad.poll_interval_ms must be positive".to_string()));
        }
        if self.vad.silence_threshold_rms.is_nan() || self.vad.silence_threshold_rms <= 0.0 {
            return Err(Error::Config(
                "vad.silence_threshold_rms must be positive".to_string(),
            ));
        }
        if self.vad.required_silence.is_zero() {
            return Err(Error::Config(
                "vad.required_silence_ms must be positive".to_string(),
            ));
        }
        if self.capture.max_duration <= self.capture.min_duration {
            return Err(Error::Config(format!(
                "capture.max_duration_ms ({}) must exceed capture.min_duration_ms ({})",
                self.capture.max_duration.as_millis(),
                self.capture.min_duration.as_millis()
            )));
        }
        if self.analysis_frame == 0 {
            return Err(Error::Config("capture.analysis_frame must be positive".to_string()));
        }
        if self.playback.player.is_empty() {
            return Err(Error::Config("playback.player is empty".to_string()));
        }

        let endpoint = url::Url::parse(&self.server.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.server.endpoint)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }

        Ok(())
    }

    /// Build the wake word matcher settings
    ///
    /// # Errors
    ///
    /// Returns error if the phrase contains no letters
    pub fn wake_word(&self) -> Result<WakeWordConfig> {
        match self.max_edit_distance {
            Some(distance) => WakeWordConfig::with_max_edit_distance(&self.wake_phrase, distance),
            None => WakeWordConfig::new(&self.wake_phrase),
        }
    }
}

/// Split a command line on whitespace
fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(ToString::to_string).collect()
}

/// First known player found on `PATH`, or mpv
fn default_player() -> Vec<String> {
    let found = PLAYER_CANDIDATES
        .iter()
        .find(|candidate| candidate.first().is_some_and(|p| which::which(p).is_ok()))
        .unwrap_or(&PLAYER_CANDIDATES[0]);

    found.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::file::parse_config_file;
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn defaults() -> Config {
        Config::from_sources(HandsfreeConfigFile::default(), no_env)
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(HandsfreeConfigFile::default(), no_env);

        assert_eq!(config.wake_phrase, DEFAULT_PHRASE);
        assert_eq!(config.server.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.server.upload_field, "audio_file");
        assert_eq!(config.vad, VadConfig::default());
        assert_eq!(config.capture, CaptureConfig::default());
        assert_eq!(config.recognizer.resubscribe_delay, Duration::from_millis(250));
        assert!(config.recognizer.command.is_empty());
        assert!(!config.playback.player.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = parse_config_file(
            r#"
            [wake_word]
            phrase = "Hey Computer"

            [server]
            endpoint = "http://assistant.local/full-interaction"

            [capture]
            max_duration_ms = 8000
            "#,
        )
        .unwrap();

        let config = Config::from_sources(fc, |key| match key {
            "HANDSFREE_WAKE_PHRASE" => Some("Okay Helper".to_string()),
            "HANDSFREE_RECOGNIZER" => Some("recognize --stream".to_string()),
            _ => None,
        });

        assert_eq!(config.wake_phrase, "Okay Helper");
        assert_eq!(config.server.endpoint, "http://assistant.local/full-interaction");
        assert_eq!(config.capture.max_duration, Duration::from_secs(8));
        assert_eq!(config.recognizer.command, vec!["recognize", "--stream"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = defaults();
        config.wake_phrase = "123".to_string();
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.capture.max_duration = config.capture.min_duration;
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.vad.silence_threshold_rms = 0.0;
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.server.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.server.endpoint = "ftp://example.com/x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_tolerance() {
        let mut config = defaults();
        assert_eq!(config.wake_word().unwrap().max_edit_distance(), 4);

        config.max_edit_distance = Some(1);
        assert_eq!(config.wake_word().unwrap().max_edit_distance(), 1);
    }
}
