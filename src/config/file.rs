//! TOML configuration file loading
//!
//! Supports `~/.config/handsfree/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HandsfreeConfigFile {
    /// Trigger phrase settings
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// End-of-utterance detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Capture duration bounds
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Reply playback
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Assistant endpoint
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Streaming speech recognizer
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    /// JSONL file mirroring the conversation
    pub conversation_log: Option<String>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Trigger phrase (e.g. "Hey Inclusive")
    pub phrase: Option<String>,

    /// Edit distance tolerance; scales with phrase length when unset
    pub max_edit_distance: Option<usize>,
}

/// Voice activity detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub poll_interval_ms: Option<u64>,
    pub silence_threshold_rms: Option<f32>,
    pub required_silence_ms: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    /// Recordings smaller than this are rejected as too short
    pub min_bytes: Option<usize>,
    /// Samples handed to the activity monitor per poll
    pub analysis_frame: Option<usize>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// Player command (e.g. `["mpv", "--no-video"]`)
    pub player: Option<Vec<String>>,
    pub grace_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    /// Treat direct output as unlocked from the start
    pub unlocked: Option<bool>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Full-interaction endpoint URL
    pub endpoint: Option<String>,
    /// Multipart field carrying the recording
    pub upload_field: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Recognizer configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    /// Recognizer command printing JSON lines
    pub command: Option<Vec<String>>,
    pub resubscribe_delay_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HandsfreeConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> HandsfreeConfigFile {
    let Some(path) = config_file_path() else {
        return HandsfreeConfigFile::default();
    };

    if !path.exists() {
        return HandsfreeConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config_file(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            HandsfreeConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HandsfreeConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config_file(content: &str) -> crate::Result<HandsfreeConfigFile> {
    let config = toml::from_str(content)?;
    tracing::info!("loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/handsfree/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("handsfree").join("config.toml"))
}
