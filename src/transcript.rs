//! Speech transcript sources
//!
//! A source hands out subscriptions: streams of transcript fragments that
//! may end at any time. The orchestrator re-subscribes whenever a stream
//! ends, so sources do not need to restart themselves.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::voice::{GestureSignal, TranscriptFragment};
use crate::{Error, Result};

/// Error reported by the recognizer inside a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// The user or platform denied access to the microphone
    PermissionDenied(String),
    /// Nothing was said before the recognizer gave up
    NoSpeech,
    /// The recognizer stopped on its own
    Aborted,
    /// Any other recoverable failure
    Other(String),
}

impl RecognitionError {
    /// Map a recognizer error code to an error
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" | "service-not-allowed" | "permission-denied" => {
                Self::PermissionDenied(code.to_string())
            }
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Check if recognition can simply be restarted
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::PermissionDenied(_))
    }
}

/// Stream of fragments for one subscription
pub type TranscriptStream =
    Pin<Box<dyn Stream<Item = std::result::Result<TranscriptFragment, RecognitionError>> + Send>>;

/// Delivers live transcripts
#[async_trait]
pub trait TranscriptSource: Send {
    /// Start recognizing and return the fragment stream
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot be started
    async fn subscribe(&mut self) -> Result<TranscriptStream>;
}

/// One line of recognizer output
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecognizerLine {
    Fragment {
        text: String,
        #[serde(default, alias = "is_final", rename = "final")]
        is_final: bool,
    },
    Failure {
        error: String,
    },
}

/// Parse one JSON line from a recognizer process
///
/// Returns `None` for lines that are neither fragments nor errors.
#[must_use]
pub fn parse_recognizer_line(
    line: &str,
) -> Option<std::result::Result<TranscriptFragment, RecognitionError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<RecognizerLine>(line) {
        Ok(RecognizerLine::Fragment { text, is_final }) => Some(Ok(if is_final {
            TranscriptFragment::final_text(text)
        } else {
            TranscriptFragment::interim(text)
        })),
        Ok(RecognizerLine::Failure { error }) => Some(Err(RecognitionError::from_code(&error))),
        Err(e) => {
            tracing::trace!(error = %e, line, "skipping unparsable recognizer line");
            None
        }
    }
}

/// Runs an external streaming recognizer that prints JSON lines
///
/// Each line is `{"text": "...", "final": bool}` or `{"error": "code"}`.
/// The process is killed when its stream is dropped.
pub struct CommandTranscriptSource {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriptSource {
    /// Create a source from a command line
    ///
    /// # Errors
    ///
    /// Returns error if the command is empty
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("recognizer command is empty".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl TranscriptSource for CommandTranscriptSource {
    async fn subscribe(&mut self) -> Result<TranscriptStream> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    Error::Permission(format!("cannot run {}: {e}", self.program))
                } else {
                    Error::Recognition(format!("failed to start {}: {e}", self.program))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Recognition("recognizer stdout unavailable".to_string()))?;

        tracing::debug!(recognizer = %self.program, "recognizer started");

        let lines = BufReader::new(stdout).lines();
        let stream = futures::stream::unfold((child, lines), |(child, mut lines)| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(item) = parse_recognizer_line(&line) {
                            return Some((item, (child, lines)));
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("recognizer output ended");
                        return None;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "recognizer read failed");
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Treats each typed line on stdin as a final fragment
///
/// Typing counts as a user gesture.
pub struct StdinTranscriptSource {
    gesture: GestureSignal,
}

impl StdinTranscriptSource {
    /// Create a stdin source that reports typing to `gesture`
    #[must_use]
    pub const fn new(gesture: GestureSignal) -> Self {
        Self { gesture }
    }
}

#[async_trait]
impl TranscriptSource for StdinTranscriptSource {
    async fn subscribe(&mut self) -> Result<TranscriptStream> {
        let lines = BufReader::new(tokio::io::stdin()).lines();
        let gesture = self.gesture.clone();

        let stream = futures::stream::unfold(lines, move |mut lines| {
            let gesture = gesture.clone();
            async move {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        gesture.gesture();
                        Some((Ok(TranscriptFragment::final_text(line)), lines))
                    }
                    Ok(None) | Err(_) => None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment_lines() {
        let interim = parse_recognizer_line(r#"{"text": "hey incl"}"#).unwrap().unwrap();
        assert_eq!(interim.text, "hey incl");
        assert!(!interim.is_final);

        let done = parse_recognizer_line(r#"{"text": "hey inclusive", "final": true}"#)
            .unwrap()
            .unwrap();
        assert!(done.is_final);

        let alias = parse_recognizer_line(r#"{"text": "x", "is_final": true}"#)
            .unwrap()
            .unwrap();
        assert!(alias.is_final);
    }

    #[test]
    fn test_parse_error_lines() {
        assert_eq!(
            parse_recognizer_line(r#"{"error": "no-speech"}"#).unwrap(),
            Err(RecognitionError::NoSpeech)
        );
        let denied = parse_recognizer_line(r#"{"error": "not-allowed"}"#)
            .unwrap()
            .unwrap_err();
        assert!(!denied.is_transient());
        assert!(RecognitionError::Aborted.is_transient());
    }

    #[test]
    fn test_parse_skips_noise() {
        assert!(parse_recognizer_line("").is_none());
        assert!(parse_recognizer_line("loading model...").is_none());
        assert!(parse_recognizer_line(r#"{"status": "ready"}"#).is_none());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandTranscriptSource::new(&[]).is_err());
    }
}
