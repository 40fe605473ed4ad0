//! Conversation history
//!
//! Turns are only ever appended. An optional JSONL file mirrors the log so a
//! session can be read back later.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Greeting appended when a session starts
#[must_use]
pub fn greeting(phrase: &str) -> String {
    format!("Say \"{phrase}\" to start a conversation.")
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped now
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Append-only conversation log
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
    path: Option<PathBuf>,
}

impl ConversationLog {
    /// Create an in-memory log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that is also appended to `path`
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            turns: Vec::new(),
            path: Some(path.into()),
        }
    }

    /// Append a turn
    ///
    /// A failed file write is logged; the in-memory log is still updated.
    pub fn push(&mut self, turn: ConversationTurn) {
        if let Some(path) = &self.path
            && let Err(e) = append_line(path, &turn)
        {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "failed to persist conversation turn"
            );
        }
        self.turns.push(turn);
    }

    /// All turns, oldest first
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if no turns were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }
}

fn append_line(path: &Path, turn: &ConversationTurn) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(turn)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Read a conversation file written by [`ConversationLog::with_file`]
///
/// Lines that fail to parse are skipped.
///
/// # Errors
///
/// Returns error if the file cannot be read
pub fn read_log(path: &Path) -> Result<Vec<ConversationTurn>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(turn) => Some(turn),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed conversation line");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_appends_in_order() {
        let mut log = ConversationLog::new();
        assert!(log.is_empty());

        log.push(ConversationTurn::new(Role::User, "what time is it"));
        log.push(ConversationTurn::new(Role::Assistant, "It is noon"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.turns()[0].role, Role::User);
        assert_eq!(log.last().map(|t| t.text.as_str()), Some("It is noon"));
    }

    #[test]
    fn test_file_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversation.jsonl");

        let mut log = ConversationLog::with_file(&path);
        log.push(ConversationTurn::new(Role::System, greeting("Hey Inclusive")));
        log.push(ConversationTurn::new(Role::User, "hello"));

        let restored = read_log(&path).unwrap();
        assert_eq!(restored, log.turns());
    }

    #[test]
    fn test_unwritable_file_keeps_memory_log() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let mut log = ConversationLog::with_file(dir.path());
        log.push(ConversationTurn::new(Role::User, "hello"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_greeting_names_phrase() {
        assert_eq!(
            greeting("Hey Inclusive"),
            "Say \"Hey Inclusive\" to start a conversation."
        );
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
