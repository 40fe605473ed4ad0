//! Wake word detection
//!
//! Spots the trigger phrase in a live transcript stream. Matching is fuzzy:
//! recognizers mangle short phrases, insert filler words and split tokens,
//! so a fragment triggers on an in-order token match, a prefix match, or a
//! small edit distance.

use chrono::{DateTime, Utc};

use super::signal::{levenshtein, normalize, normalized_tokens};
use crate::{Error, Result};

/// One incremental piece of recognized text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    /// Recognized text so far for the current utterance
    pub text: String,
    /// Whether the recognizer considers this text settled
    pub is_final: bool,
    /// When the fragment was received
    pub timestamp: DateTime<Utc>,
}

impl TranscriptFragment {
    /// Create an interim fragment stamped now
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a final fragment stamped now
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            timestamp: Utc::now(),
        }
    }
}

/// Trigger phrase and its matching tolerance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWordConfig {
    phrase: String,
    normalized: String,
    tokens: Vec<String>,
    max_edit_distance: usize,
}

impl WakeWordConfig {
    /// Create a config whose tolerance scales with the phrase length
    ///
    /// One edit is allowed per three normalized characters, at least one.
    ///
    /// # Errors
    ///
    /// Returns error if the phrase contains no letters
    pub fn new(phrase: impl Into<String>) -> Result<Self> {
        let phrase = phrase.into();
        let normalized = normalize(&phrase);
        let tolerance = (normalized.chars().count() / 3).max(1);
        Self::with_max_edit_distance(phrase, tolerance)
    }

    /// Create a config with an explicit tolerance
    ///
    /// # Errors
    ///
    /// Returns error if the phrase contains no letters
    pub fn with_max_edit_distance(
        phrase: impl Into<String>,
        max_edit_distance: usize,
    ) -> Result<Self> {
        let phrase = phrase.into();
        let normalized = normalize(&phrase);
        if normalized.is_empty() {
            return Err(Error::Config(format!(
                "wake phrase {phrase:?} contains no letters"
            )));
        }

        let tokens = normalized_tokens(&phrase);

        Ok(Self {
            phrase,
            normalized,
            tokens,
            max_edit_distance,
        })
    }

    /// The phrase as configured
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Maximum edit distance that still counts as a match
    #[must_use]
    pub const fn max_edit_distance(&self) -> usize {
        self.max_edit_distance
    }
}

/// Check a single fragment against the configured phrase
#[must_use]
pub fn evaluate(fragment: &TranscriptFragment, config: &WakeWordConfig) -> bool {
    let candidate = normalize(&fragment.text);
    if candidate.is_empty() {
        return false;
    }

    contains_tokens_in_order(&candidate, &config.tokens)
        || candidate.starts_with(&config.normalized)
        || levenshtein(&candidate, &config.normalized) <= config.max_edit_distance
}

/// True if every token occurs in `haystack`, each after the previous one
fn contains_tokens_in_order(haystack: &str, tokens: &[String]) -> bool {
    if tokens.is_empty() {
        return false;
    }

    let mut offset = 0;
    for token in tokens {
        match haystack[offset..].find(token.as_str()) {
            Some(pos) => offset += pos + token.len(),
            None => return false,
        }
    }
    true
}

/// Wake word detector for one listening session
///
/// Once triggered, further fragments are ignored until [`reset`](Self::reset).
#[derive(Debug)]
pub struct WakeWordDetector {
    config: WakeWordConfig,
    triggered: bool,
}

impl WakeWordDetector {
    /// Create a detector in the listening state
    #[must_use]
    pub fn new(config: WakeWordConfig) -> Self {
        tracing::debug!(
            phrase = config.phrase(),
            tolerance = config.max_edit_distance(),
            "wake word detector initialized"
        );

        Self {
            config,
            triggered: false,
        }
    }

    /// Feed a fragment, returning true exactly once per session
    pub fn observe(&mut self, fragment: &TranscriptFragment) -> bool {
        if self.triggered {
            return false;
        }

        if evaluate(fragment, &self.config) {
            tracing::info!(
                transcript = %fragment.text,
                is_final = fragment.is_final,
                "wake word detected"
            );
            self.triggered = true;
            return true;
        }

        tracing::trace!(transcript = %fragment.text, "no wake word");
        false
    }

    /// Check if this session already triggered
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Start a new listening session
    pub fn reset(&mut self) {
        self.triggered = false;
    }

    /// Get the configured phrase and tolerance
    #[must_use]
    pub const fn config(&self) -> &WakeWordConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WakeWordConfig {
        WakeWordConfig::new("hey inclusive").unwrap()
    }

    fn triggers(text: &str) -> bool {
        evaluate(&TranscriptFragment::interim(text), &config())
    }

    #[test]
    fn test_tolerance_scales_with_length() {
        assert_eq!(config().max_edit_distance(), 4);
        assert_eq!(WakeWordConfig::new("yo").unwrap().max_edit_distance(), 1);
    }

    #[test]
    fn test_phrase_without_letters_rejected() {
        assert!(WakeWordConfig::new("  123 ").is_err());
    }

    #[test]
    fn test_ordered_tokens_with_noise() {
        assert!(triggers("hey there inclusive please"));
        assert!(triggers("um, so hey... inclusive, what's the weather"));
    }

    #[test]
    fn test_tokens_out_of_order_do_not_count() {
        assert!(!contains_tokens_in_order("inclusivesayhey", &config().tokens));
    }

    #[test]
    fn test_prefix_match() {
        assert!(triggers("Hey Inclusive, what time is it?"));
    }

    #[test]
    fn test_typo_within_tolerance() {
        assert!(triggers("hey inclusiv"));
        assert!(triggers("hi inclusive"));
    }

    #[test]
    fn test_near_miss_rejected() {
        assert!(!triggers("hello conclusive"));
        assert!(!triggers("what a lovely day"));
        assert!(!triggers(""));
        assert!(!triggers("..."));
    }

    #[test]
    fn test_single_trigger_per_session() {
        let mut detector = WakeWordDetector::new(config());

        assert!(!detector.observe(&TranscriptFragment::interim("hello world")));
        assert!(detector.observe(&TranscriptFragment::interim("hey inclusive")));
        assert!(detector.is_triggered());

        // further fragments in the same session are ignored
        assert!(!detector.observe(&TranscriptFragment::final_text("hey inclusive")));

        detector.reset();
        assert!(!detector.is_triggered());
        assert!(detector.observe(&TranscriptFragment::final_text("hey inclusive")));
    }
}
