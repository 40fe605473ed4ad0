//! Voice processing module
//!
//! Handles audio capture, wake word detection, end-of-utterance detection
//! and reply playback.

mod capture;
mod gesture;
mod playback;
pub mod signal;
mod vad;
mod wake_word;

pub use capture::{
    ANALYSIS_FRAME, AudioSource, CapturedAudio, Microphone, Recording, SAMPLE_RATE,
    samples_to_wav,
};
pub use gesture::GestureSignal;
pub use playback::{
    DecodedAudio, DirectOutput, MediaHandle, MediaOutput, MediaState, PlaybackConfig,
    PlaybackController, PlaybackHandle, PlaybackOutcome, PlayerProcess, ReplyAudio, Speaker,
    decode,
};
pub use vad::{AudioAnalyser, SilenceDecision, SilenceTracker, VadConfig, VoiceActivityMonitor};
pub use wake_word::{TranscriptFragment, WakeWordConfig, WakeWordDetector, evaluate};
