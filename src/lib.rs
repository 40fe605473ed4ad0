//! Handsfree - voice turn-taking controller for a speech assistant
//!
//! This library provides the pieces of a hands-free conversation loop:
//! - Wake word detection over live transcripts
//! - Energy-based end-of-utterance detection
//! - Capture sessions bounded by a duration floor and a safety timer
//! - Two-tier reply playback
//! - The turn orchestrator tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │   Recognizer  │  Microphone  │  Endpoint  │  Player  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Daemon                            │
//! │  IdleListening → Capturing → Submitting → Playing    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  Wake word  │  Activity monitor  │  Conversation log │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod session;
pub mod submit;
pub mod transcript;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationLog, ConversationTurn, Role};
pub use daemon::{Collaborators, Daemon, TurnEvent, TurnOutcome, TurnSettings};
pub use error::{Error, Result};
pub use session::{CaptureConfig, CaptureEvent, CaptureSession, StopLatch, TurnState};
pub use submit::{HttpSubmitter, ServerReply, Submitter};
pub use transcript::{
    CommandTranscriptSource, RecognitionError, StdinTranscriptSource, TranscriptSource,
    TranscriptStream,
};
