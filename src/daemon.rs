//! Daemon - the turn orchestrator
//!
//! Drives the cycle: listen for the wake word, capture the question, submit
//! it, play the reply, listen again. Exactly one state is active at a time
//! and every resource a state acquires is released before the next state
//! starts.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;
use uuid::Uuid;

use crate::conversation::{ConversationLog, ConversationTurn, Role, greeting};
use crate::session::{CaptureConfig, CaptureSession, TurnState};
use crate::submit::{HttpSubmitter, Submitter};
use crate::transcript::{
    CommandTranscriptSource, RecognitionError, StdinTranscriptSource, TranscriptSource,
};
use crate::voice::{
    AudioSource, CapturedAudio, GestureSignal, Microphone, PlaybackController, PlaybackOutcome,
    PlayerProcess, Speaker, VadConfig, WakeWordConfig, WakeWordDetector,
};
use crate::{Config, Error, Result};

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 64;

/// Something observers of the controller may want to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The controller moved to a new state
    StateChanged(TurnState),
    /// A turn was appended to the conversation
    TurnAppended(ConversationTurn),
    /// User-facing notice (errors, manual play hints)
    Notice(String),
}

/// How one turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was submitted and handed to playback
    Replied(PlaybackOutcome),
    /// The turn stopped early; nothing was appended
    Abandoned {
        /// State the turn was in when it stopped
        stage: TurnState,
        /// Notice shown to the user
        message: String,
    },
}

/// Timing and matching settings for the turn cycle
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub wake_word: WakeWordConfig,
    pub vad: VadConfig,
    pub capture: CaptureConfig,
    pub resubscribe_delay: Duration,
}

impl TurnSettings {
    /// Extract turn settings from the configuration
    ///
    /// # Errors
    ///
    /// Returns error if the wake phrase is unusable
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            wake_word: config.wake_word()?,
            vad: config.vad,
            capture: config.capture,
            resubscribe_delay: config.recognizer.resubscribe_delay,
        })
    }
}

/// External collaborators the orchestrator drives
pub struct Collaborators {
    pub transcripts: Box<dyn TranscriptSource>,
    pub microphone: Box<dyn AudioSource>,
    pub submitter: Box<dyn Submitter>,
    pub playback: PlaybackController,
    pub gesture: GestureSignal,
    pub log: ConversationLog,
}

/// The handsfree daemon - orchestrates voice turns
pub struct Daemon {
    detector: WakeWordDetector,
    vad: VadConfig,
    capture: CaptureConfig,
    resubscribe_delay: Duration,
    transcripts: Box<dyn TranscriptSource>,
    microphone: Box<dyn AudioSource>,
    submitter: Box<dyn Submitter>,
    playback: PlaybackController,
    gesture: GestureSignal,
    log: ConversationLog,
    state: TurnState,
    events: broadcast::Sender<TurnEvent>,
}

impl Daemon {
    /// Create a daemon and append the greeting turn
    #[must_use]
    pub fn new(settings: TurnSettings, parts: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut daemon = Self {
            detector: WakeWordDetector::new(settings.wake_word),
            vad: settings.vad,
            capture: settings.capture,
            resubscribe_delay: settings.resubscribe_delay,
            transcripts: parts.transcripts,
            microphone: parts.microphone,
            submitter: parts.submitter,
            playback: parts.playback,
            gesture: parts.gesture,
            log: parts.log,
            state: TurnState::IdleListening,
            events,
        };

        let phrase = daemon.detector.config().phrase().to_string();
        daemon.append(Role::System, greeting(&phrase));
        daemon
    }

    /// Build a daemon with the real microphone, recognizer, endpoint and players
    ///
    /// With `typed` set, transcripts are read from stdin instead of a
    /// recognizer process.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn from_config(config: &Config, typed: bool) -> Result<Self> {
        config.validate()?;

        let gesture = if config.playback.unlocked {
            GestureSignal::unlocked()
        } else {
            GestureSignal::new()
        };

        let transcripts: Box<dyn TranscriptSource> = if typed {
            Box::new(StdinTranscriptSource::new(gesture.clone()))
        } else {
            Box::new(CommandTranscriptSource::new(&config.recognizer.command)?)
        };

        let player = PlayerProcess::new(&config.playback.player)?;
        if !player.is_available() {
            tracing::warn!(
                player = ?config.playback.player,
                "player not found on PATH, replies will use direct output only after a gesture"
            );
        }
        let playback = PlaybackController::new(
            Box::new(player),
            Some(Box::new(Speaker::new())),
            gesture.clone(),
            config.playback.timing,
        );

        let submitter = HttpSubmitter::new(
            &config.server.endpoint,
            &config.server.upload_field,
            config.server.timeout,
        )?;

        let log = config
            .conversation_log
            .as_ref()
            .map_or_else(ConversationLog::new, ConversationLog::with_file);

        Ok(Self::new(
            TurnSettings::from_config(config)?,
            Collaborators {
                transcripts,
                microphone: Box::new(Microphone::new(config.analysis_frame)),
                submitter: Box::new(submitter),
                playback,
                gesture,
                log,
            },
        ))
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Conversation so far
    #[must_use]
    pub const fn conversation(&self) -> &ConversationLog {
        &self.log
    }

    /// Gesture signal shared with playback
    #[must_use]
    pub fn gesture(&self) -> GestureSignal {
        self.gesture.clone()
    }

    /// Subscribe to state changes, appended turns and notices
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Run turns until `shutdown` receives
    ///
    /// Turn failures are reported as notices and never end the loop.
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, shutdown: &mut mpsc::Receiver<()>) {
        tracing::info!(phrase = %self.detector.config().phrase(), "handsfree controller started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                outcome = self.cycle() => {
                    tracing::debug!(?outcome, "turn finished");
                }
            }
        }

        self.playback.release_active();
        self.enter(TurnState::IdleListening);
    }

    /// Wait for the wake word, then run one turn
    #[allow(clippy::future_not_send)]
    async fn cycle(&mut self) -> TurnOutcome {
        self.listen_for_wake_word().await;
        self.run_turn().await
    }

    /// Listen until a fragment matches the wake phrase
    ///
    /// The recognizer is re-subscribed whenever its stream ends. Transient
    /// recognition errors are ignored; a permission error pauses recognition
    /// until the next user gesture.
    #[allow(clippy::future_not_send)]
    pub async fn listen_for_wake_word(&mut self) {
        self.enter(TurnState::IdleListening);
        self.detector.reset();
        tracing::info!(phrase = %self.detector.config().phrase(), "listening for wake word");

        loop {
            let mut stream = match self.transcripts.subscribe().await {
                Ok(stream) => stream,
                Err(Error::Permission(msg)) => {
                    self.wait_for_permission(&msg).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to start recognition");
                    tokio::time::sleep(self.resubscribe_delay).await;
                    continue;
                }
            };

            let mut denied = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => {
                        tracing::trace!(
                            text = %fragment.text,
                            is_final = fragment.is_final,
                            "fragment"
                        );
                        if self.detector.observe(&fragment) {
                            tracing::info!(text = %fragment.text, "wake word detected");
                            return;
                        }
                    }
                    Err(RecognitionError::PermissionDenied(msg)) => {
                        denied = Some(msg);
                        break;
                    }
                    Err(e) => tracing::debug!(error = ?e, "transient recognition error"),
                }
            }
            drop(stream);

            if let Some(msg) = denied {
                self.wait_for_permission(&msg).await;
            } else {
                tracing::debug!("recognition ended, restarting");
                tokio::time::sleep(self.resubscribe_delay).await;
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn wait_for_permission(&self, msg: &str) {
        tracing::warn!(reason = msg, "recognition not allowed, waiting for user gesture");
        let gesture = self.gesture.next_gesture();
        let notice = Error::Permission(msg.to_string()).user_message();
        self.notify(notice);
        gesture.await;
        tracing::info!("user gesture received, resuming recognition");
    }

    /// Capture, submit and play one turn
    ///
    /// Always returns to `IdleListening`.
    #[allow(clippy::future_not_send)]
    pub async fn run_turn(&mut self) -> TurnOutcome {
        let turn_id = Uuid::new_v4();
        let span = tracing::info_span!("turn", %turn_id);

        let outcome = self.run_turn_inner().instrument(span).await;
        self.enter(TurnState::IdleListening);
        outcome
    }

    #[allow(clippy::future_not_send)]
    async fn run_turn_inner(&mut self) -> TurnOutcome {
        self.enter(TurnState::Capturing);
        let audio = match self.capture_utterance().await {
            Ok(audio) => audio,
            Err(e) => return self.abandon(&e),
        };

        self.enter(TurnState::Submitting);
        let reply = match self.submitter.submit(audio).await {
            Ok(reply) => reply,
            Err(e) => return self.abandon(&e),
        };

        self.append(Role::User, reply.transcript.clone());
        self.append(Role::Assistant, reply.reply_text.clone());

        self.enter(TurnState::Playing);
        let outcome = self.playback.play(&reply.audio).await;
        match &outcome {
            PlaybackOutcome::AwaitingManualPlay(msg) | PlaybackOutcome::Failed(msg) => {
                self.notify(msg.clone());
            }
            PlaybackOutcome::Completed | PlaybackOutcome::CompletedWithFallback => {}
        }

        TurnOutcome::Replied(outcome)
    }

    /// Record until the first accepted stop event
    #[allow(clippy::future_not_send)]
    async fn capture_utterance(&mut self) -> Result<CapturedAudio> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session =
            CaptureSession::begin(self.microphone.as_mut(), &self.capture, &self.vad, &tx)?;
        drop(tx);

        while let Some(event) = rx.recv().await {
            if let Some(result) = session.handle(event) {
                return result;
            }
        }

        Err(Error::Capture("capture ended without a stop event".to_string()))
    }

    fn abandon(&self, error: &Error) -> TurnOutcome {
        let stage = self.state;
        tracing::warn!(error = %error, %stage, "turn abandoned");

        let message = error.user_message();
        self.notify(message.clone());
        TurnOutcome::Abandoned { stage, message }
    }

    fn enter(&mut self, state: TurnState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state change");
            self.state = state;
            let _ = self.events.send(TurnEvent::StateChanged(state));
        }
    }

    fn append(&mut self, role: Role, text: String) {
        let turn = ConversationTurn::new(role, text);
        self.log.push(turn.clone());
        let _ = self.events.send(TurnEvent::TurnAppended(turn));
    }

    fn notify(&self, message: String) {
        let _ = self.events.send(TurnEvent::Notice(message));
    }
}
