//! Capture session state machine
//!
//! A session lives from the wake word trigger until the recording is handed
//! off or abandoned. It owns the live recording, the activity monitor and
//! the safety timer, and tears all three down on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::voice::{
    AudioSource, CapturedAudio, Recording, SilenceDecision, VadConfig, VoiceActivityMonitor,
};
use crate::{Error, Result};

/// Turn lifecycle state; exactly one is active at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Waiting for the wake word
    IdleListening,
    /// Recording the user's question
    Capturing,
    /// Waiting for the submission round-trip
    Submitting,
    /// Playing the reply
    Playing,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdleListening => write!(f, "idle-listening"),
            Self::Capturing => write!(f, "capturing"),
            Self::Submitting => write!(f, "submitting"),
            Self::Playing => write!(f, "playing"),
        }
    }
}

/// Capture duration bounds and payload sanity threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Silence before this much capture time is ignored
    pub min_duration: Duration,
    /// Capture always ends after this long
    pub max_duration: Duration,
    /// Recordings smaller than this are abandoned
    pub min_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_millis(1500),
            max_duration: Duration::from_secs(10),
            min_bytes: 1000,
        }
    }
}

/// Event that may end a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The activity monitor reported end of utterance
    Silence,
    /// The safety timer expired
    SafetyTimeout,
}

/// Single-fire claim guarding the stop sequence
#[derive(Debug, Default)]
pub struct StopLatch(AtomicBool);

impl StopLatch {
    /// Create an unclaimed latch
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Claim the latch; only the first caller gets `true`
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Check if the latch has been claimed
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Minimum capture duration predicate
#[derive(Debug, Clone, Copy)]
struct DurationFloor {
    started_at: Instant,
    min: Duration,
}

impl DurationFloor {
    fn reached(self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= self.min
    }
}

/// Live recording plus everything needed to end it
pub struct CaptureSession {
    started_at: Instant,
    floor: DurationFloor,
    min_bytes: usize,
    recording: Option<Box<dyn Recording>>,
    monitor: VoiceActivityMonitor,
    safety_timer: Option<JoinHandle<()>>,
    latch: StopLatch,
}

impl CaptureSession {
    /// Open the microphone and start the activity monitor and safety timer
    ///
    /// Stop events are delivered on `events`; feed them back through
    /// [`handle`](Self::handle).
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub fn begin(
        source: &mut dyn AudioSource,
        capture: &CaptureConfig,
        vad: &VadConfig,
        events: &mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<Self> {
        let recording = source.open()?;
        let started_at = Instant::now();
        let floor = DurationFloor {
            started_at,
            min: capture.min_duration,
        };

        let mut monitor = VoiceActivityMonitor::new();
        let silence_tx = events.clone();
        monitor.start(recording.analyser(), *vad, move || {
            if !floor.reached(Instant::now()) {
                tracing::trace!("silence before minimum duration, still listening");
                return SilenceDecision::KeepListening;
            }
            let _ = silence_tx.send(CaptureEvent::Silence);
            SilenceDecision::Stop
        });

        let timeout_tx = events.clone();
        let max_duration = capture.max_duration;
        let safety_timer = tokio::spawn(async move {
            tokio::time::sleep(max_duration).await;
            tracing::debug!(
                limit_ms = max_duration.as_millis(),
                "capture safety timer fired"
            );
            let _ = timeout_tx.send(CaptureEvent::SafetyTimeout);
        });

        tracing::info!(
            min_ms = capture.min_duration.as_millis(),
            max_ms = capture.max_duration.as_millis(),
            "capture started"
        );

        Ok(Self {
            started_at,
            floor,
            min_bytes: capture.min_bytes,
            recording: Some(recording),
            monitor,
            safety_timer: Some(safety_timer),
            latch: StopLatch::new(),
        })
    }

    /// Time since the session started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Check if the session has already been stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.latch.is_claimed()
    }

    /// Apply a stop event
    ///
    /// Returns `None` when the event is ignored: silence before the minimum
    /// duration, or any event after the session was already stopped. The
    /// first accepted event finalizes the recording.
    pub fn handle(&mut self, event: CaptureEvent) -> Option<Result<CapturedAudio>> {
        if event == CaptureEvent::Silence && !self.floor.reached(Instant::now()) {
            tracing::trace!("ignoring early silence");
            return None;
        }

        if !self.latch.claim() {
            tracing::debug!(?event, "capture already stopping, ignoring");
            return None;
        }

        tracing::info!(
            ?event,
            elapsed_ms = self.elapsed().as_millis(),
            "capture stopping"
        );
        Some(self.finish())
    }

    fn finish(&mut self) -> Result<CapturedAudio> {
        self.teardown();

        let recording = self
            .recording
            .take()
            .ok_or_else(|| Error::Capture("recording already finalized".to_string()))?;
        let audio = recording.finish()?;

        if audio.len() < self.min_bytes {
            tracing::warn!(
                bytes = audio.len(),
                minimum = self.min_bytes,
                "recording too short"
            );
            return Err(Error::CaptureTooShort {
                bytes: audio.len(),
                minimum: self.min_bytes,
            });
        }

        Ok(audio)
    }

    /// Stop the monitor and cancel the safety timer
    fn teardown(&mut self) {
        self.monitor.stop();
        if let Some(timer) = self.safety_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.teardown();
        if self.recording.take().is_some() {
            tracing::debug!("capture abandoned, recording discarded");
        }
    }
}
