//! Energy-based voice activity monitor
//!
//! Polls an audio analyser on a fixed interval and reports when the speaker
//! has been silent long enough to consider the utterance finished.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

use super::signal::rms;

/// Source of the most recent audio frame
///
/// The monitor owns its analyser for as long as it polls and drops it when
/// it stops, which releases whatever the analyser holds.
pub trait AudioAnalyser: Send {
    /// Return the most recent frame of samples
    fn latest_frame(&mut self) -> Vec<f32>;
}

/// Polling and threshold settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Time between energy samples
    pub poll_interval: Duration,
    /// RMS level at or below which a frame counts as silence
    pub silence_threshold_rms: f32,
    /// Continuous silence needed to end the utterance
    pub required_silence: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            silence_threshold_rms: 0.006,
            required_silence: Duration::from_millis(2000),
        }
    }
}

/// Answer from the silence callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceDecision {
    /// Silence accepted: stop polling and release the analyser
    Stop,
    /// Silence not acted on yet: keep polling
    KeepListening,
}

/// Speech/silence bookkeeping behind the monitor
///
/// Silence has to hold both since the silence run started and since the
/// last loud sample, so one noisy frame cannot shift the boundary.
#[derive(Debug, Clone)]
pub struct SilenceTracker {
    threshold: f32,
    required: Duration,
    silence_started: Option<Instant>,
    last_speech: Instant,
}

impl SilenceTracker {
    /// Create a tracker that treats `started` as the last moment of speech
    #[must_use]
    pub const fn new(config: &VadConfig, started: Instant) -> Self {
        Self {
            threshold: config.silence_threshold_rms,
            required: config.required_silence,
            silence_started: None,
            last_speech: started,
        }
    }

    /// Record one energy sample, returning true while the silence condition holds
    pub fn observe(&mut self, level: f32, now: Instant) -> bool {
        if level > self.threshold {
            self.silence_started = Some(now);
            self.last_speech = now;
            return false;
        }

        let silence_started = *self.silence_started.get_or_insert(now);

        now.duration_since(silence_started) > self.required
            && now.duration_since(self.last_speech) > self.required
    }
}

/// Periodic energy poller with an end-of-utterance callback
#[derive(Debug, Default)]
pub struct VoiceActivityMonitor {
    task: Option<JoinHandle<()>>,
}

impl VoiceActivityMonitor {
    /// Create an idle monitor
    #[must_use]
    pub const fn new() -> Self {
        Self { task: None }
    }

    /// Start polling `analyser`
    ///
    /// `on_silence` runs on every silent tick once the silence condition
    /// holds; returning [`SilenceDecision::Stop`] ends polling. A monitor
    /// that is already running is stopped first.
    pub fn start<F>(
        &mut self,
        mut analyser: Box<dyn AudioAnalyser>,
        config: VadConfig,
        mut on_silence: F,
    ) where
        F: FnMut() -> SilenceDecision + Send + 'static,
    {
        self.stop();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks = IntervalStream::new(interval);

            let mut tracker = SilenceTracker::new(&config, Instant::now());

            while let Some(now) = ticks.next().await {
                let level = rms(&analyser.latest_frame());
                tracing::trace!(level, "energy sample");

                if tracker.observe(level, now) {
                    match on_silence() {
                        SilenceDecision::Stop => {
                            tracing::debug!("end of utterance detected");
                            break;
                        }
                        SilenceDecision::KeepListening => {}
                    }
                }
            }

            drop(analyser);
            tracing::trace!("voice activity analyser released");
        });

        self.task = Some(task);
        tracing::debug!(
            poll_ms = config.poll_interval.as_millis(),
            threshold = config.silence_threshold_rms,
            required_ms = config.required_silence.as_millis(),
            "voice activity monitor started"
        );
    }

    /// Stop polling and release the analyser
    ///
    /// Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("voice activity monitor stopped");
        }
    }

    /// Check if the poll task is still alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for VoiceActivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Constant(f32);

    impl AudioAnalyser for Constant {
        fn latest_frame(&mut self) -> Vec<f32> {
            vec![self.0; 256]
        }
    }

    fn config() -> VadConfig {
        VadConfig::default()
    }

    #[test]
    fn test_continuous_silence_fires_at_2100ms() {
        let start = Instant::now();
        let mut tracker = SilenceTracker::new(&config(), start);

        let first = (0..20u64)
            .position(|i| tracker.observe(0.001, start + Duration::from_millis(150 * i)))
            .unwrap();

        assert_eq!(first, 14);
    }

    #[test]
    fn test_speech_burst_resets_silence() {
        let start = Instant::now();
        let at = |ms: u64| start + Duration::from_millis(ms);
        let mut tracker = SilenceTracker::new(&config(), start);

        for ms in (0..=1900).step_by(100) {
            assert!(!tracker.observe(0.001, at(ms)));
        }
        assert!(!tracker.observe(0.2, at(1950)));
        for ms in (2000..=3900).step_by(100) {
            assert!(!tracker.observe(0.001, at(ms)), "fired at {ms}ms");
        }

        // silence is measured from the burst itself
        assert!(tracker.observe(0.001, at(4000)));
    }

    #[test]
    fn test_silence_after_speech_fires_at_first_poll_past_required() {
        let start = Instant::now();
        let mut tracker = SilenceTracker::new(&config(), start);
        assert!(!tracker.observe(0.2, start));

        let first = (1..20u64)
            .find(|i| tracker.observe(0.001, start + Duration::from_millis(150 * i)))
            .map(|i| 150 * i);

        assert_eq!(first, Some(2100));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let start = Instant::now();
        let mut tracker = SilenceTracker::new(&config(), start);
        // exactly at threshold is silence
        assert!(!tracker.observe(0.006, start));
        assert!(tracker.observe(0.006, start + Duration::from_millis(2100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_fires_once_and_stops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let mut monitor = VoiceActivityMonitor::new();
        monitor.start(Box::new(Constant(0.001)), config(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            SilenceDecision::Stop
        });

        tokio::time::sleep(Duration::from_millis(2050)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_listening_consults_again() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let mut monitor = VoiceActivityMonitor::new();
        monitor.start(Box::new(Constant(0.0)), config(), move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                SilenceDecision::KeepListening
            } else {
                SilenceDecision::Stop
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loud_input_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let mut monitor = VoiceActivityMonitor::new();
        monitor.start(Box::new(Constant(0.3)), config(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            SilenceDecision::Stop
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(monitor.is_running());

        monitor.stop();
        monitor.stop();
        tokio::task::yield_now().await;
        assert!(!monitor.is_running());
    }
}
