//! Shared test utilities
//!
//! Fake collaborators so turns can run without audio hardware, a
//! recognizer or a server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use handsfree::voice::{
    AudioAnalyser, AudioSource, CapturedAudio, DecodedAudio, DirectOutput, GestureSignal,
    MediaHandle, MediaOutput, MediaState, PlaybackConfig, PlaybackController, ReplyAudio,
    TranscriptFragment, VadConfig, WakeWordConfig, samples_to_wav,
};
use handsfree::{
    CaptureConfig, Collaborators, ConversationLog, Daemon, Error, RecognitionError, Result,
    ServerReply, Submitter, TranscriptSource, TranscriptStream, TurnSettings,
};

/// Items delivered by one recognizer subscription
pub type Script = Vec<std::result::Result<TranscriptFragment, RecognitionError>>;

/// Final fragment
pub fn said(text: &str) -> std::result::Result<TranscriptFragment, RecognitionError> {
    Ok(TranscriptFragment::final_text(text))
}

/// Interim fragment
pub fn hearing(text: &str) -> std::result::Result<TranscriptFragment, RecognitionError> {
    Ok(TranscriptFragment::interim(text))
}

/// Hands out one script per subscription, then streams that never end
pub struct ScriptedTranscripts {
    scripts: VecDeque<Script>,
    subscriptions: Arc<AtomicUsize>,
}

#[async_trait]
impl TranscriptSource for ScriptedTranscripts {
    async fn subscribe(&mut self) -> Result<TranscriptStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.scripts.pop_front() {
            Some(script) => Ok(Box::pin(futures::stream::iter(script))),
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }
}

/// Loud until `speech_until` after the recording opened, silent afterwards
struct ScriptedAnalyser {
    opened: Instant,
    speech_until: Duration,
}

impl AudioAnalyser for ScriptedAnalyser {
    fn latest_frame(&mut self) -> Vec<f32> {
        let level = if self.opened.elapsed() < self.speech_until {
            0.2
        } else {
            0.001
        };
        vec![level; 256]
    }
}

struct FakeRecording {
    opened: Instant,
    speech_until: Duration,
    bytes: usize,
}

impl handsfree::voice::Recording for FakeRecording {
    fn analyser(&self) -> Box<dyn AudioAnalyser> {
        Box::new(ScriptedAnalyser {
            opened: self.opened,
            speech_until: self.speech_until,
        })
    }

    fn finish(self: Box<Self>) -> Result<CapturedAudio> {
        Ok(CapturedAudio {
            bytes: vec![0; self.bytes],
            content_type: "audio/wav".to_string(),
        })
    }
}

/// Microphone that records `bytes` of audio with `speech_until` of speech
struct FakeMic {
    speech_until: Duration,
    bytes: usize,
    deny: bool,
    opens: Arc<AtomicUsize>,
}

impl AudioSource for FakeMic {
    fn open(&mut self) -> Result<Box<dyn handsfree::voice::Recording>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(Error::Permission("microphone denied".to_string()));
        }
        Ok(Box::new(FakeRecording {
            opened: Instant::now(),
            speech_until: self.speech_until,
            bytes: self.bytes,
        }))
    }
}

/// Records every submission and answers with a fixed reply or error
struct FakeSubmitter {
    reply: std::result::Result<ServerReply, String>,
    received: Arc<Mutex<Vec<CapturedAudio>>>,
}

#[async_trait]
impl Submitter for FakeSubmitter {
    async fn submit(&self, audio: CapturedAudio) -> Result<ServerReply> {
        self.received.lock().unwrap().push(audio);
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.reply.clone().map_err(Error::Submission)
    }
}

/// Primary output that either plays instantly or stays paused
struct FakeMedia {
    blocked: bool,
    loads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl MediaOutput for FakeMedia {
    fn load(&mut self, _audio: &ReplyAudio) -> Result<Box<dyn MediaHandle>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            blocked: self.blocked,
            releases: Arc::clone(&self.releases),
        }))
    }
}

struct FakeHandle {
    blocked: bool,
    releases: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl MediaHandle for FakeHandle {
    fn autoplay(&mut self) -> Result<()> {
        if self.blocked {
            Err(Error::Playback("autoplay blocked".to_string()))
        } else {
            Ok(())
        }
    }

    fn state(&mut self) -> MediaState {
        if self.blocked {
            MediaState::Paused
        } else {
            MediaState::Ended
        }
    }

    fn show_controls(&mut self) {}

    async fn ended(&mut self) {}

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeSpeaker {
    plays: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl DirectOutput for FakeSpeaker {
    async fn play(&mut self, _audio: DecodedAudio) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A short valid WAV reply
pub fn wav_reply() -> ReplyAudio {
    ReplyAudio {
        bytes: samples_to_wav(&[0.0; 1600], 16000).unwrap(),
        content_type: "audio/wav".to_string(),
    }
}

/// Successful server reply
pub fn reply(transcript: &str, answer: &str) -> ServerReply {
    ServerReply {
        transcript: transcript.to_string(),
        reply_text: answer.to_string(),
        audio: wav_reply(),
    }
}

/// Knobs for a test daemon
pub struct Options {
    pub scripts: Vec<Script>,
    pub speech_until: Duration,
    pub recording_bytes: usize,
    pub deny_microphone: bool,
    pub reply: std::result::Result<ServerReply, String>,
    pub autoplay_blocked: bool,
    pub unlocked: bool,
    pub capture: CaptureConfig,
    pub vad: VadConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scripts: vec![vec![hearing("hey"), said("hey there inclusive please")]],
            speech_until: Duration::from_secs(1),
            recording_bytes: 4000,
            deny_microphone: false,
            reply: Ok(reply("what time is it", "It is noon")),
            autoplay_blocked: false,
            unlocked: false,
            capture: CaptureConfig::default(),
            vad: VadConfig::default(),
        }
    }
}

/// Test daemon plus handles on its fakes
pub struct Harness {
    pub daemon: Daemon,
    pub gesture: GestureSignal,
    pub subscriptions: Arc<AtomicUsize>,
    pub opens: Arc<AtomicUsize>,
    pub submissions: Arc<Mutex<Vec<CapturedAudio>>>,
    pub loads: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub fallback_plays: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(options: Options) -> Self {
        let gesture = if options.unlocked {
            GestureSignal::unlocked()
        } else {
            GestureSignal::new()
        };
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let opens = Arc::new(AtomicUsize::new(0));
        let submissions = Arc::new(Mutex::new(Vec::new()));
        let loads = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let fallback_plays = Arc::new(AtomicUsize::new(0));

        let playback = PlaybackController::new(
            Box::new(FakeMedia {
                blocked: options.autoplay_blocked,
                loads: Arc::clone(&loads),
                releases: Arc::clone(&releases),
            }),
            Some(Box::new(FakeSpeaker {
                plays: Arc::clone(&fallback_plays),
            })),
            gesture.clone(),
            PlaybackConfig::default(),
        );

        let settings = TurnSettings {
            wake_word: WakeWordConfig::new("Hey Inclusive").unwrap(),
            vad: options.vad,
            capture: options.capture,
            resubscribe_delay: Duration::from_millis(250),
        };

        let daemon = Daemon::new(
            settings,
            Collaborators {
                transcripts: Box::new(ScriptedTranscripts {
                    scripts: options.scripts.into(),
                    subscriptions: Arc::clone(&subscriptions),
                }),
                microphone: Box::new(FakeMic {
                    speech_until: options.speech_until,
                    bytes: options.recording_bytes,
                    deny: options.deny_microphone,
                    opens: Arc::clone(&opens),
                }),
                submitter: Box::new(FakeSubmitter {
                    reply: options.reply,
                    received: Arc::clone(&submissions),
                }),
                playback,
                gesture: gesture.clone(),
                log: ConversationLog::new(),
            },
        );

        Self {
            daemon,
            gesture,
            subscriptions,
            opens,
            submissions,
            loads,
            releases,
            fallback_plays,
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}
