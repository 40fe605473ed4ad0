use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use handsfree::voice::signal::rms;
use handsfree::voice::{
    AudioSource, DecodedAudio, DirectOutput, Microphone, Speaker, TranscriptFragment, evaluate,
};
use handsfree::{Config, ConversationTurn, Daemon, Role, TurnEvent};

/// Handsfree - voice turn-taking controller for a speech assistant
#[derive(Parser)]
#[command(name = "handsfree", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Wake phrase override
    #[arg(long, global = true)]
    phrase: Option<String>,

    /// Full-interaction endpoint override
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Read transcripts from stdin instead of a recognizer process
    #[arg(long)]
    typed: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller until Ctrl-C (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Check whether some text would trigger the wake word
    CheckPhrase {
        /// Transcript text to test
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,handsfree=info",
        1 => "info,handsfree=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(phrase) = cli.phrase {
        config.wake_phrase = phrase;
    }
    if let Some(endpoint) = cli.endpoint {
        config.server.endpoint = endpoint;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_controller(config, cli.typed).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::CheckPhrase { text } => check_phrase(&config, &text),
    }
}

#[allow(clippy::future_not_send)]
async fn run_controller(config: Config, typed_flag: bool) -> anyhow::Result<()> {
    let typed = typed_flag || config.recognizer.command.is_empty();
    if typed && !typed_flag {
        tracing::warn!("no recognizer command configured, reading typed transcripts from stdin");
    }

    tracing::info!(
        phrase = %config.wake_phrase,
        endpoint = %config.server.endpoint,
        typed,
        "starting handsfree controller"
    );
    tracing::debug!(?config, "loaded configuration");

    let mut daemon = Daemon::from_config(&config, typed)?;

    for turn in daemon.conversation().turns() {
        print_turn(turn);
    }

    // Without typed input, stdin is free to carry gestures (press Enter)
    if !typed {
        let gesture = daemon.gesture();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                gesture.gesture();
            }
        });
    }

    let mut events = daemon.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TurnEvent::TurnAppended(turn) => print_turn(&turn),
                TurnEvent::Notice(message) => eprintln!("{message}"),
                TurnEvent::StateChanged(state) => tracing::debug!(%state, "state"),
            }
        }
    });

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    daemon.run(&mut shutdown_rx).await;

    println!(
        "\nConversation ended with {} turns",
        daemon.conversation().len()
    );
    Ok(())
}

fn print_turn(turn: &ConversationTurn) {
    let speaker = match turn.role {
        Role::User => "You",
        Role::Assistant => "AI Assistant",
        Role::System => "System",
    };
    println!("{speaker}: {}", turn.text);
}

fn check_phrase(config: &Config, text: &str) -> anyhow::Result<()> {
    let wake_word = config.wake_word()?;
    let fragment = TranscriptFragment::final_text(text);

    if evaluate(&fragment, &wake_word) {
        println!("\"{text}\" triggers \"{}\"", wake_word.phrase());
    } else {
        println!(
            "\"{text}\" does not trigger \"{}\" (tolerance {})",
            wake_word.phrase(),
            wake_word.max_edit_distance()
        );
    }
    Ok(())
}

#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    let threshold = config.vad.silence_threshold_rms;
    println!("Sampling the microphone once a second for {duration}s.");
    println!("Talk for a bit, then stay quiet; `*` marks frames counted as speech.\n");

    let mut microphone = Microphone::new(config.analysis_frame);
    let recording = microphone.open()?;
    let mut analyser = recording.analyser();

    let mut speech_frames = 0_u64;
    for i in 1..=duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let energy = rms(&analyser.latest_frame());
        let speech = energy > threshold;
        if speech {
            speech_frames += 1;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bar = "#".repeat((energy * 400.0).min(40.0) as usize);
        let marker = if speech { '*' } else { ' ' };
        println!("{i:>3}s {marker} rms {energy:.4} {bar}");
    }

    let audio = recording.finish()?;

    println!("\n{speech_frames}/{duration} frames above the silence threshold ({threshold})");
    println!("Recorded {} bytes of {}", audio.len(), audio.content_type);
    if speech_frames == 0 {
        println!("Nothing crossed the threshold: check the input device or lower");
        println!("`silence_threshold_rms` in the [vad] config section.");
    } else if speech_frames == duration {
        println!("Every frame counted as speech, so a turn would only end on the");
        println!("safety timer: raise `silence_threshold_rms` in the [vad] config section.");
    }

    Ok(())
}

#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    const SAMPLE_RATE: u32 = 24000;
    const TONE_HZ: f32 = 440.0;

    println!("Playing a 2s tone through direct output (the playback fallback tier).");

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * TONE_HZ * t).sin() * 0.3
        })
        .collect();

    Speaker::new()
        .play(DecodedAudio {
            samples,
            sample_rate: SAMPLE_RATE,
            channels: 1,
        })
        .await?;

    println!("Done. If nothing was heard, replies will only play through the");
    println!("external player; check `player` in the [playback] config section.");

    Ok(())
}
