use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use barista_call::voice::{
    CloudSynthesizer, Microphone, MicrophoneRecognizer, PlaybackControl, SpeakOptions,
    SpeechToText, decode_mp3, play_blocking, rms_energy, samples_to_wav, tone,
};
use barista_call::{
    CallControl, CallSession, CallState, Config, ConnectionStatus, ResponseCoordinator, Role, SpeechInput,
    SpeechOutput, Transport, WsTransport,
};

/// Barista - talk to a coffee-recommendation assistant
#[derive(Parser)]
#[command(name = "barista", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/barista/config.toml)
    #[arg(short, long, env = "BARISTA_CONFIG")]
    config: Option<PathBuf>,

    /// Assistant websocket URL
    #[arg(long)]
    server_url: Option<String>,

    /// Your name, used in the greeting
    #[arg(short, long)]
    name: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice call (default)
    Call,
    /// Send one text query and print the reply
    Ask {
        /// Query text
        text: String,
        /// Also speak the reply
        #[arg(long)]
        speak: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List voices offered by the TTS provider
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,barista_call=info",
        1 => "info,barista_call=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.server_url {
        config = config.with_server_url(url)?;
    }
    if let Some(name) = &cli.name {
        config = config.with_caller_name(name);
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Call) {
        Command::Call => call(config).await,
        Command::Ask { text, speak } => ask(&config, &text, speak).await,
        Command::TestMic { duration } => tokio::task::spawn_blocking(move || test_mic(duration))
            .await
            .map_err(|e| anyhow::anyhow!("microphone test panicked: {e}"))?,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::Voices => list_voices(&config),
    }
}

fn build_output(config: &Config) -> anyhow::Result<Arc<SpeechOutput>> {
    let tts = config.text_to_speech()?;
    Ok(Arc::new(SpeechOutput::new(Arc::new(CloudSynthesizer::new(
        tts,
    )))))
}

fn build_input(config: &Config) -> anyhow::Result<Arc<SpeechInput>> {
    let stt: SpeechToText = config.speech_to_text()?;
    let recognizer = MicrophoneRecognizer::with_timeout(stt, config.voice.transcription_timeout);
    Ok(Arc::new(
        SpeechInput::new(Arc::new(recognizer)).with_min_confidence(config.voice.min_confidence),
    ))
}

fn build_transport(config: &Config) -> Arc<dyn Transport> {
    Arc::new(WsTransport::with_policy(
        config.server.url.clone(),
        config.server.reconnect,
    ))
}

/// Run a voice call until hang-up (`q` or Ctrl-C)
async fn call(config: Config) -> anyhow::Result<()> {
    let output = build_output(&config)?;
    let input = build_input(&config)?;
    let transport = build_transport(&config);
    let coordinator = ResponseCoordinator::new(transport, output);

    tracing::info!(url = %config.server.url, "calling assistant");
    let assistant = config.call.assistant_name.clone();
    let session = CallSession::start(Arc::clone(&coordinator), input, config.call)?;

    // Entering `listening` arms the microphone unless muted
    let muted = Arc::new(AtomicBool::new(false));
    let status_assistant = assistant.clone();
    let status_muted = Arc::clone(&muted);
    session.state_changes().subscribe(move |state: &CallState| {
        let listening = *state == CallState::Listening && !status_muted.load(Ordering::SeqCst);
        println!("[{}]", state.status_message(&status_assistant, listening));
    });
    let speaker_assistant = assistant.clone();
    session.on_conversation(move |message| {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => speaker_assistant.as_str(),
        };
        println!("{speaker}: {}", message.text);
    });
    coordinator.on_response(move |reply| {
        println!("{assistant}: {}", reply.message);
        for product in &reply.products {
            println!(
                "  • {} ({}, {} roast) {:.2} [{}% match]",
                product.name,
                product.category,
                product.roast_level,
                product.price,
                product.relevance_percent()
            );
            if !product.reason.is_empty() {
                println!("    {}", product.reason);
            }
        }
    });
    coordinator
        .transport()
        .status_changes()
        .subscribe(|status: &ConnectionStatus| {
            if *status == ConnectionStatus::Error {
                println!("[connection to assistant failed]");
            }
        });

    print_controls();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // No terminal input; only Ctrl-C can hang up
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                match CallControl::parse(&line) {
                    Some(CallControl::HangUp) => break,
                    Some(CallControl::ToggleMute) => {
                        let now_muted = session.toggle_mute().await;
                        muted.store(now_muted, Ordering::SeqCst);
                        println!("[{}]", if now_muted { "muted" } else { "unmuted" });
                    }
                    Some(control) => session.control(control).await,
                    None if line.trim().is_empty() => {}
                    None => print_controls(),
                }
            }
        }
    }

    println!("\nHanging up...");
    session.end_call().await;
    Ok(())
}

fn print_controls() {
    println!("Controls (type a key, then Enter; Ctrl-C also hangs up):");
    for control in CallControl::ALL {
        println!("  {control}");
    }
    println!();
}

/// Send a single text query and print the reply
async fn ask(config: &Config, text: &str, speak: bool) -> anyhow::Result<()> {
    let output = if speak {
        build_output(config)?
    } else {
        Arc::new(SpeechOutput::unsupported())
    };
    let coordinator = ResponseCoordinator::new(build_transport(config), output);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    coordinator.on_response(move |reply| {
        let _ = tx.send(reply.clone());
    });

    coordinator.connect().await?;
    coordinator.send_query(text)?;

    let reply = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no reply within 60 seconds"))?
        .ok_or_else(|| anyhow::anyhow!("connection closed before a reply arrived"))?;

    println!("{}", reply.message);
    for product in &reply.products {
        println!(
            "  • {} {:.2} [{}% match] {}",
            product.name,
            product.price,
            product.relevance_percent(),
            product.url
        );
    }

    if speak {
        // The coordinator already started speaking the reply
        while coordinator.output().is_speaking() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    coordinator.disconnect();
    Ok(())
}

/// Test microphone input
fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (mic, chunks) = Microphone::open()?;
    println!("Sample rate: {} Hz", mic.sample_rate());
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut second = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match chunks.recv_timeout(left) {
                Ok(chunk) => second.extend_from_slice(&chunk),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => break,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    anyhow::bail!("microphone stream closed")
                }
            }
        }

        let energy = rms_energy(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
        recorded.extend(second);
    }

    let wav = samples_to_wav(&recorded, mic.sample_rate())?;
    drop(mic);

    println!("\n---");
    println!("Captured {} samples ({} bytes as WAV)", recorded.len(), wav.len());
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let clip = tone(440.0, Duration::from_secs(2), 24_000);
    println!(
        "Playing {} samples at {} Hz...",
        clip.samples.len(),
        clip.sample_rate
    );

    let control = Arc::new(PlaybackControl::new(1.0));
    tokio::task::spawn_blocking(move || play_blocking(&clip, &control)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = config.text_to_speech()?;
    let options = SpeakOptions::reply();

    println!("Synthesizing speech with {:?}...", tts.provider());
    let mp3_data = tts.synthesize(text, None, options.rate).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    let clip = decode_mp3(&mp3_data)?;
    println!(
        "Playing {:.1}s of audio...",
        clip.duration().as_secs_f32()
    );
    let control = Arc::new(PlaybackControl::new(options.volume));
    tokio::task::spawn_blocking(move || play_blocking(&clip, &control)).await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// List voices offered by the configured TTS provider
fn list_voices(config: &Config) -> anyhow::Result<()> {
    let output = build_output(config)?;
    let best = output.best_english_voice();

    for voice in output.voices() {
        let marker = if best.as_ref().is_some_and(|b| b.id == voice.id) {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<24} {:<8} {}", voice.id, voice.lang, voice.name);
    }

    Ok(())
}
