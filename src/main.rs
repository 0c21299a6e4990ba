//! Clinical Voice Assistant - speech-driven access to clinical agents.
//!
//! Transcribed speech (Silero VAD + Whisper) is classified by keyword and
//! dispatched to one of six LLM-backed clinical agents (EHR, medication,
//! orders, clinical decision support, scheduling, analytics). An Inspector
//! agent validates every reply against the agent protocol before it is
//! shown and optionally spoken. Patient records live in PostgreSQL with a
//! file-backed JSON fallback; every transcription is persisted.

mod agents;
mod audio;
mod config;
mod llm;
mod router;
mod storage;
mod stt;
mod tts;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use agents::Dispatcher;
use audio::{Capturer, Player};
use config::AppConfig;
use llm::LlmClient;
use storage::{EhrStore, FileStore, PgStore, TranscriptLog};
use stt::Recognizer;
use tts::Synthesizer;

/// Configuration for the speech output task.
struct SpeechTaskConfig {
    synthesizer: Arc<Mutex<Synthesizer>>, // TTS synthesizer
    player: Arc<Player>,                  // audio player
    capturer_running: Arc<AtomicBool>,    // microphone state flag
    post_delay_ms: u64,                   // delay before resuming the mic (ms)
    shutdown: Arc<AtomicBool>,            // shutdown flag
}

/// Spawn the transcription task.
///
/// Receives completed speech segments from the VAD, transcribes them with
/// Whisper, persists each transcription, and forwards the text downstream.
fn spawn_transcription_task(
    transcript_tx: mpsc::Sender<String>,
    mut segment_rx: mpsc::Receiver<Vec<f32>>,
    recognizer: Arc<Recognizer>,
    transcript_log: Arc<TranscriptLog>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !shutdown.load(Ordering::Relaxed) {
            // Use a timeout so the shutdown flag is checked periodically
            match tokio::time::timeout(tokio::time::Duration::from_millis(100), segment_rx.recv()).await {
                Ok(Some(samples)) => {
                    let Some(text) = recognizer.transcribe_segment(&samples) else { continue };

                    if let Err(e) = transcript_log.append(&text, None) {
                        warn!("Failed to persist transcription: {}", e);
                    }

                    if let Err(e) = transcript_tx.send(text).await {
                        debug!("Failed to send transcript: {}", e);
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Segment channel closed");
                    break;
                }
                Err(_) => continue,
            }
        }
    })
}

/// Spawn the dispatch task.
///
/// Receives transcriptions, routes each one through the clinical agents
/// (classification, processing, Inspector validation), and emits the
/// formatted reply for display and optional speech.
fn spawn_dispatch_task(
    mut transcript_rx: mpsc::Receiver<String>,
    reply_tx: Option<mpsc::Sender<String>>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                transcript = transcript_rx.recv() => {
                    let Some(transcript) = transcript else {
                        debug!("Transcript channel closed");
                        break;
                    };

                    info!("🧠 Processing: \"{}\"", transcript);

                    let reply = dispatcher.handle_utterance(&transcript).await;
                    info!("💬 Assistant: {}", reply);

                    if let Some(ref tx) = reply_tx
                        && tx.send(reply).await.is_err()
                    {
                        debug!("Reply channel closed");
                        break;
                    }
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    // Check for shutdown
                }
            }
        }
    })
}

/// Spawn the speech output task.
///
/// Receives formatted replies, pauses the microphone (half-duplex), speaks
/// the reply sentence by sentence, and resumes the microphone after a short
/// delay so the assistant never transcribes itself.
fn spawn_speech_task(mut reply_rx: mpsc::Receiver<String>, config: SpeechTaskConfig) -> JoinHandle<()> {
    let SpeechTaskConfig { synthesizer, player, capturer_running, post_delay_ms, shutdown } = config;

    tokio::spawn(async move {
        while !shutdown.load(Ordering::Relaxed) {
            let reply = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => continue,
            };

            let sentences = tts::split_sentences(&reply);
            if sentences.is_empty() {
                continue;
            }

            capturer_running.store(false, Ordering::SeqCst);
            debug!("Microphone paused for playback");

            for sentence in sentences {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let samples = {
                    let mut synth = synthesizer.lock();
                    match synth.synthesize_sentence(&sentence) {
                        Ok(samples) => samples,
                        Err(e) => {
                            error!("❌ TTS error: {}", e);
                            continue; // Skip failed sentence
                        }
                    }
                };

                if samples.is_empty() {
                    continue;
                }

                if !player.play(&samples) {
                    break;
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(post_delay_ms)).await;
            capturer_running.store(true, Ordering::SeqCst);
            debug!("Microphone resumed after playback");
        }
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }

    shutdown.store(true, Ordering::SeqCst);
}

/// Initialize the EHR store, falling back to files when PostgreSQL is
/// unavailable. The assistant must come up without infrastructure.
async fn init_ehr_store(config: &AppConfig) -> Result<EhrStore> {
    if let Some(url) = config.database_url() {
        match PgStore::connect(&url).await {
            Ok(store) => return Ok(EhrStore::Postgres(store)),
            Err(e) => {
                warn!("PostgreSQL not available ({}), falling back to file storage", e);
            }
        }
    }

    Ok(EhrStore::File(FileStore::open(&config.ehr_data_dir())?))
}

fn log_examples() {
    info!("Example commands:");
    info!("- 'Show me John Smith's medical history'");
    info!("- 'Check interactions between Metformin and Lisinopril'");
    info!("- 'Schedule an appointment for next week'");
    info!("- 'Order a complete blood count test'");
    info!("- 'Show me the latest clinical guidelines for diabetes'");
    info!("- 'Generate a trend report on system usage'");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    // Respect RUST_LOG, fall back to the verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 Clinical Voice Assistant v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }

    // Storage comes up first so agent initialization can bind to it
    let ehr_store = Arc::new(init_ehr_store(&config).await?);
    info!("EHR store tier: {}", ehr_store.tier());

    let transcript_log = Arc::new(TranscriptLog::open(&config.transcripts_dir())?);

    let llm_client = LlmClient::new(&config)?;
    let dispatcher = Arc::new(Dispatcher::new(&llm_client, &config, ehr_store)?);

    let (recognizer, segment_rx) = Recognizer::new(&config)?;
    let recognizer = Arc::new(recognizer);

    // Feed the recognizer directly from the capture callback; the VAD sends
    // completed segments over the channel as soon as they close
    let recognizer_for_audio = recognizer.clone();
    let mut capturer = Capturer::new(config.sample_rate, move |samples: &[f32]| {
        recognizer_for_audio.vad_accept_waveform(samples);
    })?;
    let capturer_running = capturer.running_flag();

    let shutdown = Arc::new(AtomicBool::new(false));

    info!("Starting clinical voice assistant...");
    config.log_config();
    log_examples();

    capturer.start()?;

    let (transcript_tx, transcript_rx) = mpsc::channel::<String>(10);

    let transcription_handle =
        spawn_transcription_task(transcript_tx.clone(), segment_rx, recognizer.clone(), transcript_log, shutdown.clone());

    // Speech output is optional; with --mute replies are only printed
    let (reply_tx, speech_handle, player) = if config.mute {
        (None, None, None)
    } else {
        let synthesizer = Synthesizer::new(&config)?;
        let player = Arc::new(Player::new(synthesizer.sample_rate())?);
        let synthesizer = Arc::new(Mutex::new(synthesizer));

        let (reply_tx, reply_rx) = mpsc::channel::<String>(10);
        let handle = spawn_speech_task(
            reply_rx,
            SpeechTaskConfig {
                synthesizer,
                player: player.clone(),
                capturer_running,
                post_delay_ms: config.post_playback_delay_ms,
                shutdown: shutdown.clone(),
            },
        );
        (Some(reply_tx), Some(handle), Some(player))
    };

    let dispatch_handle = spawn_dispatch_task(transcript_rx, reply_tx.clone(), dispatcher, shutdown.clone());

    info!("🎯 Ready to assist! (Press Ctrl+C to exit)");

    wait_for_shutdown(shutdown).await;

    // Stop audio capture first so no new segments arrive
    capturer.shutdown();
    if let Some(player) = player {
        player.stop();
    }

    // Close channels to wake up tasks
    drop(transcript_tx);
    drop(reply_tx);

    // Give each task a moment to notice the shutdown flag before moving on
    let graceful_timeout = tokio::time::Duration::from_millis(500);

    tokio::select! {
        _ = transcription_handle => {
            debug!("Transcription task finished gracefully");
        }
        _ = tokio::time::sleep(graceful_timeout) => {
            debug!("Transcription task didn't finish in time");
        }
    }

    tokio::select! {
        _ = dispatch_handle => {
            debug!("Dispatch task finished gracefully");
        }
        _ = tokio::time::sleep(graceful_timeout) => {
            debug!("Dispatch task didn't finish in time");
        }
    }

    if let Some(handle) = speech_handle {
        tokio::select! {
            _ = handle => {
                debug!("Speech task finished gracefully");
            }
            _ = tokio::time::sleep(graceful_timeout) => {
                debug!("Speech task didn't finish in time");
            }
        }
    }

    info!("👋 Clinical voice assistant stopped");
    Ok(())
}
