//! Speech recognizer combining Silero VAD and Whisper STT.
//!
//! The VAD runs on the audio callback thread and must stay fast; Whisper
//! transcription is slow and runs on the transcription task. The two are
//! guarded by separate locks so a transcription in flight never glitches
//! the capture path.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use sherpa_rs::silero_vad::{SileroVad, SileroVadConfig};
use sherpa_rs::whisper::{WhisperConfig, WhisperRecognizer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Minimum speech duration in seconds to be considered valid.
const MIN_SPEECH_DURATION: f32 = 0.1;

/// Maximum speech duration in seconds (prevent runaway segments).
const MAX_SPEECH_DURATION: f32 = 30.0;

/// VAD window size in samples (512 samples = 32ms at 16kHz).
const VAD_WINDOW_SIZE: i32 = 512;

/// Buffer size in seconds for VAD accumulation.
const VAD_BUFFER_SIZE_SECONDS: f32 = 60.0;

/// VAD state touched from the audio callback path.
struct VadState {
    vad: SileroVad,                // voice activity detector
    was_speaking: bool,            // previous speaking state for edge detection
    speech_start: Option<Instant>, // timestamp when speech started
}

/// Speech recognizer delivering completed utterance segments over a channel.
pub struct Recognizer {
    vad_state: Arc<Mutex<VadState>>,    // fast path (<10ms)
    whisper: Mutex<WhisperRecognizer>,  // slow path (100-500ms)
    segment_tx: mpsc::Sender<Vec<f32>>, // completed speech segments
    sample_rate: u32,
}

impl Recognizer {
    /// Create a recognizer with event-driven segment delivery.
    ///
    /// # Errors
    /// Returns an error if the VAD or Whisper models fail to load.
    pub fn new(config: &AppConfig) -> Result<(Self, mpsc::Receiver<Vec<f32>>)> {
        let sample_rate = config.sample_rate;
        let provider = config.effective_provider();

        info!("Initializing speech recognizer with {} provider", provider);

        let vad_config = SileroVadConfig {
            model: config.vad_model_path().to_string_lossy().to_string(),
            threshold: config.vad_threshold,
            sample_rate,
            min_silence_duration: config.vad_silence_duration,
            min_speech_duration: MIN_SPEECH_DURATION,
            max_speech_duration: MAX_SPEECH_DURATION,
            window_size: VAD_WINDOW_SIZE,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(1), // VAD is lightweight
            debug: config.verbose,
        };

        let vad = SileroVad::new(vad_config, VAD_BUFFER_SIZE_SECONDS).map_err(|e| anyhow::anyhow!("Failed to initialize Silero VAD: {}", e))?;

        let stt_language = config.effective_stt_language().to_string();
        info!("STT language: {}", if stt_language.is_empty() { "auto" } else { &stt_language });

        let whisper_config = WhisperConfig {
            encoder: config.whisper_encoder_path().to_string_lossy().to_string(),
            decoder: config.whisper_decoder_path().to_string_lossy().to_string(),
            tokens: config.whisper_tokens_path().to_string_lossy().to_string(),
            language: stt_language,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.num_threads.try_into().unwrap_or(2)),
            debug: config.verbose,
            ..Default::default()
        };

        let whisper = WhisperRecognizer::new(whisper_config).map_err(|e| anyhow::anyhow!("Failed to initialize Whisper: {}", e))?;

        info!("Whisper recognizer initialized");

        // Buffered to absorb bursts of short utterances
        let (segment_tx, segment_rx) = mpsc::channel(5);

        let recognizer = Self {
            vad_state: Arc::new(Mutex::new(VadState { vad, was_speaking: false, speech_start: None })),
            whisper: Mutex::new(whisper),
            segment_tx,
            sample_rate,
        };

        Ok((recognizer, segment_rx))
    }

    /// Feed captured audio into the VAD, forwarding completed segments.
    ///
    /// Called from the capture callback thread; must never block. Segments
    /// are sent with `try_send` and dropped with a warning if the
    /// transcription task falls behind.
    pub fn vad_accept_waveform(&self, samples: &[f32]) {
        let mut state = self.vad_state.lock();
        state.vad.accept_waveform(samples.to_vec());

        // Speech state transitions, for operator-visible logging
        let is_speech = state.vad.is_speech();
        if is_speech && !state.was_speaking {
            state.speech_start = Some(Instant::now());
            info!("🎤 Speech started");
        } else if !is_speech
            && state.was_speaking
            && let Some(start) = state.speech_start.take()
        {
            info!("🎤 Speech ended ({:.1}s)", start.elapsed().as_secs_f32());
        }
        state.was_speaking = is_speech;

        if !state.vad.is_empty() {
            let segment = state.vad.front();
            state.vad.pop();

            if !segment.samples.is_empty() {
                debug!("Segment completed: {} samples", segment.samples.len());

                let samples_to_send = segment.samples.clone();
                drop(state); // release the VAD lock before touching the channel

                if let Err(e) = self.segment_tx.try_send(samples_to_send) {
                    warn!("Failed to send segment (channel full): {}", e);
                }
            }
        }
    }

    /// Transcribe a completed speech segment.
    ///
    /// Returns `None` for empty segments or empty transcriptions.
    pub fn transcribe_segment(&self, samples: &[f32]) -> Option<String> {
        if samples.is_empty() {
            debug!("Empty speech segment");
            return None;
        }

        debug!("Transcribing {} samples", samples.len());

        let mut whisper = self.whisper.lock();
        let result = whisper.transcribe(self.sample_rate, samples);
        drop(whisper);

        let text = result.text.trim().to_string();

        if text.is_empty() {
            debug!("Empty transcription result");
            return None;
        }

        info!("🗣️ You: {}", text);
        Some(text)
    }
}
