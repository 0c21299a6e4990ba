//! Text-to-speech synthesizer using Kokoro models.

use anyhow::Result;
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Kokoro output sample rate in Hz.
const KOKORO_SAMPLE_RATE: u32 = 24000;

/// Text-to-speech synthesizer for spoken responses.
pub struct Synthesizer {
    tts: KokoroTts,
    speaker_id: i32,
    speed: f32,
}

impl Synthesizer {
    /// Create a new TTS synthesizer.
    ///
    /// # Errors
    /// Returns an error if TTS initialization fails (e.g., missing model files).
    pub fn new(config: &AppConfig) -> Result<Self> {
        let provider = config.effective_provider();

        info!("Initializing Kokoro TTS synthesizer with {} provider", provider);
        info!("TTS speaker ID: {} (speed {})", config.tts_speaker_id, config.tts_speed);

        let tts_config = KokoroTtsConfig {
            model: config.tts_model_path().to_string_lossy().to_string(),
            voices: config.tts_voices_path().to_string_lossy().to_string(),
            tokens: config.tts_tokens_path().to_string_lossy().to_string(),
            data_dir: config.tts_data_dir().to_string_lossy().to_string(),
            lexicon: config.tts_lexicon(),
            length_scale: 1.0 / config.tts_speed, // length_scale is inverse of speed
            onnx_config: OnnxConfig {
                provider: provider.as_sherpa_provider().to_string(),
                num_threads: config.num_threads.try_into().unwrap_or(2),
                debug: config.verbose,
            },
            common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() }, // Kokoro only supports 1
            ..Default::default()
        };

        let tts = KokoroTts::new(tts_config);

        Ok(Self { tts, speaker_id: config.tts_speaker_id, speed: config.tts_speed })
    }

    /// Synthesize a single sentence.
    ///
    /// # Errors
    /// Returns an error if TTS generation fails.
    pub fn synthesize_sentence(&mut self, sentence: &str) -> Result<Vec<f32>> {
        if sentence.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!("Synthesizing sentence: \"{}\"", sentence);

        let audio = self.tts.create(sentence, self.speaker_id, self.speed).map_err(|e| anyhow::anyhow!("TTS generation failed: {}", e))?;

        Ok(audio.samples)
    }

    /// Get the sample rate of the synthesized audio.
    pub fn sample_rate(&self) -> u32 {
        KOKORO_SAMPLE_RATE
    }
}

/// Split text into sentences for incremental synthesis.
///
/// Formatted clinical replies are often multi-line lists; newlines count as
/// sentence boundaries so each list entry is spoken as its own unit.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);

        if c == '.' || c == '!' || c == '?' || c == '\n' {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }

    let trimmed = current.trim().to_string();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_terminators() {
        let sentences = split_sentences("Order created. Pending verification! Anything else?");
        assert_eq!(sentences, vec!["Order created.", "Pending verification!", "Anything else?"]);
    }

    #[test]
    fn test_split_on_newlines() {
        let sentences = split_sentences("Available appointments:\n- Monday with Dr Smith\n- Tuesday with Dr Lee");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Available appointments:");
    }

    #[test]
    fn test_trailing_text_kept() {
        let sentences = split_sentences("No significant interactions found");
        assert_eq!(sentences, vec!["No significant interactions found"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_sentences("   ").is_empty());
    }
}
