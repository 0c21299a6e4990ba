//! Application configuration and CLI argument parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Cpu => write!(f, "cpu"),
            Provider::Cuda => write!(f, "cuda"),
            Provider::CoreMl => write!(f, "coreml"),
        }
    }
}

impl Provider {
    /// Convert to the provider string sherpa-rs expects.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Clinical voice assistant configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "clinical-voice-assistant")]
#[command(author, version, about = "A real-time clinical voice assistant", long_about = None)]
pub struct AppConfig {
    /// Directory containing model files (Whisper, VAD, TTS)
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Directory for file-backed clinical data (patients, schedule, transcripts)
    #[arg(long, env = "DATA_DIR", default_value_os_t = default_data_dir())]
    pub data_dir: PathBuf,

    /// Audio sample rate for speech recognition
    #[arg(long, default_value = "16000")]
    pub sample_rate: u32,

    /// Voice activity detection threshold (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    pub vad_threshold: f32,

    /// VAD silence duration in seconds (how long to wait before considering speech ended)
    #[arg(long, default_value = "0.8")]
    pub vad_silence_duration: f32,

    /// Groq API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: String,

    /// Groq model identifier
    #[arg(long, short = 'm', env = "GROQ_MODEL", default_value = "llama3-70b-8192")]
    pub groq_model: String,

    /// LLM temperature (0.0-2.0). Agents extract structured intents, so keep this low.
    #[arg(long, default_value = "0.1", value_parser = parse_temperature)]
    pub temperature: f64,

    /// Maximum tokens per LLM completion
    #[arg(long, default_value = "2048")]
    pub max_tokens: u64,

    /// PostgreSQL host for the EHR store (file-backed fallback is used when unset)
    #[arg(long, env = "POSTGRES_HOST")]
    pub postgres_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, env = "POSTGRES_PORT", default_value = "5432")]
    pub postgres_port: u16,

    /// PostgreSQL database name
    #[arg(long, env = "POSTGRES_DB", default_value = "clinical_ehr")]
    pub postgres_db: String,

    /// PostgreSQL user
    #[arg(long, env = "POSTGRES_USER", default_value = "postgres")]
    pub postgres_user: String,

    /// PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "", hide_env_values = true)]
    pub postgres_password: String,

    /// STT language code (e.g., en, es, fr). Use "auto" for automatic detection.
    #[arg(long, default_value = "en")]
    pub stt_language: String,

    /// Text-to-speech speed multiplier
    #[arg(long, default_value = "1.0")]
    pub tts_speed: f32,

    /// TTS speaker ID for the Kokoro model
    #[arg(long, default_value = "2")]
    pub tts_speaker_id: i32,

    /// Print responses only, never speak them
    #[arg(long)]
    pub mute: bool,

    /// Delay in milliseconds before resuming the microphone after playback ends
    #[arg(long, default_value = "300")]
    pub post_playback_delay_ms: u64,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Number of threads for STT/TTS models (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub num_threads: usize,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();
        config.normalize_thread_counts();
        config
    }

    /// Auto-detect the model thread count from CPU cores and provider.
    ///
    /// With CUDA the GPU handles parallelism internally, so a single CPU
    /// thread avoids contention and CUDA allocation failures. On CPU,
    /// cores/3 leaves headroom for the audio and dispatch tasks.
    fn normalize_thread_counts(&mut self) {
        if self.num_threads == 0 {
            self.num_threads = if self.effective_provider() == Provider::Cuda {
                1
            } else {
                (num_cpus::get() / 3).max(1)
            };
        }
    }

    /// Get the effective acceleration provider.
    pub fn effective_provider(&self) -> Provider {
        self.provider.unwrap_or_else(detect_provider)
    }

    /// Compose the PostgreSQL connection URL, if a host is configured.
    pub fn database_url(&self) -> Option<String> {
        self.postgres_host.as_ref().map(|host| {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                self.postgres_user, self.postgres_password, host, self.postgres_port, self.postgres_db
            )
        })
    }

    /// Get the path to the Whisper encoder model.
    pub fn whisper_encoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-encoder.int8.onnx")
    }

    /// Get the path to the Whisper decoder model.
    pub fn whisper_decoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-decoder.int8.onnx")
    }

    /// Get the path to the Whisper tokens file.
    pub fn whisper_tokens_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-tokens.txt")
    }

    /// Get the effective STT language code for Whisper.
    /// Returns empty string for auto-detection, otherwise the language code.
    pub fn effective_stt_language(&self) -> &str {
        if self.stt_language.eq_ignore_ascii_case("auto") { "" } else { &self.stt_language }
    }

    /// Get the path to the VAD model.
    pub fn vad_model_path(&self) -> PathBuf {
        self.model_dir.join("silero_vad.onnx")
    }

    fn tts_dir(&self) -> PathBuf {
        self.model_dir.join("tts").join("kokoro-multi-lang-v1_0")
    }

    /// Get the path to the Kokoro TTS model.
    pub fn tts_model_path(&self) -> PathBuf {
        self.tts_dir().join("model.onnx")
    }

    /// Get the path to the Kokoro TTS voices.bin file.
    pub fn tts_voices_path(&self) -> PathBuf {
        self.tts_dir().join("voices.bin")
    }

    /// Get the path to the TTS tokens file.
    pub fn tts_tokens_path(&self) -> PathBuf {
        self.tts_dir().join("tokens.txt")
    }

    /// Get the path to the TTS espeak data directory.
    pub fn tts_data_dir(&self) -> PathBuf {
        self.tts_dir().join("espeak-ng-data")
    }

    /// Get the American English lexicon file for Kokoro.
    /// Clinical responses are spoken in English only.
    pub fn tts_lexicon(&self) -> String {
        self.tts_dir().join("lexicon-us-en.txt").to_string_lossy().to_string()
    }

    /// Get the directory holding file-backed medical reference data.
    pub fn medical_data_dir(&self) -> PathBuf {
        self.data_dir.join("medical")
    }

    /// Get the directory holding the EHR file-store fallback.
    pub fn ehr_data_dir(&self) -> PathBuf {
        self.data_dir.join("ehr")
    }

    /// Get the directory holding persisted transcriptions.
    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.model_dir.exists() {
            anyhow::bail!("Model directory does not exist: {}", self.model_dir.display());
        }

        let mut required_files = vec![
            self.whisper_encoder_path(),
            self.whisper_decoder_path(),
            self.whisper_tokens_path(),
            self.vad_model_path(),
        ];

        // TTS models are only needed when responses are spoken
        if !self.mute {
            required_files.extend([self.tts_model_path(), self.tts_voices_path(), self.tts_tokens_path()]);
        }

        for path in &required_files {
            if !path.exists() {
                anyhow::bail!("Required model file not found: {}", path.display());
            }
        }

        if !(0.0..=1.0).contains(&self.vad_threshold) {
            anyhow::bail!("VAD threshold must be between 0.0 and 1.0");
        }

        if self.tts_speed <= 0.0 {
            anyhow::bail!("TTS speed must be positive");
        }

        if self.groq_api_key.trim().is_empty() {
            anyhow::bail!("GROQ_API_KEY is not set");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Model directory: {}", self.model_dir.display());
        info!("  Data directory: {}", self.data_dir.display());
        info!("  Sample rate: {} Hz", self.sample_rate);
        info!("  VAD threshold: {}", self.vad_threshold);
        info!("  Groq model: {}", self.groq_model);
        info!("  LLM temperature: {}", self.temperature);
        match self.postgres_host {
            Some(ref host) => info!("  EHR store: postgres://{}@{}:{}/{}", self.postgres_user, host, self.postgres_port, self.postgres_db),
            None => info!("  EHR store: file-backed ({})", self.ehr_data_dir().display()),
        }
        info!("  STT language: {}", self.stt_language);
        info!("  Provider: {}", self.effective_provider());
        if self.mute {
            info!("  TTS: disabled (--mute)");
        } else {
            info!("  TTS speaker: {} (speed {})", self.tts_speaker_id, self.tts_speed);
        }
    }
}

/// Get the default model directory (~/.clinical-voice-assistant/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".clinical-voice-assistant").join("models")
    } else {
        PathBuf::from("models")
    }
}

/// Get the default data directory (~/.clinical-voice-assistant/data).
fn default_data_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".clinical-voice-assistant").join("data")
    } else {
        PathBuf::from("data")
    }
}

/// Auto-detect the best hardware acceleration provider.
fn detect_provider() -> Provider {
    #[cfg(target_os = "macos")]
    {
        Provider::CoreMl
    }

    #[cfg(target_os = "linux")]
    {
        if has_nvidia_gpu() { Provider::Cuda } else { Provider::Cpu }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Provider::Cpu
    }
}

/// Check if an NVIDIA GPU is available (Linux only).
#[cfg(target_os = "linux")]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    let nvidia_paths = ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm"];

    for path in &nvidia_paths {
        if Path::new(path).exists() {
            return true;
        }
    }

    // Tegra (Jetson) devices
    Path::new("/etc/nv_tegra_release").exists()
}

/// Parse and validate temperature value (0.0-2.0).
fn parse_temperature(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{}' is not a valid float", s))?;
    if (0.0..=2.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("temperature must be between 0.0 and 2.0, got {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_temperature_range() {
        assert_eq!(parse_temperature("0.1").unwrap(), 0.1);
        assert_eq!(parse_temperature("2.0").unwrap(), 2.0);
        assert!(parse_temperature("2.1").is_err());
        assert!(parse_temperature("-0.5").is_err());
        assert!(parse_temperature("warm").is_err());
    }
}
