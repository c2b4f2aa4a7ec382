//! Application settings.
//!
//! Layered loading, highest priority last:
//! 1. `config/default.toml` (optional)
//! 2. `config/{env}.toml` (optional)
//! 3. Environment variables with the `HEARTH` prefix (`HEARTH__SERVER__PORT=9000`)

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.silence_duration_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.silence_duration_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !matches!(self.audio.frame_duration_ms, 10 | 20 | 30) {
            return Err(ConfigError::InvalidValue {
                field: "audio.frame_duration_ms".to_string(),
                message: "voice activity detection supports 10, 20 or 30 ms frames".to_string(),
            });
        }
        if self.audio.output_sample_rate == 0 || self.audio.input_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: "sample rates must be non-zero".to_string(),
            });
        }
        if self.engine.max_history_messages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_history_messages".to_string(),
                message: "history cap must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable permissive CORS for the local UI.
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_true(),
        }
    }
}

/// Audio format and segmentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Input PCM sample rate (device microphone).
    #[serde(default = "default_input_rate")]
    pub input_sample_rate: u32,

    /// Output PCM sample rate (synthesized speech).
    #[serde(default = "default_output_rate")]
    pub output_sample_rate: u32,

    /// Voice-activity frame duration in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_duration_ms: u32,

    /// Seconds of trailing silence that finalize an utterance.
    #[serde(default = "default_silence_duration")]
    pub silence_duration_secs: f32,

    /// Gain applied to device-bound audio, in dB.
    #[serde(default = "default_gain_db")]
    pub gain_db: f32,

    /// Post-limit amplitude ceiling for device-bound audio.
    #[serde(default = "default_ceiling")]
    pub ceiling: f32,
}

fn default_input_rate() -> u32 {
    16_000
}
fn default_output_rate() -> u32 {
    24_000
}
fn default_frame_ms() -> u32 {
    30
}
fn default_silence_duration() -> f32 {
    1.5
}
fn default_gain_db() -> f32 {
    7.0
}
fn default_ceiling() -> f32 {
    0.89
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_input_rate(),
            output_sample_rate: default_output_rate(),
            frame_duration_ms: default_frame_ms(),
            silence_duration_secs: default_silence_duration(),
            gain_db: default_gain_db(),
            ceiling: default_ceiling(),
        }
    }
}

/// Inference engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Language model reference (repo id or local path).
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Speech-to-text model reference.
    #[serde(default = "default_stt_model")]
    pub stt_model: String,

    /// Text-to-speech model reference.
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Maximum tokens per generated reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// History messages included in each context build.
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,

    /// The active model emits reasoning traces that must be stripped.
    #[serde(default)]
    pub thinking_model: bool,
}

fn default_llm_model() -> String {
    "local/assistant-3b-instruct".to_string()
}
fn default_stt_model() -> String {
    "local/whisper-large-turbo".to_string()
}
fn default_tts_model() -> String {
    "local/voicebox-turbo".to_string()
}
fn default_max_tokens() -> usize {
    512
}
fn default_max_history() -> usize {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_model: default_llm_model(),
            stt_model: default_stt_model(),
            tts_model: default_tts_model(),
            max_tokens: default_max_tokens(),
            max_history_messages: default_max_history(),
            thinking_model: false,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; `:memory:` for ephemeral runs.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory holding voice reference WAV files.
    #[serde(default)]
    pub voices_dir: Option<String>,
}

fn default_db_path() -> String {
    "hearth.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            voices_dir: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("HEARTH")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.audio.frame_duration_ms, 30);
        assert_eq!(settings.engine.max_history_messages, 30);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_frame_duration() {
        let mut settings = Settings::default();
        settings.audio.frame_duration_ms = 25;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_silence() {
        let mut settings = Settings::default();
        settings.audio.silence_duration_secs = 0.0;
        assert!(settings.validate().is_err());
    }
}
