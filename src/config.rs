//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::Result;
use crate::error::Error;

/// Environment variable consulted when the config carries no key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Credential presented when opening the realtime session
    #[serde(default)]
    pub api_key: String,

    /// Realtime model name
    #[serde(default = "default_model")]
    pub model: String,

    /// WebSocket endpoint (the model is appended as a query parameter)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Sampling temperature sent with every session update
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens per response in audio mode
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Delay before a completed turn falls back to the initial phase
    #[serde(default = "default_phase_reset_ms")]
    pub phase_reset_ms: u64,

    /// Pause between reconnect attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Consecutive undecodable frames tolerated before the session is reopened
    #[serde(default = "default_max_decode_failures")]
    pub max_decode_failures: u32,

    /// Voice (audio in/out) settings
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Which registered tools belong to which phase
    #[serde(default)]
    pub tools: ToolSetConfig,

    /// Weather upstream endpoints
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Voice mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default)]
    pub turn_detection: TurnDetectionConfig,

    /// Capture and playback sample rate (mono PCM16)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

/// Server-side voice activity detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    #[serde(rename = "type", default = "default_turn_detection_type")]
    pub kind: String,

    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,

    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,

    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

/// Tool names exposed per phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSetConfig {
    /// Tools offered while the conversation is in its initial phase
    #[serde(default = "default_initial_tools")]
    pub initial: Vec<String>,

    /// Tools offered once a lookup has moved the conversation on
    #[serde(default = "default_helper_tools")]
    pub helper: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,

    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,
}

fn default_model() -> String {
    "gpt-4o-mini-realtime-preview-2024-12-17".to_string()
}

fn default_endpoint() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_phase_reset_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_decode_failures() -> u32 {
    3
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_audio_format() -> String {
    "pcm16".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_sample_rate() -> u32 {
    24000
}

fn default_turn_detection_type() -> String {
    "server_vad".to_string()
}

fn default_vad_threshold() -> f32 {
    0.8
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

fn default_initial_tools() -> Vec<String> {
    vec!["lookup_intents".to_string(), "execute_intent".to_string()]
}

fn default_helper_tools() -> Vec<String> {
    vec!["lookup_weather".to_string(), "execute_intent".to_string()]
}

fn default_geocoding_url() -> String {
    "https://geocoding-api.open-meteo.com/v1/search".to_string()
}

fn default_forecast_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            endpoint: default_endpoint(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            phase_reset_ms: default_phase_reset_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_decode_failures: default_max_decode_failures(),
            voice: VoiceConfig::default(),
            tools: ToolSetConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            voice: default_voice(),
            audio_format: default_audio_format(),
            transcription_model: default_transcription_model(),
            turn_detection: TurnDetectionConfig::default(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            kind: default_turn_detection_type(),
            threshold: default_vad_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

impl Default for ToolSetConfig {
    fn default() -> Self {
        Self {
            initial: default_initial_tools(),
            helper: default_helper_tools(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            geocoding_url: default_geocoding_url(),
            forecast_url: default_forecast_url(),
        }
    }
}

impl Config {
    /// Full WebSocket URL including the model query parameter
    pub fn session_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint {:?}: {}", self.endpoint, e)))?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }

    /// Resolve the credential, falling back to the environment
    pub fn resolve_api_key(&self) -> Result<String> {
        if !self.api_key.trim().is_empty() {
            return Ok(self.api_key.trim().to_string());
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(Error::Config(format!(
                "No API key configured. Set \"api_key\" in {:?} or export {}.",
                config_path(),
                API_KEY_ENV
            ))),
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default location
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

/// Load configuration from an explicit path
pub fn load_from(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'parley onboard' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to the default location
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

/// Save configuration to an explicit path
pub fn save_to(config: &Config, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Interactive setup wizard
pub fn onboard() -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Text};

    ui::print_header("Setup Wizard", "local");
    println!("  Let's get Parley configured.\n");

    let mut config = Config::default();

    let key = Text::new("Enter your OpenAI API key (leave empty to use $OPENAI_API_KEY):")
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.api_key = key.trim().to_string();

    let model = Text::new("Realtime model:")
        .with_default(&config.model)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.model = model;

    config.voice.enabled = Confirm::new("Enable voice mode by default?")
        .with_default(false)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    if config.voice.enabled && !cfg!(feature = "audio") {
        ui::print_warning("This build has no audio support; rebuild with --features audio.");
    }

    ui::print_thinking("Saving configuration");
    save(&config)?;

    println!();
    ui::print_success("Setup complete!");
    ui::print_step("Run 'parley chat' to start a conversation.");

    Ok(())
}
