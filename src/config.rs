//! Configuration management for M300 GW
//!
//! Handles loading, parsing and validation of the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub presets: PresetsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// MIDI port configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default = "default_port_name")]
    pub input_port: String,
    #[serde(default = "default_port_name")]
    pub output_port: String,
    /// Device channel, 1-16
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Friendly name → OS port name substring
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub port_aliases: HashMap<String, String>,
}

/// Websocket relay configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Preset library persistence
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PresetsConfig {
    #[serde(default = "default_presets_file")]
    pub file: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Protocol engine timing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Delay between consecutive requests of the initial sync
    #[serde(default = "default_request_spacing_ms")]
    pub request_spacing_ms: u64,
    /// Extra delay before the stored-effects request
    #[serde(default = "default_stored_effects_settle_ms")]
    pub stored_effects_settle_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnect attempts after the device disappears
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input_port: default_port_name(),
            output_port: default_port_name(),
            channel: default_channel(),
            port_aliases: HashMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            file: default_presets_file(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_spacing_ms: default_request_spacing_ms(),
            stored_effects_settle_ms: default_stored_effects_settle_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl MidiConfig {
    /// Map a configured alias to the OS port name, or return the name as given
    pub fn resolve_port<'a>(&'a self, name: &'a str) -> &'a str {
        self.port_aliases
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }
}

impl EngineConfig {
    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    pub fn stored_effects_settle(&self) -> Duration {
        Duration::from_millis(self.stored_effects_settle_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            let config = Self::load(path).await?;
            info!("Loaded configuration from {}", path);
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.input_port.is_empty() {
            anyhow::bail!("MIDI input_port cannot be empty");
        }
        if self.midi.output_port.is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty");
        }
        if !(1..=16).contains(&self.midi.channel) {
            anyhow::bail!("MIDI channel {} is invalid (must be 1-16)", self.midi.channel);
        }
        for (alias, target) in &self.midi.port_aliases {
            if alias.is_empty() || target.is_empty() {
                anyhow::bail!("Port alias entries cannot be empty");
            }
        }

        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }
        if self.presets.file.is_empty() {
            anyhow::bail!("Presets file cannot be empty");
        }

        Ok(())
    }
}

fn default_port_name() -> String { "M300".to_string() }
fn default_channel() -> u8 { 1 }
fn default_server_host() -> String { "127.0.0.1".to_string() }
fn default_server_port() -> u16 { crate::api::DEFAULT_API_PORT }
fn default_presets_file() -> String { "data/presets.json".to_string() }
fn default_debounce_ms() -> u64 { crate::state::DEFAULT_DEBOUNCE_MS }
fn default_request_spacing_ms() -> u64 { 50 }
fn default_stored_effects_settle_ms() -> u64 { 200 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 5000 }
