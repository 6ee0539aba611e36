//! Configuration management for meshcall services
//!
//! Settings are read from the process environment (after loading an
//! optional `.env` file) under the `MESHCALL_` prefix, e.g.
//! `MESHCALL_RELAY_URL`, `MESHCALL_ICE_SERVERS=stun:a,stun:b`,
//! `MESHCALL_MAX_ICE_RESTARTS=3`.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MESHCALL";

fn default_relay_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_subject_prefix() -> String {
    "meshcall".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

fn default_good_rtt_ms() -> f64 {
    100.0
}

fn default_fair_rtt_ms() -> f64 {
    300.0
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_command_channel_capacity() -> usize {
    64
}

/// Call session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    /// Signaling relay URL (NATS)
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Subject prefix for relay inboxes and room commands
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON logs instead of human-readable console output
    #[serde(default)]
    pub log_json: bool,
    /// STUN/TURN server URLs handed to every peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
    /// RTT below which a link is rated good
    #[serde(default = "default_good_rtt_ms")]
    pub quality_good_rtt_ms: f64,
    /// RTT below which a link is rated fair; anything above is poor
    #[serde(default = "default_fair_rtt_ms")]
    pub quality_fair_rtt_ms: f64,
    /// Cap on ICE restarts per link. Unset means every failure restarts.
    #[serde(default)]
    pub max_ice_restarts: Option<u32>,
    /// Ring buffer size of each event bus topic
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Pending facade commands before callers wait
    #[serde(default = "default_command_channel_capacity")]
    pub command_channel_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            relay_url: default_relay_url(),
            subject_prefix: default_subject_prefix(),
            log_level: default_log_level(),
            log_json: false,
            ice_servers: default_ice_servers(),
            quality_good_rtt_ms: default_good_rtt_ms(),
            quality_fair_rtt_ms: default_fair_rtt_ms(),
            max_ice_restarts: None,
            event_channel_capacity: default_event_channel_capacity(),
            command_channel_capacity: default_command_channel_capacity(),
        }
    }
}

impl CallConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an explicit environment source
    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(
                environment
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ice_servers"),
            )
            .build()?;

        let config: CallConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality_good_rtt_ms <= 0.0 || self.quality_fair_rtt_ms <= self.quality_good_rtt_ms {
            return Err(ConfigError::Message(format!(
                "quality thresholds must satisfy 0 < good ({}) < fair ({})",
                self.quality_good_rtt_ms, self.quality_fair_rtt_ms
            )));
        }
        if self.event_channel_capacity == 0 || self.command_channel_capacity == 0 {
            return Err(ConfigError::Message(
                "channel capacities must be greater than zero".to_string(),
            ));
        }
        if self.subject_prefix.is_empty() {
            return Err(ConfigError::Message("subject prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get relay URL
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
