//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name used as `sender` on every outbound message.
    pub identifier: String,

    /// Capacity of every bounded command queue.
    pub chan_buf_size: usize,

    pub tam: TamConfig,
    pub communication: CommunicationConfig,
    pub crypto: CryptoConfig,
    pub evidence: EvidenceConfig,
    pub debug: DebugConfig,
    pub tlee: TleeConfig,
    pub v2x: V2xConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identifier: "taf".to_owned(),
            chan_buf_size: 1000,
            tam: TamConfig::default(),
            communication: CommunicationConfig::default(),
            crypto: CryptoConfig::default(),
            evidence: EvidenceConfig::default(),
            debug: DebugConfig::default(),
            tlee: TleeConfig::default(),
            v2x: V2xConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a JSON file layered over the defaults and validates it.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the file cannot be read,
    /// [`EngineError::Json`] if it is malformed and [`EngineError::Config`]
    /// if a value is out of range.
    pub fn load_json(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`EngineError::Config`] for zero shards, zero queue capacity
    /// or a zero V2X interval.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tam.trust_model_instance_shards == 0 {
            return Err(EngineError::Config("tam.trust_model_instance_shards must be at least 1".to_owned()));
        }
        if self.chan_buf_size == 0 {
            return Err(EngineError::Config("chan_buf_size must be at least 1".to_owned()));
        }
        if self.v2x.check_interval_secs == 0 || self.v2x.node_ttl_secs == 0 {
            return Err(EngineError::Config("v2x intervals must be at least 1 second".to_owned()));
        }
        Ok(())
    }
}

/// Trust assessment manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TamConfig {
    /// Number of worker shards owning trust model instances.
    pub trust_model_instance_shards: usize,
}

impl Default for TamConfig {
    fn default() -> Self {
        Self { trust_model_instance_shards: 1 }
    }
}

/// Topics of this engine and of the evidence sources it subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub taf_endpoint: String,
    pub aiv_endpoint: String,
    pub mbd_endpoint: String,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self { taf_endpoint: "taf".to_owned(), aiv_endpoint: "aiv".to_owned(), mbd_endpoint: "mbd".to_owned() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Sign outbound and verify inbound messages.
    pub enabled: bool,
    /// Key reference mixed into every integrity tag.
    pub key_ref: String,
    /// Log failed verifications but process the message anyway.
    pub ignore_verification_results: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub aiv: AivConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AivConfig {
    /// Interval requested from the attestation verifier between reports.
    pub check_interval_ms: u64,
}

impl Default for AivConfig {
    fn default() -> Self {
        Self { check_interval_ms: 1000 }
    }
}

/// Fixed identifiers for reproducible test runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub fixed_session_id: Option<String>,
    pub fixed_subscription_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TleeConfig {
    /// Use the built-in path fusion instead of an external engine.
    pub use_internal_tlee: bool,
}

impl Default for TleeConfig {
    fn default() -> Self {
        Self { use_internal_tlee: true }
    }
}

/// Vehicle observation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct V2xConfig {
    /// Vehicles unseen for this long lose their dynamically spawned instances.
    pub node_ttl_secs: u64,
    pub check_interval_secs: u64,
}

impl Default for V2xConfig {
    fn default() -> Self {
        Self { node_ttl_secs: 5, check_interval_secs: 1 }
    }
}

impl V2xConfig {
    #[must_use]
    pub fn node_ttl(&self) -> Duration {
        Duration::from_secs(self.node_ttl_secs)
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok(), "default config must validate");
        assert_eq!(config.tam.trust_model_instance_shards, 1);
        assert_eq!(config.chan_buf_size, 1000);
        assert!(config.tlee.use_internal_tlee);
    }

    #[test]
    fn partial_json_is_layered_over_defaults() {
        let json = r#"{ "tam": { "trust_model_instance_shards": 4 }, "v2x": { "node_ttl_secs": 30 } }"#;
        let config: EngineConfig = match serde_json::from_str(json) {
            Ok(c) => c,
            Err(e) => panic!("config rejected: {e}"),
        };
        assert_eq!(config.tam.trust_model_instance_shards, 4);
        assert_eq!(config.v2x.node_ttl(), Duration::from_secs(30));
        assert_eq!(config.v2x.check_interval_secs, 1);
        assert_eq!(config.communication.mbd_endpoint, "mbd");
    }

    #[test]
    fn zero_shards_are_rejected() {
        let mut config = EngineConfig::default();
        config.tam.trust_model_instance_shards = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = EngineConfig { chan_buf_size: 0, ..EngineConfig::default() };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn load_json_reports_missing_file() {
        let result = EngineConfig::load_json(Path::new("/nonexistent/taf-config.json"));
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
