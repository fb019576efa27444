//! Configuration types and validation for the sealing pipeline
//!
//! Every component receives the pieces of [`Config`] it needs at
//! construction time. Nothing reads secrets from ambient global state.

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Server-wide secret used for key derivation, HMAC bindings and sealing
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerSecret(String);

impl ServerSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSecret(**redacted**)")
    }
}

/// What the signing pipeline does when the device check itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFailurePolicy {
    /// Log the failure and continue without device information
    FailOpen,
    /// Abort the request
    FailClosed,
}

/// Whether a zero-knowledge token may be accepted without an identity claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroKnowledgeMode {
    RequireClaim,
    /// Token presence and freshness alone are accepted
    AllowPresenceOnly,
}

/// Record lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub document_days: i64,
    pub binding_days: i64,
    pub zero_knowledge_hours: i64,
    pub token_days: i64,
}

/// Forgery heuristics thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Score at or above which the document is rejected
    pub reject_score: u32,
    /// Score at or above which the document is accepted with a warning
    pub monitor_score: u32,
    /// Files modified more recently than this are tagged `file_too_recent`
    pub recent_file_secs: i64,
    /// Intake only warns about files younger than this
    pub intake_young_file_secs: i64,
    /// Embedded creation dates closer to now than this are suspicious
    pub creation_window_secs: i64,
    /// Documents above this size without text are rejected at intake
    pub max_textless_bytes: u64,
}

/// Contextual binding validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Suspicion levels strictly above this reject the validation
    pub suspicion_threshold: f64,
    /// Re-validation sooner than this after creation looks automated
    pub copy_window_secs: f64,
}

/// Device trust settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub trust_threshold: f64,
    pub failure_policy: DeviceFailurePolicy,
    /// More than this many devices first seen inside the window is suspicious
    pub max_recent_devices: usize,
    pub recent_window_minutes: i64,
    /// Number of indicators that rejects a signing request outright
    pub reject_indicator_count: usize,
}

/// External PDF sanitizer boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    pub enabled: bool,
    pub program: String,
    pub timeout_secs: u64,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_secret: ServerSecret,
    #[serde(default = "default_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub heuristics: HeuristicsConfig,
    #[serde(default)]
    pub binding: BindingConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default = "default_zk_mode")]
    pub zero_knowledge: ZeroKnowledgeMode,
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_zk_mode() -> ZeroKnowledgeMode {
    ZeroKnowledgeMode::RequireClaim
}

// Defaults
impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            document_days: 365 * 10,
            binding_days: 30,
            zero_knowledge_hours: 24,
            token_days: 365 * 100,
        }
    }
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            reject_score: 2,
            monitor_score: 1,
            recent_file_secs: 30,
            intake_young_file_secs: 60,
            creation_window_secs: 300,
            max_textless_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            suspicion_threshold: 0.7,
            copy_window_secs: 5.0,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            trust_threshold: 0.5,
            failure_policy: DeviceFailurePolicy::FailClosed,
            max_recent_devices: 2,
            recent_window_minutes: 60,
            reject_indicator_count: 2,
        }
    }
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "pdftk".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Builds a configuration with defaults around the given secret
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            server_secret: ServerSecret::new(secret),
            public_base_url: default_base_url(),
            log_level: default_log_level(),
            retention: RetentionConfig::default(),
            heuristics: HeuristicsConfig::default(),
            binding: BindingConfig::default(),
            device: DeviceConfig::default(),
            zero_knowledge: default_zk_mode(),
            sanitizer: SanitizerConfig::default(),
        }
    }

    /// Loads and validates a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_secret.as_bytes().len() < 16 {
            return Err(Error::ConfigError(
                "server_secret must be at least 16 bytes".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.device.trust_threshold) {
            return Err(Error::ConfigError("device.trust_threshold must be within 0..=1".into()));
        }
        if !(0.0..=1.0).contains(&self.binding.suspicion_threshold) {
            return Err(Error::ConfigError(
                "binding.suspicion_threshold must be within 0..=1".into(),
            ));
        }
        if self.heuristics.monitor_score > self.heuristics.reject_score {
            return Err(Error::ConfigError(
                "heuristics.monitor_score cannot exceed reject_score".into(),
            ));
        }
        if self.device.reject_indicator_count == 0 {
            return Err(Error::ConfigError(
                "device.reject_indicator_count must be at least 1".into(),
            ));
        }
        if self.sanitizer.enabled && self.sanitizer.timeout_secs == 0 {
            return Err(Error::ConfigError("sanitizer.timeout_secs must be positive".into()));
        }
        for (name, value) in [
            ("document_days", self.retention.document_days),
            ("binding_days", self.retention.binding_days),
            ("zero_knowledge_hours", self.retention.zero_knowledge_hours),
            ("token_days", self.retention.token_days),
        ] {
            if value <= 0 {
                return Err(Error::ConfigError(format!("retention.{} must be positive", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::with_secret("0123456789abcdef0123456789abcdef");
        assert!(config.validate().is_ok());
        assert_eq!(config.device.failure_policy, DeviceFailurePolicy::FailClosed);
        assert_eq!(config.zero_knowledge, ZeroKnowledgeMode::RequireClaim);
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = Config::with_secret("short");
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = r#"
server_secret: "a-long-enough-server-secret"
device:
  failure_policy: fail_open
zero_knowledge: allow_presence_only
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.device.failure_policy, DeviceFailurePolicy::FailOpen);
        assert_eq!(config.device.trust_threshold, 0.5);
        assert_eq!(config.zero_knowledge, ZeroKnowledgeMode::AllowPresenceOnly);
        assert_eq!(config.retention.binding_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let secret = ServerSecret::new("super-secret-value");
        assert!(!format!("{:?}", secret).contains("super-secret-value"));
    }
}
