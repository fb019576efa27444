//! Logger implementation for the sealing pipeline

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber
pub struct Logger {
    level: String,
    initialized: bool,
}

impl Logger {
    pub fn new() -> Self {
        Self::with_level("info")
    }

    pub fn with_level(level: &str) -> Self {
        Self {
            level: level.to_string(),
            initialized: false,
        }
    }

    /// `RUST_LOG` takes precedence over the configured level. Installing
    /// twice (tests, embedding applications) is not an error.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.level));

        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
        {
            info!(level = %self.level, "logger initialized");
        }
        self.initialized = true;
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// First three characters of a CPF followed by a mask, for log lines
pub fn mask_cpf(cpf: &str) -> String {
    let visible: String = cpf.chars().take(3).collect();
    format!("{}***", visible)
}

/// Eight-character preview of a fingerprint or token, for log lines
pub fn preview(value: &str) -> String {
    let head: String = value.chars().take(8).collect();
    format!("{}...", head)
}
