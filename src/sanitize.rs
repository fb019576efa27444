//! External PDF sanitizer boundary
//!
//! The sanitizer rewrites the upload into a copy the stamping layer can
//! open. Temporary files live in [`tempfile::NamedTempFile`] handles and
//! are removed when they drop, on success and failure alike.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::SanitizerConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Sanitizer: Send + Sync {
    async fn sanitize(&self, content: &[u8]) -> Result<Vec<u8>>;
}

/// Returns the input unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughSanitizer;

#[async_trait]
impl Sanitizer for PassthroughSanitizer {
    async fn sanitize(&self, content: &[u8]) -> Result<Vec<u8>> {
        Ok(content.to_vec())
    }
}

/// Runs `<program> <in> output <out> allow AllFeatures`
#[derive(Debug, Clone)]
pub struct PdftkSanitizer {
    program: String,
    timeout: Duration,
}

impl PdftkSanitizer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SanitizerConfig) -> Self {
        Self::new(config.program.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl Sanitizer for PdftkSanitizer {
    #[instrument(skip(self, content), fields(program = %self.program, size = content.len()))]
    async fn sanitize(&self, content: &[u8]) -> Result<Vec<u8>> {
        let input = temp_pdf()?;
        let output = temp_pdf()?;
        tokio::fs::write(input.path(), content).await?;

        let run = Command::new(&self.program)
            .arg(input.path())
            .arg("output")
            .arg(output.path())
            .args(["allow", "AllFeatures"])
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                Error::TimeoutError(format!("{} exceeded {:?}", self.program, self.timeout))
            })?
            .map_err(|e| Error::SanitizerError(format!("failed to start {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = ?result.status.code(), "sanitizer failed");
            return Err(Error::SanitizerError(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        let sanitized = tokio::fs::read(output.path()).await?;
        debug!(sanitized_size = sanitized.len(), "sanitized copy produced");
        Ok(sanitized)
    }
}

/// Picks the configured sanitizer
pub fn from_config(config: &SanitizerConfig) -> Box<dyn Sanitizer> {
    if config.enabled {
        Box::new(PdftkSanitizer::from_config(config))
    } else {
        Box::new(PassthroughSanitizer)
    }
}

fn temp_pdf() -> Result<tempfile::NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix("docseal_")
        .suffix(".pdf")
        .tempfile()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_returns_input() {
        let out = PassthroughSanitizer.sanitize(b"%PDF-1.4 body").await.unwrap();
        assert_eq!(out, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn test_missing_program_is_sanitizer_error() {
        let sanitizer = PdftkSanitizer::new("docseal-no-such-program", Duration::from_secs(5));
        let err = sanitizer.sanitize(b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, Error::SanitizerError(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_is_sanitizer_error() {
        // `false` ignores its arguments and exits 1
        let sanitizer = PdftkSanitizer::new("false", Duration::from_secs(5));
        let err = sanitizer.sanitize(b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, Error::SanitizerError(_)));
    }

    #[test]
    fn test_from_config_respects_enabled_flag() {
        let disabled = SanitizerConfig::default();
        assert!(!disabled.enabled);
        let _ = from_config(&disabled);

        let enabled = SanitizerConfig {
            enabled: true,
            ..SanitizerConfig::default()
        };
        let _ = from_config(&enabled);
    }
}
