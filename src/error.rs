//! Error types and handling for the document sealing library
//!
//! Every pipeline stage returns [`Result`]. A stage that decides the request
//! must not proceed returns [`Error::Rejected`] carrying a typed
//! [`Rejection`]; callers match on the variant, never on message text.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    io,
    result::Result as StdResult,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Custom result type for sealing operations
pub type Result<T> = StdResult<T, Error>;

/// Core error type for sealing operations
#[derive(Error, Debug)]
#[non_exhaustive]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Document rejected: {0}")]
    Rejected(Rejection),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Absent, expired and unauthorized lookups all collapse into this
    /// variant so callers cannot tell them apart.
    #[error("Not found")]
    NotFound,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(#[from] EncryptionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Sanitizer error: {0}")]
    SanitizerError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Internal error: {0}")]
    InternalError(#[source] Box<dyn StdError + Send + Sync>),
}

impl Error {
    /// Helper for creating an `InternalError` with a boxed source
    pub fn internal<E: StdError + Send + Sync + 'static>(e: E) -> Self {
        Error::InternalError(Box::new(e))
    }

    /// True when the error is a hard rejection raised by a gate
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Error::Rejected(rejection)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::CryptoError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::internal(err)
    }
}

// -------------------- Rejections --------------------

/// Why a signing request was refused before a signature was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// Forgery heuristics scored at or above the reject threshold
    ForgeryIndicators { indicators: Vec<String>, score: u32 },
    /// PDF carries images but no text operators at all
    ImageOnlyDocument,
    /// Large PDF without any text content
    OversizedWithoutText { size_bytes: u64 },
    /// Device is unknown or below the trust threshold
    UntrustedDevice { reason: String },
    /// Too many device indicators fired for a single request
    SuspiciousDeviceActivity { indicators: Vec<String> },
    /// Burst of new devices from differing locations
    CrossDeviceFraud { indicators: Vec<String> },
}

impl Rejection {
    /// Indicators that contributed to the rejection, if any
    pub fn indicators(&self) -> &[String] {
        match self {
            Rejection::ForgeryIndicators { indicators, .. }
            | Rejection::SuspiciousDeviceActivity { indicators }
            | Rejection::CrossDeviceFraud { indicators } => indicators,
            _ => &[],
        }
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Rejection::ForgeryIndicators { indicators, score } => write!(
                f,
                "screen capture or non-original document characteristics (score {}): {}",
                score,
                indicators.join(", ")
            ),
            Rejection::ImageOnlyDocument => {
                write!(f, "PDF contains only images and no selectable text")
            }
            Rejection::OversizedWithoutText { size_bytes } => write!(
                f,
                "PDF of {:.1}MB carries no text, which indicates an image conversion",
                *size_bytes as f64 / (1024.0 * 1024.0)
            ),
            Rejection::UntrustedDevice { reason } => write!(f, "untrusted device: {}", reason),
            Rejection::SuspiciousDeviceActivity { indicators } => write!(
                f,
                "suspicious device activity: {}",
                indicators.join(", ")
            ),
            Rejection::CrossDeviceFraud { indicators } => write!(
                f,
                "possible cross-device fraud: {}",
                indicators.join(", ")
            ),
        }
    }
}

// -------------------- Sub-Error Categories --------------------

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EncryptionError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption process failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed")]
    Decrypt,

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Snapshot failed for table {table}: {reason}")]
    Snapshot { table: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_indicators() {
        let rejection = Rejection::ForgeryIndicators {
            indicators: vec!["image_only_pdf".into(), "low_quality_image".into()],
            score: 3,
        };
        assert_eq!(rejection.indicators().len(), 2);
        assert!(Rejection::ImageOnlyDocument.indicators().is_empty());
    }

    #[test]
    fn test_rejection_converts_into_error() {
        let err: Error = Rejection::UntrustedDevice { reason: "low_trust_level".into() }.into();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("low_trust_level"));
        assert!(!Error::NotFound.is_rejection());
    }
}
