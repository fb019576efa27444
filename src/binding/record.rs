use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;
use crate::types::BoundIdentity;

/// Caller-supplied context recorded with a binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingContext {
    pub entity: Option<String>,
    pub role: Option<String>,
}

/// Request environment captured when a binding is created or validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Sub-second capture time
    pub timestamp: DateTime<Utc>,
    pub user_agent: String,
    pub ip_address: String,
    pub session_id: Option<String>,
    pub referrer: Option<String>,
    pub request_time: DateTime<Utc>,
    pub server_signature: String,
    pub custom: BindingContext,
}

/// Everything covered by the binding HMAC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingData {
    pub fingerprint: String,
    pub identity: BoundIdentity,
    pub context: ContextSnapshot,
    /// 32 random bytes, hex
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptographicBinding {
    pub data: BindingData,
    /// Hex HMAC-SHA256 of the JSON encoding of `data`
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkData {
    pub user_id: String,
    pub timestamp: i64,
    pub random_seed: String,
    pub context_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityToken {
    pub value: String,
    /// Unix seconds; part of the HMAC key
    pub timestamp: i64,
    pub sequence: u64,
    pub context_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBinding {
    pub schema_version: u16,
    pub document_fingerprint: String,
    pub contextual_data: ContextSnapshot,
    pub cryptographic_binding: CryptographicBinding,
    /// Sealed [`WatermarkData`]
    pub invisible_watermark: String,
    pub integrity_token: IntegrityToken,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Persisted row; the binding itself is only stored sealed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingRecord {
    pub schema_version: u16,
    pub binding_id: String,
    pub encrypted_binding: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Record for BindingRecord {
    const TABLE: &'static str = "document_bindings";

    fn key(&self) -> &str {
        &self.binding_id
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct BindingReceipt {
    pub binding_id: String,
    pub validation_code: String,
    pub binding: DocumentBinding,
}

/// Why a binding failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingFailure {
    BindingNotFound,
    BindingExpired,
    DocumentAltered,
    SuspiciousContext,
    TemporalIntegrityCompromised,
    InvalidCryptographicBinding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingValidation {
    pub valid: bool,
    pub reason: Option<BindingFailure>,
    pub suspicion_level: Option<f64>,
}

impl BindingValidation {
    pub fn passed(suspicion_level: f64) -> Self {
        Self {
            valid: true,
            reason: None,
            suspicion_level: Some(suspicion_level),
        }
    }

    pub fn failed(reason: BindingFailure) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            suspicion_level: None,
        }
    }

    pub fn suspicious(suspicion_level: f64) -> Self {
        Self {
            valid: false,
            reason: Some(BindingFailure::SuspiciousContext),
            suspicion_level: Some(suspicion_level),
        }
    }
}
