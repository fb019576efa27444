//! Document binding creation and validation

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::fingerprint::{fingerprint, DocumentFingerprint};
use super::record::*;
use crate::config::{BindingConfig, ServerSecret};
use crate::encryption::{Purpose, Sealer};
use crate::error::{Error, Result};
use crate::forensics::{ForgeryHeuristics, SuspicionTag};
use crate::hash_utils::{sha256_hex, sha256_joined};
use crate::store::{DailySequence, Table};
use crate::types::{DocumentSource, IdentityClaim, RequestHeaders, SCHEMA_VERSION};
use crate::utils::crypto_utils::{hmac_sha256_hex, opaque_id, random_hex, secure_compare};
use crate::utils::{preview, SharedClock};

// Suspicion contributions in hundredths
const IP_CHANGED: u32 = 30;
const USER_AGENT_CHANGED: u32 = 20;
const TOO_FAST: u32 = 40;
const SESSION_CHANGED: u32 = 25;

/// Inputs of the integrity token HMAC
#[derive(Serialize)]
struct IntegrityInput<'a> {
    fingerprint: &'a str,
    timestamp: i64,
    context_hash: &'a str,
    sequence: u64,
}

pub struct DocumentFingerprintEngine {
    table: Table<BindingRecord>,
    sequence: DailySequence,
    sealer: Arc<Sealer>,
    secret: ServerSecret,
    clock: SharedClock,
    config: BindingConfig,
    retention: Duration,
    heuristics: Arc<ForgeryHeuristics>,
    /// Bounds concurrent fingerprint computations
    limiter: Arc<Semaphore>,
    server_signature: String,
}

impl DocumentFingerprintEngine {
    pub fn new(
        sealer: Arc<Sealer>,
        secret: ServerSecret,
        clock: SharedClock,
        config: BindingConfig,
        retention_days: i64,
        heuristics: Arc<ForgeryHeuristics>,
    ) -> Self {
        Self {
            table: Table::new(),
            sequence: DailySequence::new(),
            sealer,
            secret,
            clock,
            config,
            retention: Duration::days(retention_days),
            heuristics,
            limiter: Arc::new(Semaphore::new(num_cpus::get())),
            server_signature: server_signature(),
        }
    }

    /// Replaces bindings and sequence counters with restored ones
    pub fn with_state(mut self, table: Table<BindingRecord>, sequence: DailySequence) -> Self {
        self.table = table;
        self.sequence = sequence;
        self
    }

    pub fn table(&self) -> &Table<BindingRecord> {
        &self.table
    }

    #[instrument(skip_all, fields(employee_id = %identity.employee_id, size = document.len()))]
    pub async fn create_binding(
        &self,
        document: &[u8],
        identity: &IdentityClaim,
        request: &RequestHeaders,
        custom: BindingContext,
    ) -> Result<BindingReceipt> {
        let fingerprint = self.fingerprint_off_runtime(document).await?;
        let now = self.clock.now();

        let context = self.capture_context(request, custom, now);
        let context_hash = sha256_hex(&serde_json::to_vec(&context)?);

        let cryptographic_binding = self.sign_binding(BindingData {
            fingerprint: fingerprint.value.clone(),
            identity: identity.bound(),
            context: context.clone(),
            nonce: random_hex(32),
        })?;

        let watermark = WatermarkData {
            user_id: non_empty_or_unknown(&identity.employee_id),
            timestamp: now.timestamp(),
            random_seed: random_hex(16),
            context_hash: context_hash.clone(),
        };
        let invisible_watermark = self.sealer.seal_json(Purpose::Watermark, &watermark)?;

        let sequence = self.sequence.next(now.date_naive());
        let integrity_token = IntegrityToken {
            value: self.integrity_value(&fingerprint.value, now.timestamp(), sequence, &context_hash)?,
            timestamp: now.timestamp(),
            sequence,
            context_hash,
        };

        let binding = DocumentBinding {
            schema_version: SCHEMA_VERSION,
            document_fingerprint: fingerprint.value,
            contextual_data: context,
            cryptographic_binding,
            invisible_watermark,
            integrity_token,
            created_at: now,
            expires_at: now + self.retention,
        };

        let binding_id = opaque_id("bind_");
        self.table.insert(BindingRecord {
            schema_version: SCHEMA_VERSION,
            binding_id: binding_id.clone(),
            encrypted_binding: self.sealer.seal_json(Purpose::Binding, &binding)?,
            created_at: now,
            expires_at: binding.expires_at,
        })?;

        info!(
            binding_id = %binding_id,
            fingerprint = %preview(&binding.document_fingerprint),
            sequence,
            "document binding created"
        );

        Ok(BindingReceipt {
            validation_code: self.validation_code(&binding_id),
            binding_id,
            binding,
        })
    }

    /// Checks, in order: presence, expiry, fingerprint, context suspicion,
    /// integrity token and the HMAC binding
    #[instrument(skip(self, document, identity, request))]
    pub async fn validate(
        &self,
        binding_id: &str,
        document: &[u8],
        identity: &IdentityClaim,
        request: &RequestHeaders,
    ) -> Result<BindingValidation> {
        let now = self.clock.now();
        let binding = match self.open_binding(binding_id) {
            Some(binding) => binding,
            None => return Ok(BindingValidation::failed(BindingFailure::BindingNotFound)),
        };

        if binding.expires_at <= now {
            return Ok(BindingValidation::failed(BindingFailure::BindingExpired));
        }

        let current = self.fingerprint_off_runtime(document).await?;
        if !secure_compare(current.value.as_bytes(), binding.document_fingerprint.as_bytes()) {
            warn!(binding_id, "document fingerprint changed");
            return Ok(BindingValidation::failed(BindingFailure::DocumentAltered));
        }

        let current_context = self.capture_context(request, binding.contextual_data.custom.clone(), now);
        let suspicion = self.suspicion_level(&binding.contextual_data, &current_context);
        if suspicion > self.config.suspicion_threshold {
            warn!(binding_id, suspicion, "suspicious validation context");
            return Ok(BindingValidation::suspicious(suspicion));
        }

        if !self.verify_integrity_token(&binding)? {
            return Ok(BindingValidation::failed(BindingFailure::TemporalIntegrityCompromised));
        }

        let stored = &binding.cryptographic_binding;
        let expected = self.sign_binding(BindingData {
            fingerprint: current.value,
            identity: identity.bound(),
            context: stored.data.context.clone(),
            nonce: stored.data.nonce.clone(),
        })?;
        if !secure_compare(expected.signature.as_bytes(), stored.signature.as_bytes()) {
            warn!(binding_id, "cryptographic binding mismatch");
            return Ok(BindingValidation::failed(BindingFailure::InvalidCryptographicBinding));
        }

        debug!(binding_id, suspicion, "binding valid");
        Ok(BindingValidation::passed(suspicion))
    }

    /// Runs the copy-paste battery; never fails
    pub fn detect_copy_paste_patterns(
        &self,
        source: &DocumentSource,
        identity: &IdentityClaim,
    ) -> BTreeSet<SuspicionTag> {
        let tags = self.heuristics.detect(source, self.clock.now());
        if !tags.is_empty() {
            info!(employee_id = %identity.employee_id, tags = ?tags, "copy-paste patterns found");
        }
        tags
    }

    /// `upper(first 8 hex of SHA256(binding_id || server_secret))`
    pub fn validation_code(&self, binding_id: &str) -> String {
        let digest = sha256_hex(format!("{}{}", binding_id, self.secret.expose()).as_bytes());
        digest[..8].to_uppercase()
    }

    /// Opens the sealed watermark of a stored binding
    pub fn read_watermark(&self, binding_id: &str) -> Option<WatermarkData> {
        let binding = self.open_binding(binding_id)?;
        self.sealer
            .open_json(Purpose::Watermark, &binding.invisible_watermark)
            .ok()
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.table.save_to(dir).await?;
        self.sequence.save_to(dir).await
    }

    async fn fingerprint_off_runtime(&self, document: &[u8]) -> Result<DocumentFingerprint> {
        let _permit = self.limiter.acquire().await.map_err(Error::internal)?;
        let content = document.to_vec();
        tokio::task::spawn_blocking(move || fingerprint(&content)).await?
    }

    fn open_binding(&self, binding_id: &str) -> Option<DocumentBinding> {
        let record = self.table.get(binding_id)?;
        match self.sealer.open_json(Purpose::Binding, &record.encrypted_binding) {
            Ok(binding) => Some(binding),
            Err(e) => {
                warn!(binding_id, error = %e, "stored binding could not be opened");
                None
            }
        }
    }

    fn capture_context(
        &self,
        request: &RequestHeaders,
        custom: BindingContext,
        now: DateTime<Utc>,
    ) -> ContextSnapshot {
        ContextSnapshot {
            timestamp: now,
            user_agent: request.user_agent_or_unknown().to_string(),
            ip_address: non_empty_or_unknown(&request.ip_address),
            session_id: request.session_id.clone(),
            referrer: request.referrer.clone(),
            request_time: request.request_time.unwrap_or(now),
            server_signature: self.server_signature.clone(),
            custom,
        }
    }

    fn sign_binding(&self, data: BindingData) -> Result<CryptographicBinding> {
        let signature = hmac_sha256_hex(self.secret.as_bytes(), &serde_json::to_vec(&data)?)?;
        Ok(CryptographicBinding { data, signature })
    }

    /// HMAC keyed by `server_secret || timestamp`
    fn integrity_value(
        &self,
        fingerprint: &str,
        timestamp: i64,
        sequence: u64,
        context_hash: &str,
    ) -> Result<String> {
        let input = IntegrityInput {
            fingerprint,
            timestamp,
            context_hash,
            sequence,
        };
        let key = format!("{}{}", self.secret.expose(), timestamp);
        hmac_sha256_hex(key.as_bytes(), &serde_json::to_vec(&input)?)
    }

    fn verify_integrity_token(&self, binding: &DocumentBinding) -> Result<bool> {
        let token = &binding.integrity_token;
        let context_hash = sha256_hex(&serde_json::to_vec(&binding.contextual_data)?);
        if !secure_compare(context_hash.as_bytes(), token.context_hash.as_bytes()) {
            return Ok(false);
        }
        let expected = self.integrity_value(
            &binding.document_fingerprint,
            token.timestamp,
            token.sequence,
            &token.context_hash,
        )?;
        Ok(secure_compare(expected.as_bytes(), token.value.as_bytes()))
    }

    fn suspicion_level(&self, original: &ContextSnapshot, current: &ContextSnapshot) -> f64 {
        let mut hundredths = 0u32;
        if original.ip_address != current.ip_address {
            hundredths += IP_CHANGED;
        }
        if original.user_agent != current.user_agent {
            hundredths += USER_AGENT_CHANGED;
        }
        let elapsed = (current.timestamp - original.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed < self.config.copy_window_secs {
            hundredths += TOO_FAST;
        }
        if original.session_id != current.session_id {
            hundredths += SESSION_CHANGED;
        }
        f64::from(hundredths.min(100)) / 100.0
    }
}

fn non_empty_or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

fn server_signature() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id().to_string();
    sha256_joined(&[
        &host,
        concat!("docseal/", env!("CARGO_PKG_VERSION")),
        std::env::consts::OS,
        &pid,
    ])
}
