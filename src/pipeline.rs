//! Signing and verification pipeline
//!
//! Signing runs its stages in a fixed order and any rejection aborts the
//! request before a signature exists:
//!
//! 0. zero-knowledge proof for the signer
//! 1. intake validation
//! 2. device gate
//! 3. forgery heuristics gate
//! 4. sanitizer
//! 5. signing and encrypted storage
//! 6. contextual binding
//! 7. device enhancement (cross-device fraud gate)
//! 8. verification token, QR payload and stamp text

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    binding::{BindingContext, DocumentFingerprintEngine},
    config::{Config, DeviceFailurePolicy},
    device::{DeviceEnhancement, DeviceFingerprint, DeviceSummary, DeviceTrustEngine},
    encryption::Sealer,
    error::{Error, Result},
    forensics::{ForgeryHeuristics, IntakeReport, SuspicionAssessment, Verdict},
    hash_utils::sha256_hex,
    sanitize::{self, Sanitizer},
    signature::{CryptoSigner, RetrievedDocument, SecureDocumentStore},
    store::{DailySequence, Table},
    types::{DocumentSource, IdentityClaim, RequestHeaders},
    utils::{system_clock, Clock, Counter, Metrics, SharedClock},
    vault::{SignatureProof, TokenVault, VerificationPayload, ZeroKnowledgeAuth},
};

pub mod stamp;

const SIGNED_AT_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const DEFAULT_ENTITY: &str = "default";

#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub source: DocumentSource,
    pub identity: IdentityClaim,
    pub headers: RequestHeaders,
    /// Display date supplied by the caller; defaults to now
    pub signed_at: Option<String>,
}

/// Everything the external stamping layer needs
#[derive(Debug, Clone, Serialize)]
pub struct SigningReceipt {
    pub document_id: String,
    pub public_key: String,
    pub transaction_code: String,
    pub verification_code: String,
    pub binding_id: String,
    pub validation_code: String,
    pub verification_token: String,
    pub zk_token: String,
    pub signed_at: String,
    pub device: DeviceSummary,
    pub device_enhancement: Option<DeviceEnhancement>,
    pub assessment: SuspicionAssessment,
    pub signature_proof: SignatureProof,
    pub qr_payload_url: String,
    pub stamp_lines: Vec<String>,
    /// Sanitized copy for stamping; the signature covers the original bytes
    #[serde(skip)]
    pub stamp_source: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct VerificationRequest {
    pub token: String,
    pub zk_token: Option<String>,
    pub identity: Option<IdentityClaim>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// Signature re-verified against the decrypted document
    Full,
    /// Document exists and has not expired; nothing was decrypted
    IntegrityOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub name: String,
    pub transaction_code: String,
    pub signed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub level: Option<VerificationLevel>,
    pub signer: Option<SignerInfo>,
}

/// Result of running intake and the tag battery without signing
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub intake: IntakeReport,
    pub assessment: SuspicionAssessment,
}

pub struct SealingService {
    config: Config,
    clock: SharedClock,
    metrics: Arc<Metrics>,
    heuristics: Arc<ForgeryHeuristics>,
    store: Arc<SecureDocumentStore>,
    signer: CryptoSigner,
    bindings: DocumentFingerprintEngine,
    devices: DeviceTrustEngine,
    tokens: TokenVault,
    zero_knowledge: ZeroKnowledgeAuth,
    sanitizer: Box<dyn Sanitizer>,
}

impl SealingService {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        Self::assemble(config, clock, VaultState::default())
    }

    /// Restores every table from snapshots under `vault_dir`
    #[instrument(skip(config))]
    pub async fn open(config: Config, vault_dir: &Path) -> Result<Self> {
        let state = VaultState {
            documents: Table::load_from(vault_dir).await?,
            bindings: Table::load_from(vault_dir).await?,
            sequence: DailySequence::load_from(vault_dir).await?,
            devices: Table::load_from(vault_dir).await?,
            tokens: Table::load_from(vault_dir).await?,
            proofs: Table::load_from(vault_dir).await?,
        };
        Self::assemble(config, system_clock(), state)
    }

    fn assemble(config: Config, clock: SharedClock, state: VaultState) -> Result<Self> {
        config.validate()?;
        let secret = config.server_secret.clone();
        let sealer = Arc::new(Sealer::new(&secret)?);
        let heuristics = Arc::new(ForgeryHeuristics::new(config.heuristics.clone()));

        let store = Arc::new(
            SecureDocumentStore::new(secret.clone(), clock.clone(), config.retention.document_days)
                .with_table(state.documents),
        );
        let bindings = DocumentFingerprintEngine::new(
            sealer.clone(),
            secret.clone(),
            clock.clone(),
            config.binding.clone(),
            config.retention.binding_days,
            heuristics.clone(),
        )
        .with_state(state.bindings, state.sequence);
        let devices = DeviceTrustEngine::new(sealer.clone(), clock.clone(), config.device.clone())
            .with_table(state.devices);
        let tokens = TokenVault::new(sealer, clock.clone(), config.retention.token_days)
            .with_table(state.tokens);
        let zero_knowledge = ZeroKnowledgeAuth::new(
            secret,
            clock.clone(),
            config.zero_knowledge,
            config.retention.zero_knowledge_hours,
        )
        .with_table(state.proofs);

        Ok(Self {
            sanitizer: sanitize::from_config(&config.sanitizer),
            signer: CryptoSigner::new(store.clone()),
            metrics: Arc::new(Metrics::new()),
            config,
            clock,
            heuristics,
            store,
            bindings,
            devices,
            tokens,
            zero_knowledge,
        })
    }

    pub fn with_sanitizer(mut self, sanitizer: Box<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &SecureDocumentStore {
        &self.store
    }

    pub fn bindings(&self) -> &DocumentFingerprintEngine {
        &self.bindings
    }

    pub fn devices(&self) -> &DeviceTrustEngine {
        &self.devices
    }

    pub fn tokens(&self) -> &TokenVault {
        &self.tokens
    }

    pub fn zero_knowledge(&self) -> &ZeroKnowledgeAuth {
        &self.zero_knowledge
    }

    /// Drops expired rows from every table; returns how many were removed
    #[instrument(skip(self))]
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let removed = self.store.table().purge_expired(now)
            + self.bindings.table().purge_expired(now)
            + self.devices.table().purge_expired(now)
            + self.tokens.table().purge_expired(now)
            + self.zero_knowledge.table().purge_expired(now);
        if removed > 0 {
            info!(removed, "expired rows purged");
        }
        removed
    }

    /// Purges expired rows, then snapshots every table into `dir`
    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.purge_expired(self.clock.now());
        self.store.save(dir).await?;
        self.bindings.save(dir).await?;
        self.devices.save(dir).await?;
        self.tokens.save(dir).await?;
        self.zero_knowledge.save(dir).await?;
        info!(dir = %dir.display(), "vault saved");
        Ok(())
    }

    #[instrument(skip_all, fields(employee_id = %request.identity.employee_id, file = %request.source.file_name))]
    pub async fn sign(&self, request: SigningRequest) -> Result<SigningReceipt> {
        info!("signing request received");
        let outcome = self.run_signing(&request).await;
        match &outcome {
            Ok(receipt) => {
                self.metrics.increment(Counter::DocumentsSigned);
                info!(document_id = %receipt.document_id, "signing completed");
            }
            Err(e) if e.is_rejection() => {
                self.metrics.increment(Counter::DocumentsRejected);
                warn!(error = %e, "signing rejected");
            }
            Err(e) => error!(error = %e, "signing failed"),
        }
        outcome
    }

    async fn run_signing(&self, request: &SigningRequest) -> Result<SigningReceipt> {
        let SigningRequest {
            source,
            identity,
            headers,
            signed_at,
        } = request;
        let started = self.clock.now();

        // Stage 0
        let proof = self.zero_knowledge.create_proof(identity)?;

        // Stage 1
        {
            let _timer = self.metrics.time_stage("intake");
            self.heuristics.validate_intake(source, started)?;
        }

        // Stage 2
        let (device_fingerprint, device) = {
            let _timer = self.metrics.time_stage("device_gate");
            self.device_gate(identity, headers)?
        };

        // Stage 3
        let assessment = {
            let _timer = self.metrics.time_stage("heuristics");
            let tags = self.bindings.detect_copy_paste_patterns(source, identity);
            SuspicionAssessment::evaluate(tags, &self.config.heuristics)
        };
        self.heuristics.gate(&assessment)?;
        if assessment.verdict == Verdict::Monitor {
            self.metrics.increment(Counter::MonitoredAcceptances);
        }

        // Stage 4
        let stamp_source = {
            let _timer = self.metrics.time_stage("sanitize");
            self.sanitizer.sanitize(&source.content).await?
        };

        // Stage 5
        let signed = {
            let _timer = self.metrics.time_stage("signing");
            self.signer.sign(&source.content, identity).await?
        };
        let signature_proof = self
            .zero_knowledge
            .create_signature_proof(&sha256_hex(&source.content), &identity.employee_id);

        // Stage 6
        let binding = {
            let _timer = self.metrics.time_stage("binding");
            let context = BindingContext {
                entity: identity.entity.clone(),
                role: Some(identity.role.clone()).filter(|r| !r.is_empty()),
            };
            self.bindings
                .create_binding(&source.content, identity, headers, context)
                .await?
        };

        // Stage 7
        let device_enhancement = match &device_fingerprint {
            Some(fingerprint) => self.enhance(identity, fingerprint, headers)?,
            None => None,
        };

        // Stage 8
        let now = self.clock.now();
        let entity = identity.entity.clone().unwrap_or_else(|| DEFAULT_ENTITY.to_string());
        let signed_at = signed_at
            .clone()
            .unwrap_or_else(|| now.format(SIGNED_AT_FORMAT).to_string());
        let payload = VerificationPayload {
            name: identity.name.clone(),
            entity: entity.clone(),
            public_key: signed.public_key_b64.clone(),
            document_id: signed.document_id.clone(),
            transaction_code: Uuid::new_v4().to_string(),
            signed_at: signed_at.clone(),
        };
        let verification_token = self.tokens.issue(&payload)?;
        let verification_code = stamp::verification_code();

        Ok(SigningReceipt {
            qr_payload_url: stamp::qr_payload_url(
                &self.config.public_base_url,
                &entity,
                &verification_token,
                &proof.zk_token,
            ),
            stamp_lines: stamp::stamp_lines(identity, &verification_code, &signed_at),
            document_id: signed.document_id,
            public_key: signed.public_key_b64,
            transaction_code: payload.transaction_code,
            verification_code,
            binding_id: binding.binding_id,
            validation_code: binding.validation_code,
            verification_token,
            zk_token: proof.zk_token,
            signed_at,
            device,
            device_enhancement,
            assessment,
            signature_proof,
            stamp_source,
        })
    }

    /// Rejections always propagate; other device failures follow the
    /// configured [`DeviceFailurePolicy`]
    fn device_gate(
        &self,
        identity: &IdentityClaim,
        headers: &RequestHeaders,
    ) -> Result<(Option<DeviceFingerprint>, DeviceSummary)> {
        let attempt = self.devices.fingerprint(headers).and_then(|fingerprint| {
            let summary = self.devices.gate(identity, &fingerprint, headers)?;
            Ok((fingerprint, summary))
        });

        match attempt {
            Ok((fingerprint, summary)) => {
                if summary.newly_registered {
                    self.metrics.increment(Counter::DevicesRegistered);
                }
                if !summary.indicators.is_empty() {
                    warn!(indicators = ?summary.indicators, "device indicators below reject count");
                }
                Ok((Some(fingerprint), summary))
            }
            Err(e) if e.is_rejection() => Err(e),
            Err(e) => self
                .device_failure(e)
                .map(|message| (None, DeviceSummary::failed(message, self.clock.now()))),
        }
    }

    fn enhance(
        &self,
        identity: &IdentityClaim,
        fingerprint: &DeviceFingerprint,
        headers: &RequestHeaders,
    ) -> Result<Option<DeviceEnhancement>> {
        match self.devices.enhance_binding(identity, fingerprint, headers) {
            Ok(enhancement) => Ok(Some(enhancement)),
            Err(e) if e.is_rejection() => Err(e),
            Err(e) => self.device_failure(e).map(|_| None),
        }
    }

    fn device_failure(&self, e: Error) -> Result<String> {
        self.metrics.increment(Counter::DeviceCheckErrors);
        match self.config.device.failure_policy {
            DeviceFailurePolicy::FailOpen => {
                warn!(error = %e, "device check failed, continuing");
                Ok(e.to_string())
            }
            DeviceFailurePolicy::FailClosed => {
                error!(error = %e, "device check failed");
                Err(e)
            }
        }
    }

    /// A supplied zk token must be live and a supplied claim must match
    /// both the proof and the stored document, otherwise the outcome is
    /// [`Error::NotFound`]. Without a claim only integrity is confirmed.
    #[instrument(skip_all)]
    pub fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome> {
        let outcome = self.run_verification(request);
        let counter = match &outcome {
            Ok(VerificationOutcome {
                level: Some(VerificationLevel::Full),
                ..
            }) => Counter::VerificationsFull,
            Ok(VerificationOutcome {
                level: Some(VerificationLevel::IntegrityOnly),
                ..
            }) => Counter::VerificationsIntegrityOnly,
            _ => Counter::VerificationsFailed,
        };
        self.metrics.increment(counter);
        outcome
    }

    fn run_verification(&self, request: &VerificationRequest) -> Result<VerificationOutcome> {
        let payload: VerificationPayload = self.tokens.resolve(&request.token)?;

        if let Some(zk_token) = &request.zk_token {
            if !self.zero_knowledge.is_active(zk_token) {
                debug!("zero-knowledge token unknown or expired");
                return Err(Error::NotFound);
            }
        }

        let signer = SignerInfo {
            name: payload.name.clone(),
            transaction_code: payload.transaction_code.clone(),
            signed_at: payload.signed_at.clone(),
        };

        if let Some(identity) = &request.identity {
            if let Some(zk_token) = &request.zk_token {
                if !self.zero_knowledge.verify_proof(zk_token, Some(identity)) {
                    return Err(Error::NotFound);
                }
            }

            let document = self.store.retrieve(&payload.document_id, identity)?;
            if !document.matches_stored_hash() {
                warn!(document_id = %payload.document_id, "stored document hash does not match content");
            } else if CryptoSigner::verify(
                &document.document,
                &document.signature,
                &document.public_key_pem,
            ) {
                info!(document_id = %payload.document_id, "signature verified");
                return Ok(VerificationOutcome {
                    valid: true,
                    level: Some(VerificationLevel::Full),
                    signer: Some(signer),
                });
            } else {
                warn!(document_id = %payload.document_id, "stored signature does not verify");
            }
        }

        if self.store.check_integrity(&payload.document_id) {
            return Ok(VerificationOutcome {
                valid: true,
                level: Some(VerificationLevel::IntegrityOnly),
                signer: Some(signer),
            });
        }

        Ok(VerificationOutcome {
            valid: false,
            level: None,
            signer: None,
        })
    }

    /// Looks a signed document up by its transaction code
    pub fn view_by_transaction_code(
        &self,
        transaction_code: &str,
        identity: &IdentityClaim,
    ) -> Result<RetrievedDocument> {
        let (_, payload) = self
            .tokens
            .find_by_transaction_code(transaction_code)
            .ok_or(Error::NotFound)?;
        self.store.retrieve(&payload.document_id, identity)
    }

    /// Intake plus the tag battery, without side effects
    pub fn inspect(&self, source: &DocumentSource) -> Result<Inspection> {
        let now = self.clock.now();
        Ok(Inspection {
            intake: self.heuristics.validate_intake(source, now)?,
            assessment: self.heuristics.assess(source, now),
        })
    }
}

#[derive(Default)]
struct VaultState {
    documents: Table<crate::signature::SignedDocumentRecord>,
    bindings: Table<crate::binding::BindingRecord>,
    sequence: DailySequence,
    devices: Table<crate::device::DeviceRecord>,
    tokens: Table<crate::vault::SecureToken>,
    proofs: Table<crate::vault::ZeroKnowledgeRecord>,
}
