//! Identity-keyed storage of signed documents
//!
//! The encryption key is derived from the signer's identity and the server
//! secret on every call and never persisted, so a stored row is unreadable
//! without the identity claim that produced it.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::ServerSecret;
use crate::error::{Error, Result};
use crate::hash_utils::{sha256, sha256_hex};
use crate::store::{Record, Table};
use crate::types::{IdentityClaim, SCHEMA_VERSION};
use crate::utils::crypto_utils::{open_cbc, opaque_id, seal_cbc, secure_compare};
use crate::utils::{mask_cpf, SharedClock};

const USER_KEY_CONTEXT: &str = "document_encryption_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedDocumentRecord {
    pub schema_version: u16,
    pub document_id: String,
    /// base64 of `IV || AES-256-CBC ciphertext`
    pub encrypted_document: String,
    pub encrypted_signature: String,
    pub encrypted_public_key: String,
    pub user_hash: String,
    pub document_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Record for SignedDocumentRecord {
    const TABLE: &'static str = "secure_documents";

    fn key(&self) -> &str {
        &self.document_id
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Plaintext handed back to an authorized caller
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub document: Vec<u8>,
    pub signature: Vec<u8>,
    pub public_key_pem: Vec<u8>,
    pub document_hash: String,
}

impl RetrievedDocument {
    /// True when the decrypted bytes still hash to the value recorded at signing
    pub fn matches_stored_hash(&self) -> bool {
        secure_compare(
            sha256_hex(&self.document).as_bytes(),
            self.document_hash.as_bytes(),
        )
    }
}

pub struct SecureDocumentStore {
    table: Table<SignedDocumentRecord>,
    secret: ServerSecret,
    clock: SharedClock,
    retention: Duration,
}

impl SecureDocumentStore {
    pub fn new(secret: ServerSecret, clock: SharedClock, retention_days: i64) -> Self {
        Self {
            table: Table::new(),
            secret,
            clock,
            retention: Duration::days(retention_days),
        }
    }

    /// Replaces the backing table, typically with one loaded from a snapshot
    pub fn with_table(mut self, table: Table<SignedDocumentRecord>) -> Self {
        self.table = table;
        self
    }

    pub fn table(&self) -> &Table<SignedDocumentRecord> {
        &self.table
    }

    #[instrument(skip_all, fields(employee_id = %identity.employee_id, cpf = %mask_cpf(&identity.cpf)))]
    pub fn store(
        &self,
        document: &[u8],
        identity: &IdentityClaim,
        signature: &[u8],
        public_key_pem: &[u8],
    ) -> Result<String> {
        let key = self.user_key(identity);
        let now = self.clock.now();

        let record = SignedDocumentRecord {
            schema_version: SCHEMA_VERSION,
            document_id: opaque_id("doc_"),
            encrypted_document: BASE64.encode(seal_cbc(document, &key)?),
            encrypted_signature: BASE64.encode(seal_cbc(signature, &key)?),
            encrypted_public_key: BASE64.encode(seal_cbc(public_key_pem, &key)?),
            user_hash: user_hash(identity),
            document_hash: sha256_hex(document),
            created_at: now,
            expires_at: now + self.retention,
        };
        let document_id = record.document_id.clone();
        self.table.insert(record)?;

        info!(document_id = %document_id, size = document.len(), "document secured");
        Ok(document_id)
    }

    /// Absent, expired, foreign or undecryptable rows all yield [`Error::NotFound`]
    #[instrument(skip(self, identity))]
    pub fn retrieve(&self, document_id: &str, identity: &IdentityClaim) -> Result<RetrievedDocument> {
        let record = self
            .table
            .get_live(document_id, self.clock.now())
            .ok_or(Error::NotFound)?;

        if !secure_compare(record.user_hash.as_bytes(), user_hash(identity).as_bytes()) {
            debug!("user hash mismatch");
            return Err(Error::NotFound);
        }

        let key = self.user_key(identity);
        let open = |field: &str| -> Result<Vec<u8>> {
            let blob = BASE64.decode(field).map_err(|_| Error::NotFound)?;
            open_cbc(&blob, &key).map_err(|_| Error::NotFound)
        };

        match (
            open(&record.encrypted_document),
            open(&record.encrypted_signature),
            open(&record.encrypted_public_key),
        ) {
            (Ok(document), Ok(signature), Ok(public_key_pem)) => Ok(RetrievedDocument {
                document,
                signature,
                public_key_pem,
                document_hash: record.document_hash,
            }),
            _ => {
                warn!(document_id, "stored document failed to decrypt");
                Err(Error::NotFound)
            }
        }
    }

    /// Public check that needs no identity: the row exists and is live
    pub fn check_integrity(&self, document_id: &str) -> bool {
        self.table.get_live(document_id, self.clock.now()).is_some()
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.table.save_to(dir).await
    }

    fn user_key(&self, identity: &IdentityClaim) -> [u8; 32] {
        let material = format!(
            "{}|{}|{}|{}",
            identity.employee_id,
            identity.cpf,
            self.secret.expose(),
            USER_KEY_CONTEXT
        );
        sha256(material.as_bytes())
    }
}

/// Index hash of `employee_id|cpf`
pub fn user_hash(identity: &IdentityClaim) -> String {
    sha256_hex(format!("{}|{}", identity.employee_id, identity.cpf).as_bytes())
}
