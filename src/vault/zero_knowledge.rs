//! Commitment-style identity proofs
//!
//! Only a hash of the derived user secret is persisted; the identity claim
//! has to be presented again to verify a proof.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::{ServerSecret, ZeroKnowledgeMode};
use crate::error::Result;
use crate::hash_utils::sha256_hex;
use crate::store::{Record, Table};
use crate::types::{IdentityClaim, SCHEMA_VERSION};
use crate::utils::crypto_utils::{opaque_id, random_hex, secure_compare};
use crate::utils::{preview, Clock, SharedClock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub root: String,
    pub path: Vec<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroKnowledgeRecord {
    pub schema_version: u16,
    pub token: String,
    pub user_identifier: String,
    /// SHA-256 of the derived user secret
    pub data_hash: String,
    pub merkle_proof: MerkleProof,
    pub commitment: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Record for ZeroKnowledgeRecord {
    const TABLE: &'static str = "zero_knowledge";

    fn key(&self) -> &str {
        &self.token
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    pub zk_token: String,
    pub commitment: String,
    pub challenge: String,
    pub proof_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProof {
    pub proof_hash: String,
    pub commitment: String,
    pub challenge_response: String,
    pub public_commitment: String,
    pub verification_token: String,
}

pub struct ZeroKnowledgeAuth {
    table: Table<ZeroKnowledgeRecord>,
    secret: ServerSecret,
    clock: SharedClock,
    mode: ZeroKnowledgeMode,
    lifetime: Duration,
}

impl ZeroKnowledgeAuth {
    pub fn new(
        secret: ServerSecret,
        clock: SharedClock,
        mode: ZeroKnowledgeMode,
        lifetime_hours: i64,
    ) -> Self {
        Self {
            table: Table::new(),
            secret,
            clock,
            mode,
            lifetime: Duration::hours(lifetime_hours),
        }
    }

    pub fn with_table(mut self, table: Table<ZeroKnowledgeRecord>) -> Self {
        self.table = table;
        self
    }

    pub fn table(&self) -> &Table<ZeroKnowledgeRecord> {
        &self.table
    }

    #[instrument(skip_all, fields(employee_id = %claim.employee_id))]
    pub fn create_proof(&self, claim: &IdentityClaim) -> Result<ZkProof> {
        let user_secret = self.user_secret(claim);
        let commitment = sha256_hex(format!("{}{}", user_secret, random_hex(32)).as_bytes());

        let now = self.clock.now();
        let timestamp = now.timestamp();
        let timestamp_leaf = timestamp.to_string();
        let root = merkle_root(&[claim.employee_id.as_str(), claim.cpf.as_str(), timestamp_leaf.as_str()]);

        let record = ZeroKnowledgeRecord {
            schema_version: SCHEMA_VERSION,
            token: opaque_id("zk_"),
            user_identifier: claim.employee_id.clone(),
            data_hash: sha256_hex(user_secret.as_bytes()),
            merkle_proof: MerkleProof {
                root,
                path: merkle_path(&user_secret),
                timestamp,
            },
            commitment: commitment.clone(),
            created_at: now,
            expires_at: now + self.lifetime,
        };
        let zk_token = record.token.clone();
        self.table.insert(record)?;

        let challenge = challenge(&commitment, timestamp);
        info!(zk_token = %preview(&zk_token), "zero-knowledge proof created");
        Ok(ZkProof {
            zk_token,
            commitment,
            challenge,
            proof_required: true,
        })
    }

    /// A presented claim must reproduce the stored secret hash. Without a
    /// claim the token's mere existence counts only in presence-only mode.
    #[instrument(skip(self, claim), fields(zk_token = %preview(zk_token)))]
    pub fn verify_proof(&self, zk_token: &str, claim: Option<&IdentityClaim>) -> bool {
        let record = match self.table.get_live(zk_token, self.clock.now()) {
            Some(record) => record,
            None => {
                debug!("unknown or expired proof");
                return false;
            }
        };

        match claim {
            Some(claim) => {
                let presented = sha256_hex(self.user_secret(claim).as_bytes());
                secure_compare(record.data_hash.as_bytes(), presented.as_bytes())
            }
            None => self.mode == ZeroKnowledgeMode::AllowPresenceOnly,
        }
    }

    /// Known and unexpired
    pub fn is_active(&self, zk_token: &str) -> bool {
        self.table.get_live(zk_token, self.clock.now()).is_some()
    }

    /// Proves knowledge of a per-user signing secret for one document hash
    pub fn create_signature_proof(&self, document_hash: &str, user_id: &str) -> SignatureProof {
        let secret = sha256_hex(
            format!("{}{}signature_secret", user_id, self.secret.expose()).as_bytes(),
        );
        let timestamp = self.clock.now().timestamp();

        SignatureProof {
            proof_hash: sha256_hex(format!("{}{}", document_hash, secret).as_bytes()),
            commitment: sha256_hex(format!("{}{}", secret, timestamp).as_bytes()),
            challenge_response: sha256_hex(
                format!("{}{}{}", document_hash, secret, timestamp).as_bytes(),
            ),
            public_commitment: sha256_hex(format!("{}{}", secret, document_hash).as_bytes()),
            verification_token: opaque_id("sig_zk_"),
        }
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.table.save_to(dir).await
    }

    fn user_secret(&self, claim: &IdentityClaim) -> String {
        let mut parts = vec![claim.employee_id.clone(), claim.cpf.clone()];
        if let Some(password) = claim.password.as_deref().filter(|p| !p.is_empty()) {
            parts.push(sha256_hex(password.as_bytes()));
        }
        sha256_hex(format!("{}{}", parts.join("|"), self.secret.expose()).as_bytes())
    }
}

/// Root of a SHA-256 tree; an odd node is paired with itself
pub fn merkle_root(items: &[&str]) -> String {
    let mut level: Vec<String> = items.iter().map(|i| sha256_hex(i.as_bytes())).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                sha256_hex(format!("{}{}", left, right).as_bytes())
            })
            .collect();
    }
    level.pop().unwrap_or_default()
}

fn merkle_path(user_secret: &str) -> Vec<String> {
    vec![sha256_hex(format!("{}path", user_secret).as_bytes())]
}

fn challenge(commitment: &str, timestamp: i64) -> String {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let mut input = format!("{}{}", commitment, timestamp).into_bytes();
    input.extend_from_slice(&salt);
    sha256_hex(&input)
}
