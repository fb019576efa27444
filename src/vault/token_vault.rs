use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::encryption::{Purpose, Sealer};
use crate::error::{Error, Result};
use crate::store::{Record, Table};
use crate::types::SCHEMA_VERSION;
use crate::utils::crypto_utils::opaque_id;
use crate::utils::{preview, Clock, SharedClock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureToken {
    pub schema_version: u16,
    pub token: String,
    /// Sealed JSON payload
    pub encrypted_data: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Record for SecureToken {
    const TABLE: &'static str = "secure_tokens";

    fn key(&self) -> &str {
        &self.token
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// What a verification QR code resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationPayload {
    pub name: String,
    pub entity: String,
    /// base64 of the PEM public key
    pub public_key: String,
    pub document_id: String,
    pub transaction_code: String,
    pub signed_at: String,
}

/// Opaque `tk_` tokens mapping to sealed payloads
pub struct TokenVault {
    table: Table<SecureToken>,
    sealer: Arc<Sealer>,
    clock: SharedClock,
    lifetime: Duration,
}

impl TokenVault {
    pub fn new(sealer: Arc<Sealer>, clock: SharedClock, lifetime_days: i64) -> Self {
        Self {
            table: Table::new(),
            sealer,
            clock,
            lifetime: Duration::days(lifetime_days),
        }
    }

    pub fn with_table(mut self, table: Table<SecureToken>) -> Self {
        self.table = table;
        self
    }

    pub fn table(&self) -> &Table<SecureToken> {
        &self.table
    }

    pub fn issue<T: Serialize>(&self, payload: &T) -> Result<String> {
        self.issue_with_ttl(payload, self.lifetime)
    }

    pub fn issue_with_ttl<T: Serialize>(&self, payload: &T, ttl: Duration) -> Result<String> {
        let now = self.clock.now();
        let record = SecureToken {
            schema_version: SCHEMA_VERSION,
            token: opaque_id("tk_"),
            encrypted_data: self.sealer.seal_json(Purpose::Token, payload)?,
            created_at: now,
            expires_at: now + ttl,
        };
        let token = record.token.clone();
        self.table.insert(record)?;
        debug!(token = %preview(&token), "token issued");
        Ok(token)
    }

    /// Unknown, expired and undecodable tokens all resolve to [`Error::NotFound`]
    #[instrument(skip(self), fields(token = %preview(token)))]
    pub fn resolve<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let record = self
            .table
            .get_live(token, self.clock.now())
            .ok_or(Error::NotFound)?;
        self.sealer
            .open_json(Purpose::Token, &record.encrypted_data)
            .map_err(|e| {
                debug!(error = %e, "token payload unreadable");
                Error::NotFound
            })
    }

    /// Linear scan over live tokens carrying a [`VerificationPayload`]
    pub fn find_by_transaction_code(&self, code: &str) -> Option<(String, VerificationPayload)> {
        let now = self.clock.now();
        self.table
            .filter(|row| row.is_live(now))
            .into_iter()
            .find_map(|row| {
                let payload: VerificationPayload = self
                    .sealer
                    .open_json(Purpose::Token, &row.encrypted_data)
                    .ok()?;
                (payload.transaction_code == code).then(|| (row.token, payload))
            })
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.table.save_to(dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSecret;
    use crate::utils::ManualClock;

    fn vault() -> (TokenVault, Arc<ManualClock>) {
        let sealer = Sealer::new(&ServerSecret::new("token-vault-secret")).unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        (TokenVault::new(Arc::new(sealer), clock.clone(), 36500), clock)
    }

    fn payload(code: &str) -> VerificationPayload {
        VerificationPayload {
            name: "Helena Duarte".into(),
            entity: "prefeitura".into(),
            public_key: "cHVibGlj".into(),
            document_id: "doc_0123".into(),
            transaction_code: code.into(),
            signed_at: "01/02/2026 10:00:00".into(),
        }
    }

    #[test]
    fn test_issue_and_resolve() {
        let (vault, _) = vault();
        let token = vault.issue(&payload("a-1")).unwrap();
        assert!(token.starts_with("tk_"));
        assert_eq!(token.len(), 35);

        let resolved: VerificationPayload = vault.resolve(&token).unwrap();
        assert_eq!(resolved, payload("a-1"));
        assert!(!vault.table().get(&token).unwrap().encrypted_data.contains("Helena"));
    }

    #[test]
    fn test_expired_and_unknown_are_not_found() {
        let (vault, clock) = vault();
        let token = vault.issue_with_ttl(&payload("a-2"), Duration::minutes(5)).unwrap();
        clock.advance(Duration::minutes(6));
        assert!(matches!(vault.resolve::<VerificationPayload>(&token), Err(Error::NotFound)));
        assert!(matches!(vault.resolve::<VerificationPayload>("tk_missing"), Err(Error::NotFound)));
    }

    #[test]
    fn test_wrong_payload_type_is_not_found() {
        let (vault, _) = vault();
        let token = vault.issue(&vec![1u8, 2, 3]).unwrap();
        assert!(matches!(vault.resolve::<VerificationPayload>(&token), Err(Error::NotFound)));
    }

    #[test]
    fn test_find_by_transaction_code() {
        let (vault, _) = vault();
        vault.issue(&payload("first")).unwrap();
        let token = vault.issue(&payload("second")).unwrap();
        vault.issue(&"unrelated").unwrap();

        let (found, payload) = vault.find_by_transaction_code("second").unwrap();
        assert_eq!(found, token);
        assert_eq!(payload.transaction_code, "second");
        assert!(vault.find_by_transaction_code("third").is_none());
    }
}
