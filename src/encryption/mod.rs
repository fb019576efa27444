//! Encryption Module Implementation
//!
//! [`Sealer`] protects every record the server must be able to read back on
//! its own (bindings, device registration contexts, verification tokens).
//! It is AES-256-GCM under a key derived from the server secret, with a
//! purpose label as associated data so a blob sealed for one table cannot
//! be replayed into another.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::config::ServerSecret;
use crate::error::{EncryptionError, Result};
use crate::hash_utils::sha256;

pub mod transport;

pub use transport::{decrypt_identity_payload, encrypt_identity_payload};

const SEALING_KEY_CONTEXT: &[u8] = b"|record_sealing_v1";

/// Associated-data labels, one per kind of sealed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Binding,
    Watermark,
    DeviceContext,
    Token,
}

impl Purpose {
    fn label(self) -> &'static [u8] {
        match self {
            Purpose::Binding => b"document_binding",
            Purpose::Watermark => b"invisible_watermark",
            Purpose::DeviceContext => b"device_registration_context",
            Purpose::Token => b"secure_token",
        }
    }
}

/// Server-keyed authenticated encryption
pub struct Sealer {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Sealer {
    pub fn new(secret: &ServerSecret) -> Result<Self> {
        let mut material = secret.as_bytes().to_vec();
        material.extend_from_slice(SEALING_KEY_CONTEXT);
        let key_bytes = sha256(&material);
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| EncryptionError::KeyDerivation("invalid AES-256-GCM key".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypts and returns base64 of `nonce || ciphertext || tag`
    pub fn seal(&self, purpose: Purpose, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::Encrypt("failed to generate nonce".into()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(purpose.label()),
                &mut in_out,
            )
            .map_err(|_| EncryptionError::Encrypt("AES-256-GCM seal failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend(in_out);
        Ok(BASE64.encode(blob))
    }

    pub fn open(&self, purpose: Purpose, sealed: &str) -> Result<Vec<u8>> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|e| EncryptionError::Malformed(e.to_string()))?;
        if blob.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(EncryptionError::Malformed("sealed blob too short".into()).into());
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| EncryptionError::Malformed("invalid nonce".into()))?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(purpose.label()), &mut in_out)
            .map_err(|_| {
                debug!(?purpose, "sealed record failed authentication");
                EncryptionError::Decrypt
            })?;
        Ok(plaintext.to_vec())
    }

    pub fn seal_json<T: Serialize>(&self, purpose: Purpose, value: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(value)?;
        self.seal(purpose, &plaintext)
    }

    pub fn open_json<T: DeserializeOwned>(&self, purpose: Purpose, sealed: &str) -> Result<T> {
        let plaintext = self.open(purpose, sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sealer(secret: &str) -> Sealer {
        Sealer::new(&ServerSecret::new(secret)).unwrap()
    }

    #[test]
    fn test_seal_open_cycle() {
        let s = sealer("server-secret-for-tests");
        let sealed = s.seal(Purpose::Token, b"payload").unwrap();
        assert_eq!(s.open(Purpose::Token, &sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_purpose_is_bound() {
        let s = sealer("server-secret-for-tests");
        let sealed = s.seal(Purpose::Token, b"payload").unwrap();
        assert!(matches!(
            s.open(Purpose::Binding, &sealed),
            Err(Error::EncryptionError(EncryptionError::Decrypt))
        ));
    }

    #[test]
    fn test_other_secret_cannot_open() {
        let sealed = sealer("server-secret-for-tests").seal(Purpose::Binding, b"x").unwrap();
        assert!(sealer("a-different-server-secret").open(Purpose::Binding, &sealed).is_err());
    }

    #[test]
    fn test_garbage_input_is_malformed() {
        let s = sealer("server-secret-for-tests");
        assert!(matches!(
            s.open(Purpose::Token, "not base64!"),
            Err(Error::EncryptionError(EncryptionError::Malformed(_)))
        ));
        assert!(s.open(Purpose::Token, "AAAA").is_err());
    }
}
