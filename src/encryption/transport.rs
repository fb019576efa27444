//! Pre-encrypted identity payloads sent by the upload front end
//!
//! Layout: `IV(12) || ciphertext || tag(16)`, AES-256-GCM without associated
//! data, key = PBKDF2-HMAC-SHA256(passphrase, fixed salt, 100000, 32 bytes).
//! The plaintext is the JSON identity claim.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{error, info};

use crate::error::{EncryptionError, Error, Result};
use crate::types::IdentityClaim;
use crate::utils::{crypto_utils::derive_key, mask_cpf};

pub const TRANSPORT_SALT: &[u8] = b"f891350c35fb47cc1557f441b5fdfa04";
pub const TRANSPORT_ITERATIONS: u32 = 100_000;
const TAG_LEN: usize = 16;

fn transport_key(passphrase: &[u8]) -> Result<LessSafeKey> {
    let key_bytes = derive_key(passphrase, TRANSPORT_SALT, TRANSPORT_ITERATIONS);
    let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
        .map_err(|_| EncryptionError::KeyDerivation("invalid transport key".into()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Decrypts and parses an identity payload
pub fn decrypt_identity_payload(data: &[u8], passphrase: &[u8]) -> Result<IdentityClaim> {
    if data.len() < NONCE_LEN + TAG_LEN {
        error!(data_len = data.len(), "encrypted identity payload too short");
        return Err(Error::ValidationError(
            "encrypted identity payload has an invalid format".into(),
        ));
    }

    let key = transport_key(passphrase)?;
    let (iv, sealed) = data.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(iv)
        .map_err(|_| EncryptionError::Malformed("invalid IV".into()))?;

    let mut in_out = sealed.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| {
            error!(
                data_len = data.len(),
                passphrase_len = passphrase.len(),
                "identity payload decryption failed"
            );
            EncryptionError::Decrypt
        })?;

    let claim: IdentityClaim = serde_json::from_slice(plaintext)
        .map_err(|e| Error::ValidationError(format!("identity payload is not valid JSON: {}", e)))?;

    info!(
        employee_id = %claim.employee_id,
        cpf = %mask_cpf(&claim.cpf),
        "identity payload decrypted"
    );
    Ok(claim)
}

/// Produces a payload in the front-end format; used by the CLI and tests
pub fn encrypt_identity_payload(json: &[u8], passphrase: &[u8]) -> Result<Vec<u8>> {
    let key = transport_key(passphrase)?;
    let mut iv = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| EncryptionError::Encrypt("failed to generate IV".into()))?;

    let mut in_out = json.to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
        .map_err(|_| EncryptionError::Encrypt("AES-256-GCM seal failed".into()))?;

    let mut out = iv.to_vec();
    out.extend(in_out);
    Ok(out)
}
