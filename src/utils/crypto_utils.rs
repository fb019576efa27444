//! Cryptographic Utilities for Secure Operations
//!
//! AES-256-CBC envelopes for identity-keyed fields, HMAC-SHA256 tags,
//! PBKDF2 key derivation and constant-time comparison.

use hmac::{Hmac, Mac};
use openssl::symm::{self, Cipher};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{EncryptionError, Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// Generates a cryptographically secure random IV
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Random bytes rendered as lowercase hex
pub fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Opaque identifier: `prefix` followed by 128 random bits in hex
pub fn opaque_id(prefix: &str) -> String {
    format!("{}{}", prefix, random_hex(16))
}

/// Derives a 256-bit key from a passphrase using PBKDF2-HMAC-SHA256
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
    key
}

/// Encrypts data using AES-256-CBC with PKCS#7 padding
pub fn encrypt_aes_cbc(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    symm::encrypt(Cipher::aes_256_cbc(), key, Some(iv), data)
        .map_err(|e| EncryptionError::Encrypt(e.to_string()).into())
}

/// Decrypts data using AES-256-CBC
pub fn decrypt_aes_cbc(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    symm::decrypt(Cipher::aes_256_cbc(), key, Some(iv), ciphertext)
        .map_err(|_| EncryptionError::Decrypt.into())
}

/// Encrypts under a fresh IV and returns `IV || ciphertext`
pub fn seal_cbc(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let iv = generate_iv();
    let mut out = Vec::with_capacity(IV_SIZE + data.len() + IV_SIZE);
    out.extend_from_slice(&iv);
    out.extend(encrypt_aes_cbc(data, key, &iv)?);
    Ok(out)
}

/// Reverses [`seal_cbc`]
pub fn open_cbc(blob: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if blob.len() <= IV_SIZE {
        return Err(EncryptionError::Malformed("ciphertext shorter than IV".into()).into());
    }
    let (iv, ciphertext) = blob.split_at(IV_SIZE);
    decrypt_aes_cbc(ciphertext, key, iv)
}

/// HMAC-SHA256 rendered as lowercase hex
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::CryptoError(format!("invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Performs constant-time comparison to prevent timing attacks
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbc_envelope_cycle() {
        let key = [7u8; KEY_SIZE];
        let sealed = seal_cbc(b"document bytes", &key).unwrap();
        assert_eq!(open_cbc(&sealed, &key).unwrap(), b"document bytes");
    }

    #[test]
    fn test_cbc_fresh_iv_per_call() {
        let key = [1u8; KEY_SIZE];
        assert_ne!(seal_cbc(b"same", &key).unwrap(), seal_cbc(b"same", &key).unwrap());
    }

    #[test]
    fn test_cbc_wrong_key_fails() {
        let sealed = seal_cbc(b"confidential payload", &[1u8; KEY_SIZE]).unwrap();
        // PKCS#7 padding check rejects nearly every wrong key; a lucky padding
        // would still yield different plaintext.
        match open_cbc(&sealed, &[2u8; KEY_SIZE]) {
            Ok(plain) => assert_ne!(plain, b"confidential payload"),
            Err(err) => assert!(matches!(err, Error::EncryptionError(EncryptionError::Decrypt))),
        }
    }

    #[test]
    fn test_open_rejects_truncated_blob() {
        assert!(open_cbc(&[0u8; 8], &[0u8; KEY_SIZE]).is_err());
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let tag = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            tag,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_opaque_id_shape() {
        let id = opaque_id("doc_");
        assert!(id.starts_with("doc_"));
        assert_eq!(id.len(), 4 + 32);
    }

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare(b"abc", b"abc"));
        assert!(!secure_compare(b"abc", b"abd"));
        assert!(!secure_compare(b"abc", b"abcd"));
    }
}
