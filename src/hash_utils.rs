//! Hash Utilities for document fingerprints and identity hashes
//! Provides the digest layers used by fingerprints, user hashes and commitments

use std::fmt;

use sha2::{Digest as ShaDigest, Sha256, Sha512};

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    MD5,
    SHA256,
    SHA512,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::MD5 => "MD5",
            HashAlgorithm::SHA256 => "SHA256",
            HashAlgorithm::SHA512 => "SHA512",
        };
        write!(f, "{}", name)
    }
}

/// Hash result (digest + algorithm)
#[derive(Debug, Clone)]
pub struct HashResult {
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

/// Hashes a byte slice
pub fn hash_bytes(data: &[u8], algo: HashAlgorithm) -> HashResult {
    let digest = match algo {
        HashAlgorithm::MD5 => format!("{:x}", md5::compute(data)),
        HashAlgorithm::SHA256 => hex::encode(Sha256::digest(data)),
        HashAlgorithm::SHA512 => hex::encode(Sha512::digest(data)),
    };

    HashResult { algorithm: algo, digest }
}

/// Raw SHA-256 digest
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    hash_bytes(data, HashAlgorithm::SHA256).digest
}

/// SHA-256 over `parts` joined with `|`
pub fn sha256_joined(parts: &[&str]) -> String {
    sha256_hex(parts.join("|").as_bytes())
}

/// Verifies content hash matches the expected value
pub fn verify_hash(data: &[u8], expected: &str, algo: HashAlgorithm) -> bool {
    hash_bytes(data, algo).digest.eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        let input = b"signed document";
        assert_eq!(hash_bytes(input, HashAlgorithm::MD5).digest.len(), 32);
        assert_eq!(hash_bytes(input, HashAlgorithm::SHA256).digest.len(), 64);
        assert_eq!(hash_bytes(input, HashAlgorithm::SHA512).digest.len(), 128);
    }

    #[test]
    fn test_known_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hex::encode(sha256(b"abc")), sha256_hex(b"abc"));
    }

    #[test]
    fn test_joined_uses_pipe_separator() {
        assert_eq!(sha256_joined(&["a", "b"]), sha256_hex(b"a|b"));
    }

    #[test]
    fn test_verify_hash() {
        let hash = hash_bytes(b"integrity", HashAlgorithm::SHA512);
        assert!(verify_hash(b"integrity", &hash.digest.to_uppercase(), HashAlgorithm::SHA512));
        assert!(!verify_hash(b"tampered", &hash.digest, HashAlgorithm::SHA512));
    }
}
