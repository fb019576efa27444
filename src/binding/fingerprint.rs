//! Multi-layer document fingerprint
//!
//! Every layer is derived from the document bytes alone, so the same bytes
//! always produce the same fingerprint.

use lazy_static::lazy_static;
use regex::bytes::Regex as BytesRegex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::hash_utils::{hash_bytes, sha256_hex, HashAlgorithm};
use crate::utils::{byte_frequencies, calculate_entropy};

/// Prefix length normalised into the pattern hash
const PATTERN_PREFIX_LEN: usize = 1000;

const INFO_KEYS: [&str; 6] = ["Producer", "Creator", "Author", "Title", "CreationDate", "ModDate"];

lazy_static! {
    static ref DIGIT_RUN: BytesRegex = BytesRegex::new(r"[0-9]+").unwrap();
    static ref INFO_VALUES: Vec<(&'static str, BytesRegex)> = INFO_KEYS
        .iter()
        .map(|key| (*key, BytesRegex::new(&format!(r"/{}\s*\(([^)]+)\)", key)).unwrap()))
        .collect();
}

/// The layers hashed into the fingerprint, in canonical order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintCharacteristics {
    pub size: u64,
    pub md5: String,
    pub sha256: String,
    pub sha512: String,
    pub creation_patterns: String,
    pub metadata_hash: String,
    pub structural_signature: String,
}

#[derive(Serialize)]
struct CreationPatterns {
    producer: Option<String>,
    creation_date: Option<String>,
}

#[derive(Serialize)]
struct StructuralSignature<'a> {
    length: u64,
    entropy: f64,
    byte_frequency: &'a [u64],
    pattern_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFingerprint {
    /// Hex SHA-256 over the canonical encoding of the characteristics
    pub value: String,
    pub characteristics: FingerprintCharacteristics,
}

/// Computes the fingerprint; CPU bound, callers run it off the async runtime
pub fn fingerprint(content: &[u8]) -> Result<DocumentFingerprint> {
    let ((md5, sha256), (sha512, structure)) = rayon::join(
        || {
            (
                hash_bytes(content, HashAlgorithm::MD5).digest,
                hash_bytes(content, HashAlgorithm::SHA256).digest,
            )
        },
        || {
            (
                hash_bytes(content, HashAlgorithm::SHA512).digest,
                structural_signature(content),
            )
        },
    );

    let characteristics = FingerprintCharacteristics {
        size: content.len() as u64,
        md5,
        sha256,
        sha512,
        creation_patterns: creation_patterns(content)?,
        metadata_hash: metadata_hash(content)?,
        structural_signature: structure?,
    };

    Ok(DocumentFingerprint {
        value: sha256_hex(&canonical(&characteristics)?),
        characteristics,
    })
}

fn canonical<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::SerializationError(e.to_string()))
}

fn info_value(content: &[u8], key: &str) -> Option<String> {
    INFO_VALUES
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, re)| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// A marker that is present but unparsable hashes as `unknown`
fn creation_patterns(content: &[u8]) -> Result<String> {
    let marker = |key: &str| -> Option<String> {
        let present = content
            .windows(key.len() + 1)
            .any(|w| w[0] == b'/' && &w[1..] == key.as_bytes());
        present.then(|| info_value(content, key).unwrap_or_else(|| "unknown".to_string()))
    };

    let patterns = CreationPatterns {
        producer: marker("Producer"),
        creation_date: marker("CreationDate"),
    };
    Ok(sha256_hex(&canonical(&patterns)?))
}

fn metadata_hash(content: &[u8]) -> Result<String> {
    let values: Vec<(&str, Option<String>)> = INFO_KEYS
        .iter()
        .map(|key| (*key, info_value(content, key)))
        .collect();
    Ok(sha256_hex(&canonical(&values)?))
}

fn structural_signature(content: &[u8]) -> Result<String> {
    let prefix = &content[..content.len().min(PATTERN_PREFIX_LEN)];
    let normalised = DIGIT_RUN.replace_all(prefix, &b"N"[..]);
    let frequencies = byte_frequencies(content);

    let signature = StructuralSignature {
        length: content.len() as u64,
        entropy: calculate_entropy(content),
        byte_frequency: &frequencies,
        pattern_hash: sha256_hex(&normalised),
    };
    Ok(sha256_hex(&canonical(&signature)?))
}
