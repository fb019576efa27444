//! Per-document RSA signing

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use super::document_store::SecureDocumentStore;
use crate::error::{Error, Result};
use crate::types::IdentityClaim;

const RSA_BITS: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDocument {
    pub document_id: String,
    /// base64 of the PEM (SPKI) public key
    pub public_key_b64: String,
}

/// Generates a fresh keypair for every document; the private key is dropped
/// when the call returns
pub struct CryptoSigner {
    store: Arc<SecureDocumentStore>,
}

impl CryptoSigner {
    pub fn new(store: Arc<SecureDocumentStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(size = document.len()))]
    pub async fn sign(&self, document: &[u8], identity: &IdentityClaim) -> Result<SignedDocument> {
        let content = document.to_vec();
        let (content, signature, public_key_pem) =
            tokio::task::spawn_blocking(move || -> Result<_> {
                let (signature, pem) = sign_detached(&content)?;
                Ok((content, signature, pem))
            })
            .await??;

        let document_id = self
            .store
            .store(&content, identity, &signature, &public_key_pem)?;

        info!(document_id = %document_id, "document signed");
        Ok(SignedDocument {
            document_id,
            public_key_b64: BASE64.encode(&public_key_pem),
        })
    }

    /// RSA-SHA256 verification; malformed keys or signatures verify as false
    pub fn verify(document: &[u8], signature: &[u8], public_key_pem: &[u8]) -> bool {
        let outcome = PKey::public_key_from_pem(public_key_pem).and_then(|key| {
            let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
            verifier.update(document)?;
            verifier.verify(signature)
        });
        match outcome {
            Ok(valid) => valid,
            Err(e) => {
                debug!(error = %e, "signature verification errored");
                false
            }
        }
    }
}

/// Returns `(signature, public_key_pem)`
fn sign_detached(document: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let keypair = Rsa::generate(RSA_BITS)
        .and_then(PKey::from_rsa)
        .map_err(|e| {
            error!(error = %e, "RSA key generation failed");
            Error::CryptoError(format!("key generation failed: {}", e))
        })?;

    let mut signer = Signer::new(MessageDigest::sha256(), &keypair)?;
    signer.update(document)?;
    let signature = signer.sign_to_vec()?;
    let public_key_pem = keypair.public_key_to_pem()?;
    Ok((signature, public_key_pem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSecret;
    use crate::utils::system_clock;

    fn signer() -> (CryptoSigner, Arc<SecureDocumentStore>) {
        let store = Arc::new(SecureDocumentStore::new(
            ServerSecret::new("signer-test-secret"),
            system_clock(),
            3650,
        ));
        (CryptoSigner::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_sign_then_verify_stored_document() {
        let (signer, store) = signer();
        let identity = IdentityClaim::new("Carlos", "55566677788", "300");
        let signed = signer.sign(b"%PDF-1.7 content", &identity).await.unwrap();

        let pem = BASE64.decode(&signed.public_key_b64).unwrap();
        assert!(String::from_utf8_lossy(&pem).contains("BEGIN PUBLIC KEY"));

        let stored = store.retrieve(&signed.document_id, &identity).unwrap();
        assert_eq!(stored.public_key_pem, pem);
        assert!(CryptoSigner::verify(&stored.document, &stored.signature, &pem));
        assert!(!CryptoSigner::verify(b"%PDF-1.7 tampered", &stored.signature, &pem));
    }

    #[tokio::test]
    async fn test_keys_are_per_document() {
        let (signer, _) = signer();
        let identity = IdentityClaim::new("Carlos", "55566677788", "300");
        let a = signer.sign(b"same", &identity).await.unwrap();
        let b = signer.sign(b"same", &identity).await.unwrap();
        assert_ne!(a.public_key_b64, b.public_key_b64);
        assert_ne!(a.document_id, b.document_id);
    }

    #[test]
    fn test_malformed_inputs_verify_false() {
        assert!(!CryptoSigner::verify(b"doc", b"sig", b"not a pem"));
        let (signature, pem) = sign_detached(b"doc").unwrap();
        assert!(!CryptoSigner::verify(b"doc", &signature[..10], &pem));
    }
}
