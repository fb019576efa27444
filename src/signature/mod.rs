pub mod crypto_signer;
pub mod document_store;

pub use crypto_signer::{CryptoSigner, SignedDocument};
pub use document_store::{user_hash, RetrievedDocument, SecureDocumentStore, SignedDocumentRecord};
