//! Token issuance and zero-knowledge style identity proofs

pub mod token_vault;
pub mod zero_knowledge;

pub use token_vault::{SecureToken, TokenVault, VerificationPayload};
pub use zero_knowledge::{
    merkle_root, MerkleProof, SignatureProof, ZeroKnowledgeAuth, ZeroKnowledgeRecord, ZkProof,
};
