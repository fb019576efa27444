//! Main Library File for signed-document binding and verification
//! Provides per-document signing, identity-keyed storage, contextual
//! bindings, forgery heuristics, device trust and token issuance, chained
//! by [`pipeline::SealingService`].

// Configuration and core pipeline
pub mod config;
pub mod error;
pub mod hash_utils;
pub mod pipeline;
pub mod types;

// Persistence
pub mod store;

// Cryptography
pub mod encryption;
pub mod signature;

// Document analysis and binding
pub mod binding;
pub mod forensics;
pub mod sanitize;

// Request context and tokens
pub mod device;
pub mod vault;

// Shared utilities
pub mod utils;

// Re-exports for crate consumers
pub use binding::DocumentFingerprintEngine;
pub use config::Config;
pub use device::DeviceTrustEngine;
pub use error::{Error, Rejection, Result};
pub use forensics::ForgeryHeuristics;
pub use pipeline::{
    SealingService, SigningReceipt, SigningRequest, VerificationLevel, VerificationOutcome,
    VerificationRequest,
};
pub use signature::{CryptoSigner, SecureDocumentStore};
pub use types::{DocumentSource, IdentityClaim, RequestHeaders};
pub use utils::{Logger, Metrics};
pub use vault::{TokenVault, ZeroKnowledgeAuth};
