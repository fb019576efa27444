//! Contextual document bindings
//!
//! A binding ties a document fingerprint to the signer's identity and the
//! request context under an HMAC keyed by the server secret. The whole
//! binding is stored sealed and can later be re-validated against a
//! presented document.

pub mod engine;
pub mod fingerprint;
pub mod record;

pub use engine::DocumentFingerprintEngine;
pub use fingerprint::{fingerprint, DocumentFingerprint, FingerprintCharacteristics};
pub use record::{
    BindingContext, BindingFailure, BindingReceipt, BindingRecord, BindingValidation,
    ContextSnapshot, DocumentBinding, IntegrityToken, WatermarkData,
};
