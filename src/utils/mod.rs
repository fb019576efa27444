//! Utility Module Implementation
//!
//! Aggregates internal helpers: logging, metrics, the shared clock,
//! entropy analysis and cryptographic primitives.

pub mod clock;
pub mod crypto_utils;
pub mod entropy;
pub mod logger;
pub mod metrics;

// Re-exports for unified access
pub use self::{
    clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock},
    entropy::{byte_frequencies, calculate_entropy},
    logger::{mask_cpf, preview, Logger},
    metrics::{Counter, Metrics, MetricsSnapshot},
};
