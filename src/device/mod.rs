//! Device trust
//!
//! Devices are identified by a hash of request attributes and registered per
//! user. Trust level, status and a small set of activity indicators decide
//! whether a device may take part in a signing request.

pub mod engine;
pub mod record;
pub mod user_agent;

pub use engine::DeviceTrustEngine;
pub use record::{
    DeviceEnhancement, DeviceFingerprint, DeviceIndicator, DeviceRecord, DeviceStatus,
    DeviceSummary, RegistrationContext, TrustCheck, TrustReason,
};
pub use user_agent::is_suspicious_user_agent;
