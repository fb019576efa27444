use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;
use crate::utils::preview;

/// Hex SHA-256 over the canonical device attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(pub String);

impl DeviceFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for logs
    pub fn preview(&self) -> String {
        preview(&self.0)
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Blocked,
}

/// Where and how a device was first registered; stored sealed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationContext {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub registration_method: String,
    pub document_type: Option<String>,
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub schema_version: u16,
    pub device_id: String,
    pub user_identifier: String,
    pub device_fingerprint: DeviceFingerprint,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub trust_level: f64,
    /// Sealed [`RegistrationContext`]
    pub registration_context: String,
    pub status: DeviceStatus,
}

impl Record for DeviceRecord {
    const TABLE: &'static str = "user_devices";

    fn key(&self) -> &str {
        &self.device_id
    }

    // Devices are deactivated or blocked, never expired
    fn expires_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::MAX_UTC
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustReason {
    DeviceNotRegistered,
    LowTrustLevel,
    DeviceBlocked,
    DeviceInactive,
}

impl TrustReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustReason::DeviceNotRegistered => "device_not_registered",
            TrustReason::LowTrustLevel => "low_trust_level",
            TrustReason::DeviceBlocked => "device_blocked",
            TrustReason::DeviceInactive => "device_inactive",
        }
    }

    /// What the caller is expected to do next
    pub fn action(self) -> &'static str {
        match self {
            TrustReason::DeviceNotRegistered => "register",
            TrustReason::LowTrustLevel => "require_additional_verification",
            TrustReason::DeviceBlocked | TrustReason::DeviceInactive => "contact_support",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrustCheck {
    Trusted {
        device_id: String,
        trust_level: f64,
        last_seen: DateTime<Utc>,
    },
    Untrusted {
        reason: TrustReason,
        device_id: Option<String>,
        trust_level: Option<f64>,
    },
}

impl TrustCheck {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustCheck::Trusted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceIndicator {
    MultipleDevicesShortTime,
    SuspiciousLocation,
    SuspiciousUserAgent,
}

impl DeviceIndicator {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceIndicator::MultipleDevicesShortTime => "multiple_devices_short_time",
            DeviceIndicator::SuspiciousLocation => "suspicious_location",
            DeviceIndicator::SuspiciousUserAgent => "suspicious_user_agent",
        }
    }
}

impl fmt::Display for DeviceIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEnhancement {
    pub device_id: String,
    pub trust_level: f64,
    pub suspicious_indicators: Vec<DeviceIndicator>,
}

/// Device information reported with a signing receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub trust_level: f64,
    pub newly_registered: bool,
    pub indicators: Vec<DeviceIndicator>,
    /// Set when the device check failed and the request continued anyway
    pub error: Option<String>,
}

impl DeviceSummary {
    pub fn failed(message: String, at: DateTime<Utc>) -> Self {
        Self {
            device_id: format!("ERROR_{}", at.timestamp()),
            trust_level: 0.0,
            newly_registered: false,
            indicators: Vec::new(),
            error: Some(message),
        }
    }
}
