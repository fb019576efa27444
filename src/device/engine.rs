//! Per-user device registry and trust scoring

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::record::*;
use super::user_agent::is_suspicious_user_agent;
use crate::config::DeviceConfig;
use crate::encryption::{Purpose, Sealer};
use crate::error::{Error, Rejection, Result, StoreError};
use crate::hash_utils::sha256_hex;
use crate::store::Table;
use crate::types::{IdentityClaim, RequestHeaders, SCHEMA_VERSION};
use crate::utils::crypto_utils::opaque_id;
use crate::utils::{Clock, SharedClock};

const AUTO_REGISTRATION: &str = "auto_signature";
const SIGNATURE_DOCUMENT: &str = "pdf_signature";

/// Attributes hashed into a device fingerprint, in canonical order
#[derive(Serialize)]
struct DeviceAttributes<'a> {
    user_agent: Option<&'a str>,
    ip_address: &'a str,
    device_id: Option<&'a str>,
    device_type: Option<&'a str>,
    device_model: Option<&'a str>,
    device_os: Option<&'a str>,
    device_os_version: Option<&'a str>,
}

pub struct DeviceTrustEngine {
    table: Table<DeviceRecord>,
    /// `(user, fingerprint) -> device_id`; keeps one row per pair
    index: DashMap<(String, DeviceFingerprint), String>,
    sealer: Arc<Sealer>,
    clock: SharedClock,
    config: DeviceConfig,
}

impl DeviceTrustEngine {
    pub fn new(sealer: Arc<Sealer>, clock: SharedClock, config: DeviceConfig) -> Self {
        Self {
            table: Table::new(),
            index: DashMap::new(),
            sealer,
            clock,
            config,
        }
    }

    /// Replaces the registry, rebuilding the `(user, fingerprint)` index
    pub fn with_table(mut self, table: Table<DeviceRecord>) -> Self {
        self.index = DashMap::new();
        for row in table.filter(|_| true) {
            self.index
                .insert((row.user_identifier, row.device_fingerprint), row.device_id);
        }
        self.table = table;
        self
    }

    pub fn table(&self) -> &Table<DeviceRecord> {
        &self.table
    }

    pub fn fingerprint(&self, headers: &RequestHeaders) -> Result<DeviceFingerprint> {
        let attributes = DeviceAttributes {
            user_agent: headers.user_agent.as_deref(),
            ip_address: &headers.ip_address,
            device_id: headers.device_id.as_deref(),
            device_type: headers.device_type.as_deref(),
            device_model: headers.device_model.as_deref(),
            device_os: headers.device_os.as_deref(),
            device_os_version: headers.device_os_version.as_deref(),
        };
        Ok(DeviceFingerprint(sha256_hex(&serde_json::to_vec(&attributes)?)))
    }

    /// Fails with a duplicate-key error when the pair is already registered
    #[instrument(skip(self, context), fields(fingerprint = %fingerprint.preview()))]
    pub fn register(
        &self,
        user: &str,
        fingerprint: &DeviceFingerprint,
        context: &RegistrationContext,
    ) -> Result<String> {
        let sealed_context = self.sealer.seal_json(Purpose::DeviceContext, context)?;
        let now = self.clock.now();

        let device_id = match self.index.entry((user.to_string(), fingerprint.clone())) {
            Entry::Occupied(entry) => {
                return Err(StoreError::DuplicateKey(entry.get().clone()).into());
            }
            Entry::Vacant(entry) => {
                let device_id = opaque_id("dev_");
                self.table.insert(DeviceRecord {
                    schema_version: SCHEMA_VERSION,
                    device_id: device_id.clone(),
                    user_identifier: user.to_string(),
                    device_fingerprint: fingerprint.clone(),
                    first_seen: now,
                    last_seen: now,
                    trust_level: 1.0,
                    registration_context: sealed_context,
                    status: DeviceStatus::Active,
                })?;
                entry.insert(device_id.clone());
                device_id
            }
        };

        info!(device_id = %device_id, "device registered");
        Ok(device_id)
    }

    /// Looks up the device; `last_seen` is refreshed whenever an active row is found
    #[instrument(skip(self), fields(fingerprint = %fingerprint.preview()))]
    pub fn check_trust(&self, user: &str, fingerprint: &DeviceFingerprint) -> TrustCheck {
        let device_id = match self.index.get(&(user.to_string(), fingerprint.clone())) {
            Some(id) => id.value().clone(),
            None => {
                return TrustCheck::Untrusted {
                    reason: TrustReason::DeviceNotRegistered,
                    device_id: None,
                    trust_level: None,
                }
            }
        };
        let record = match self.table.get(&device_id) {
            Some(record) => record,
            None => {
                return TrustCheck::Untrusted {
                    reason: TrustReason::DeviceNotRegistered,
                    device_id: None,
                    trust_level: None,
                }
            }
        };

        let status_reason = match record.status {
            DeviceStatus::Active => None,
            DeviceStatus::Inactive => Some(TrustReason::DeviceInactive),
            DeviceStatus::Blocked => Some(TrustReason::DeviceBlocked),
        };
        if let Some(reason) = status_reason {
            return TrustCheck::Untrusted {
                reason,
                device_id: Some(record.device_id),
                trust_level: Some(record.trust_level),
            };
        }

        let now = self.clock.now();
        self.table.update(&device_id, |row| row.last_seen = now);

        if record.trust_level < self.config.trust_threshold {
            return TrustCheck::Untrusted {
                reason: TrustReason::LowTrustLevel,
                device_id: Some(record.device_id),
                trust_level: Some(record.trust_level),
            };
        }

        TrustCheck::Trusted {
            device_id: record.device_id,
            trust_level: record.trust_level,
            last_seen: now,
        }
    }

    #[instrument(skip(self, headers), fields(fingerprint = %fingerprint.preview()))]
    pub fn detect_suspicious_activity(
        &self,
        user: &str,
        fingerprint: &DeviceFingerprint,
        headers: &RequestHeaders,
    ) -> Result<BTreeSet<DeviceIndicator>> {
        let mut indicators = BTreeSet::new();
        let devices = self.table.filter(|row| row.user_identifier == user);

        let window_start = self.clock.now() - Duration::minutes(self.config.recent_window_minutes);
        let recent = devices.iter().filter(|d| d.first_seen > window_start).count();
        if recent > self.config.max_recent_devices {
            indicators.insert(DeviceIndicator::MultipleDevicesShortTime);
        }

        for device in devices.iter().filter(|d| d.status == DeviceStatus::Active) {
            let context: RegistrationContext = self
                .sealer
                .open_json(Purpose::DeviceContext, &device.registration_context)?;
            if context.ip_address != headers.ip_address {
                indicators.insert(DeviceIndicator::SuspiciousLocation);
                break;
            }
        }

        if is_suspicious_user_agent(headers.user_agent.as_deref()) {
            indicators.insert(DeviceIndicator::SuspiciousUserAgent);
        }

        if !indicators.is_empty() {
            warn!(employee_id = user, indicators = ?indicators, "suspicious device activity");
        }
        Ok(indicators)
    }

    /// Rejects untrusted devices and the multiple-devices plus location
    /// combination
    #[instrument(skip_all, fields(employee_id = %identity.employee_id))]
    pub fn enhance_binding(
        &self,
        identity: &IdentityClaim,
        fingerprint: &DeviceFingerprint,
        headers: &RequestHeaders,
    ) -> Result<DeviceEnhancement> {
        let (device_id, trust_level) = match self.check_trust(&identity.employee_id, fingerprint) {
            TrustCheck::Trusted {
                device_id,
                trust_level,
                ..
            } => (device_id, trust_level),
            TrustCheck::Untrusted { reason, .. } => {
                return Err(Rejection::UntrustedDevice {
                    reason: reason.as_str().to_string(),
                }
                .into());
            }
        };

        let indicators = self.detect_suspicious_activity(&identity.employee_id, fingerprint, headers)?;
        if indicators.contains(&DeviceIndicator::MultipleDevicesShortTime)
            && indicators.contains(&DeviceIndicator::SuspiciousLocation)
        {
            return Err(Rejection::CrossDeviceFraud {
                indicators: names(&indicators),
            }
            .into());
        }

        Ok(DeviceEnhancement {
            device_id,
            trust_level,
            suspicious_indicators: indicators.into_iter().collect(),
        })
    }

    /// Signing-time device gate: auto-registers unknown devices, rejects
    /// untrusted ones and requests that trip too many indicators
    #[instrument(skip_all, fields(employee_id = %identity.employee_id))]
    pub fn gate(
        &self,
        identity: &IdentityClaim,
        fingerprint: &DeviceFingerprint,
        headers: &RequestHeaders,
    ) -> Result<DeviceSummary> {
        let user = identity.employee_id.as_str();
        let mut summary = match self.check_trust(user, fingerprint) {
            TrustCheck::Trusted {
                device_id,
                trust_level,
                ..
            } => {
                debug!(device_id = %device_id, trust_level, "trusted device");
                DeviceSummary {
                    device_id,
                    trust_level,
                    newly_registered: false,
                    indicators: Vec::new(),
                    error: None,
                }
            }
            TrustCheck::Untrusted {
                reason: TrustReason::DeviceNotRegistered,
                ..
            } => {
                let context = RegistrationContext {
                    ip_address: headers.ip_address.clone(),
                    user_agent: headers.user_agent.clone(),
                    timestamp: self.clock.now(),
                    registration_method: AUTO_REGISTRATION.to_string(),
                    document_type: Some(SIGNATURE_DOCUMENT.to_string()),
                    entity: identity.entity.clone(),
                };
                match self.register(user, fingerprint, &context) {
                    Ok(device_id) => DeviceSummary {
                        device_id,
                        trust_level: 1.0,
                        newly_registered: true,
                        indicators: Vec::new(),
                        error: None,
                    },
                    // A concurrent request registered the same pair first
                    Err(Error::StorageError(StoreError::DuplicateKey(device_id))) => {
                        let record = self.table.get(&device_id).ok_or(Error::NotFound)?;
                        DeviceSummary {
                            device_id,
                            trust_level: record.trust_level,
                            newly_registered: false,
                            indicators: Vec::new(),
                            error: None,
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            TrustCheck::Untrusted { reason, .. } => {
                warn!(reason = reason.as_str(), "untrusted device");
                return Err(Rejection::UntrustedDevice {
                    reason: reason.as_str().to_string(),
                }
                .into());
            }
        };

        let indicators = self.detect_suspicious_activity(user, fingerprint, headers)?;
        if indicators.len() >= self.config.reject_indicator_count {
            return Err(Rejection::SuspiciousDeviceActivity {
                indicators: names(&indicators),
            }
            .into());
        }
        summary.indicators = indicators.into_iter().collect();
        Ok(summary)
    }

    pub fn set_trust_level(&self, device_id: &str, trust_level: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&trust_level) {
            return Err(Error::ValidationError(format!(
                "trust level {} outside 0..=1",
                trust_level
            )));
        }
        if !self.table.update(device_id, |row| row.trust_level = trust_level) {
            return Err(Error::NotFound);
        }
        info!(device_id, trust_level, "device trust level changed");
        Ok(())
    }

    pub fn set_status(&self, device_id: &str, status: DeviceStatus) -> Result<()> {
        if !self.table.update(device_id, |row| row.status = status) {
            return Err(Error::NotFound);
        }
        info!(device_id, status = ?status, "device status changed");
        Ok(())
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.table.save_to(dir).await
    }
}

fn names(indicators: &BTreeSet<DeviceIndicator>) -> Vec<String> {
    indicators.iter().map(|i| i.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSecret;
    use crate::utils::ManualClock;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/124.0";

    fn engine() -> (DeviceTrustEngine, Arc<ManualClock>) {
        let secret = ServerSecret::new("device-engine-secret");
        let clock = Arc::new(ManualClock::starting_now());
        let engine = DeviceTrustEngine::new(
            Arc::new(Sealer::new(&secret).unwrap()),
            clock.clone(),
            DeviceConfig::default(),
        );
        (engine, clock)
    }

    fn headers(ip: &str, model: &str) -> RequestHeaders {
        let mut headers = RequestHeaders::new(ip, Some(BROWSER));
        headers.device_model = Some(model.to_string());
        headers
    }

    fn identity() -> IdentityClaim {
        IdentityClaim::new("Rafael", "98798798700", "5150")
    }

    fn context(ip: &str) -> RegistrationContext {
        RegistrationContext {
            ip_address: ip.to_string(),
            user_agent: Some(BROWSER.to_string()),
            timestamp: chrono::Utc::now(),
            registration_method: "manual".to_string(),
            document_type: None,
            entity: None,
        }
    }

    #[test]
    fn test_fingerprint_depends_on_attributes() {
        let (engine, _) = engine();
        let a = engine.fingerprint(&headers("10.0.0.1", "Pixel")).unwrap();
        let b = engine.fingerprint(&headers("10.0.0.1", "Pixel")).unwrap();
        let c = engine.fingerprint(&headers("10.0.0.1", "iPhone")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_register_and_trust() {
        let (engine, clock) = engine();
        let fp = engine.fingerprint(&headers("10.0.0.1", "Pixel")).unwrap();

        assert_eq!(
            engine.check_trust("5150", &fp),
            TrustCheck::Untrusted {
                reason: TrustReason::DeviceNotRegistered,
                device_id: None,
                trust_level: None
            }
        );

        let device_id = engine.register("5150", &fp, &context("10.0.0.1")).unwrap();
        assert!(device_id.starts_with("dev_"));
        assert!(engine.register("5150", &fp, &context("10.0.0.1")).is_err());

        clock.advance(Duration::minutes(10));
        match engine.check_trust("5150", &fp) {
            TrustCheck::Trusted { last_seen, .. } => assert_eq!(last_seen, clock.now()),
            other => panic!("expected trusted, got {:?}", other),
        }
        assert_eq!(engine.table().get(&device_id).unwrap().last_seen, clock.now());
    }

    #[test]
    fn test_low_trust_and_status() {
        let (engine, _) = engine();
        let fp = engine.fingerprint(&headers("10.0.0.1", "Pixel")).unwrap();
        let device_id = engine.register("5150", &fp, &context("10.0.0.1")).unwrap();

        engine.set_trust_level(&device_id, 0.4).unwrap();
        assert!(matches!(
            engine.check_trust("5150", &fp),
            TrustCheck::Untrusted { reason: TrustReason::LowTrustLevel, .. }
        ));

        engine.set_trust_level(&device_id, 0.5).unwrap();
        assert!(engine.check_trust("5150", &fp).is_trusted());

        engine.set_status(&device_id, DeviceStatus::Blocked).unwrap();
        assert!(matches!(
            engine.check_trust("5150", &fp),
            TrustCheck::Untrusted { reason: TrustReason::DeviceBlocked, .. }
        ));

        assert!(engine.set_trust_level(&device_id, 1.5).is_err());
        assert!(matches!(engine.set_status("dev_missing", DeviceStatus::Active), Err(Error::NotFound)));
    }

    #[test]
    fn test_indicators() {
        let (engine, clock) = engine();
        for (i, model) in ["a", "b", "c"].iter().enumerate() {
            let ip = format!("10.0.0.{}", i + 1);
            let fp = engine.fingerprint(&headers(&ip, model)).unwrap();
            engine.register("5150", &fp, &context(&ip)).unwrap();
        }

        let current = headers("10.0.0.1", "a");
        let fp = engine.fingerprint(&current).unwrap();
        let indicators = engine.detect_suspicious_activity("5150", &fp, &current).unwrap();
        assert!(indicators.contains(&DeviceIndicator::MultipleDevicesShortTime));
        assert!(indicators.contains(&DeviceIndicator::SuspiciousLocation));
        assert!(!indicators.contains(&DeviceIndicator::SuspiciousUserAgent));

        clock.advance(Duration::hours(2));
        let later = engine.detect_suspicious_activity("5150", &fp, &current).unwrap();
        assert!(!later.contains(&DeviceIndicator::MultipleDevicesShortTime));
    }

    #[test]
    fn test_enhance_binding_rejects_cross_device_burst() {
        let (engine, _) = engine();
        for (i, model) in ["a", "b", "c"].iter().enumerate() {
            let ip = format!("10.0.0.{}", i + 1);
            let fp = engine.fingerprint(&headers(&ip, model)).unwrap();
            engine.register("5150", &fp, &context(&ip)).unwrap();
        }
        let current = headers("10.0.0.1", "a");
        let fp = engine.fingerprint(&current).unwrap();
        assert!(matches!(
            engine.enhance_binding(&identity(), &fp, &current),
            Err(Error::Rejected(Rejection::CrossDeviceFraud { .. }))
        ));

        let unknown = headers("10.0.0.9", "z");
        let unknown_fp = engine.fingerprint(&unknown).unwrap();
        assert!(matches!(
            engine.enhance_binding(&identity(), &unknown_fp, &unknown),
            Err(Error::Rejected(Rejection::UntrustedDevice { .. }))
        ));
    }

    #[test]
    fn test_gate_auto_registers_then_trusts() {
        let (engine, _) = engine();
        let current = headers("10.0.0.1", "Pixel");
        let fp = engine.fingerprint(&current).unwrap();

        let first = engine.gate(&identity(), &fp, &current).unwrap();
        assert!(first.newly_registered);
        assert_eq!(first.trust_level, 1.0);

        let second = engine.gate(&identity(), &fp, &current).unwrap();
        assert!(!second.newly_registered);
        assert_eq!(second.device_id, first.device_id);
        assert_eq!(engine.table().len(), 1);
    }

    #[test]
    fn test_gate_rejects_two_indicators() {
        let (engine, _) = engine();
        let home = headers("10.0.0.1", "Pixel");
        let fp = engine.fingerprint(&home).unwrap();
        engine.gate(&identity(), &fp, &home).unwrap();

        let mut scripted = RequestHeaders::new("172.16.0.5", Some("curl/8.4.0"));
        scripted.device_model = Some("Pixel".into());
        let scripted_fp = engine.fingerprint(&scripted).unwrap();
        match engine.gate(&identity(), &scripted_fp, &scripted) {
            Err(Error::Rejected(Rejection::SuspiciousDeviceActivity { indicators })) => {
                assert_eq!(indicators, vec!["suspicious_location", "suspicious_user_agent"]);
            }
            other => panic!("unexpected gate outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reload_rebuilds_index() {
        let (engine, clock) = engine();
        let fp = engine.fingerprint(&headers("10.0.0.1", "Pixel")).unwrap();
        engine.register("5150", &fp, &context("10.0.0.1")).unwrap();

        let dir = tempfile::tempdir().unwrap();
        engine.save(dir.path()).await.unwrap();

        let secret = ServerSecret::new("device-engine-secret");
        let restored = DeviceTrustEngine::new(
            Arc::new(Sealer::new(&secret).unwrap()),
            clock,
            DeviceConfig::default(),
        )
        .with_table(Table::load_from(dir.path()).await.unwrap());
        assert!(restored.check_trust("5150", &fp).is_trusted());
        assert!(restored.register("5150", &fp, &context("10.0.0.1")).is_err());
    }
}
