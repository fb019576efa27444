//! Metrics collection for the sealing pipeline

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Pipeline outcomes worth counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    DocumentsSigned,
    DocumentsRejected,
    MonitoredAcceptances,
    DevicesRegistered,
    DeviceCheckErrors,
    VerificationsFull,
    VerificationsIntegrityOnly,
    VerificationsFailed,
}

impl Counter {
    const ALL: [Counter; 8] = [
        Counter::DocumentsSigned,
        Counter::DocumentsRejected,
        Counter::MonitoredAcceptances,
        Counter::DevicesRegistered,
        Counter::DeviceCheckErrors,
        Counter::VerificationsFull,
        Counter::VerificationsIntegrityOnly,
        Counter::VerificationsFailed,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Counter::DocumentsSigned => "documents_signed",
            Counter::DocumentsRejected => "documents_rejected",
            Counter::MonitoredAcceptances => "monitored_acceptances",
            Counter::DevicesRegistered => "devices_registered",
            Counter::DeviceCheckErrors => "device_check_errors",
            Counter::VerificationsFull => "verifications_full",
            Counter::VerificationsIntegrityOnly => "verifications_integrity_only",
            Counter::VerificationsFailed => "verifications_failed",
        }
    }
}

/// Metrics collector for pipeline operations
pub struct Metrics {
    counters: [AtomicU64; 8],
    stage_timers: RwLock<HashMap<&'static str, Duration>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            stage_timers: RwLock::new(HashMap::new()),
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Starts timing a stage; the elapsed time is recorded when the guard drops
    pub fn time_stage(&self, stage: &'static str) -> StageTimer<'_> {
        StageTimer {
            metrics: self,
            stage,
            started: Instant::now(),
        }
    }

    pub fn stage_duration(&self, stage: &str) -> Option<Duration> {
        self.stage_timers.read().get(stage).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL
                .iter()
                .map(|c| (c.name(), self.get(*c)))
                .collect(),
            stage_timers: self.stage_timers.read().clone(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StageTimer<'a> {
    metrics: &'a Metrics,
    stage: &'static str,
    started: Instant,
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .stage_timers
            .write()
            .insert(self.stage, self.started.elapsed());
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: HashMap<&'static str, u64>,
    pub stage_timers: HashMap<&'static str, Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_timers() {
        let metrics = Metrics::new();
        metrics.increment(Counter::DocumentsSigned);
        metrics.increment(Counter::DocumentsSigned);
        {
            let _timer = metrics.time_stage("signing");
        }
        assert_eq!(metrics.get(Counter::DocumentsSigned), 2);
        assert_eq!(metrics.get(Counter::DocumentsRejected), 0);
        assert!(metrics.stage_duration("signing").is_some());
        assert_eq!(metrics.snapshot().counters["documents_signed"], 2);
    }
}
