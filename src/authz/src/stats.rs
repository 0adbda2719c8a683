//! Per-instance counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Decision;

/// Live counters, updated lock-free from any thread
#[derive(Debug, Default)]
pub struct InstanceStats {
    total_requests: AtomicU64,
    allowed_decisions: AtomicU64,
    denied_decisions: AtomicU64,
    failed_requests: AtomicU64,
}

impl InstanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request that produced a decision
    pub fn record_decision(&self, decision: Decision) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match decision {
            Decision::Allow => self.allowed_decisions.fetch_add(1, Ordering::Relaxed),
            Decision::Deny => self.denied_decisions.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Count a request that failed before a decision was reached
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            allowed_decisions: self.allowed_decisions.load(Ordering::Relaxed),
            denied_decisions: self.denied_decisions.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`InstanceStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Total number of authorization requests
    pub total_requests: u64,

    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions
    pub denied_decisions: u64,

    /// Requests rejected before a decision
    pub failed_requests: u64,
}

impl StatsSnapshot {
    /// Fraction of decided requests that were allowed
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = InstanceStats::new();
        stats.record_decision(Decision::Allow);
        stats.record_decision(Decision::Allow);
        stats.record_decision(Decision::Deny);
        stats.record_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.allowed_decisions, 2);
        assert_eq!(snapshot.denied_decisions, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.allow_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_allow_rate() {
        assert_eq!(StatsSnapshot::default().allow_rate(), 0.0);
    }
}
