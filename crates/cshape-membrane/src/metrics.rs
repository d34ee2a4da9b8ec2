//! Atomic counters for tracker observability.
//!
//! All counters use relaxed ordering. They are diagnostic only and never
//! used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Tracker operation counters.
pub struct MembraneMetrics {
    /// Handles registered.
    pub registrations: AtomicU64,
    /// Handles released.
    pub releases: AtomicU64,
    /// `check_live` calls that passed.
    pub live_checks: AtomicU64,
    /// Registrations refused because the address was already live.
    pub duplicate_registrations: AtomicU64,
    /// Releases refused because the handle was already released.
    pub double_releases: AtomicU64,
    /// Operations refused on a handle that was never issued.
    pub unknown_handles: AtomicU64,
    /// Operations refused on a released handle.
    pub uses_after_release: AtomicU64,
    /// Operations refused because the resource class did not match.
    pub class_mismatches: AtomicU64,
    /// Operations refused because the handle's address was not the tracked one.
    pub address_mismatches: AtomicU64,
    /// Leak checkpoints taken.
    pub leak_checkpoints: AtomicU64,
}

impl MembraneMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registrations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            live_checks: AtomicU64::new(0),
            duplicate_registrations: AtomicU64::new(0),
            double_releases: AtomicU64::new(0),
            unknown_handles: AtomicU64::new(0),
            uses_after_release: AtomicU64::new(0),
            class_mismatches: AtomicU64::new(0),
            address_mismatches: AtomicU64::new(0),
            leak_checkpoints: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Total refused operations across every refusal kind.
    #[must_use]
    pub fn refusals(&self) -> u64 {
        Self::get(&self.duplicate_registrations)
            + Self::get(&self.double_releases)
            + Self::get(&self.unknown_handles)
            + Self::get(&self.uses_after_release)
            + Self::get(&self.class_mismatches)
            + Self::get(&self.address_mismatches)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registrations: Self::get(&self.registrations),
            releases: Self::get(&self.releases),
            live_checks: Self::get(&self.live_checks),
            duplicate_registrations: Self::get(&self.duplicate_registrations),
            double_releases: Self::get(&self.double_releases),
            unknown_handles: Self::get(&self.unknown_handles),
            uses_after_release: Self::get(&self.uses_after_release),
            class_mismatches: Self::get(&self.class_mismatches),
            address_mismatches: Self::get(&self.address_mismatches),
            leak_checkpoints: Self::get(&self.leak_checkpoints),
        }
    }
}

impl Default for MembraneMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all tracker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub registrations: u64,
    pub releases: u64,
    pub live_checks: u64,
    pub duplicate_registrations: u64,
    pub double_releases: u64,
    pub unknown_handles: u64,
    pub uses_after_release: u64,
    pub class_mismatches: u64,
    pub address_mismatches: u64,
    pub leak_checkpoints: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = MembraneMetrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.registrations, 0);
        assert_eq!(snap.releases, 0);
        assert_eq!(m.refusals(), 0);
    }

    #[test]
    fn refusals_sum_every_refusal_kind() {
        let m = MembraneMetrics::new();
        MembraneMetrics::inc(&m.double_releases);
        MembraneMetrics::inc(&m.uses_after_release);
        MembraneMetrics::inc(&m.uses_after_release);
        MembraneMetrics::inc(&m.address_mismatches);
        MembraneMetrics::inc(&m.registrations);
        assert_eq!(m.refusals(), 4);
        assert_eq!(m.snapshot().uses_after_release, 2);
    }
}
