//! Boundary counters.
//!
//! Relaxed atomics, diagnostic only.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for native calls made through the binding layer.
pub struct AbiMetrics {
    /// Native functions invoked after marshaling succeeded.
    pub native_calls: AtomicU64,
    /// Calls refused before reaching native code.
    pub refused_calls: AtomicU64,
    /// Comparator invocations routed through the trampoline.
    pub trampoline_calls: AtomicU64,
}

impl AbiMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            native_calls: AtomicU64::new(0),
            refused_calls: AtomicU64::new(0),
            trampoline_calls: AtomicU64::new(0),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> AbiMetricsSnapshot {
        AbiMetricsSnapshot {
            native_calls: Self::get(&self.native_calls),
            refused_calls: Self::get(&self.refused_calls),
            trampoline_calls: Self::get(&self.trampoline_calls),
        }
    }
}

impl Default for AbiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiMetricsSnapshot {
    pub native_calls: u64,
    pub refused_calls: u64,
    pub trampoline_calls: u64,
}

static ABI_METRICS: AbiMetrics = AbiMetrics::new();

/// Process-wide boundary counters.
#[must_use]
pub fn abi_metrics() -> &'static AbiMetrics {
    &ABI_METRICS
}

/// Count a refusal and pass the error through.
pub(crate) fn refused<E>(err: E) -> E {
    AbiMetrics::inc(&ABI_METRICS.refused_calls);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_each_counter() {
        let m = AbiMetrics::new();
        AbiMetrics::inc(&m.native_calls);
        AbiMetrics::inc(&m.trampoline_calls);
        AbiMetrics::inc(&m.trampoline_calls);
        assert_eq!(
            m.snapshot(),
            AbiMetricsSnapshot {
                native_calls: 1,
                refused_calls: 0,
                trampoline_calls: 2,
            }
        );
    }
}
