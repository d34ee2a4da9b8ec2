//! Ownership membrane for cshape.
//!
//! Every C resource that crosses the binding boundary as an opaque pointer
//! (heap blocks from `malloc`/`calloc`/`realloc`, `FILE*` streams, temporary
//! file names) is registered here and tracked through a two-state lifecycle:
//! `live -> released`. Operations on released or never-registered handles are
//! refused with a typed error instead of reaching the native library.
//!
//! # Architecture
//!
//! - **Ownership tracker** (`ownership`): logical-identity handle table keyed by
//!   monotonically increasing allocation tokens, guarded by a single lock
//! - **Configuration** (`config`): leak-check and release-history settings
//! - **Metrics** (`metrics`): atomic counters for observability

#![deny(unsafe_code)]

pub mod config;
pub mod metrics;
pub mod ownership;

pub use config::{LeakCheck, MembraneConfig};
pub use metrics::{MembraneMetrics, MetricsSnapshot};
pub use ownership::{
    Handle, HandleId, HandleRecord, LeakReport, Lifecycle, OwnershipError, OwnershipTracker,
    ResourceClass, global_tracker,
};
