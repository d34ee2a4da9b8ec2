//! Logical-identity handle table.
//!
//! Native resources are identified by raw addresses, but addresses are
//! recycled: `free(p)` followed by `malloc(n)` may hand back the same `p`.
//! The tracker therefore never keys lifecycle state by address. Each
//! registration mints a fresh [`HandleId`] from a monotonically increasing
//! token counter, and callers hold that token. A token below the counter that
//! is no longer in the live table was released; a token at or above the
//! counter was never issued. This lets the table drop an entry at release
//! time while still classifying a later `release` as a double release.
//!
//! The whole table sits behind a single `parking_lot::Mutex`: a handle can be
//! released on one thread while another thread checks it, and the table
//! structure itself is shared.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::config::{MembraneConfig, membrane_config};
use crate::metrics::MembraneMetrics;

/// Class of native resource behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    /// Block from `malloc`/`calloc`/`realloc`.
    HeapBlock,
    /// `FILE*` from `fopen`/`tmpfile`.
    FileStream,
    /// Temporary file name that must be removed.
    TempName,
}

impl ResourceClass {
    /// Stable kebab-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeapBlock => "heap-block",
            Self::FileStream => "file-stream",
            Self::TempName => "temp-name",
        }
    }

    /// Parse a kebab-case name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "heap-block" => Some(Self::HeapBlock),
            "file-stream" => Some(Self::FileStream),
            "temp-name" => Some(Self::TempName),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation-sequence token. Never reused within a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandleId(u64);

impl HandleId {
    /// Raw token value.
    #[must_use]
    pub const fn token(self) -> u64 {
        self.0
    }

    /// Rebuild an id from a raw token (for handles round-tripped through
    /// external tooling). Unknown tokens are refused by the tracker.
    #[must_use]
    pub const fn from_token(token: u64) -> Self {
        Self(token)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Live,
    Released,
}

/// Opaque handle given to callers: identity, class and the native address
/// passed through verbatim at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Handle {
    pub id: HandleId,
    pub class: ResourceClass,
    pub addr: usize,
}

/// Table entry for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandleRecord {
    pub handle: Handle,
    pub state: Lifecycle,
    /// Known extent in bytes (heap blocks).
    pub len: Option<usize>,
}

/// Refused tracker operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("{class} at {addr:#x} is already registered as live handle {existing}")]
    DuplicateRegistration {
        existing: HandleId,
        class: ResourceClass,
        addr: usize,
    },
    #[error("handle {id} released twice{}", describe_class(*.class))]
    DoubleRelease {
        id: HandleId,
        class: Option<ResourceClass>,
    },
    #[error("handle {id} was never registered")]
    UnknownHandle { id: HandleId },
    #[error("handle {id} used after release{}", describe_class(*.class))]
    UseAfterRelease {
        id: HandleId,
        class: Option<ResourceClass>,
    },
    #[error("handle {id} is a {actual}, not a {expected}")]
    ClassMismatch {
        id: HandleId,
        expected: ResourceClass,
        actual: ResourceClass,
    },
    #[error("handle {id} names {actual:#x}, but it owns {recorded:#x}")]
    AddressMismatch {
        id: HandleId,
        recorded: usize,
        actual: usize,
    },
}

impl OwnershipError {
    /// Stable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "DuplicateRegistration",
            Self::DoubleRelease { .. } => "DoubleRelease",
            Self::UnknownHandle { .. } => "UnknownHandle",
            Self::UseAfterRelease { .. } => "UseAfterRelease",
            Self::ClassMismatch { .. } => "ClassMismatch",
            Self::AddressMismatch { .. } => "AddressMismatch",
        }
    }
}

fn describe_class(class: Option<ResourceClass>) -> String {
    class.map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Advisory snapshot of handles still live at a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    pub leaks: Vec<HandleRecord>,
}

impl LeakReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }

    /// Number of leaked handles of `class`.
    #[must_use]
    pub fn count_of(&self, class: ResourceClass) -> usize {
        self.leaks
            .iter()
            .filter(|r| r.handle.class == class)
            .count()
    }
}

struct HandleTable {
    next_token: u64,
    live: HashMap<HandleId, HandleRecord>,
    live_by_addr: HashMap<usize, HandleId>,
    released: VecDeque<HandleRecord>,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            next_token: 1,
            live: HashMap::new(),
            live_by_addr: HashMap::new(),
            released: VecDeque::new(),
        }
    }

    fn was_issued(&self, id: HandleId) -> bool {
        id.0 != 0 && id.0 < self.next_token
    }

    fn released_class(&self, id: HandleId) -> Option<ResourceClass> {
        self.released
            .iter()
            .rev()
            .find(|r| r.handle.id == id)
            .map(|r| r.handle.class)
    }
}

/// Thread-safe resource ownership tracker.
pub struct OwnershipTracker {
    table: Mutex<HandleTable>,
    config: MembraneConfig,
    metrics: MembraneMetrics,
}

impl OwnershipTracker {
    /// Create an empty tracker with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MembraneConfig::default())
    }

    /// Create an empty tracker with an explicit configuration.
    #[must_use]
    pub fn with_config(config: MembraneConfig) -> Self {
        Self {
            table: Mutex::new(HandleTable::new()),
            config,
            metrics: MembraneMetrics::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> MembraneConfig {
        self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &MembraneMetrics {
        &self.metrics
    }

    /// Register a resource produced by an allocation or open call.
    ///
    /// Mints a fresh identity even when `addr` was used by a handle that has
    /// since been released. Fails with `DuplicateRegistration` if a live
    /// handle already owns `addr`.
    pub fn register(
        &self,
        addr: usize,
        class: ResourceClass,
        len: Option<usize>,
    ) -> Result<Handle, OwnershipError> {
        let mut table = self.table.lock();
        if let Some(&existing) = table.live_by_addr.get(&addr) {
            MembraneMetrics::inc(&self.metrics.duplicate_registrations);
            return Err(OwnershipError::DuplicateRegistration {
                existing,
                class,
                addr,
            });
        }

        let id = HandleId(table.next_token);
        table.next_token += 1;
        let handle = Handle { id, class, addr };
        table.live.insert(
            id,
            HandleRecord {
                handle,
                state: Lifecycle::Live,
                len,
            },
        );
        table.live_by_addr.insert(addr, id);
        MembraneMetrics::inc(&self.metrics.registrations);
        Ok(handle)
    }

    /// Transition `handle` from live to released and drop its table entry.
    pub fn release(&self, handle: Handle) -> Result<HandleRecord, OwnershipError> {
        let mut table = self.table.lock();
        let id = handle.id;

        let Some(record) = table.live.get(&id).copied() else {
            return Err(if table.was_issued(id) {
                MembraneMetrics::inc(&self.metrics.double_releases);
                OwnershipError::DoubleRelease {
                    id,
                    class: table.released_class(id),
                }
            } else {
                MembraneMetrics::inc(&self.metrics.unknown_handles);
                OwnershipError::UnknownHandle { id }
            });
        };

        self.matches_record(&record, handle)?;

        table.live.remove(&id);
        table.live_by_addr.remove(&record.handle.addr);

        let released = HandleRecord {
            state: Lifecycle::Released,
            ..record
        };
        if self.config.release_history > 0 {
            if table.released.len() >= self.config.release_history {
                table.released.pop_front();
            }
            table.released.push_back(released);
        }
        MembraneMetrics::inc(&self.metrics.releases);
        Ok(released)
    }

    /// Verify `handle` is live before an operation dereferences it.
    pub fn check_live(&self, handle: Handle) -> Result<HandleRecord, OwnershipError> {
        let table = self.table.lock();
        let id = handle.id;
        match table.live.get(&id) {
            Some(record) => {
                self.matches_record(record, handle)?;
                MembraneMetrics::inc(&self.metrics.live_checks);
                Ok(*record)
            }
            None if table.was_issued(id) => {
                MembraneMetrics::inc(&self.metrics.uses_after_release);
                Err(OwnershipError::UseAfterRelease {
                    id,
                    class: table.released_class(id),
                })
            }
            None => {
                MembraneMetrics::inc(&self.metrics.unknown_handles);
                Err(OwnershipError::UnknownHandle { id })
            }
        }
    }

    /// A caller's handle must agree with the table on class and address.
    fn matches_record(&self, record: &HandleRecord, handle: Handle) -> Result<(), OwnershipError> {
        if record.handle.class != handle.class {
            MembraneMetrics::inc(&self.metrics.class_mismatches);
            return Err(OwnershipError::ClassMismatch {
                id: handle.id,
                expected: handle.class,
                actual: record.handle.class,
            });
        }
        if record.handle.addr != handle.addr {
            MembraneMetrics::inc(&self.metrics.address_mismatches);
            return Err(OwnershipError::AddressMismatch {
                id: handle.id,
                recorded: record.handle.addr,
                actual: handle.addr,
            });
        }
        Ok(())
    }

    /// Every still-live handle, ordered by identity. Does not mutate state.
    #[must_use]
    pub fn live_snapshot(&self) -> Vec<HandleRecord> {
        let table = self.table.lock();
        let mut records: Vec<HandleRecord> = table.live.values().copied().collect();
        records.sort_by_key(|r| r.handle.id);
        records
    }

    /// Number of live handles.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.table.lock().live.len()
    }

    /// Designated diagnostic checkpoint: report live handles as potential
    /// leaks when leak checking is enabled. Advisory, never fatal.
    #[must_use]
    pub fn leak_checkpoint(&self) -> LeakReport {
        MembraneMetrics::inc(&self.metrics.leak_checkpoints);
        if !self.config.leak_check.enabled() {
            return LeakReport::default();
        }
        LeakReport {
            leaks: self.live_snapshot(),
        }
    }
}

impl Default for OwnershipTracker {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_TRACKER: OnceLock<OwnershipTracker> = OnceLock::new();

/// Process-wide tracker, configured from the environment on first use.
#[must_use]
pub fn global_tracker() -> &'static OwnershipTracker {
    GLOBAL_TRACKER.get_or_init(|| OwnershipTracker::with_config(membrane_config()))
}
