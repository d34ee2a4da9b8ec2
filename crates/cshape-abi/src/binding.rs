//! Entry point for bound native calls.
//!
//! A [`Binding`] ties native invocations to one ownership tracker. The call
//! families live in their own modules (`heap`, `stream`, `format_call`) as
//! `impl Binding` blocks; every operation that dereferences a handle checks it
//! with the tracker first, and refused operations never reach native code.
//!
//! Calls that appear in the catalog take their tracker transition from the
//! catalog's [`ResourceEffect`] rather than naming a class themselves. Native
//! code only ever sees the address the tracker recorded for a handle.

use cshape_core::{ResourceEffect, lookup};
use cshape_membrane::{
    Handle, HandleRecord, LeakReport, OwnershipError, OwnershipTracker, ResourceClass, global_tracker,
};

use crate::error::BindError;
use crate::metrics::refused;

/// Native call surface bound to an ownership tracker.
#[derive(Clone, Copy)]
pub struct Binding<'t> {
    tracker: &'t OwnershipTracker,
}

impl<'t> Binding<'t> {
    #[must_use]
    pub fn new(tracker: &'t OwnershipTracker) -> Self {
        Self { tracker }
    }

    #[must_use]
    pub fn tracker(&self) -> &'t OwnershipTracker {
        self.tracker
    }

    /// Diagnostic checkpoint over every handle still live in this binding's
    /// tracker.
    #[must_use]
    pub fn leak_checkpoint(&self) -> LeakReport {
        self.tracker.leak_checkpoint()
    }

    fn register(
        &self,
        addr: usize,
        class: ResourceClass,
        len: Option<usize>,
    ) -> Result<Handle, BindError> {
        self.tracker
            .register(addr, class, len)
            .map_err(|e| refused(e).into())
    }

    /// Register the resource `function` just produced, under the class its
    /// catalog entry acquires.
    pub(crate) fn acquire(
        &self,
        function: &'static str,
        addr: usize,
        len: Option<usize>,
    ) -> Result<Handle, BindError> {
        let class = match effect_of(function) {
            ResourceEffect::Acquire(class) => class,
            ResourceEffect::Resize => ResourceClass::HeapBlock,
            _ => return Err(refused(BindError::UntrackedEffect { function, action: "acquire" })),
        };
        self.register(addr, class, len)
    }

    /// Release the resource `function` consumes.
    pub(crate) fn release_for(
        &self,
        function: &'static str,
        handle: Handle,
    ) -> Result<HandleRecord, BindError> {
        match effect_of(function) {
            ResourceEffect::Release(class) => self.release_as(handle, class),
            ResourceEffect::Resize => self.release_as(handle, ResourceClass::HeapBlock),
            _ => Err(refused(BindError::UntrackedEffect { function, action: "release" })),
        }
    }

    /// Check the resource `function` is about to dereference.
    pub(crate) fn check_for(
        &self,
        function: &'static str,
        handle: Handle,
    ) -> Result<HandleRecord, BindError> {
        match effect_of(function) {
            ResourceEffect::Uses(class) => self.check_live_as(handle, class),
            ResourceEffect::Resize => self.check_live_as(handle, ResourceClass::HeapBlock),
            _ => Err(refused(BindError::UntrackedEffect { function, action: "use" })),
        }
    }

    /// Release `handle`, which must be a live `class` resource.
    pub(crate) fn release_as(
        &self,
        handle: Handle,
        class: ResourceClass,
    ) -> Result<HandleRecord, BindError> {
        expect_class(handle, class)?;
        self.tracker.release(handle).map_err(|e| refused(e).into())
    }

    /// Check that `handle` is a live `class` resource. The returned record
    /// carries the address native code may use.
    pub(crate) fn check_live_as(
        &self,
        handle: Handle,
        class: ResourceClass,
    ) -> Result<HandleRecord, BindError> {
        expect_class(handle, class)?;
        self.tracker
            .check_live(handle)
            .map_err(|e| refused(e).into())
    }
}

fn effect_of(function: &str) -> ResourceEffect {
    lookup(function).map_or(ResourceEffect::None, |s| s.effect)
}

fn expect_class(handle: Handle, class: ResourceClass) -> Result<(), BindError> {
    if handle.class == class {
        return Ok(());
    }
    Err(refused(OwnershipError::ClassMismatch {
        id: handle.id,
        expected: class,
        actual: handle.class,
    })
    .into())
}

impl Binding<'static> {
    /// Binding over the process-wide tracker.
    #[must_use]
    pub fn global() -> Self {
        Self::new(global_tracker())
    }
}

impl std::fmt::Debug for Binding<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("live_handles", &self.tracker.live_count())
            .finish()
    }
}
