//! # cshape-abi
//!
//! Runtime half of the cshape C bindings: the value marshaler, the comparator
//! trampoline for `qsort`/`bsearch`, and native invocation of the bound C
//! functions behind ownership checks.
//!
//! # Architecture
//!
//! ```text
//! call -> verify (cshape-core) -> ownership check (cshape-membrane)
//!      -> marshal -> native libc -> register/release handles -> return
//! ```
//!
//! Every refusal (failed verification, released handle, narrowing, buffer too
//! small) is reported before the native function runs.
//!
//! - **Marshaler** (`marshal`): managed values to native representations and
//!   back
//! - **Trampoline** (`trampoline`): closure-backed comparators for the native
//!   sort and search routines
//! - **Binding** (`binding`, `heap`, `stream`, `format_call`): the bound call
//!   families over one ownership tracker
//! - **Metrics** (`metrics`): boundary counters
//!
//! Widths and the `FILE*` layout assume an LP64 Unix target.

pub mod binding;
pub mod error;
pub mod format_call;
pub mod heap;
pub mod marshal;
pub mod metrics;
pub mod stream;
pub mod trampoline;

pub use binding::Binding;
pub use error::BindError;
pub use format_call::EOF;
pub use marshal::{CallFrame, NativeArg, OutRef, Value, c_text, unmarshal};
pub use metrics::{AbiMetrics, AbiMetricsSnapshot, abi_metrics};
pub use stream::{FileMode, ParseFileModeError, SeekOrigin};
pub use trampoline::{ElementView, search_elements, search_slice, sort_elements, sort_slice};
