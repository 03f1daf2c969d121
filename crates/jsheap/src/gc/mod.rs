//! Mark-and-sweep collection.
//!
//! - [`Marker`]: the explicit mark stack handed to `Trace` implementations.
//! - `mark`: root enumeration and transitive marking.
//! - `sweep`: weak handle resolution and deferred notifications.
//! - `threshold`: the unmanaged-memory trigger.

mod mark;
mod marker;
mod roots;
mod sweep;
mod threshold;

pub use marker::Marker;
pub use roots::{Deletable, RetentionPolicy, RootProvider};

pub(crate) use mark::{mark_from_roots, Roots};
pub(crate) use sweep::{reset_all_weak_handles, reset_weak_handles, run_deletables};
pub(crate) use threshold::UnmanagedThreshold;
