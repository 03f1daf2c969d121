//! A mark-and-sweep heap for an embedded script engine.
//!
//! `jsheap` allocates script objects from a **segregated free-list** heap:
//! small objects live in OS-backed chunks split into equal items of one
//! 16-byte size class, larger ones in a separate large object store. A
//! **non-moving mark-and-sweep** collector reclaims whatever the roots no
//! longer reach.
//!
//! # Features
//!
//! - **Size classes**: O(1) allocation from per-class index-linked free lists
//! - **Unmanaged accounting**: external buffers owned by objects drive
//!   collection through an adaptive threshold
//! - **Host roots**: evaluation stack, persistent and weak handles, root
//!   providers, and a retention policy for weak handles
//! - **Deterministic teardown**: every destroy hook runs exactly once
//!
//! # Quick Start
//!
//! ```
//! use jsheap::{Gc, HeapObject, MemoryManager, Trace, Value};
//!
//! #[derive(Trace, HeapObject)]
//! struct Pair {
//!     first: Value,
//!     second: Value,
//! }
//!
//! let mut mm = MemoryManager::new();
//! let a = mm.alloc(Pair { first: Value::Number(1.0), second: Value::Null });
//! let b = mm.alloc(Pair { first: a.into(), second: Value::Null });
//!
//! // Only `b` is rooted; `a` survives because `b` refers to it.
//! mm.stack_mut().push(b.into());
//! mm.run_gc();
//! assert!(mm.get(a).is_some());
//!
//! mm.stack_mut().pop_clear();
//! mm.run_gc();
//! assert!(mm.get(a).is_none());
//! ```
//!
//! # Threading
//!
//! A [`MemoryManager`] and its references are single-threaded. Collections
//! run synchronously inside the allocation that triggers them.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
mod gc;
pub mod handles;
pub mod header;
mod metrics;
mod mm;
mod stack;
mod trace;
mod tracing;
mod value;

/// Chunked heap internals.
///
/// Public for testing and for embedders that want the fallible arena API.
/// Most users should go through [`MemoryManager`].
pub mod heap;

// Re-export public API
pub use config::HeapConfig;
pub use error::{AllocError, ConfigError};
pub use gc::{Deletable, Marker, RetentionPolicy, RootProvider};
pub use handles::{HandleTable, PersistentHandle, WeakHandle};
pub use header::{ObjectClass, ObjectHeader};
pub use metrics::{GcMetrics, GcTrigger, HeapStats, PhaseTimer, SizeClassStats};
pub use mm::{GcBlocker, MemoryManager};
pub use stack::EvalStack;
pub use trace::{HeapObject, Trace};
pub use value::{Gc, HeapRef, Value};

// Re-export derive macros when the feature is enabled
#[cfg(feature = "derive")]
pub use jsheap_derive::{HeapObject, Trace};
