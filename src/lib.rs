//! An eventually-consistent, lock-free, concurrent key-value map for read-heavy workloads.
//!
//! The map keeps two copies of the underlying `HashMap`, one that readers dereference and one
//! that the (single) writer mutates. This lets reads proceed in parallel with minimal
//! coordination, at the cost of shifting all coordination overhead onto the writer side. In the
//! absence of writes, reads scale linearly with the number of cores.
//!
//! When the writer wants to expose pending writes (see [`Handle::store`] and the background
//! publisher described below), it swaps the two copies so that subsequent reads go to the old
//! write-side, and the writer starts mutating the old read-side. This causes a handful of cache
//! line invalidations for readers but never blocks them — reads are wait-free.
//!
//! To keep both copies eventually equal, the writer keeps a pending-write log (a plain
//! `HashMap<K, V>`, coalesced so repeated writes to the same key collapse to the latest value)
//! and replays it onto the stale copy once every reader has moved past the swap.
//!
//! # Trade-offs
//!
//!  - **Increased memory use**: two copies of the map are kept, roughly doubling memory use of
//!    the stored data. The pending-write log adds further overhead proportional to the number of
//!    distinct keys written since the last refresh.
//!  - **Single writer**: only one writer may mutate at a time. [`Handle`] is `Clone + Send +
//!    Sync`; concurrent writers serialize internally on a mutex, so multiple threads can hold and
//!    use `Handle` clones without external synchronization, but writes do not parallelize.
//!  - **Eventual, not immediate, consistency**: in batched mode (`refresh_rate > Duration::ZERO`),
//!    a `store` becomes visible to readers no later than the next refresh tick, not immediately.
//!
//! # How does it work?
//!
//! At a glance: two plain `HashMap`s, an atomic pointer through which all readers go, a pending-
//! write log, and a per-reader epoch counter. Every time a reader dereferences the pointer it
//! increments its local epoch (to odd — "currently reading"), and increments it again when it is
//! done (back to even — "quiescent"). When a write occurs, the writer updates the copy nobody is
//! reading and appends to the log. When the writer refreshes, it atomically swaps the read
//! pointer to the other copy, waits for every reader's epoch to prove it can no longer be
//! dereferencing the old copy, then replays the log onto that now-exclusively-owned copy.
//!
//! The design follows the same left-right concurrency scheme described in
//! <https://hal.archives-ouvertes.fr/hal-01207881/document>, specialized here to a concrete
//! key-value map instead of a generic oplog over an arbitrary data structure.
//!
//! # How do I use it?
//!
//! ```rust
//! use flipmap::Handle;
//! use std::time::Duration;
//!
//! // `Duration::ZERO` selects synchronous publication: every `store` is visible to new loads
//! // before `store` returns.
//! let writer = Handle::new(Duration::ZERO);
//! let reader = writer.new_reader();
//!
//! assert_eq!(reader.load("account"), None);
//! writer.store("account", 42);
//! assert_eq!(reader.load("account"), Some(42));
//! ```
//!
//! Passing a non-zero `refresh_rate` instead selects batched publication: `store` returns
//! immediately, and a background thread owned by the handle's shared state periodically swaps in
//! any pending writes. That thread holds only a [`Weak`](std::sync::Weak) reference to the shared
//! state, so it exits on its own once the last `Handle`/`Reader` referencing the map is dropped.
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    broken_intra_doc_links
)]

use std::error::Error;
use std::fmt;

mod sync;

mod registry;

mod handle;
pub use crate::handle::Handle;

mod reader;
pub use crate::reader::Reader;

/// Raised (via `panic!`) when a [`Reader`] is used re-entrantly or from more than one logical
/// flow of execution concurrently, or when `load` is called on a reader that was already closed.
///
/// A `Reader` is single-threaded by contract; this type names the violation the read-side epoch
/// protocol detects when that contract is broken. It is a fatal programmer error, not a
/// recoverable condition, which is why it is raised through `panic!` rather than returned as a
/// `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrentReaderUse;

impl fmt::Display for ConcurrentReaderUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flipmap: reader used concurrently")
    }
}

impl Error for ConcurrentReaderUse {}
