//! The reader side: `Reader`, its epoch protocol, and the convenience methods built on top of it.
//!
//! Grounded on `examples/original_source/reader.go` (`Load`/`Close`/`wait`) for the exact
//! rollover-then-increment-then-parity sequence, rendered in the teacher crate's/`ev_slotmap`'s
//! `fence(Ordering::SeqCst)`-around-the-epoch-bumps idiom.

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::registry::{CLOSED, ROLLOVER};
use crate::sync::{atomic, fence, Arc, AtomicUsize, Ordering};
use crate::ConcurrentReaderUse;

use crate::handle::Shared;

/// A single-threaded handle for reading an eventually-consistent key-value map.
///
/// Cloning a `Handle` and calling [`Handle::new_reader`](crate::Handle::new_reader) again is the
/// way to obtain a second, independent `Reader` for use from another thread — a `Reader` itself
/// must never be shared between concurrent flows of execution (SPEC_FULL.md §4.2); doing so is
/// detected and reported as [`ConcurrentReaderUse`].
pub struct Reader<K, V, S> {
    shared: Arc<Shared<K, V, S>>,
    index: usize,
    epoch: Arc<AtomicUsize>,
}

impl<K, V, S> fmt::Debug for Reader<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("index", &self.index)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V, S> Reader<K, V, S>
where
    K: Eq + Hash,
    V: Clone,
    S: BuildHasher,
{
    pub(crate) fn new(shared: Arc<Shared<K, V, S>>, index: usize, epoch: Arc<AtomicUsize>) -> Self {
        Reader { shared, index, epoch }
    }

    /// Look up `key`, cloning its value out of whichever map snapshot is currently readable.
    ///
    /// # Panics
    ///
    /// Panics with [`ConcurrentReaderUse`] if this `Reader` is entered re-entrantly or from a
    /// second thread while a prior call is still in flight (SPEC_FULL.md §4.2, §7).
    pub fn load<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash,
    {
        self.with_map(|map| map.get(key).cloned())
    }

    /// The number of entries visible in the current snapshot.
    pub fn len(&self) -> usize {
        self.with_map(HashMap::len)
    }

    /// Whether the current snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.with_map(HashMap::is_empty)
    }

    /// Whether `key` is present in the current snapshot.
    pub fn contains_key<Q: ?Sized>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash,
    {
        self.with_map(|map| map.contains_key(key))
    }

    /// Run `f` against the currently-published map, under epoch protection.
    fn with_map<R>(&self, f: impl FnOnce(&HashMap<K, V, S>) -> R) -> R {
        // 1. Roll over before the epoch can ever reach the closed sentinel by overflow.
        let _ = self
            .epoch
            .compare_exchange(ROLLOVER, 0, Ordering::SeqCst, Ordering::SeqCst);

        // 2. Announce "load in flight" by making the epoch odd. A concurrent or re-entrant call
        // observes the post-increment value already odd-turned-even (or the reverse), so the
        // parity check below catches both directions of misuse.
        if self.epoch.fetch_add(1, Ordering::SeqCst) % 2 != 0 {
            panic!("{}", ConcurrentReaderUse);
        }

        fence(atomic::Ordering::SeqCst);

        // SAFETY: the epoch is odd, which this writer's quiescence sweep treats as "may still be
        // dereferencing the pointer it is about to load" — the pointer is therefore guaranteed
        // live for the duration of this borrow.
        let read_ptr = self.shared.read_ptr_for_reader();
        let result = f(unsafe { &*read_ptr });

        fence(atomic::Ordering::SeqCst);

        // 3. Announce "load complete": back to even, and strictly past the epoch the writer saw
        // us at before this call (so a concurrent `wait_for_quiescence` sweep recognizes we moved
        // on instead of mistaking us for having made no progress).
        self.epoch.fetch_add(1, Ordering::SeqCst);

        result
    }

    /// Unregister this reader. Idempotent; called automatically on drop.
    pub fn close(&self) {
        self.epoch.store(CLOSED, Ordering::SeqCst);
    }
}

impl<K, V, S> Drop for Reader<K, V, S> {
    fn drop(&mut self) {
        self.epoch.store(CLOSED, Ordering::SeqCst);
    }
}
