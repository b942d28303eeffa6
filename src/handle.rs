//! The writer side: `Handle`, the two underlying maps, the pending-write log, and the background
//! publisher.
//!
//! Grounded on the teacher crate's `write.rs` (`publish`, the `NonNull`-owned write-side map, the
//! `fence(Ordering::SeqCst)` placement around the swap) and on
//! `examples/original_source/evmap.go` (`Store`/`swap`, the plain `map[key]value` log instead of
//! a generic oplog, and the `refresh_rate` construction parameter).

use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ptr::NonNull;
use std::time::Duration;

use crate::reader::Reader;
use crate::registry::{self, Epochs};
use crate::sync::{atomic, fence, Arc, AtomicPtr, Mutex, MutexGuard, Ordering, Weak};

// The background publisher is a real OS thread on a real wall-clock timer, deliberately reached
// through `std::thread` directly rather than the loom-swappable `crate::sync::thread` alias: loom
// has no `sleep` (it cannot model real-time waits), and `ensure_publisher`/
// `background_publisher_loop` are referenced from `Handle::store`'s batched-mode branch for every
// `Handle<K, V, S>` instantiation, including the ones `tests/loom.rs` compiles and exercises.
use std::thread;

/// The state a writer needs exclusive access to between refreshes: the write-side map and the
/// pending-write log.
struct WriterState<K, V, S> {
    /// The map nobody is reading right now. Exclusively owned by whoever holds `Shared::writer`.
    w_map: NonNull<HashMap<K, V, S>>,
    /// Writes since the last refresh, collapsed to one entry per key (SPEC_FULL.md §4.4).
    log: HashMap<K, V, S>,
}

// SAFETY: `w_map` is a uniquely-owned `Box` pointer; nothing but the writer holding the
// surrounding mutex ever dereferences it, so it may cross threads exactly like the `Box` it came
// from.
unsafe impl<K: Send, V: Send, S: Send> Send for WriterState<K, V, S> {}

struct Publisher {
    thread: thread::JoinHandle<()>,
}

pub(crate) struct Shared<K, V, S> {
    /// The only handle state a reader ever touches: the address of the current read-side map.
    read_ptr: AtomicPtr<HashMap<K, V, S>>,
    epochs: Epochs,
    writer: Mutex<WriterState<K, V, S>>,
    refresh_rate: Duration,
    publisher: Mutex<Option<Publisher>>,
}

impl<K, V, S> Shared<K, V, S> {
    /// The pointer a `Reader` should dereference for the duration of its current load. Called
    /// only while that reader's epoch is odd, which keeps this pointer alive (SPEC_FULL.md §4.2).
    pub(crate) fn read_ptr_for_reader(&self) -> *const HashMap<K, V, S> {
        self.read_ptr.load(Ordering::Acquire)
    }
}

impl<K, V, S> fmt::Debug for Shared<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("refresh_rate", &self.refresh_rate)
            .finish()
    }
}

impl<K, V, S> Drop for Shared<K, V, S> {
    fn drop(&mut self) {
        // SAFETY: the strong count of the surrounding `Arc` has reached zero, so no `Handle` or
        // `Reader` can still be dereferencing either map.
        let read_ptr = *self.read_ptr.get_mut();
        if !read_ptr.is_null() {
            drop(unsafe { Box::from_raw(read_ptr) });
        }
        if let Ok(writer) = self.writer.get_mut() {
            drop(unsafe { Box::from_raw(writer.w_map.as_ptr()) });
        }
    }
}

/// A handle to an eventually-consistent concurrent key-value map.
///
/// `Handle` is cheaply `Clone` (it is a thin `Arc` wrapper) and may be shared across any number
/// of threads; `store` and `new_reader` take `&self`. All writers share a single internal lock,
/// so `store` calls from different `Handle` clones still serialize correctly (SPEC_FULL.md §3,
/// invariant 1).
pub struct Handle<K, V, S = RandomState> {
    shared: Arc<Shared<K, V, S>>,
}

impl<K, V, S> Clone for Handle<K, V, S> {
    fn clone(&self) -> Self {
        Handle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V, S> fmt::Debug for Handle<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("shared", &self.shared).finish()
    }
}

impl<K, V> Handle<K, V, RandomState>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new, empty map. `refresh_rate == Duration::ZERO` selects synchronous
    /// publication: every `store` publishes before returning. Any larger duration selects
    /// batched publication, backed by a background thread that refreshes at least that often
    /// (SPEC_FULL.md §4.1).
    pub fn new(refresh_rate: Duration) -> Self {
        Self::with_hasher(refresh_rate, RandomState::default())
    }
}

impl<K, V, S> Handle<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Like [`new`](Self::new), but with a custom hash builder for both underlying maps.
    pub fn with_hasher(refresh_rate: Duration, hasher: S) -> Self {
        let l_map = Box::into_raw(Box::new(HashMap::with_hasher(hasher.clone())));
        let r_map = Box::into_raw(Box::new(HashMap::with_hasher(hasher.clone())));

        let writer = WriterState {
            // SAFETY: `r_map` was just created from `Box::into_raw`, so it is non-null.
            w_map: unsafe { NonNull::new_unchecked(r_map) },
            log: HashMap::with_hasher(hasher),
        };

        Handle {
            shared: Arc::new(Shared {
                read_ptr: AtomicPtr::new(l_map),
                epochs: registry::new_epochs(),
                writer: Mutex::new(writer),
                refresh_rate,
                publisher: Mutex::new(None),
            }),
        }
    }

    /// Write `value` under `key`.
    ///
    /// Acquires the single-writer lock (readers are never blocked by this), updates the
    /// write-side map and the pending-write log, and — in synchronous mode — publishes before
    /// returning. In batched mode the write becomes visible no later than the next background
    /// refresh tick (SPEC_FULL.md §4.1).
    pub fn store(&self, key: K, value: V) {
        let mut writer = self.shared.writer.lock().unwrap();

        // SAFETY: we hold the writer lock, which is the only thing that ever mutates `w_map`.
        let w_map = unsafe { writer.w_map.as_mut() };
        w_map.insert(key.clone(), value.clone());
        writer.log.insert(key, value);

        if self.shared.refresh_rate.is_zero() {
            refresh_locked(&self.shared, &mut writer);
        } else {
            drop(writer);
            self.ensure_publisher();
        }
    }

    /// Allocate a new [`Reader`] over this map, registering it so that future writes can wait
    /// for it to quiesce before reusing the snapshot it may be holding.
    pub fn new_reader(&self) -> Reader<K, V, S> {
        let (index, epoch) = registry::register(&self.shared.epochs);
        Reader::new(Arc::clone(&self.shared), index, epoch)
    }

    /// The number of readers still occupying a registry slot. Exposed for tests; reflects
    /// whichever quiescence sweep last ran, since removal of closed readers is lazy.
    #[cfg(test)]
    pub(crate) fn registered_reader_count(&self) -> usize {
        registry::len(&self.shared.epochs)
    }

    fn ensure_publisher(&self) {
        let mut publisher = self.shared.publisher.lock().unwrap();
        if publisher.is_some() {
            return;
        }

        let weak: Weak<Shared<K, V, S>> = Arc::downgrade(&self.shared);
        let tick = self.shared.refresh_rate;

        log::debug!("flipmap: starting background publisher (tick = {:?})", tick);

        let thread = thread::Builder::new()
            .name("flipmap-publisher".into())
            .spawn(move || background_publisher_loop(weak, tick))
            .expect("failed to spawn flipmap background publisher thread");

        *publisher = Some(Publisher { thread });
    }
}

fn background_publisher_loop<K, V, S>(weak: Weak<Shared<K, V, S>>, tick: Duration)
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    loop {
        thread::sleep(tick);

        let shared = match weak.upgrade() {
            Some(shared) => shared,
            None => {
                log::trace!("flipmap: publisher thread exiting, handle torn down");
                return;
            }
        };

        let mut writer = shared.writer.lock().unwrap();
        if !writer.log.is_empty() {
            log::trace!("flipmap: publisher tick found {} pending key(s)", writer.log.len());
            refresh_locked(&shared, &mut writer);
        }
    }
}

/// Publish all writes made since the last refresh: swap the shared read pointer, wait for every
/// reader that may still be holding the pre-swap snapshot to move on, then drain the log onto
/// the (now write-side, formerly read-side) map so the two sides converge (SPEC_FULL.md §4.1,
/// §4.4).
fn refresh_locked<K, V, S>(shared: &Shared<K, V, S>, writer: &mut MutexGuard<'_, WriterState<K, V, S>>)
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    // 1. Swap the shared read pointer with our write-side pointer. From this instant, new
    // `Load`s see what used to be the write-side; the map we get back (the old read-side) may
    // still be referenced by readers that loaded it before the swap.
    let stale = shared.read_ptr.swap(writer.w_map.as_ptr(), Ordering::AcqRel);
    // SAFETY: `stale` was created from `Box::into_raw` either at construction or at the end of
    // the previous refresh, and is never null.
    writer.w_map = unsafe { NonNull::new_unchecked(stale) };

    // Ensure the swap is visible before we start reading reader epochs, and that nothing below
    // is reordered above it.
    fence(atomic::Ordering::SeqCst);

    // 2. Wait for quiescence: every reader that could still be holding `stale` must move on.
    registry::wait_for_quiescence(&shared.epochs);

    // 3. Drain the pending-write log onto the map we now own exclusively.
    // SAFETY: quiescence just proved no reader can be dereferencing this pointer anymore.
    let w_map = unsafe { writer.w_map.as_mut() };
    for (key, value) in writer.log.drain() {
        w_map.insert(key, value);
    }

    log::debug!("flipmap: refresh complete");
}
