//! The reader registry and the quiescence protocol that walks it.
//!
//! Grounded on the teacher crate's `write.rs::wait` for the overall shape (a `slab`-indexed
//! table of reader epochs behind a single mutex, walked with a cooperative spin/yield loop), and
//! on `examples/original_source/reader.go`'s `wait()` for the exact per-reader classification
//! rules, since this spec calls out a distinct "history watermark" per reader (see `SPEC_FULL.md`
//! §3) that the teacher's version folds into a write-handle-local cache instead.

use crate::sync::{Arc, AtomicUsize, Mutex, Ordering, MutexGuard};
use slab::Slab;

/// A registered reader's epoch counter together with the writer's private bookkeeping for it.
///
/// `epoch` is shared with the `Reader` (via `Arc`) and is the only field a reader ever touches.
/// `history` is touched only by whichever writer currently holds the registry mutex.
pub(crate) struct ReaderEntry {
    pub(crate) epoch: Arc<AtomicUsize>,
    history: usize,
}

/// Sentinel meaning "this reader is closed and may be reaped".
pub(crate) const CLOSED: usize = usize::MAX;
/// One below `CLOSED`; a reader that reaches this epoch rolls over to `0` before its next load.
pub(crate) const ROLLOVER: usize = usize::MAX - 1;

/// The set of live readers, shared between a `Handle` and every `Reader` cloned from it.
pub(crate) type Epochs = Arc<Mutex<Slab<ReaderEntry>>>;

/// Construct an empty registry.
pub(crate) fn new_epochs() -> Epochs {
    Arc::new(Mutex::new(Slab::new()))
}

/// Register a new reader, returning its slot index and its (shared) epoch counter.
pub(crate) fn register(epochs: &Epochs) -> (usize, Arc<AtomicUsize>) {
    let epoch = Arc::new(AtomicUsize::new(0));
    let entry = ReaderEntry {
        epoch: Arc::clone(&epoch),
        history: 0,
    };
    let index = epochs.lock().unwrap().insert(entry);
    (index, epoch)
}

/// The number of reader slots currently occupied. Exposed for tests only; removal of closed
/// readers is lazy, so this reflects the last quiescence sweep rather than live reader count.
#[cfg(test)]
pub(crate) fn len(epochs: &Epochs) -> usize {
    epochs.lock().unwrap().len()
}

/// Block the calling (writer) thread until every reader registered *as of this call* can no
/// longer be holding a reference to the pre-swap snapshot.
///
/// Must be called with the read pointer already swapped, and before the stale write-side (the
/// map readers used to see) is mutated again.
pub(crate) fn wait_for_quiescence(epochs: &Epochs) {
    let mut registry = epochs.lock().unwrap();
    wait_for_quiescence_locked(&mut registry);
}

fn wait_for_quiescence_locked(registry: &mut MutexGuard<'_, Slab<ReaderEntry>>) {
    // Snapshot the slots present right now. A reader registered after this point is guaranteed
    // to observe the post-swap pointer already, so it is correct to exclude it (SPEC_FULL.md §5).
    let slots: Vec<usize> = registry.iter().map(|(index, _)| index).collect();

    let mut spins: u32 = 0;
    let mut i = 0;
    while i < slots.len() {
        let slot = slots[i];
        let entry = match registry.get_mut(slot) {
            Some(entry) => entry,
            // Already reaped earlier in this same sweep (shouldn't happen, slots are unique).
            None => {
                i += 1;
                continue;
            }
        };

        let epoch = entry.epoch.load(Ordering::Acquire);
        if epoch == CLOSED {
            registry.remove(slot);
            i += 1;
            spins = 0;
            continue;
        }
        if epoch == 0 {
            // Never loaded, or just rolled over: either way it can only ever see the new
            // pointer from here on. Reset the watermark so a later rollover is handled the
            // same way again.
            entry.history = 0;
            i += 1;
            spins = 0;
            continue;
        }
        if epoch % 2 == 1 {
            // Mid-load; its loaded pointer may still be the stale one. Keep polling this slot.
            spin(&mut spins);
            continue;
        }
        // Even and non-zero.
        if epoch > entry.history {
            entry.history = epoch;
            i += 1;
            spins = 0;
            continue;
        }
        // No progress since we last looked at this reader.
        spin(&mut spins);
    }
}

/// Busy-wait with a cooperative yield once the spin budget is exhausted, mirroring the teacher
/// crate's `wait()` (spin a handful of times, then `thread::yield_now()`).
fn spin(spins: &mut u32) {
    #[cfg(not(loom))]
    {
        if *spins < 20 {
            *spins += 1;
        } else {
            crate::sync::thread::yield_now();
        }
    }
    #[cfg(loom)]
    {
        let _ = spins;
        crate::sync::thread::yield_now();
    }
}
