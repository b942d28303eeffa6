//! Indirection over `std::sync` so that the concurrency protocol can be exhaustively
//! model-checked with `loom` in `tests/loom.rs` without changing a single line of the algorithm
//! itself. Everything in this crate reaches `Arc`, `Mutex`, `AtomicUsize`, `AtomicPtr`, and
//! `fence` through here rather than through `std::sync` directly — except the background
//! publisher thread in `handle.rs`, which reaches `std::thread` directly: loom has no `sleep`,
//! and that wall-clock wait has nothing to do with the epoch/pointer race loom is modelling here.

#[cfg(not(loom))]
pub(crate) use std::sync::{atomic, Arc, Mutex, MutexGuard, Weak};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::{atomic, Arc, Mutex, MutexGuard, Weak};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub(crate) use std::thread;

#[cfg(loom)]
pub(crate) use loom::thread;
