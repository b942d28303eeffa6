//! Property-based tests for invariants #1-#5 of SPEC_FULL.md §8.

use quickcheck_macros::quickcheck;
use std::collections::HashMap;
use std::time::Duration;

use flipmap::Handle;

#[quickcheck]
fn synchronous_store_is_immediately_visible(writes: Vec<(u8, u32)>) -> bool {
    let h = Handle::new(Duration::ZERO);
    let r = h.new_reader();

    let mut model: HashMap<u8, u32> = HashMap::new();
    for (k, v) in writes {
        h.store(k, v);
        model.insert(k, v);
    }

    model.iter().all(|(k, v)| r.load(k) == Some(*v))
}

#[quickcheck]
fn batched_store_is_eventually_visible(writes: Vec<(u8, u32)>) -> bool {
    let h = Handle::new(Duration::from_millis(5));
    let r = h.new_reader();

    let mut model: HashMap<u8, u32> = HashMap::new();
    for (k, v) in writes {
        h.store(k, v);
        model.insert(k, v);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if model.iter().all(|(k, v)| r.load(k) == Some(*v)) {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[quickcheck]
fn load_never_returns_an_unwritten_value(writes: Vec<(u8, u32)>) -> bool {
    let h = Handle::new(Duration::ZERO);
    let r = h.new_reader();

    let mut written: std::collections::HashSet<u32> = std::collections::HashSet::new();
    for (k, v) in writes {
        h.store(k, v);
        written.insert(v);
    }

    (0u8..=255).all(|k| match r.load(&k) {
        None => true,
        Some(v) => written.contains(&v),
    })
}

#[quickcheck]
fn once_observed_a_key_never_reverts_to_none(writes: Vec<(u8, u32)>) -> bool {
    let h = Handle::new(Duration::ZERO);
    let r = h.new_reader();

    let mut seen: std::collections::HashSet<u8> = std::collections::HashSet::new();
    let mut ok = true;
    for (k, v) in writes {
        h.store(k, v);
        if r.load(&k).is_some() {
            seen.insert(k);
        }
        for &key in &seen {
            ok &= r.load(&key).is_some();
        }
    }
    ok
}

#[quickcheck]
fn last_write_wins_per_key(writes: Vec<(u8, u32)>) -> bool {
    let h = Handle::new(Duration::ZERO);

    let mut model: HashMap<u8, u32> = HashMap::new();
    for (k, v) in writes {
        h.store(k, v);
        model.insert(k, v);
    }

    let r = h.new_reader();
    model.iter().all(|(k, v)| r.load(k) == Some(*v)) && r.len() == model.len()
}
