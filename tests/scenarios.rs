//! Concrete black-box scenarios (SPEC_FULL.md §8, scenarios A-F), exercised purely through the
//! public `Handle`/`Reader` surface.

use flipmap::Handle;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn scenario_a_basic_synchronous() {
    let h = Handle::new(Duration::ZERO);
    let r = h.new_reader();
    h.store("key", "value");
    h.store("key2", "value");
    assert_eq!(r.load("key"), Some("value"));
    assert_eq!(r.load("key2"), Some("value"));
    assert_eq!(r.load("absent"), None);
}

#[test]
fn scenario_b_reader_opened_before_writes() {
    let h = Handle::new(Duration::ZERO);
    let r = h.new_reader();
    h.store(1, "a");
    assert_eq!(r.load(&1), Some("a"));
}

#[test]
fn scenario_c_overwrite() {
    let h = Handle::new(Duration::ZERO);
    h.store("k", "v1");
    let r = h.new_reader();
    h.store("k", "v2");
    assert_eq!(r.load("k"), Some("v2"));
}

#[test]
fn scenario_d_batched_visibility() {
    let h = Handle::new(Duration::from_millis(100));
    let r = h.new_reader();
    h.store("k", "v");

    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        if r.load("k") == Some("v") {
            break;
        }
        assert!(Instant::now() < deadline, "store never became visible within 500ms");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn scenario_e_many_readers_one_writer() {
    const READERS: usize = 64;
    const READS: usize = 2_000;
    const WRITES: usize = 1_000;

    let h: Handle<&str, usize> = Handle::new(Duration::ZERO);
    h.store("k", 0);

    let start = Arc::new(Barrier::new(READERS + 1));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let r = h.new_reader();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..READS {
                    match r.load("k") {
                        None => panic!("key was stored before any reader started"),
                        Some(v) => assert!(v <= WRITES, "observed value {} never stored", v),
                    }
                }
            })
        })
        .collect();

    let writer = {
        let h = h.clone();
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            for i in 1..=WRITES {
                h.store("k", i);
            }
        })
    };

    start.wait();
    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn scenario_f_reader_close_during_refresh() {
    let h = Handle::new(Duration::ZERO);
    let r = h.new_reader();
    r.load("k");
    r.close();

    let start = Instant::now();
    h.store("k", "v");
    assert!(start.elapsed() < Duration::from_secs(5), "refresh hung after reader close");
}
