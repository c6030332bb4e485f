//! Tests for concurrent Engine access
//!
//! These tests verify:
//! - Concurrent writers to distinct keys all land
//! - Readers run alongside writers and flushes
//! - Racing PUT/DELETE on one key ends in one of the two states
//! - A memtable flush does not hold up writes to other keys

use std::sync::{Arc, Barrier};
use std::thread;

use stratakv::config::{Config, WalSyncStrategy};
use stratakv::engine::Engine;
use tempfile::TempDir;

use crate::{config_for, wait_until};

fn shared_engine(memtable_size_limit: usize) -> (TempDir, Arc<Engine>) {
    let temp = TempDir::new().unwrap();
    let engine = Engine::open(config_for(temp.path(), memtable_size_limit)).unwrap();
    (temp, Arc::new(engine))
}

#[test]
fn test_concurrent_writes_to_distinct_keys() {
    let (_temp, engine) = shared_engine(4 * 1024);
    let threads = 8;
    let per_thread = 200;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let key = format!("t{}-k{:04}", t, i);
                    engine.put(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..threads {
        for i in 0..per_thread {
            let key = format!("t{}-k{:04}", t, i);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
        }
    }
    assert_eq!(
        engine.scan(b"t", None).unwrap().count(),
        threads * per_thread
    );
}

#[test]
fn test_readers_alongside_writers() {
    let (_temp, engine) = shared_engine(1024);
    for i in 0..100 {
        engine.put(format!("stable{:03}", i).as_bytes(), b"fixed").unwrap();
    }

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..1000 {
                engine
                    .put(format!("churn{:04}", i).as_bytes(), b"0123456789")
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..200 {
                    let key = format!("stable{:03}", round % 100);
                    assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(b"fixed".to_vec()));
                }
                let stable = engine.scan(b"stable", Some(&b"stablf"[..])).unwrap().count();
                assert_eq!(stable, 100);
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(engine.sstable_count() > 0);
}

#[test]
fn test_racing_put_and_delete_on_one_key() {
    for _ in 0..20 {
        let (_temp, engine) = shared_engine(1024 * 1024);
        let barrier = Arc::new(Barrier::new(2));

        let putter = {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.put(b"contested", b"value").unwrap();
            })
        };
        let deleter = {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.delete(b"contested").unwrap();
            })
        };
        putter.join().unwrap();
        deleter.join().unwrap();

        let state = engine.get(b"contested").unwrap();
        assert!(state.is_none() || state == Some(b"value".to_vec()));

        // Both orders are durable the same way
        engine.flush().unwrap();
        assert_eq!(engine.get(b"contested").unwrap(), state);
    }
}

#[test]
fn test_put_completes_while_flush_runs() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        // No fsync on the small puts, so only the flush can hold them up
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 10_000 })
        .memtable_size_limit(1024 * 1024)
        .compaction_trigger(0)
        .build();
    let engine = Engine::open(config).unwrap();
    let big = vec![0x42u8; 8 * 1024 * 1024];

    let mut overlapped = 0;
    for round in 0..5 {
        assert!(wait_until(|| !engine.flush_pending()));

        // Fills the memtable: it is frozen and handed to the flush thread
        engine.put(format!("big{}", round).as_bytes(), &big).unwrap();

        engine
            .put(format!("small{}", round).as_bytes(), b"v")
            .unwrap();
        if engine.flush_pending() {
            overlapped += 1;
        }
    }

    // Writes waiting on the flush would only finish once it was done
    assert!(overlapped > 0, "no put finished during a flush");

    assert!(wait_until(|| !engine.flush_pending()));
    for round in 0..5 {
        assert_eq!(
            engine.get(format!("small{}", round).as_bytes()).unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(
            engine
                .get(format!("big{}", round).as_bytes())
                .unwrap()
                .map(|v| v.len()),
            Some(big.len())
        );
    }
}

#[test]
fn test_writers_to_distinct_keys_share_the_wal() {
    let (_temp, engine) = shared_engine(64 * 1024);
    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..100 {
                    let key = format!("w{}-{:03}", t, i);
                    engine.put(key.as_bytes(), b"x").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every acknowledged write is in the log, in some order
    let dir = engine.data_dir().to_path_buf();
    drop(engine);
    let reopened = Engine::open(config_for(&dir, 64 * 1024)).unwrap();
    assert_eq!(
        reopened.scan(b"w", None).unwrap().count(),
        threads * 100
    );
}
