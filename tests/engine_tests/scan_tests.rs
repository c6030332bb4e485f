//! Tests for Engine::scan
//!
//! These tests verify:
//! - Ascending order over memtable and SSTables together
//! - Tombstones are skipped, newest version wins
//! - Half-open bounds and restart from a later start key
//! - Writes after the scan started are not observed

use crate::{scan_all, setup_temp_engine, setup_temp_engine_with_small_memtable};

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_scan_empty_engine() {
    let (_temp, engine) = setup_temp_engine();
    assert!(scan_all(&engine, "a", None).is_empty());
}

#[test]
fn test_scan_memtable_only() {
    let (_temp, engine) = setup_temp_engine();
    for key in ["c", "a", "b"] {
        engine.put(key.as_bytes(), key.as_bytes()).unwrap();
    }

    assert_eq!(
        scan_all(&engine, "a", None),
        pairs(&[("a", "a"), ("b", "b"), ("c", "c")])
    );
}

#[test]
fn test_scan_merges_memtable_and_sstables() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"a", b"old").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.put(b"c", b"3").unwrap();
    engine.flush().unwrap();

    engine.put(b"a", b"new").unwrap();
    engine.delete(b"b").unwrap();
    engine.flush().unwrap();

    engine.put(b"d", b"4").unwrap();
    engine.delete(b"c").unwrap();

    assert_eq!(scan_all(&engine, "a", None), pairs(&[("a", "new"), ("d", "4")]));
}

#[test]
fn test_scan_bounds_are_half_open() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();
    for i in 0..30 {
        engine
            .put(format!("k{:02}", i).as_bytes(), format!("{}", i).as_bytes())
            .unwrap();
    }

    let keys: Vec<String> = scan_all(&engine, "k10", Some("k15"))
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec!["k10", "k11", "k12", "k13", "k14"]);

    assert!(scan_all(&engine, "k15", Some("k15")).is_empty());
    assert!(scan_all(&engine, "k20", Some("k10")).is_empty());
    assert_eq!(scan_all(&engine, "k2", None).len(), 10);
}

#[test]
fn test_scan_output_is_strictly_ascending() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();
    // Pseudo-random insertion order spread over many flushes
    for i in 0..200u32 {
        let n = (i * 7919) % 200;
        engine.put(format!("{:03}", n).as_bytes(), b"v").unwrap();
        if n % 5 == 0 {
            engine.delete(format!("{:03}", (n + 1) % 200).as_bytes()).unwrap();
        }
    }

    let keys: Vec<String> = scan_all(&engine, "0", None)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    for key in &keys {
        assert!(engine.get(key.as_bytes()).unwrap().is_some());
    }
}

#[test]
fn test_scan_restarts_from_last_key() {
    let (_temp, engine) = setup_temp_engine();
    for i in 0..10 {
        engine.put(format!("k{}", i).as_bytes(), b"v").unwrap();
    }

    let mut scan = engine.scan(b"k0", None).unwrap();
    let first: Vec<_> = scan.by_ref().take(4).map(|r| r.unwrap().0).collect();
    drop(scan);
    assert_eq!(first.last().unwrap(), b"k3");

    // Resume just after the last key seen
    let mut next_start = first.last().unwrap().clone();
    next_start.push(0);
    let rest = engine.scan(&next_start, None).unwrap().count();
    assert_eq!(rest, 6);
}

#[test]
fn test_scan_ignores_later_writes() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"c", b"3").unwrap();

    let scan = engine.scan(b"a", None).unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.delete(b"c").unwrap();
    engine.flush().unwrap();

    let keys: Vec<Vec<u8>> = scan.map(|r| r.unwrap().0).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);
}
