//! SSTable Tests
//!
//! Tests verify:
//! - Builder output is readable and sorted
//! - Point lookups distinguish value, tombstone and absence
//! - Ranged iteration honours [start, end)
//! - Damaged files are refused on open

use std::fs;
use std::path::PathBuf;

use stratakv::storage::{SSTableBuilder, SSTableReader};
use stratakv::StrataError;
use tempfile::TempDir;

fn table_path(dir: &TempDir, id: u64) -> PathBuf {
    dir.path().join(format!("sstable_{:06}.sst", id))
}

/// Build a table from sorted `(key, Some(value) | None)` entries
fn build(path: &PathBuf, entries: &[(&str, Option<&str>)]) {
    let mut builder = SSTableBuilder::new(path).unwrap();
    for (key, value) in entries {
        match value {
            Some(v) => builder.add(key.as_bytes(), v.as_bytes()).unwrap(),
            None => builder.add_tombstone(key.as_bytes()).unwrap(),
        }
    }
    builder.finish().unwrap();
}

fn collect(iter: impl Iterator<Item = stratakv::Result<(Vec<u8>, Option<Vec<u8>>)>>) -> Vec<(String, Option<String>)> {
    iter.map(|item| {
        let (k, v) = item.unwrap();
        (
            String::from_utf8(k).unwrap(),
            v.map(|v| String::from_utf8(v).unwrap()),
        )
    })
    .collect()
}

// =============================================================================
// Building and Reading
// =============================================================================

#[test]
fn test_builder_reports_metadata() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);

    let mut builder = SSTableBuilder::new(&path).unwrap();
    builder.add(b"apple", b"red").unwrap();
    builder.add_tombstone(b"banana").unwrap();
    builder.add(b"cherry", b"").unwrap();
    assert_eq!(builder.entry_count(), 3);
    let meta = builder.finish().unwrap();

    assert_eq!(meta.entry_count(), 3);
    assert_eq!(meta.min_key, b"apple".to_vec());
    assert_eq!(meta.max_key, b"cherry".to_vec());
    assert_eq!(meta.file_size, fs::metadata(&path).unwrap().len());
    assert!(meta.might_contain(b"b"));
    assert!(!meta.might_contain(b"zebra"));
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let dir = TempDir::new().unwrap();
    let mut builder = SSTableBuilder::new(&table_path(&dir, 1)).unwrap();
    builder.add(b"b", b"1").unwrap();

    assert!(matches!(builder.add(b"a", b"2"), Err(StrataError::Storage(_))));
    assert!(builder.add(b"b", b"dup").is_err());
}

#[test]
fn test_point_lookups() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 3);
    build(&path, &[("a", Some("1")), ("b", None), ("c", Some(""))]);

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.id(), 3);
    assert_eq!(reader.entry_count(), 3);

    assert_eq!(reader.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.get(b"b").unwrap(), None);
    assert_eq!(reader.get(b"c").unwrap(), Some(Vec::new()));
    assert!(matches!(reader.get(b"d"), Err(StrataError::KeyNotFound)));
}

#[test]
fn test_binary_keys() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);

    let mut builder = SSTableBuilder::new(&path).unwrap();
    builder.add(&[0x00], &[0xff, 0x00]).unwrap();
    builder.add(&[0x00, 0x01], b"x").unwrap();
    builder.add(&[0xff], &[]).unwrap();
    builder.finish().unwrap();

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.get(&[0x00]).unwrap(), Some(vec![0xff, 0x00]));
    assert_eq!(reader.min_key(), Some(&[0x00][..]));
    assert_eq!(reader.max_key(), Some(&[0xff][..]));
}

#[test]
fn test_empty_table() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);
    build(&path, &[]);

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 0);
    assert!(!reader.might_contain(b"anything"));
    assert_eq!(reader.iter().unwrap().count(), 0);
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_full_iteration_includes_tombstones() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);
    build(&path, &[("a", Some("1")), ("b", None), ("c", Some("3"))]);

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(
        collect(reader.iter().unwrap()),
        vec![
            ("a".to_string(), Some("1".to_string())),
            ("b".to_string(), None),
            ("c".to_string(), Some("3".to_string())),
        ]
    );
}

#[test]
fn test_range_bounds() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);
    let entries: Vec<(String, String)> = (0..20)
        .map(|i| (format!("key{:02}", i), format!("v{}", i)))
        .collect();
    let refs: Vec<(&str, Option<&str>)> = entries
        .iter()
        .map(|(k, v)| (k.as_str(), Some(v.as_str())))
        .collect();
    build(&path, &refs);
    let reader = SSTableReader::open(&path).unwrap();

    let keys = |start: &str, end: Option<&str>| -> Vec<String> {
        collect(reader.range(start.as_bytes(), end.map(str::as_bytes)).unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    };

    assert_eq!(keys("key05", Some("key08")), vec!["key05", "key06", "key07"]);
    // Start between keys
    assert_eq!(keys("key055", Some("key07")), vec!["key06"]);
    // Unbounded end
    assert_eq!(keys("key18", None), vec!["key18", "key19"]);
    // Past the last key
    assert!(keys("zzz", None).is_empty());
    // Empty range
    assert!(keys("key10", Some("key10")).is_empty());
}

// =============================================================================
// Corruption
// =============================================================================

#[test]
fn test_flipped_data_byte_fails_checksum() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);
    build(&path, &[("alpha", Some("one")), ("beta", Some("two"))]);

    let mut bytes = fs::read(&path).unwrap();
    // First entry's key starts right after the 22-byte header and 8-byte entry header
    bytes[30] ^= 0x20;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(SSTableReader::open(&path), Err(StrataError::Storage(_))));
}

#[test]
fn test_bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);
    build(&path, &[("a", Some("1"))]);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, &bytes).unwrap();

    assert!(SSTableReader::open(&path).is_err());
}

#[test]
fn test_truncated_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, 1);
    build(&path, &[("a", Some("1")), ("b", Some("2"))]);

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    assert!(SSTableReader::open(&path).is_err());
}
