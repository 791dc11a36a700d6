//! Tests for the index file codec
//!
//! These tests verify:
//! - Whole-image encode/decode and the byte layout
//! - Positional insert and remove, in place and via shadow swap
//! - Insert then remove restoring the original bytes
//! - Corruption detection on open and before mutation

use std::fs;
use std::path::PathBuf;

use unbloatdb::config::IndexWriteMode;
use unbloatdb::index::{
    decode_image, encode_image, IndexEntry, IndexFile, IndexFileOptions, IndexValue, ValueType,
    KEY_LENGTH, LENGTH_FIELD_SIZE,
};
use unbloatdb::UnbloatError;

#[path = "../common/mod.rs"]
mod common;

use common::{key, setup_temp_dir};

// =============================================================================
// Helper Functions
// =============================================================================

fn shadow_swap() -> IndexFileOptions {
    IndexFileOptions {
        write_mode: IndexWriteMode::ShadowSwap,
        sync_writes: false,
    }
}

fn open_i32(path: &PathBuf, options: IndexFileOptions) -> (IndexFile, Vec<IndexEntry>) {
    IndexFile::open(path, ValueType::I32, options).unwrap()
}

fn age_entries() -> Vec<IndexEntry> {
    vec![
        IndexEntry::new(18i32, key(1)),
        IndexEntry::new(25i32, key(2)),
        IndexEntry::new(25i32, key(3)),
        IndexEntry::new(60i32, key(4)),
    ]
}

// =============================================================================
// Image Tests
// =============================================================================

#[test]
fn test_empty_image() {
    let image = encode_image(&[]);
    assert_eq!(image, 4u32.to_le_bytes().to_vec());

    let (lengths, entries) = decode_image(&PathBuf::from("empty"), &image, ValueType::I32).unwrap();
    assert!(lengths.is_empty());
    assert!(entries.is_empty());
}

#[test]
fn test_image_layout() {
    let entries = vec![
        IndexEntry::new("Leeds", key(1)),
        IndexEntry::new("York", key(2)),
    ];
    let image = encode_image(&entries);

    let header_len = LENGTH_FIELD_SIZE * 3;
    assert_eq!(&image[0..4], &(header_len as u32).to_le_bytes());
    assert_eq!(&image[4..8], &((KEY_LENGTH + 5) as u32).to_le_bytes());
    assert_eq!(&image[8..12], &((KEY_LENGTH + 4) as u32).to_le_bytes());
    assert_eq!(&image[header_len..header_len + KEY_LENGTH], key(1).as_bytes());
    assert_eq!(
        &image[header_len + KEY_LENGTH..header_len + KEY_LENGTH + 5],
        b"Leeds"
    );
    assert_eq!(image.len(), header_len + 2 * KEY_LENGTH + 9);
}

#[test]
fn test_image_decodes_in_storage_order() {
    let entries: Vec<IndexEntry> = (0..50)
        .map(|i| IndexEntry::new(format!("value-{}", i * 7 % 13), key(i)))
        .collect();

    let image = encode_image(&entries);
    let (lengths, decoded) =
        decode_image(&PathBuf::from("strings"), &image, ValueType::String).unwrap();

    assert_eq!(lengths.len(), 50);
    assert_eq!(decoded, entries);
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_empty_file() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");

    let (file, entries) = open_i32(&path, IndexFileOptions::default());

    assert!(entries.is_empty());
    assert_eq!(file.entry_count(), 0);
    assert_eq!(file.header_len(), 4);
    assert_eq!(fs::read(&path).unwrap(), 4u32.to_le_bytes().to_vec());
}

#[test]
fn test_open_reads_existing_file() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    fs::write(&path, encode_image(&age_entries())).unwrap();

    let (file, entries) = open_i32(&path, IndexFileOptions::default());

    assert_eq!(entries, age_entries());
    assert_eq!(file.entry_count(), 4);
    assert_eq!(file.expected_size(), fs::metadata(&path).unwrap().len());
}

// =============================================================================
// Mutation Tests
// =============================================================================

#[test]
fn test_insert_at_positions() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    let (mut file, _) = open_i32(&path, IndexFileOptions::default());

    file.insert(0, &IndexEntry::new(30i32, key(1))).unwrap();
    file.insert(0, &IndexEntry::new(10i32, key(2))).unwrap();
    file.insert(2, &IndexEntry::new(50i32, key(3))).unwrap();
    file.insert(1, &IndexEntry::new(20i32, key(4))).unwrap();

    let expected = vec![
        IndexEntry::new(10i32, key(2)),
        IndexEntry::new(20i32, key(4)),
        IndexEntry::new(30i32, key(1)),
        IndexEntry::new(50i32, key(3)),
    ];
    assert_eq!(file.read_entries().unwrap(), expected);
    assert_eq!(fs::read(&path).unwrap(), encode_image(&expected));
}

#[test]
fn test_remove_at_positions() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    fs::write(&path, encode_image(&age_entries())).unwrap();
    let (mut file, _) = open_i32(&path, IndexFileOptions::default());

    file.remove(3).unwrap();
    file.remove(0).unwrap();

    let expected = vec![
        IndexEntry::new(25i32, key(2)),
        IndexEntry::new(25i32, key(3)),
    ];
    assert_eq!(file.read_entries().unwrap(), expected);
    assert_eq!(file.entry_count(), 2);
}

#[test]
fn test_insert_then_remove_restores_bytes() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("location");
    let entries = vec![
        IndexEntry::new("Bradford", key(1)),
        IndexEntry::new("Leeds", key(2)),
        IndexEntry::new("York", key(3)),
    ];
    fs::write(&path, encode_image(&entries)).unwrap();
    let before = fs::read(&path).unwrap();

    let (mut file, _) = IndexFile::open(&path, ValueType::String, IndexFileOptions::default()).unwrap();

    for position in 0..=3 {
        file.insert(position, &IndexEntry::new("Halifax", key(9))).unwrap();
        file.remove(position).unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);
    }
}

#[test]
fn test_shadow_swap_mutations() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    let (mut file, _) = open_i32(&path, shadow_swap());

    for (i, entry) in age_entries().iter().enumerate() {
        file.insert(i, entry).unwrap();
    }
    file.remove(1).unwrap();

    let mut expected = age_entries();
    expected.remove(1);
    assert_eq!(file.read_entries().unwrap(), expected);
    assert_eq!(fs::read(&path).unwrap(), encode_image(&expected));

    // The swap file is renamed away
    assert!(!dir.join("age.swap").exists());
}

#[test]
fn test_replace_all() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    fs::write(&path, encode_image(&age_entries())).unwrap();
    let (mut file, _) = open_i32(&path, IndexFileOptions::default());

    let replacement = vec![IndexEntry::new(99i32, key(7))];
    file.replace_all(&replacement).unwrap();

    assert_eq!(file.entry_count(), 1);
    assert_eq!(fs::read(&path).unwrap(), encode_image(&replacement));
}

#[test]
fn test_insert_rejects_bad_entries() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    let (mut file, _) = open_i32(&path, IndexFileOptions::default());

    let short_key = file.insert(0, &IndexEntry::new(1i32, "not-a-key"));
    assert!(matches!(short_key, Err(UnbloatError::Storage(_))));

    let wrong_type = file.insert(0, &IndexEntry::new("text", key(1)));
    assert!(matches!(wrong_type, Err(UnbloatError::SchemaMismatch(_))));

    let out_of_range = file.insert(5, &IndexEntry::new(1i32, key(1)));
    assert!(matches!(out_of_range, Err(UnbloatError::Storage(_))));

    assert_eq!(file.entry_count(), 0);
    assert_eq!(fs::read(&path).unwrap(), encode_image(&[]));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_open_detects_bad_header_length() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");

    let mut image = encode_image(&age_entries());
    image[0..4].copy_from_slice(&7u32.to_le_bytes());
    fs::write(&path, image).unwrap();

    let result = IndexFile::open(&path, ValueType::I32, IndexFileOptions::default());
    assert!(matches!(result, Err(UnbloatError::IndexCorruption { .. })));
}

#[test]
fn test_open_detects_truncated_body() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");

    let mut image = encode_image(&age_entries());
    image.truncate(image.len() - 3);
    fs::write(&path, image).unwrap();

    match IndexFile::open(&path, ValueType::I32, IndexFileOptions::default()) {
        Err(UnbloatError::IndexCorruption { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected corruption, got {:?}", other.map(|(_, e)| e)),
    }
}

#[test]
fn test_open_detects_short_entry() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");

    // One entry claiming 4 bytes: shorter than a key
    let mut image = Vec::new();
    image.extend_from_slice(&8u32.to_le_bytes());
    image.extend_from_slice(&4u32.to_le_bytes());
    image.extend_from_slice(&1i32.to_le_bytes());
    fs::write(&path, image).unwrap();

    let result = IndexFile::open(&path, ValueType::I32, IndexFileOptions::default());
    assert!(matches!(result, Err(UnbloatError::IndexCorruption { .. })));
}

#[test]
fn test_open_detects_undecodable_value() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");

    // An I32 index whose entry carries a 5-byte string value
    fs::write(&path, encode_image(&[IndexEntry::new("Leeds", key(1))])).unwrap();

    let result = IndexFile::open(&path, ValueType::I32, IndexFileOptions::default());
    assert!(matches!(result, Err(UnbloatError::IndexCorruption { .. })));
}

#[test]
fn test_mutation_detects_external_truncation() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("age");
    fs::write(&path, encode_image(&age_entries())).unwrap();
    let (mut file, _) = open_i32(&path, IndexFileOptions::default());

    let truncated = fs::OpenOptions::new().write(true).open(&path).unwrap();
    truncated.set_len(10).unwrap();

    let result = file.insert(0, &IndexEntry::new(1i32, key(5)));
    assert!(matches!(result, Err(UnbloatError::IndexCorruption { .. })));
    assert_eq!(file.entry_count(), 4);
}

#[test]
fn test_decoded_values_match_type() {
    let entries = vec![IndexEntry::new(IndexValue::F64(2.5), key(1))];
    let image = encode_image(&entries);

    let (_, decoded) = decode_image(&PathBuf::from("rating"), &image, ValueType::F64).unwrap();
    assert_eq!(decoded[0].value, IndexValue::F64(2.5));
    assert_eq!(decoded[0].key, key(1));
}
