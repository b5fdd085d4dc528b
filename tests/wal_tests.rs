//! Tests for the Write-Ahead Log
//!
//! These tests verify:
//! - Entry encoding and checksum validation
//! - Writer LSN sequencing, reopen and truncate
//! - Reader iteration and clean EOF
//! - Recovery from torn tails and CRC corruption (with truncation)

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use cellarkv::config::WalSyncStrategy;
use cellarkv::wal::{Operation, WalEntry, WalReader, WalRecovery, WalWriter, HEADER_SIZE};
use cellarkv::CellarError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("test.wal");
    (temp_dir, wal_path)
}

fn put(key: &str, value: &str) -> Operation {
    Operation::Put {
        store: b"s".to_vec(),
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

/// Write entries using WalWriter (produces a well-formed WAL)
fn write_entries_via_writer(path: &Path, count: usize) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer
            .append(vec![put(&format!("key{}", i), &format!("value{}", i))])
            .unwrap();
    }
}

/// Write raw serialized entries directly to a file (for crafting corruption)
fn write_raw(path: &Path, chunks: &[&[u8]]) {
    let mut file = File::create(path).unwrap();
    for chunk in chunks {
        file.write_all(chunk).unwrap();
    }
    file.sync_all().unwrap();
}

// =============================================================================
// Entry Tests
// =============================================================================

#[test]
fn test_entry_header_layout() {
    let entry = WalEntry::new(7, vec![put("k", "v")]);
    let bytes = entry.serialize().unwrap();

    assert_eq!(&bytes[0..8], &7u64.to_le_bytes());
    let len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    assert_eq!(bytes.len(), HEADER_SIZE + len);
}

#[test]
fn test_entry_keeps_operation_order() {
    let ops = vec![
        Operation::CreateStore {
            name: b"q".to_vec(),
            duplicates: true,
        },
        put("a", "1"),
        Operation::Delete {
            store: b"s".to_vec(),
            key: b"a".to_vec(),
            value: None,
        },
        Operation::DropStore { name: b"q".to_vec() },
    ];
    let entry = WalEntry::new(1, ops.clone());

    let decoded = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    assert_eq!(decoded.operations, ops);
    assert_eq!(decoded.timestamp, entry.timestamp);
}

#[test]
fn test_entry_crc_mismatch_detected() {
    let mut bytes = WalEntry::new(1, vec![put("k", "v")]).serialize().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let result = WalEntry::deserialize(&bytes);
    assert!(matches!(result, Err(CellarError::WalCorruption(_))));
}

#[test]
fn test_entry_lsn_is_checksummed() {
    let mut bytes = WalEntry::new(1, vec![put("k", "v")]).serialize().unwrap();
    bytes[0] = 9;

    assert!(WalEntry::deserialize(&bytes).is_err());
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_writer_assigns_sequential_lsns() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();

    assert_eq!(writer.append(vec![put("a", "1")]).unwrap(), 1);
    assert_eq!(writer.append(vec![put("b", "2")]).unwrap(), 2);
    assert_eq!(writer.current_lsn(), 3);
    assert_eq!(writer.size(), fs::metadata(&wal_path).unwrap().len());
}

#[test]
fn test_writer_reopen_continues_sequence() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 3);

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.current_lsn(), 4);
    assert_eq!(writer.append(vec![put("x", "y")]).unwrap(), 4);
}

#[test]
fn test_writer_reopen_drops_torn_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 2);
    let good_len = fs::metadata(&wal_path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[0xAB; 7]).unwrap();
    drop(file);

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.size(), good_len);
    writer.append(vec![put("after", "tail")]).unwrap();
    drop(writer);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(result.entries_corrupted, 0);
}

#[test]
fn test_writer_truncate_resets_log() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer =
        WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 10 }).unwrap();
    for i in 0..5 {
        writer.append(vec![put(&i.to_string(), "v")]).unwrap();
    }

    writer.truncate(42).unwrap();

    assert_eq!(writer.size(), 0);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), 0);
    assert_eq!(writer.append(vec![put("k", "v")]).unwrap(), 42);
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_reader_iterates_all_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 4);

    let lsns: Vec<u64> = WalReader::open(&wal_path)
        .unwrap()
        .entries()
        .map(|e| e.unwrap().lsn)
        .collect();

    assert_eq!(lsns, vec![1, 2, 3, 4]);
}

#[test]
fn test_reader_stops_after_error() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = WalEntry::new(1, vec![put("k", "v")]).serialize().unwrap();
    write_raw(&wal_path, &[&good, &[1, 2, 3]]);

    let results: Vec<_> = WalReader::open(&wal_path).unwrap().entries().collect();

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert!(entries.is_empty());
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.last_lsn, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_multiple_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 10);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 10);
    assert_eq!(result.entries_recovered, 10);
    assert_eq!(result.last_lsn, 10);
    assert!(!result.was_truncated);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.lsn, (i + 1) as u64);
    }
}

#[test]
fn test_recover_partial_data_truncates_file() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = WalEntry::new(1, vec![put("k", "v")]).serialize().unwrap();
    let mut torn = WalEntry::new(2, vec![put("k2", "v2")]).serialize().unwrap();
    torn.truncate(HEADER_SIZE + 4);
    write_raw(&wal_path, &[&good, &torn]);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), good.len() as u64);
}

#[test]
fn test_recover_corrupted_entry() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = WalEntry::new(1, vec![put("k1", "v1")]).serialize().unwrap();
    let mut bad = WalEntry::new(2, vec![put("k2", "v2")]).serialize().unwrap();
    if let Some(byte) = bad.last_mut() {
        *byte ^= 0xFF;
    }
    let after = WalEntry::new(3, vec![put("k3", "v3")]).serialize().unwrap();
    write_raw(&wal_path, &[&good, &bad, &after]);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    // Nothing after the first bad frame is trusted
    assert_eq!(entries.len(), 1);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
}

#[test]
fn test_recover_stops_at_backwards_lsn() {
    let (_temp, wal_path) = setup_temp_wal();
    let e1 = WalEntry::new(1, vec![put("a", "1")]).serialize().unwrap();
    let e2 = WalEntry::new(2, vec![put("b", "2")]).serialize().unwrap();
    let stale = WalEntry::new(1, vec![put("c", "3")]).serialize().unwrap();
    write_raw(&wal_path, &[&e1, &e2, &stale]);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(result.last_lsn, 2);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), (e1.len() + e2.len()) as u64);
}

#[test]
fn test_verify_does_not_modify_file() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = WalEntry::new(1, vec![put("k", "v")]).serialize().unwrap();
    write_raw(&wal_path, &[&good, &[0u8; 5]]);
    let before = fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 1);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), before);
}
