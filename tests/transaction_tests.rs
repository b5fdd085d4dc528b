//! Tests for Transactions
//!
//! These tests verify:
//! - Snapshot isolation between readers and a concurrent writer
//! - Single-writer exclusion (FailFast, Timeout, Block)
//! - Commit, abort and drop behaviour
//! - Transaction-level reads and cursors

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cellarkv::config::{Config, WalSyncStrategy, WriteWait};
use cellarkv::{CellarError, Environment};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_env(wait: WriteWait) -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .write_wait(wait)
        .build();
    let env = Environment::open(config).unwrap();
    (temp_dir, env)
}

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

// =============================================================================
// Isolation Tests
// =============================================================================

#[test]
fn test_reader_does_not_see_later_commit() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();
    store.put("k", "old").unwrap();

    let reader = env.begin_read().unwrap();

    store.put("k", "new").unwrap();
    store.put("added", "1").unwrap();

    assert_eq!(reader.get(&store, "k").unwrap(), Some(b("old")));
    assert_eq!(reader.get(&store, "added").unwrap(), None);
    assert_eq!(reader.len(&store).unwrap(), 1);
    reader.commit().unwrap();

    let fresh = env.begin_read().unwrap();
    assert_eq!(fresh.get(&store, "k").unwrap(), Some(b("new")));
    assert_eq!(fresh.len(&store).unwrap(), 2);
}

#[test]
fn test_reader_cursor_pins_snapshot() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();
    for k in ["a", "b", "c"] {
        store.put(k, "").unwrap();
    }

    let mut cursor = store.cursor(true).unwrap();
    assert!(cursor.first());

    store.remove("b").unwrap();
    store.put("bb", "").unwrap();

    let keys: Vec<_> = cursor.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b("a"), b("b"), b("c")]);
}

#[test]
fn test_reader_does_not_see_new_store() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let reader = env.begin_read().unwrap();

    let store = env.create_store("late", false).unwrap();

    assert!(!reader.contains_store(&store));
    assert!(matches!(
        reader.get(&store, "k"),
        Err(CellarError::StoreNotFound(_))
    ));
}

#[test]
fn test_writer_sees_own_writes() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();

    let txn = env.begin_write().unwrap();
    assert!(!txn.is_readonly());
    let mut cursor = txn.cursor(&store).unwrap();
    cursor.put("k", "v").unwrap();

    assert_eq!(cursor.transaction().get(&store, "k").unwrap(), Some(b("v")));
    assert_eq!(cursor.transaction().len(&store).unwrap(), 1);
    assert_eq!(store.get("k").unwrap(), None);

    cursor.commit().unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b("v")));
}

#[test]
fn test_commit_advances_lsn() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();

    let before = env.begin_read().unwrap().lsn();
    store.put("k", "v").unwrap();
    let after = env.begin_read().unwrap().lsn();

    assert_eq!(after, before + 1);
}

#[test]
fn test_empty_write_commit_keeps_lsn() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();
    let before = env.begin_read().unwrap().lsn();

    // Removing an absent key is not an effective change
    assert!(!store.remove("absent").unwrap());
    env.begin_write().unwrap().commit().unwrap();

    assert_eq!(env.begin_read().unwrap().lsn(), before);
}

// =============================================================================
// Writer Exclusion Tests
// =============================================================================

#[test]
fn test_second_writer_fails_fast() {
    let (_temp, env) = setup_temp_env(WriteWait::FailFast);
    let store = env.create_store("s", false).unwrap();

    let writer = env.begin_write().unwrap();

    assert!(matches!(env.begin_write(), Err(CellarError::WriterBusy)));
    assert!(matches!(store.put("k", "v"), Err(CellarError::WriterBusy)));
    // Readers are never blocked by the writer
    assert_eq!(store.get("k").unwrap(), None);

    writer.abort();
    store.put("k", "v").unwrap();
}

#[test]
fn test_second_writer_times_out() {
    let (_temp, env) = setup_temp_env(WriteWait::Timeout { ms: 50 });

    let _writer = env.begin_write().unwrap();
    let start = Instant::now();
    let result = env.begin_write();

    assert!(matches!(result, Err(CellarError::WriterBusy)));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_blocked_writer_proceeds_after_commit() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("counter", false).unwrap();
    store.put("n", 0u64.to_le_bytes()).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut cursor = store.cursor(false).unwrap();
                    let current = cursor.load("n").unwrap();
                    let n = u64::from_le_bytes(current[..].try_into().unwrap());
                    cursor.put("n", (n + 1).to_le_bytes()).unwrap();
                    cursor.commit().unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let value = store.load("n").unwrap();
    assert_eq!(u64::from_le_bytes(value[..].try_into().unwrap()), 100);
}

#[test]
fn test_readers_run_alongside_writer() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();
    store.put("k", "0").unwrap();

    let writer = env.begin_write().unwrap();
    let mut cursor = writer.cursor(&store).unwrap();
    cursor.put("k", "1").unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.get("k").unwrap()
            })
        })
        .collect();
    for r in readers {
        assert_eq!(r.join().unwrap(), Some(b("0")));
    }

    cursor.commit().unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b("1")));
}

// =============================================================================
// Completion Tests
// =============================================================================

#[test]
fn test_dropped_write_transaction_rolls_back() {
    let (_temp, env) = setup_temp_env(WriteWait::FailFast);
    let store = env.create_store("s", false).unwrap();

    {
        let txn = env.begin_write().unwrap();
        let mut cursor = txn.cursor(&store).unwrap();
        cursor.put("k", "v").unwrap();
        // Cursor abandoned through abort; the slot must be free afterwards
        cursor.abort();
    }
    {
        let txn = env.begin_write().unwrap();
        drop(txn);
    }

    assert_eq!(store.get("k").unwrap(), None);
    env.begin_write().unwrap().commit().unwrap();
}

#[test]
fn test_active_readers_in_stat() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    assert_eq!(env.stat().unwrap().active_readers, 0);

    let r1 = env.begin_read().unwrap();
    let r2 = env.begin_read().unwrap();
    assert_eq!(env.stat().unwrap().active_readers, 2);

    r1.commit().unwrap();
    drop(r2);
    assert_eq!(env.stat().unwrap().active_readers, 0);
}

#[test]
fn test_transaction_ids_are_unique() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);

    let a = env.begin_read().unwrap();
    let b = env.begin_read().unwrap();
    let w = env.begin_write().unwrap();

    assert_ne!(a.id(), b.id());
    assert_ne!(b.id(), w.id());
    assert!(a.is_readonly());
}

#[test]
fn test_transaction_cursor_requires_store() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    let store = env.create_store("s", false).unwrap();

    let txn = env.begin_read().unwrap();
    assert!(txn.cursor(&store).is_ok());

    let missing = env.create_store("other", false).unwrap();
    env.remove_store("other").unwrap();
    let txn = env.begin_read().unwrap();
    assert!(matches!(
        txn.cursor(&missing),
        Err(CellarError::StoreNotFound(_))
    ));
}

#[test]
fn test_begin_on_stopped_environment() {
    let (_temp, env) = setup_temp_env(WriteWait::Block);
    env.stop().unwrap();

    assert!(matches!(env.begin_read(), Err(CellarError::NotRunning)));
    assert!(matches!(env.begin_write(), Err(CellarError::NotRunning)));
}
