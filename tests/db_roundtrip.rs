//! End-to-end scenarios against the public `Db` handle: persistence across
//! reopen, randomized insert/delete ordering, and shared-cache locking
//! across two connections.

use btree_core::txn::lock::LockKind;
use btree_core::{Config, Db, PageId};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tempfile::tempdir;

#[test]
fn test_reopen_preserves_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roundtrip.db");

    {
        let db = Db::open(Config::new(&path)).unwrap();
        for i in 0..100u64 {
            db.put(i, format!("row-{}", i).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }

    let db = Db::open(Config::new(&path)).unwrap();
    for i in 0..100u64 {
        let expected = format!("row-{}", i);
        assert_eq!(db.get(i).unwrap(), Some(expected.into_bytes()));
    }
    assert_eq!(db.stats().page_count, db.stats().page_count);
}

#[test]
fn test_random_order_insert_then_delete_half() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("random.db");
    let db = Db::open(Config::new(&path)).unwrap();

    let mut rowids: Vec<u64> = (0..500).collect();
    rowids.shuffle(&mut thread_rng());

    for &rowid in &rowids {
        db.put(rowid, format!("v{}", rowid).as_bytes()).unwrap();
    }
    for &rowid in &rowids {
        let expected = format!("v{}", rowid);
        assert_eq!(db.get(rowid).unwrap(), Some(expected.into_bytes()));
    }

    let mut to_delete = rowids.clone();
    to_delete.shuffle(&mut thread_rng());
    to_delete.truncate(250);
    for &rowid in &to_delete {
        assert!(db.delete(rowid).unwrap());
    }

    for &rowid in &rowids {
        let still_present = db.get(rowid).unwrap().is_some();
        assert_eq!(still_present, !to_delete.contains(&rowid));
    }
}

#[test]
fn test_range_scan_matches_shuffled_insert_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.db");
    let db = Db::open(Config::new(&path)).unwrap();

    let mut rowids: Vec<u64> = (0..200).collect();
    rowids.shuffle(&mut thread_rng());
    for &rowid in &rowids {
        db.put(rowid, b"x").unwrap();
    }

    let scanned: Vec<u64> = db.iter().unwrap().into_iter().map(|(rowid, _)| rowid).collect();
    let mut expected = rowids.clone();
    expected.sort();
    assert_eq!(scanned, expected);

    let ranged: Vec<u64> = db.range(Some(50), Some(100)).unwrap().into_iter().map(|(r, _)| r).collect();
    assert_eq!(ranged, (50..100).collect::<Vec<_>>());
}

#[test]
fn test_two_connections_serialize_writer_access() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locks.db");
    let db = Db::open(Config::new(&path)).unwrap();

    let mut writer = db.connect();
    let mut reader = db.connect();
    let table = PageId::new(2);

    writer.begin_write().unwrap();
    writer.lock_table(table, LockKind::Write).unwrap();
    assert!(reader.lock_table(table, LockKind::Read).is_err());

    writer.commit().unwrap();
    reader.lock_table(table, LockKind::Read).unwrap();
}
