//! End-to-end engine behavior across flushes, compactions and reopens

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simpledb_core::manifest::Manifest;
use simpledb_core::{StorageConfig, StorageEngine, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn open(dir: &Path) -> StorageEngine {
    StorageEngine::new(StorageConfig::new(dir).background_maintenance(false)).unwrap()
}

fn scan(engine: &StorageEngine, cf: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    engine.prefix_iterator(cf, prefix).unwrap().collect()
}

#[test]
fn round_trip_before_and_after_flush() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());

    engine.put("blocks", b"height", b"100").unwrap();
    assert_eq!(engine.get("blocks", b"height").unwrap(), Some(b"100".to_vec()));

    engine.flush().unwrap();
    assert_eq!(engine.get("blocks", b"height").unwrap(), Some(b"100".to_vec()));
}

#[test]
fn tombstone_hides_flushed_value() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());

    engine.put("blocks", b"k", b"old").unwrap();
    engine.flush().unwrap();
    engine.delete("blocks", b"k").unwrap();
    assert_eq!(engine.get("blocks", b"k").unwrap(), None);

    engine.flush().unwrap();
    assert_eq!(engine.metrics().unwrap().sstables, 2);
    assert_eq!(engine.get("blocks", b"k").unwrap(), None);
    assert!(scan(&engine, "blocks", b"").is_empty());
}

#[test]
fn unflushed_writes_survive_crash() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open(temp_dir.path());
        for i in 0..100u32 {
            engine
                .put("trades", format!("t{:03}", i).as_bytes(), &i.to_be_bytes())
                .unwrap();
        }
        engine.delete("trades", b"t050").unwrap();
        engine.close(false).unwrap();
    }

    let engine = open(temp_dir.path());
    assert_eq!(engine.metrics().unwrap().sstables, 0);
    for i in 0..100u32 {
        let expected = if i == 50 { None } else { Some(i.to_be_bytes().to_vec()) };
        assert_eq!(
            engine.get("trades", format!("t{:03}", i).as_bytes()).unwrap(),
            expected
        );
    }
}

#[test]
fn dropped_engine_replays_wal() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = StorageEngine::new(StorageConfig::new(temp_dir.path())).unwrap();
        engine.put("blocks", b"a", b"1").unwrap();
        engine.flush().unwrap();
        engine.put("blocks", b"b", b"2").unwrap();
    }

    let engine = open(temp_dir.path());
    assert_eq!(
        scan(&engine, "blocks", b""),
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]
    );
}

#[test]
fn torn_wal_tail_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open(temp_dir.path());
        engine.put("blocks", b"a", b"1").unwrap();
        engine.put("blocks", b"b", b"2").unwrap();
        engine.close(false).unwrap();
    }
    let wal = temp_dir.path().join("wal.log");
    let len = fs::metadata(&wal).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&wal).unwrap();
    file.set_len(len - 3).unwrap();

    let engine = open(temp_dir.path());
    assert_eq!(engine.get("blocks", b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get("blocks", b"b").unwrap(), None);
}

#[test]
fn writes_after_torn_tail_survive_next_crash() {
    let temp_dir = TempDir::new().unwrap();
    let wal = temp_dir.path().join("wal.log");
    {
        let engine = open(temp_dir.path());
        engine.put("blocks", b"a", b"1").unwrap();
        engine.put("blocks", b"b", b"2").unwrap();
        engine.close(false).unwrap();
    }
    let len = fs::metadata(&wal).unwrap().len();
    fs::OpenOptions::new()
        .write(true)
        .open(&wal)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    {
        let engine = open(temp_dir.path());
        assert_eq!(engine.get("blocks", b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get("blocks", b"b").unwrap(), None);
        engine.put("blocks", b"c", b"3").unwrap();
        engine.delete("blocks", b"a").unwrap();
        engine.close(false).unwrap();
    }

    let engine = open(temp_dir.path());
    assert_eq!(
        scan(&engine, "blocks", b""),
        vec![(b"c".to_vec(), b"3".to_vec())]
    );
}

#[test]
fn garbage_wal_tail_is_cut_before_new_writes() {
    let temp_dir = TempDir::new().unwrap();
    let wal = temp_dir.path().join("wal.log");
    {
        let engine = open(temp_dir.path());
        engine.put("blocks", b"a", b"1").unwrap();
        engine.close(false).unwrap();
    }
    let intact = fs::metadata(&wal).unwrap().len();
    let mut file = fs::OpenOptions::new().append(true).open(&wal).unwrap();
    file.write_all(&5u32.to_be_bytes()).unwrap();
    file.write_all(b"{oops").unwrap();
    drop(file);

    {
        let engine = open(temp_dir.path());
        assert_eq!(fs::metadata(&wal).unwrap().len(), intact);
        engine.put("blocks", b"b", b"2").unwrap();
        engine.close(false).unwrap();
    }

    let engine = open(temp_dir.path());
    assert_eq!(engine.get("blocks", b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get("blocks", b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn compaction_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());

    for round in 0..4u8 {
        for i in 0..10u8 {
            engine.put("books", &[b'k', i], &[round, i]).unwrap();
        }
        engine.delete("books", &[b'k', round]).unwrap();
        engine.flush().unwrap();
    }
    let before = scan(&engine, "books", b"k");

    engine.compact().unwrap();
    let after_first = scan(&engine, "books", b"k");
    assert_eq!(engine.metrics().unwrap().sstables, 1);

    engine.compact().unwrap();
    let after_second = scan(&engine, "books", b"k");

    assert_eq!(before, after_first);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.len(), 9);
}

#[test]
fn prefix_scan_matches_model() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for step in 0..2_000u32 {
        let key = vec![b"abc"[rng.gen_range(0..3)], rng.gen_range(0..16u8)];
        if rng.gen_bool(0.25) {
            engine.delete("cf", &key).unwrap();
            model.remove(&key);
        } else {
            let value = step.to_be_bytes().to_vec();
            engine.put("cf", &key, &value).unwrap();
            model.insert(key, value);
        }

        match step % 400 {
            199 => engine.flush().unwrap(),
            399 => {
                engine.flush().unwrap();
                engine.compact().unwrap();
            }
            _ => {}
        }
    }

    let prefixes: [&[u8]; 6] = [b"", b"a", b"b", b"c", b"d", &[b'a', 3]];
    for prefix in prefixes {
        let expected: Vec<_> = model
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        assert_eq!(scan(&engine, "cf", prefix), expected, "prefix {:?}", prefix);
    }

    engine.close(true).unwrap();
    let engine = open(temp_dir.path());
    let expected: Vec<_> = model.into_iter().collect();
    assert_eq!(scan(&engine, "cf", b""), expected);
}

#[test]
fn concrete_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let engine = open(root);

    engine.ensure_cf("blocks").unwrap();
    engine.put("blocks", b"k1", b"v1").unwrap();
    assert_eq!(engine.get("blocks", b"k1").unwrap(), Some(b"v1".to_vec()));

    engine.flush().unwrap();
    assert!(root.join("blocks").join("00000000.sst").is_file());
    let (manifest, _) = Manifest::load(root).unwrap();
    assert_eq!(
        manifest.cf("blocks").unwrap().segment_files().collect::<Vec<_>>(),
        vec!["00000000.sst"]
    );
    assert_eq!(fs::metadata(root.join("wal.log")).unwrap().len(), 0);

    engine.delete("blocks", b"k1").unwrap();
    assert_eq!(engine.get("blocks", b"k1").unwrap(), None);

    engine.compact().unwrap();
    assert_eq!(engine.metrics().unwrap().sstables, 1);
    assert!(root.join("blocks").join("00000000.sst").is_file());

    engine.close(true).unwrap();
    let engine = open(root);
    assert_eq!(engine.get("blocks", b"k1").unwrap(), None);
}

#[test]
fn batch_applies_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());
    engine.put("blocks", b"k", b"old").unwrap();

    let mut batch = engine.make_batch();
    batch
        .delete("blocks", b"k")
        .put("blocks", b"k", b"new")
        .put("accounts", b"alice", b"10")
        .delete("accounts", b"bob");
    engine.write_batch(batch).unwrap();

    assert_eq!(engine.get("blocks", b"k").unwrap(), Some(b"new".to_vec()));
    assert_eq!(engine.get("accounts", b"alice").unwrap(), Some(b"10".to_vec()));
    assert_eq!(
        engine.list_cfs().unwrap(),
        vec!["accounts".to_string(), "blocks".to_string()]
    );
}

#[test]
fn metrics_track_activity() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());

    let metrics = engine.metrics().unwrap();
    assert_eq!(metrics.backend, "simpledb");
    assert_eq!(metrics.last_wal_write_epoch, None);
    assert_eq!(metrics.wal_fsync_lag_seconds, None);
    assert_eq!(metrics.fsync_interval_sec, 1.0);

    engine.put("blocks", b"k", b"v").unwrap();
    engine.flush_wal().unwrap();
    let metrics = engine.metrics().unwrap();
    assert_eq!(metrics.num_cfs, 1);
    assert!(metrics.memtable_bytes > 0);
    assert!(metrics.last_wal_write_epoch.is_some());
    assert!(metrics.wal_fsync_lag_seconds.unwrap() >= 0.0);

    engine.flush().unwrap();
    let metrics = engine.metrics().unwrap();
    assert!(metrics.size_on_disk_bytes > 0);
    assert_eq!(metrics.segment_read_errors, 0);

    let json = serde_json::to_value(&metrics).unwrap();
    assert!(json.get("flush_lag_seconds").is_some());
}

#[test]
fn missing_manifest_rebuilt_from_segments() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open(temp_dir.path());
        engine.put("blocks", b"a", b"1").unwrap();
        engine.flush().unwrap();
        engine.put("blocks", b"b", b"2").unwrap();
        engine.close(true).unwrap();
    }
    fs::remove_file(temp_dir.path().join("manifest.json")).unwrap();

    let engine = open(temp_dir.path());
    assert_eq!(engine.metrics().unwrap().sstables, 2);
    assert_eq!(scan(&engine, "blocks", b"").len(), 2);

    engine.put("blocks", b"c", b"3").unwrap();
    engine.flush().unwrap();
    assert!(temp_dir.path().join("blocks").join("00000002.sst").is_file());
}

#[test]
fn corrupt_segment_is_reported_in_metrics() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());

    engine.put("blocks", b"old", b"1").unwrap();
    engine.flush().unwrap();
    engine.put("blocks", b"new", b"2").unwrap();
    engine.flush().unwrap();
    fs::write(
        temp_dir.path().join("blocks").join("00000000.sst"),
        [0, 0, 0, 9, b'o'],
    )
    .unwrap();

    assert_eq!(engine.get("blocks", b"old").unwrap(), None);
    assert_eq!(engine.get("blocks", b"new").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.metrics().unwrap().segment_read_errors, 1);

    assert_eq!(scan(&engine, "blocks", b""), vec![(b"new".to_vec(), b"2".to_vec())]);
    assert_eq!(engine.metrics().unwrap().segment_read_errors, 2);

    assert!(engine.compact().is_err());
    assert_eq!(engine.metrics().unwrap().sstables, 2);
}

#[test]
fn crash_before_old_segments_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let cf_dir = temp_dir.path().join("books");
    let mut old_segments = Vec::new();
    let before;
    {
        let engine = open(temp_dir.path());
        for i in 0..4u8 {
            engine.put("books", &[b'k', i], &[i + 1]).unwrap();
            engine.delete("books", &[b'k', i.saturating_sub(1)]).unwrap();
            engine.flush().unwrap();
        }
        for i in 0..4u64 {
            let path = cf_dir.join(format!("{:08}.sst", i));
            old_segments.push((path.clone(), fs::read(&path).unwrap()));
        }
        before = scan(&engine, "books", b"");

        engine.compact().unwrap();
        engine.close(false).unwrap();
    }
    // Manifest already names the compacted segment; the old files linger
    for (path, data) in &old_segments {
        fs::write(path, data).unwrap();
    }

    let engine = open(temp_dir.path());
    for (path, _) in &old_segments {
        assert!(!path.exists());
    }
    assert!(cf_dir.join("00000004.sst").is_file());
    assert_eq!(engine.metrics().unwrap().sstables, 1);
    assert_eq!(scan(&engine, "books", b""), before);
}

#[test]
fn closed_engine_rejects_calls() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(temp_dir.path());
    engine.close(true).unwrap();

    assert!(matches!(engine.put("blocks", b"k", b"v"), Err(StorageError::Closed)));
    assert!(matches!(engine.flush(), Err(StorageError::Closed)));
    assert!(matches!(engine.metrics(), Err(StorageError::Closed)));
}
