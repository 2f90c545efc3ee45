//! Concurrency and eviction tests for the B+ tree index

use std::sync::Arc;
use std::thread;

use burrow::buffer::BufferPoolManager;
use burrow::common::{key_from_u64, key_to_u64, PageId, RecordId, SlotId};
use burrow::index::{BPlusTree, BytewiseComparator};
use burrow::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    (bpm, temp_file)
}

fn rid(k: u64) -> RecordId {
    RecordId::new(PageId::new(k as u32), SlotId::new(k as u16))
}

#[test]
fn test_interleaved_writers_and_readers() {
    use rand::Rng;

    // Room for every writer's worst-case latched path plus the readers
    let (bpm, _temp) = create_bpm(128);
    let tree = Arc::new(BPlusTree::new(
        "concurrent_index",
        bpm.clone(),
        BytewiseComparator,
        4,
        3,
    ));

    let mut handles = Vec::new();

    // 4 writers over disjoint key ranges
    for w in 0..4u64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for k in (w * 100)..(w * 100 + 100) {
                assert!(tree.insert(&key_from_u64(k), rid(k)).unwrap());
            }
        }));
    }

    // 4 readers hammering random keys; they may or may not see a key, but
    // whatever they see must carry the right value
    for _ in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..500 {
                let k: u64 = rng.gen_range(0..400);
                if let Some(value) = tree.get(&key_from_u64(k)).unwrap() {
                    assert_eq!(value, rid(k));
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.len(), 400);
    for k in 0..400 {
        assert_eq!(
            tree.get(&key_from_u64(k)).unwrap(),
            Some(rid(k)),
            "missing key {}",
            k
        );
    }

    let mut iter = tree.begin().unwrap();
    let mut expected = 0u64;
    while !iter.is_end() {
        assert_eq!(key_to_u64(&iter.entry().0), expected);
        expected += 1;
        iter.advance().unwrap();
    }
    assert_eq!(expected, 400);
}

#[test]
fn test_concurrent_writers_shuffled() {
    use rand::seq::SliceRandom;

    let (bpm, _temp) = create_bpm(128);
    let tree = Arc::new(BPlusTree::new(
        "shuffled_index",
        bpm.clone(),
        BytewiseComparator,
        4,
        3,
    ));

    let handles: Vec<_> = (0..8u64)
        .map(|w| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<u64> = ((w * 50)..(w * 50 + 50)).collect();
                keys.shuffle(&mut rand::thread_rng());
                for k in keys {
                    assert!(tree.insert(&key_from_u64(k), rid(k)).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.len(), 400);
    for k in 0..400 {
        assert_eq!(tree.get(&key_from_u64(k)).unwrap(), Some(rid(k)));
    }
}

#[test]
fn test_eviction_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    // A pool far smaller than the tree: inserting 1000 keys with tiny
    // fan-outs builds hundreds of pages through 32 frames, forcing
    // constant eviction and re-reads.
    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, disk_manager.clone()));
        let tree = BPlusTree::new("evicted_index", bpm.clone(), BytewiseComparator, 4, 3);

        for k in 0..1000 {
            assert!(tree.insert(&key_from_u64(k), rid(k)).unwrap());
        }
        assert!(disk_manager.num_writes() > 32, "evictions should hit disk");

        bpm.flush_all_pages().unwrap();
    }

    // Reopen through a fresh pool and walk the whole index
    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, disk_manager));
        let tree =
            BPlusTree::open("evicted_index", bpm.clone(), BytewiseComparator, 4, 3).unwrap();

        assert_eq!(tree.len(), 1000);

        let mut iter = tree.begin().unwrap();
        let mut expected = 0u64;
        while !iter.is_end() {
            let (k, v) = iter.entry();
            assert_eq!(key_to_u64(&k), expected);
            assert_eq!(v, rid(expected));
            expected += 1;
            iter.advance().unwrap();
        }
        assert_eq!(expected, 1000);
    }
}

#[test]
fn test_concurrent_reads_after_load() {
    let (bpm, _temp) = create_bpm(50);
    let tree = Arc::new(BPlusTree::new(
        "read_index",
        bpm.clone(),
        BytewiseComparator,
        4,
        3,
    ));

    for k in 0..200 {
        tree.insert(&key_from_u64(k), rid(k)).unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for k in 0..200 {
                    assert_eq!(tree.get(&key_from_u64(k)).unwrap(), Some(rid(k)));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
