use std::sync::Arc;

use burrow::buffer::BufferPoolManager;
use burrow::common::{key_from_u64, key_to_u64, PageId, RecordId, SlotId};
use burrow::index::{BPlusTree, BytewiseComparator};
use burrow::storage::disk::DiskManager;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burrow=debug".into()),
        )
        .init();

    println!("Burrow - a disk-backed B+ tree index core");
    println!("=========================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    // Small fan-outs so the demo actually grows a multi-level tree
    let tree = BPlusTree::new("demo_index", bpm.clone(), BytewiseComparator, 4, 3);

    for key in [5u64, 9, 1, 7, 3, 8, 2, 6, 4] {
        let rid = RecordId::new(PageId::new(key as u32), SlotId::new(0));
        tree.insert(&key_from_u64(key), rid)
            .expect("Failed to insert");
        println!("Inserted key={}", key);
    }

    println!("\nPoint lookups:");
    for key in [3u64, 7, 42] {
        match tree.get(&key_from_u64(key)).expect("Failed to look up") {
            Some(rid) => println!("  key={} -> {}", key, rid),
            None => println!("  key={} -> absent", key),
        }
    }

    tree.remove(&key_from_u64(5)).expect("Failed to remove");
    println!("\nRemoved key=5");

    println!("\nFull scan:");
    let mut iter = tree.begin().expect("Failed to build iterator");
    while !iter.is_end() {
        let (key, rid) = iter.entry();
        println!("  key={} -> {}", key_to_u64(&key), rid);
        iter.advance().expect("Failed to advance");
    }
    drop(iter);

    bpm.flush_all_pages().expect("Failed to flush");
    println!("\nFlushed {} entries to disk", tree.len());

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
