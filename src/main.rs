use std::sync::Arc;

use marmot::buffer::BufferPoolManager;
use marmot::common::DEFAULT_REPLACER_K;
use marmot::index::BPlusTree;
use marmot::storage::disk::DiskManager;

fn main() {
    env_logger::init();

    println!("Marmot - a disk-oriented storage engine in Rust");
    println!("===============================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    println!("Created disk manager for: {db_path}");

    let bpm = Arc::new(BufferPoolManager::new(16, DEFAULT_REPLACER_K, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    let tree = BPlusTree::new("demo", Arc::clone(&bpm), 8, 8).expect("failed to create index");

    for key in [42i64, 7, 19, 3, 88, 55, 21, 64, 30, 11] {
        tree.insert(key, BPlusTree::rid_for_key(key))
            .expect("insert failed");
        println!("Inserted key {key}");
    }

    println!("\nPoint lookups:");
    for key in [7i64, 30, 99] {
        match tree.get_value(key).expect("lookup failed") {
            Some(rid) => println!("  key {key} -> {rid}"),
            None => println!("  key {key} -> not found"),
        }
    }

    println!("\nOrdered scan:");
    for entry in tree.iter().expect("iterator failed") {
        let (key, rid) = entry.expect("scan failed");
        println!("  {key} -> {rid}");
    }

    tree.remove(19).expect("remove failed");
    println!("\nRemoved key 19; lookup now: {:?}", tree.get_value(19).unwrap());

    bpm.flush_all_pages().expect("flush failed");
    println!("Flushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
