#![allow(dead_code)]

use index::{AttrType, BTreeIndex, IndexError, RangeOp, RecordFile, Rid};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::Path;
use storage::{BufferPoolManager, PagedFile};
use tempfile::TempDir;

pub const RELATION_NAME: &str = "relA";
pub const RELATION_SIZE: i32 = 5000;
pub const KEY_OFFSET: usize = 0;

pub fn temp_dir() -> TempDir {
    TempDir::new().expect("temp dir create failed")
}

/// One relation tuple: the indexed i32 first, then a float and a short tag.
pub fn record_for(key: i32) -> Vec<u8> {
    let mut record = Vec::with_capacity(36);
    record.extend_from_slice(&key.to_le_bytes());
    record.extend_from_slice(&(key as f64).to_le_bytes());
    let mut tag = [0u8; 24];
    let text = format!("record.{key}");
    let len = text.len().min(tag.len());
    tag[..len].copy_from_slice(&text.as_bytes()[..len]);
    record.extend_from_slice(&tag);
    record
}

pub fn key_of(record: &[u8]) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&record[KEY_OFFSET..KEY_OFFSET + 4]);
    i32::from_le_bytes(bytes)
}

pub fn create_relation<I: IntoIterator<Item = i32>>(dir: &Path, keys: I) -> RecordFile {
    let file = PagedFile::create(dir.join(RELATION_NAME)).expect("create relation file");
    let heap = RecordFile::create(BufferPoolManager::new(file, 64)).expect("create record heap");
    for key in keys {
        heap.insert_record(&record_for(key)).expect("insert record");
    }
    heap
}

pub fn forward_keys() -> Vec<i32> {
    (0..RELATION_SIZE).collect()
}

pub fn backward_keys() -> Vec<i32> {
    (0..RELATION_SIZE).rev().collect()
}

pub fn random_keys(seed: u64) -> Vec<i32> {
    let mut keys = forward_keys();
    keys.shuffle(&mut StdRng::seed_from_u64(seed));
    keys
}

pub fn build_index(dir: &Path, relation: &RecordFile) -> BTreeIndex {
    BTreeIndex::open_or_create(dir, relation, RELATION_NAME, KEY_OFFSET, AttrType::Int)
        .expect("open or create index")
}

/// Runs one scan to completion and returns every record id it yields.
/// An immediately empty range comes back as an empty vec.
pub fn scan_rids(
    index: &mut BTreeIndex,
    low: i32,
    low_op: RangeOp,
    high: i32,
    high_op: RangeOp,
) -> Vec<Rid> {
    match index.start_scan(low, low_op, high, high_op) {
        Ok(()) => {}
        Err(IndexError::NoSuchKeyFound) => return Vec::new(),
        Err(other) => panic!("start_scan failed: {other}"),
    }
    let mut rids = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => rids.push(rid),
            Err(IndexError::ScanCompleted) => break,
            Err(other) => panic!("scan_next failed: {other}"),
        }
    }
    index.end_scan().expect("end_scan");
    rids
}

pub fn scan_count(
    index: &mut BTreeIndex,
    low: i32,
    low_op: RangeOp,
    high: i32,
    high_op: RangeOp,
) -> usize {
    scan_rids(index, low, low_op, high, high_op).len()
}

/// Full-range scan, mapped back through the relation to the indexed keys.
pub fn full_scan_keys(index: &mut BTreeIndex, relation: &RecordFile) -> Vec<i32> {
    scan_rids(index, i32::MIN, RangeOp::Gte, i32::MAX, RangeOp::Lte)
        .into_iter()
        .map(|rid| key_of(&relation.record(rid).expect("record lookup")))
        .collect()
}
