//! Disk-resident B+ tree index over fixed-width integer keys.
//!
//! Every traversal re-reads node pages through the buffer pool and every
//! mutation goes back out through it; the only in-memory tree state is the
//! root location. Insertion descends recursively and threads an optional
//! split notification (new sibling page, separator key) back up. Range scans
//! position a cursor on a leaf, keep that one page pinned across calls, and
//! follow the right-sibling chain.

mod layout;

pub use layout::{AttrType, KEY_SENTINEL, LEAF_OCCUPANCY, NODE_OCCUPANCY};

use crate::error::{IndexError, IndexResult};
use crate::heap::{FileScan, RecordFile, Rid};
use layout::{IndexMeta, InternalNode, LeafNode, PAGE_NO_NONE, RELATION_NAME_LEN};
use log::{debug, trace};
use std::io::ErrorKind;
use std::path::Path;
use storage::{BufferPoolManager, PageGuard, PageId, PagedFile, PinStats};

const INDEX_POOL_FRAMES: usize = 128;

/// Comparison operators accepted by [`BTreeIndex::start_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Split notification threaded up from a child insertion: the new right
/// sibling's page and the separator key to insert into the parent.
#[derive(Debug, Clone, Copy)]
struct PageKeyPair {
    page_no: PageId,
    key: i32,
}

/// Cursor of an in-progress range scan. The leaf it points at stays pinned
/// until the cursor moves to a sibling or the scan ends.
struct ScanState {
    high: i32,
    high_inclusive: bool,
    current_page_num: PageId,
    leaf: LeafNode,
    next_entry: usize,
}

/// A B+ tree index over one attribute of a relation, stored in its own
/// paged file.
pub struct BTreeIndex {
    buffer_pool: BufferPoolManager,
    header_page_num: PageId,
    root_page_num: PageId,
    root_is_leaf: bool,
    attr_byte_offset: usize,
    attr_type: AttrType,
    relation_name: [u8; RELATION_NAME_LEN],
    leaf_occupancy: usize,
    node_occupancy: usize,
    scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Name of the index file for one attribute of a relation. Deterministic,
    /// so reopening against the same attribute reattaches to the same file.
    pub fn index_file_name(relation_name: &str, attr_byte_offset: usize) -> String {
        format!("{relation_name}.{attr_byte_offset}")
    }

    /// Opens the index for `relation_name`/`attr_byte_offset` under `dir`,
    /// creating and bulk-loading it from `relation` if it does not exist yet.
    pub fn open_or_create(
        dir: &Path,
        relation: &RecordFile,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> IndexResult<Self> {
        Self::open_or_create_with_occupancy(
            dir,
            relation,
            relation_name,
            attr_byte_offset,
            attr_type,
            NODE_OCCUPANCY,
            LEAF_OCCUPANCY,
        )
    }

    /// Like [`BTreeIndex::open_or_create`] with explicit node fan-outs, for
    /// exercising splits with small trees. An index must be reopened with the
    /// same occupancies it was created with.
    pub fn open_or_create_with_occupancy(
        dir: &Path,
        relation: &RecordFile,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        node_occupancy: usize,
        leaf_occupancy: usize,
    ) -> IndexResult<Self> {
        if attr_type != AttrType::Int {
            return Err(IndexError::BadIndexInfo(
                "only integer attributes are supported".to_string(),
            ));
        }
        let path = dir.join(Self::index_file_name(relation_name, attr_byte_offset));
        match PagedFile::open(&path) {
            Ok(file) => Self::reopen(
                file,
                relation_name,
                attr_byte_offset,
                attr_type,
                node_occupancy,
                leaf_occupancy,
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => Self::create(
                &path,
                relation,
                relation_name,
                attr_byte_offset,
                attr_type,
                node_occupancy,
                leaf_occupancy,
            ),
            Err(err) => Err(err.into()),
        }
    }

    fn reopen(
        file: PagedFile,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        node_occupancy: usize,
        leaf_occupancy: usize,
    ) -> IndexResult<Self> {
        let buffer_pool = BufferPoolManager::new(file, INDEX_POOL_FRAMES);
        let header_page_num = 1;
        let meta = {
            let guard = fetch_page(&buffer_pool, header_page_num)?;
            layout::read_meta(&guard)
        };
        buffer_pool.unpin_page(header_page_num, false)?;
        let meta = meta?;

        let expected_name = IndexMeta::relation_name_bytes(relation_name);
        if meta.attr_byte_offset as usize != attr_byte_offset
            || meta.attr_type != attr_type
            || meta.relation_name != expected_name
        {
            return Err(IndexError::BadIndexInfo(
                "existing index metadata does not match the requested attribute".to_string(),
            ));
        }

        Ok(Self {
            buffer_pool,
            header_page_num,
            root_page_num: meta.root_page_no,
            root_is_leaf: meta.root_is_leaf,
            attr_byte_offset,
            attr_type,
            relation_name: meta.relation_name,
            leaf_occupancy,
            node_occupancy,
            scan: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        path: &Path,
        relation: &RecordFile,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        node_occupancy: usize,
        leaf_occupancy: usize,
    ) -> IndexResult<Self> {
        let file = PagedFile::create(path)?;
        let buffer_pool = BufferPoolManager::new(file, INDEX_POOL_FRAMES);
        let header_page_num = allocate_page(&buffer_pool)?;
        let root_page_num = allocate_page(&buffer_pool)?;

        let mut index = Self {
            buffer_pool,
            header_page_num,
            root_page_num,
            root_is_leaf: true,
            attr_byte_offset,
            attr_type,
            relation_name: IndexMeta::relation_name_bytes(relation_name),
            leaf_occupancy,
            node_occupancy,
            scan: None,
        };
        index.sync_meta()?;
        index.write_leaf(root_page_num, &LeafNode::empty())?;

        // bulk load: one insertion per record of the source relation
        let mut loaded = 0u64;
        let mut scan = FileScan::new(relation)?;
        loop {
            match scan.scan_next() {
                Ok(rid) => {
                    let record = scan.get_record()?;
                    let key = key_at(&record, attr_byte_offset)?;
                    index.insert_entry(key, rid)?;
                    loaded += 1;
                }
                Err(IndexError::EndOfFile) => break,
                Err(err) => return Err(err),
            }
        }
        debug!("bulk load of {relation_name}.{attr_byte_offset} inserted {loaded} entries");
        Ok(index)
    }

    /// Whether the root is currently a leaf (a tree of height one).
    pub fn root_is_leaf(&self) -> bool {
        self.root_is_leaf
    }

    /// Height of the tree, walking the leftmost spine.
    pub fn height(&self) -> IndexResult<usize> {
        if self.root_is_leaf {
            return Ok(1);
        }
        // the root and the leaf level are both counted up front
        let mut height = 2;
        let mut page_num = self.root_page_num;
        loop {
            let node = self.read_internal(page_num)?;
            if node.level == 1 {
                return Ok(height);
            }
            height += 1;
            page_num = node.children[0];
        }
    }

    /// Pin acquisitions and releases performed on the index file so far.
    pub fn pin_stats(&self) -> IndexResult<PinStats> {
        Ok(self.buffer_pool.pin_stats()?)
    }

    // ------------------------------------------------------------------
    // insertion engine
    // ------------------------------------------------------------------

    /// Inserts one (key, rid) pair. Duplicate keys are permitted. Grows the
    /// tree height by allocating a new root when the old root splits.
    pub fn insert_entry(&mut self, key: i32, rid: Rid) -> IndexResult<()> {
        let split = if self.root_is_leaf {
            self.insert_leaf(self.root_page_num, key, rid)?
        } else {
            self.insert_node(self.root_page_num, key, rid)?
        };
        if let Some(split) = split {
            self.grow_root(split)?;
        }
        Ok(())
    }

    fn grow_root(&mut self, split: PageKeyPair) -> IndexResult<()> {
        let new_root = InternalNode {
            level: if self.root_is_leaf { 1 } else { 0 },
            keys: vec![split.key],
            children: vec![self.root_page_num, split.page_no],
        };
        let page_num = self.allocate_page()?;
        self.write_internal(page_num, &new_root)?;
        self.root_page_num = page_num;
        self.root_is_leaf = false;
        self.sync_meta()?;
        debug!("root split: new root at page {page_num}");
        Ok(())
    }

    fn insert_leaf(&self, page_num: PageId, key: i32, rid: Rid) -> IndexResult<Option<PageKeyPair>> {
        let mut leaf = self.read_leaf(page_num)?;
        // first slot not less than the key: a new duplicate lands before
        // existing equal keys within its leaf
        let index = leaf
            .keys
            .iter()
            .position(|&k| k >= key)
            .unwrap_or(leaf.keys.len());
        leaf.keys.insert(index, key);
        leaf.rids.insert(index, rid);

        if leaf.keys.len() <= self.leaf_occupancy {
            self.write_leaf(page_num, &leaf)?;
            return Ok(None);
        }

        // overfull by one: the left leaf keeps (occupancy - 1) / 2 + 1
        // entries, the new right sibling takes the rest and the old
        // right-sibling link
        let mid = (self.leaf_occupancy - 1) / 2 + 1;
        let sibling = LeafNode {
            keys: leaf.keys.split_off(mid),
            rids: leaf.rids.split_off(mid),
            right_sib_page_no: leaf.right_sib_page_no,
        };
        let sibling_page = self.allocate_page()?;
        leaf.right_sib_page_no = sibling_page;
        let separator = sibling.keys[0];
        self.write_leaf(page_num, &leaf)?;
        self.write_leaf(sibling_page, &sibling)?;
        trace!("leaf {page_num} split, sibling {sibling_page}, separator {separator}");
        Ok(Some(PageKeyPair {
            page_no: sibling_page,
            key: separator,
        }))
    }

    fn insert_node(&self, page_num: PageId, key: i32, rid: Rid) -> IndexResult<Option<PageKeyPair>> {
        let mut node = self.read_internal(page_num)?;
        // descend into the child before the first separator strictly greater
        // than the key; equal keys live in the right child
        let index = node.keys.iter().take_while(|&&sep| sep <= key).count();
        let child = node.children[index];
        let split = if node.level == 1 {
            self.insert_leaf(child, key, rid)?
        } else {
            self.insert_node(child, key, rid)?
        };
        let Some(split) = split else {
            return Ok(None);
        };

        node.keys.insert(index, split.key);
        node.children.insert(index + 1, split.page_no);
        if node.keys.len() <= self.node_occupancy {
            self.write_internal(page_num, &node)?;
            return Ok(None);
        }

        // overfull by one: the key at occupancy / 2 of the combined sequence
        // moves up; it is stored in neither half
        let mid = self.node_occupancy / 2;
        let up_key = node.keys[mid];
        let sibling = InternalNode {
            level: node.level,
            keys: node.keys.split_off(mid + 1),
            children: node.children.split_off(mid + 1),
        };
        node.keys.truncate(mid);
        let sibling_page = self.allocate_page()?;
        self.write_internal(page_num, &node)?;
        self.write_internal(sibling_page, &sibling)?;
        trace!("node {page_num} split, sibling {sibling_page}, separator {up_key}");
        Ok(Some(PageKeyPair {
            page_no: sibling_page,
            key: up_key,
        }))
    }

    // ------------------------------------------------------------------
    // scan engine
    // ------------------------------------------------------------------

    /// Positions a cursor on the first entry of `[low, high]` as restricted
    /// by the two operators. `low_op` must be `Gt` or `Gte` and `high_op`
    /// must be `Lt` or `Lte`. Fails with [`IndexError::NoSuchKeyFound`] when
    /// nothing qualifies. An already-active scan is ended first.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: RangeOp,
        high: i32,
        high_op: RangeOp,
    ) -> IndexResult<()> {
        if !matches!(low_op, RangeOp::Gt | RangeOp::Gte)
            || !matches!(high_op, RangeOp::Lt | RangeOp::Lte)
        {
            return Err(IndexError::BadOpcodes);
        }
        if low > high {
            return Err(IndexError::BadScanRange);
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        // an exclusive integer lower bound is the inclusive bound one above;
        // the sentinel key is not indexable, so saturation stays correct
        let low = if low_op == RangeOp::Gt {
            low.saturating_add(1)
        } else {
            low
        };
        let high_inclusive = high_op == RangeOp::Lte;

        // descend along the insertion engine's read path to the one leaf
        // that could hold the first qualifying entry
        let mut page_num = self.root_page_num;
        if !self.root_is_leaf {
            loop {
                let node = self.read_internal(page_num)?;
                let index = node.keys.iter().take_while(|&&sep| sep <= low).count();
                page_num = node.children[index];
                if node.level == 1 {
                    break;
                }
            }
        }

        // the cursor keeps this leaf pinned until it moves or the scan ends
        let leaf = self.read_leaf_pinned(page_num)?;
        let index = leaf
            .keys
            .iter()
            .position(|&k| k >= low)
            .unwrap_or(leaf.keys.len());
        if index >= leaf.keys.len() || past_upper_bound(leaf.keys[index], high, high_inclusive) {
            self.buffer_pool.unpin_page(page_num, false)?;
            return Err(IndexError::NoSuchKeyFound);
        }

        self.scan = Some(ScanState {
            high,
            high_inclusive,
            current_page_num: page_num,
            leaf,
            next_entry: index,
        });
        Ok(())
    }

    /// Returns the record id of the next entry in the range and advances the
    /// cursor, crossing to the right sibling leaf when the current one is
    /// exhausted. Fails with [`IndexError::ScanCompleted`] once the range is
    /// done; repeated calls keep failing the same way until
    /// [`BTreeIndex::end_scan`].
    pub fn scan_next(&mut self) -> IndexResult<Rid> {
        let occupancy = self.leaf_occupancy;
        let scan = self.scan.as_mut().ok_or(IndexError::ScanNotInitialized)?;

        if scan.next_entry >= scan.leaf.keys.len() {
            let sibling = scan.leaf.right_sib_page_no;
            if sibling == PAGE_NO_NONE {
                return Err(IndexError::ScanCompleted);
            }
            self.buffer_pool.unpin_page(scan.current_page_num, false)?;
            let leaf = {
                let guard = fetch_page(&self.buffer_pool, sibling)?;
                layout::read_leaf(&guard, occupancy)?
            };
            scan.current_page_num = sibling;
            scan.leaf = leaf;
            scan.next_entry = 0;
        }

        let Some(&key) = scan.leaf.keys.get(scan.next_entry) else {
            return Err(IndexError::ScanCompleted);
        };
        if past_upper_bound(key, scan.high, scan.high_inclusive) {
            return Err(IndexError::ScanCompleted);
        }
        let rid = scan.leaf.rids[scan.next_entry];
        scan.next_entry += 1;
        Ok(rid)
    }

    /// Ends the active scan, releasing the pinned leaf page.
    pub fn end_scan(&mut self) -> IndexResult<()> {
        let scan = self.scan.take().ok_or(IndexError::ScanNotInitialized)?;
        self.buffer_pool.unpin_page(scan.current_page_num, false)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // page brackets
    // ------------------------------------------------------------------

    fn allocate_page(&self) -> IndexResult<PageId> {
        allocate_page(&self.buffer_pool)
    }

    fn read_leaf(&self, page_num: PageId) -> IndexResult<LeafNode> {
        let leaf = {
            let guard = fetch_page(&self.buffer_pool, page_num)?;
            layout::read_leaf(&guard, self.leaf_occupancy)
        };
        self.buffer_pool.unpin_page(page_num, false)?;
        leaf
    }

    /// Reads a leaf and leaves its page pinned for the scan cursor.
    fn read_leaf_pinned(&self, page_num: PageId) -> IndexResult<LeafNode> {
        let guard = fetch_page(&self.buffer_pool, page_num)?;
        layout::read_leaf(&guard, self.leaf_occupancy)
    }

    fn write_leaf(&self, page_num: PageId, leaf: &LeafNode) -> IndexResult<()> {
        let written = {
            let mut guard = fetch_page(&self.buffer_pool, page_num)?;
            layout::write_leaf(&mut guard, leaf, self.leaf_occupancy)
        };
        self.buffer_pool.unpin_page(page_num, true)?;
        written
    }

    fn read_internal(&self, page_num: PageId) -> IndexResult<InternalNode> {
        let node = {
            let guard = fetch_page(&self.buffer_pool, page_num)?;
            layout::read_internal(&guard, self.node_occupancy)
        };
        self.buffer_pool.unpin_page(page_num, false)?;
        node
    }

    fn write_internal(&self, page_num: PageId, node: &InternalNode) -> IndexResult<()> {
        let written = {
            let mut guard = fetch_page(&self.buffer_pool, page_num)?;
            layout::write_internal(&mut guard, node, self.node_occupancy)
        };
        self.buffer_pool.unpin_page(page_num, true)?;
        written
    }

    fn sync_meta(&self) -> IndexResult<()> {
        let meta = IndexMeta {
            attr_byte_offset: self.attr_byte_offset as u32,
            attr_type: self.attr_type,
            root_page_no: self.root_page_num,
            root_is_leaf: self.root_is_leaf,
            relation_name: self.relation_name,
        };
        let written = {
            let mut guard = fetch_page(&self.buffer_pool, self.header_page_num)?;
            layout::write_meta(&mut guard, &meta)
        };
        self.buffer_pool.unpin_page(self.header_page_num, true)?;
        written
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let _ = self.buffer_pool.flush_all_pages();
    }
}

fn past_upper_bound(key: i32, high: i32, high_inclusive: bool) -> bool {
    if high_inclusive { key > high } else { key >= high }
}

fn key_at(record: &[u8], attr_byte_offset: usize) -> IndexResult<i32> {
    let end = attr_byte_offset
        .checked_add(4)
        .filter(|&end| end <= record.len())
        .ok_or_else(|| {
            IndexError::BadIndexInfo(format!(
                "record of {} bytes has no key at offset {attr_byte_offset}",
                record.len()
            ))
        })?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&record[attr_byte_offset..end]);
    Ok(i32::from_le_bytes(bytes))
}

fn allocate_page(buffer_pool: &BufferPoolManager) -> IndexResult<PageId> {
    let page_id = buffer_pool.new_page()?.ok_or(IndexError::NoFreeFrames)?;
    buffer_pool.unpin_page(page_id, false)?;
    Ok(page_id)
}

fn fetch_page<'a>(
    buffer_pool: &'a BufferPoolManager,
    page_id: PageId,
) -> IndexResult<PageGuard<'a>> {
    buffer_pool
        .fetch_page(page_id)?
        .ok_or(IndexError::NoFreeFrames)
}
