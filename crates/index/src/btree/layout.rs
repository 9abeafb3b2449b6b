//! On-disk layouts for the three index page kinds.
//!
//! Pages carry no type tag: the metadata page records whether the root is a
//! leaf, and every internal node's level marker says whether its children are
//! leaves. Key arrays are padded with the reserved sentinel key, so the live
//! entries of a node are the contiguous prefix before the first sentinel.

use crate::error::{IndexError, IndexResult};
use crate::heap::Rid;
use storage::{PAGE_SIZE, Page, PageId};

/// Reserved key marking an unused slot. Not an indexable value.
pub const KEY_SENTINEL: i32 = i32::MAX;
/// Reserved page number meaning "no sibling" / "no child here".
pub const PAGE_NO_NONE: PageId = PageId::MAX;

pub const KEY_SIZE: usize = 4;
pub const PAGE_NO_SIZE: usize = 8;
pub const RID_SIZE: usize = 12;
const LEVEL_SIZE: usize = 4;
pub const RELATION_NAME_LEN: usize = 20;

/// Keys a leaf can hold: key array + parallel rid array + right sibling.
pub const LEAF_OCCUPANCY: usize = (PAGE_SIZE - PAGE_NO_SIZE) / (KEY_SIZE + RID_SIZE);
/// Separator keys an internal node can hold; it routes to one more child.
pub const NODE_OCCUPANCY: usize = (PAGE_SIZE - LEVEL_SIZE - PAGE_NO_SIZE) / (KEY_SIZE + PAGE_NO_SIZE);

// metadata page field offsets
const META_ATTR_OFFSET: usize = 0;
const META_ATTR_TYPE_OFFSET: usize = 4;
const META_ROOT_PAGE_OFFSET: usize = 5;
const META_ROOT_IS_LEAF_OFFSET: usize = 13;
const META_RELATION_NAME_OFFSET: usize = 14;

/// Type of the indexed attribute, as recorded in the metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Double,
    String,
}

impl AttrType {
    fn as_byte(self) -> u8 {
        match self {
            AttrType::Int => 1,
            AttrType::Double => 2,
            AttrType::String => 3,
        }
    }

    fn from_byte(value: u8) -> IndexResult<Self> {
        match value {
            1 => Ok(AttrType::Int),
            2 => Ok(AttrType::Double),
            3 => Ok(AttrType::String),
            other => Err(IndexError::BadIndexInfo(format!(
                "unknown attribute type {other}"
            ))),
        }
    }
}

/// Contents of the index metadata page.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub attr_byte_offset: u32,
    pub attr_type: AttrType,
    pub root_page_no: PageId,
    pub root_is_leaf: bool,
    pub relation_name: [u8; RELATION_NAME_LEN],
}

impl IndexMeta {
    /// Fixed-capacity relation name field, truncated from `name`.
    pub fn relation_name_bytes(name: &str) -> [u8; RELATION_NAME_LEN] {
        let mut buf = [0u8; RELATION_NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(RELATION_NAME_LEN);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }
}

/// A leaf node holding its live (key, rid) pairs in ascending key order.
#[derive(Debug, Clone)]
pub struct LeafNode {
    pub keys: Vec<i32>,
    pub rids: Vec<Rid>,
    pub right_sib_page_no: PageId,
}

impl LeafNode {
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            rids: Vec::new(),
            right_sib_page_no: PAGE_NO_NONE,
        }
    }
}

/// An internal node: live separator keys and one more child than keys.
/// `level == 1` means the children are leaves.
#[derive(Debug, Clone)]
pub struct InternalNode {
    pub level: u32,
    pub keys: Vec<i32>,
    pub children: Vec<PageId>,
}

pub fn write_meta(page: &mut Page, meta: &IndexMeta) -> IndexResult<()> {
    write_u32(page, META_ATTR_OFFSET, meta.attr_byte_offset)?;
    write_u8(page, META_ATTR_TYPE_OFFSET, meta.attr_type.as_byte())?;
    write_u64(page, META_ROOT_PAGE_OFFSET, meta.root_page_no)?;
    write_u8(
        page,
        META_ROOT_IS_LEAF_OFFSET,
        if meta.root_is_leaf { 1 } else { 0 },
    )?;
    write_bytes(page, META_RELATION_NAME_OFFSET, &meta.relation_name)
}

pub fn read_meta(page: &Page) -> IndexResult<IndexMeta> {
    let attr_byte_offset = read_u32(page, META_ATTR_OFFSET)?;
    let attr_type = AttrType::from_byte(read_u8(page, META_ATTR_TYPE_OFFSET)?)?;
    let root_page_no = read_u64(page, META_ROOT_PAGE_OFFSET)?;
    let root_is_leaf = read_u8(page, META_ROOT_IS_LEAF_OFFSET)? != 0;
    let name_bytes = page
        .read_bytes(META_RELATION_NAME_OFFSET, RELATION_NAME_LEN)
        .ok_or(IndexError::PageBounds)?;
    let mut relation_name = [0u8; RELATION_NAME_LEN];
    relation_name.copy_from_slice(name_bytes);
    Ok(IndexMeta {
        attr_byte_offset,
        attr_type,
        root_page_no,
        root_is_leaf,
        relation_name,
    })
}

pub fn write_leaf(page: &mut Page, leaf: &LeafNode, occupancy: usize) -> IndexResult<()> {
    debug_assert!(leaf.keys.len() <= occupancy);
    debug_assert_eq!(leaf.keys.len(), leaf.rids.len());
    let rids_offset = occupancy * KEY_SIZE;
    for slot in 0..occupancy {
        let key = leaf.keys.get(slot).copied().unwrap_or(KEY_SENTINEL);
        write_i32(page, slot * KEY_SIZE, key)?;
        let rid = leaf.rids.get(slot).copied().unwrap_or(Rid {
            page_id: 0,
            slot_id: 0,
        });
        write_rid(page, rids_offset + slot * RID_SIZE, rid)?;
    }
    write_u64(
        page,
        occupancy * (KEY_SIZE + RID_SIZE),
        leaf.right_sib_page_no,
    )
}

pub fn read_leaf(page: &Page, occupancy: usize) -> IndexResult<LeafNode> {
    let rids_offset = occupancy * KEY_SIZE;
    let mut keys = Vec::new();
    let mut rids = Vec::new();
    for slot in 0..occupancy {
        let key = read_i32(page, slot * KEY_SIZE)?;
        if key == KEY_SENTINEL {
            break;
        }
        keys.push(key);
        rids.push(read_rid(page, rids_offset + slot * RID_SIZE)?);
    }
    let right_sib_page_no = read_u64(page, occupancy * (KEY_SIZE + RID_SIZE))?;
    Ok(LeafNode {
        keys,
        rids,
        right_sib_page_no,
    })
}

pub fn write_internal(page: &mut Page, node: &InternalNode, occupancy: usize) -> IndexResult<()> {
    debug_assert!(node.keys.len() <= occupancy);
    debug_assert_eq!(node.children.len(), node.keys.len() + 1);
    let children_offset = occupancy * KEY_SIZE;
    for slot in 0..occupancy {
        let key = node.keys.get(slot).copied().unwrap_or(KEY_SENTINEL);
        write_i32(page, slot * KEY_SIZE, key)?;
    }
    for slot in 0..=occupancy {
        let child = node.children.get(slot).copied().unwrap_or(PAGE_NO_NONE);
        write_u64(page, children_offset + slot * PAGE_NO_SIZE, child)?;
    }
    write_u32(
        page,
        children_offset + (occupancy + 1) * PAGE_NO_SIZE,
        node.level,
    )
}

pub fn read_internal(page: &Page, occupancy: usize) -> IndexResult<InternalNode> {
    let children_offset = occupancy * KEY_SIZE;
    let mut keys = Vec::new();
    for slot in 0..occupancy {
        let key = read_i32(page, slot * KEY_SIZE)?;
        if key == KEY_SENTINEL {
            break;
        }
        keys.push(key);
    }
    let mut children = Vec::with_capacity(keys.len() + 1);
    for slot in 0..=keys.len() {
        children.push(read_u64(page, children_offset + slot * PAGE_NO_SIZE)?);
    }
    let level = read_u32(page, children_offset + (occupancy + 1) * PAGE_NO_SIZE)?;
    Ok(InternalNode {
        level,
        keys,
        children,
    })
}

fn read_rid(page: &Page, offset: usize) -> IndexResult<Rid> {
    let page_id = read_u64(page, offset)?;
    let slot_id = read_u32(page, offset + PAGE_NO_SIZE)?;
    Ok(Rid { page_id, slot_id })
}

fn write_rid(page: &mut Page, offset: usize, rid: Rid) -> IndexResult<()> {
    write_u64(page, offset, rid.page_id)?;
    write_u32(page, offset + PAGE_NO_SIZE, rid.slot_id)
}

fn read_u8(page: &Page, offset: usize) -> IndexResult<u8> {
    let bytes = page.read_bytes(offset, 1).ok_or(IndexError::PageBounds)?;
    Ok(bytes[0])
}

fn write_u8(page: &mut Page, offset: usize, value: u8) -> IndexResult<()> {
    write_bytes(page, offset, &[value])
}

fn read_i32(page: &Page, offset: usize) -> IndexResult<i32> {
    let bytes = page.read_bytes(offset, 4).ok_or(IndexError::PageBounds)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_i32(page: &mut Page, offset: usize, value: i32) -> IndexResult<()> {
    write_bytes(page, offset, &value.to_le_bytes())
}

fn read_u32(page: &Page, offset: usize) -> IndexResult<u32> {
    let bytes = page.read_bytes(offset, 4).ok_or(IndexError::PageBounds)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_u32(page: &mut Page, offset: usize, value: u32) -> IndexResult<()> {
    write_bytes(page, offset, &value.to_le_bytes())
}

fn read_u64(page: &Page, offset: usize) -> IndexResult<u64> {
    let bytes = page.read_bytes(offset, 8).ok_or(IndexError::PageBounds)?;
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(array))
}

fn write_u64(page: &mut Page, offset: usize, value: u64) -> IndexResult<()> {
    write_bytes(page, offset, &value.to_le_bytes())
}

fn write_bytes(page: &mut Page, offset: usize, bytes: &[u8]) -> IndexResult<()> {
    if page.write_bytes(offset, bytes) {
        Ok(())
    } else {
        Err(IndexError::PageBounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_occupancies_fit_a_page() {
        assert_eq!(LEAF_OCCUPANCY, 255);
        assert_eq!(NODE_OCCUPANCY, 340);
        assert!(LEAF_OCCUPANCY * (KEY_SIZE + RID_SIZE) + PAGE_NO_SIZE <= PAGE_SIZE);
        assert!(
            NODE_OCCUPANCY * KEY_SIZE + (NODE_OCCUPANCY + 1) * PAGE_NO_SIZE + LEVEL_SIZE
                <= PAGE_SIZE
        );
    }

    #[test]
    fn leaf_bytes_land_at_fixed_positions() {
        let occupancy = 4;
        let leaf = LeafNode {
            keys: vec![10, 20],
            rids: vec![
                Rid {
                    page_id: 3,
                    slot_id: 7,
                },
                Rid {
                    page_id: 4,
                    slot_id: 8,
                },
            ],
            right_sib_page_no: 99,
        };
        let mut page = Page::new();
        write_leaf(&mut page, &leaf, occupancy).unwrap();

        // keys at the front, sentinel padding after the live prefix
        assert_eq!(&page.data()[0..4], &10i32.to_le_bytes());
        assert_eq!(&page.data()[4..8], &20i32.to_le_bytes());
        assert_eq!(&page.data()[8..12], &KEY_SENTINEL.to_le_bytes());
        assert_eq!(&page.data()[12..16], &KEY_SENTINEL.to_le_bytes());
        // parallel rid array after the full key array
        assert_eq!(&page.data()[16..24], &3u64.to_le_bytes());
        assert_eq!(&page.data()[24..28], &7u32.to_le_bytes());
        // right sibling after the full rid array
        assert_eq!(&page.data()[64..72], &99u64.to_le_bytes());

        let read = read_leaf(&page, occupancy).unwrap();
        assert_eq!(read.keys, leaf.keys);
        assert_eq!(read.rids, leaf.rids);
        assert_eq!(read.right_sib_page_no, 99);
    }

    #[test]
    fn internal_bytes_land_at_fixed_positions() {
        let occupancy = 4;
        let node = InternalNode {
            level: 1,
            keys: vec![50],
            children: vec![2, 3],
        };
        let mut page = Page::new();
        write_internal(&mut page, &node, occupancy).unwrap();

        assert_eq!(&page.data()[0..4], &50i32.to_le_bytes());
        assert_eq!(&page.data()[4..8], &KEY_SENTINEL.to_le_bytes());
        // children after the full key array, one more slot than keys
        assert_eq!(&page.data()[16..24], &2u64.to_le_bytes());
        assert_eq!(&page.data()[24..32], &3u64.to_le_bytes());
        assert_eq!(&page.data()[32..40], &PAGE_NO_NONE.to_le_bytes());
        // level after the full child array
        assert_eq!(&page.data()[56..60], &1u32.to_le_bytes());

        let read = read_internal(&page, occupancy).unwrap();
        assert_eq!(read.level, 1);
        assert_eq!(read.keys, node.keys);
        assert_eq!(read.children, node.children);
    }

    #[test]
    fn meta_survives_a_rewrite() {
        let mut page = Page::new();
        let meta = IndexMeta {
            attr_byte_offset: 12,
            attr_type: AttrType::Int,
            root_page_no: 2,
            root_is_leaf: true,
            relation_name: IndexMeta::relation_name_bytes("relA"),
        };
        write_meta(&mut page, &meta).unwrap();
        let read = read_meta(&page).unwrap();
        assert_eq!(read.attr_byte_offset, 12);
        assert_eq!(read.attr_type, AttrType::Int);
        assert_eq!(read.root_page_no, 2);
        assert!(read.root_is_leaf);
        assert_eq!(read.relation_name, meta.relation_name);

        // a very long relation name is truncated into the fixed field
        let long = "a_relation_name_well_past_the_limit";
        let truncated = IndexMeta::relation_name_bytes(long);
        assert_eq!(&truncated[..], &long.as_bytes()[..RELATION_NAME_LEN]);
    }

    #[test]
    fn unknown_attr_type_byte_is_rejected() {
        let mut page = Page::new();
        let meta = IndexMeta {
            attr_byte_offset: 0,
            attr_type: AttrType::Int,
            root_page_no: 2,
            root_is_leaf: false,
            relation_name: [0u8; RELATION_NAME_LEN],
        };
        write_meta(&mut page, &meta).unwrap();
        page.write_bytes(4, &[9]);
        assert!(matches!(
            read_meta(&page),
            Err(IndexError::BadIndexInfo(_))
        ));
    }
}
