/// B+Tree node layout on slotted pages.
///
/// Each page is either a Leaf, an Index node, or the tree header.
/// The node tag is stored in the first byte of a special "node header" cell
/// (cell 0); entries live in cells 1.. and are kept in ascending key order.
///
/// Node header cell (cell 0):
///   leaf:  [tag: u8] [prev_leaf: u64] [next_leaf: u64]
///   index: [tag: u8] [leftmost_child: u64]
///
/// Leaf entry cell:
///   [key_len: u16] [key bytes] [record id: 10 bytes]
///
/// Index entry cell:
///   [child: u64] [key_len: u16] [key bytes]
///
/// An index node holds an implicit leftmost child (in the header cell) plus
/// N entries, describing N+1 children: the subtree under `child` of entry i
/// holds keys in [key_i, key_{i+1}), the leftmost child everything below
/// key_0. Duplicate keys are permitted in leaves; a new entry with an equal
/// key is placed after the existing run.
use crate::btree::key::compare_keys;
use crate::error::Result;
use crate::storage::page::{Page, PageId};
use crate::types::{RecordId, RECORD_ID_SIZE};

const NODE_TYPE_LEAF: u8 = 1;
const NODE_TYPE_INDEX: u8 = 2;
pub(crate) const NODE_TYPE_HEADER: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Index,
    Header,
}

/// Initialize a page as a leaf node with the given sibling links.
/// Panics only if the page has insufficient space for the 17-byte header,
/// which cannot happen with the current PAGE_SIZE (4096).
pub fn init_leaf(page: &mut Page, prev: PageId, next: PageId) {
    let mut header = [0u8; 17];
    header[0] = NODE_TYPE_LEAF;
    header[1..9].copy_from_slice(&prev.to_le_bytes());
    header[9..17].copy_from_slice(&next.to_le_bytes());
    page.insert_cell(&header)
        .expect("BUG: page too small for leaf header");
}

/// Initialize a page as an index node with a leftmost child.
pub fn init_index(page: &mut Page, leftmost: PageId) {
    let mut header = [0u8; 9];
    header[0] = NODE_TYPE_INDEX;
    header[1..9].copy_from_slice(&leftmost.to_le_bytes());
    page.insert_cell(&header)
        .expect("BUG: page too small for index header");
}

/// Get the node tag from a page.
pub fn node_type(page: &Page) -> Option<NodeType> {
    let header = page.cell(0)?;
    match header.first()? {
        &NODE_TYPE_LEAF if header.len() >= 17 => Some(NodeType::Leaf),
        &NODE_TYPE_INDEX if header.len() >= 9 => Some(NodeType::Index),
        &NODE_TYPE_HEADER => Some(NodeType::Header),
        _ => None,
    }
}

/// Number of key entries (excluding the header cell at index 0).
pub fn entry_count(page: &Page) -> u16 {
    let count = page.cell_count();
    if count == 0 {
        0
    } else {
        count - 1
    }
}

// --- Leaf node operations ---

pub fn prev_leaf(page: &Page) -> Option<PageId> {
    let header = page.cell(0)?;
    if header.len() < 17 || header[0] != NODE_TYPE_LEAF {
        return None;
    }
    Some(u64::from_le_bytes(header[1..9].try_into().unwrap()))
}

pub fn next_leaf(page: &Page) -> Option<PageId> {
    let header = page.cell(0)?;
    if header.len() < 17 || header[0] != NODE_TYPE_LEAF {
        return None;
    }
    Some(u64::from_le_bytes(header[9..17].try_into().unwrap()))
}

/// Repoint the previous-sibling link in place.
pub fn set_prev_leaf(page: &mut Page, prev: PageId) {
    if let Some((offset, _len)) = page.cell_offset_and_len(0) {
        page.data[offset + 1..offset + 9].copy_from_slice(&prev.to_le_bytes());
    }
}

/// Repoint the next-sibling link in place.
pub fn set_next_leaf(page: &mut Page, next: PageId) {
    if let Some((offset, _len)) = page.cell_offset_and_len(0) {
        page.data[offset + 9..offset + 17].copy_from_slice(&next.to_le_bytes());
    }
}

/// Encode a leaf cell: [key_len: u16][key][record id]
pub fn encode_leaf_cell(key: &[u8], rid: RecordId) -> Vec<u8> {
    let key_len = key.len() as u16;
    let mut buf = Vec::with_capacity(2 + key.len() + RECORD_ID_SIZE);
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(key);
    rid.encode_into(&mut buf);
    buf
}

/// Decode a leaf cell into (key, record id).
pub fn decode_leaf_cell(cell: &[u8]) -> (&[u8], RecordId) {
    let key_len = u16::from_le_bytes(cell[0..2].try_into().unwrap()) as usize;
    let key = &cell[2..2 + key_len];
    let rid = RecordId::decode(&cell[2 + key_len..2 + key_len + RECORD_ID_SIZE]);
    (key, rid)
}

/// Get key and record id of the i-th entry in a leaf (entries start at cell 1).
pub fn leaf_entry(page: &Page, entry_idx: u16) -> Option<(&[u8], RecordId)> {
    let cell = page.cell(entry_idx + 1)?;
    Some(decode_leaf_cell(cell))
}

/// Get the key of the i-th entry in a leaf node.
pub fn leaf_key(page: &Page, entry_idx: u16) -> Option<&[u8]> {
    let cell = page.cell(entry_idx + 1)?;
    let (key, _) = decode_leaf_cell(cell);
    Some(key)
}

/// Insert (key, rid) at its sorted position. An entry whose key equals
/// existing ones lands after the equal run. Fails with PageOverflow if the
/// page is full, leaving it unchanged.
pub fn leaf_insert(page: &mut Page, key: &[u8], rid: RecordId) -> Result<()> {
    let n = entry_count(page);
    let mut pos = n;
    for i in 0..n {
        if let Some(k) = leaf_key(page, i) {
            if compare_keys(k, key) == std::cmp::Ordering::Greater {
                pos = i;
                break;
            }
        }
    }
    let cell = encode_leaf_cell(key, rid);
    page.insert_cell_at(pos + 1, &cell)
}

/// Remove the i-th entry.
pub fn leaf_remove(page: &mut Page, entry_idx: u16) {
    page.remove_cell(entry_idx + 1);
}

// --- Index node operations ---

pub fn leftmost_child(page: &Page) -> Option<PageId> {
    let header = page.cell(0)?;
    if header.len() < 9 || header[0] != NODE_TYPE_INDEX {
        return None;
    }
    Some(u64::from_le_bytes(header[1..9].try_into().unwrap()))
}

/// Encode an index cell: [child: u64][key_len: u16][key]
pub fn encode_index_cell(child: PageId, key: &[u8]) -> Vec<u8> {
    let key_len = key.len() as u16;
    let mut buf = Vec::with_capacity(8 + 2 + key.len());
    buf.extend_from_slice(&child.to_le_bytes());
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(key);
    buf
}

/// Decode an index cell into (child, key).
pub fn decode_index_cell(cell: &[u8]) -> (PageId, &[u8]) {
    let child = u64::from_le_bytes(cell[0..8].try_into().unwrap());
    let key_len = u16::from_le_bytes(cell[8..10].try_into().unwrap()) as usize;
    let key = &cell[10..10 + key_len];
    (child, key)
}

/// Get (child, key) of the i-th entry in an index node.
pub fn index_entry(page: &Page, entry_idx: u16) -> Option<(PageId, &[u8])> {
    let cell = page.cell(entry_idx + 1)?;
    Some(decode_index_cell(cell))
}

/// Get the key of the i-th entry in an index node.
pub fn index_key(page: &Page, entry_idx: u16) -> Option<&[u8]> {
    let cell = page.cell(entry_idx + 1)?;
    let (_, key) = decode_index_cell(cell);
    Some(key)
}

/// Get the child of the i-th entry in an index node.
pub fn index_child(page: &Page, entry_idx: u16) -> Option<PageId> {
    let cell = page.cell(entry_idx + 1)?;
    let (child, _) = decode_index_cell(cell);
    Some(child)
}

/// Insert (key, child) at its sorted position; equal keys land after the
/// existing run. Fails with PageOverflow if the page is full.
pub fn index_insert(page: &mut Page, key: &[u8], child: PageId) -> Result<()> {
    let n = entry_count(page);
    let mut pos = n;
    for i in 0..n {
        if let Some(k) = index_key(page, i) {
            if compare_keys(k, key) == std::cmp::Ordering::Greater {
                pos = i;
                break;
            }
        }
    }
    let cell = encode_index_cell(child, key);
    page.insert_cell_at(pos + 1, &cell)
}

/// Remove the leftmost entry matching both key and child. Returns whether a
/// match was found.
pub fn index_remove_entry(page: &mut Page, key: &[u8], child: PageId) -> bool {
    let n = entry_count(page);
    for i in 0..n {
        if let Some((c, k)) = index_entry(page, i) {
            if c == child && compare_keys(k, key) == std::cmp::Ordering::Equal {
                page.remove_cell(i + 1);
                return true;
            }
        }
    }
    false
}

/// Find the child to follow for a given key: the child of the largest entry
/// key that is <= the search key, or the leftmost child when the key sorts
/// below every entry.
pub fn find_child(page: &Page, key: &[u8]) -> Option<PageId> {
    let n = entry_count(page);
    let mut child = leftmost_child(page)?;
    for i in 0..n {
        let entry_key = index_key(page, i)?;
        if compare_keys(entry_key, key) == std::cmp::Ordering::Greater {
            break;
        }
        child = index_child(page, i)?;
    }
    Some(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::INVALID_PAGE_ID;

    fn rid(n: u64) -> RecordId {
        RecordId::new(n, n as u16)
    }

    #[test]
    fn test_leaf_node() {
        let mut page = Page::new(1);
        init_leaf(&mut page, INVALID_PAGE_ID, INVALID_PAGE_ID);

        assert_eq!(node_type(&page), Some(NodeType::Leaf));
        assert_eq!(entry_count(&page), 0);
        assert_eq!(prev_leaf(&page), Some(INVALID_PAGE_ID));
        assert_eq!(next_leaf(&page), Some(INVALID_PAGE_ID));

        leaf_insert(&mut page, b"key1", rid(1)).unwrap();
        assert_eq!(entry_count(&page), 1);
        assert_eq!(leaf_key(&page, 0), Some(b"key1".as_slice()));
        assert_eq!(leaf_entry(&page, 0).unwrap().1, rid(1));
    }

    #[test]
    fn test_leaf_insert_keeps_sorted_order() {
        let mut page = Page::new(1);
        init_leaf(&mut page, INVALID_PAGE_ID, INVALID_PAGE_ID);

        leaf_insert(&mut page, b"m", rid(1)).unwrap();
        leaf_insert(&mut page, b"a", rid(2)).unwrap();
        leaf_insert(&mut page, b"z", rid(3)).unwrap();
        leaf_insert(&mut page, b"f", rid(4)).unwrap();

        let keys: Vec<&[u8]> = (0..4).map(|i| leaf_key(&page, i).unwrap()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"f", b"m", b"z"]);
    }

    #[test]
    fn test_leaf_duplicates_preserve_insertion_order() {
        let mut page = Page::new(1);
        init_leaf(&mut page, INVALID_PAGE_ID, INVALID_PAGE_ID);

        leaf_insert(&mut page, b"dup", rid(1)).unwrap();
        leaf_insert(&mut page, b"dup", rid(2)).unwrap();
        leaf_insert(&mut page, b"dup", rid(3)).unwrap();

        let rids: Vec<RecordId> = (0..3).map(|i| leaf_entry(&page, i).unwrap().1).collect();
        assert_eq!(rids, vec![rid(1), rid(2), rid(3)]);
    }

    #[test]
    fn test_leaf_sibling_links() {
        let mut page = Page::new(5);
        init_leaf(&mut page, 4, 6);
        assert_eq!(prev_leaf(&page), Some(4));
        assert_eq!(next_leaf(&page), Some(6));

        set_prev_leaf(&mut page, 14);
        set_next_leaf(&mut page, 16);
        assert_eq!(prev_leaf(&page), Some(14));
        assert_eq!(next_leaf(&page), Some(16));
    }

    #[test]
    fn test_leaf_remove() {
        let mut page = Page::new(1);
        init_leaf(&mut page, INVALID_PAGE_ID, INVALID_PAGE_ID);
        leaf_insert(&mut page, b"a", rid(1)).unwrap();
        leaf_insert(&mut page, b"b", rid(2)).unwrap();
        leaf_insert(&mut page, b"c", rid(3)).unwrap();

        leaf_remove(&mut page, 1);
        assert_eq!(entry_count(&page), 2);
        assert_eq!(leaf_key(&page, 0), Some(b"a".as_slice()));
        assert_eq!(leaf_key(&page, 1), Some(b"c".as_slice()));
    }

    #[test]
    fn test_index_node() {
        let mut page = Page::new(2);
        init_index(&mut page, 100);

        assert_eq!(node_type(&page), Some(NodeType::Index));
        assert_eq!(leftmost_child(&page), Some(100));

        index_insert(&mut page, b"midkey", 10).unwrap();
        assert_eq!(entry_count(&page), 1);
        assert_eq!(index_key(&page, 0), Some(b"midkey".as_slice()));
        assert_eq!(index_child(&page, 0), Some(10));
    }

    #[test]
    fn test_find_child_tie_rule() {
        let mut page = Page::new(3);
        init_index(&mut page, 99); // leftmost child

        index_insert(&mut page, b"m", 10).unwrap();
        index_insert(&mut page, b"t", 20).unwrap();

        // key < "m" -> leftmost child
        assert_eq!(find_child(&page, b"a"), Some(99));
        // "m" <= key < "t" -> child of entry "m"
        assert_eq!(find_child(&page, b"m"), Some(10));
        assert_eq!(find_child(&page, b"s"), Some(10));
        // key >= "t" -> child of entry "t"
        assert_eq!(find_child(&page, b"t"), Some(20));
        assert_eq!(find_child(&page, b"z"), Some(20));
    }

    #[test]
    fn test_index_remove_entry_leftmost_match() {
        let mut page = Page::new(4);
        init_index(&mut page, 99);
        index_insert(&mut page, b"k", 7).unwrap();
        index_insert(&mut page, b"k", 7).unwrap();
        index_insert(&mut page, b"k", 8).unwrap();

        assert!(index_remove_entry(&mut page, b"k", 7));
        assert_eq!(entry_count(&page), 2);
        // One (k, 7) pair must survive
        assert_eq!(index_child(&page, 0), Some(7));

        assert!(!index_remove_entry(&mut page, b"nope", 7));
    }
}
