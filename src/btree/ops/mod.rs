/// B+Tree engine: tree lifecycle, insert with split propagation, naive
/// delete, duplicate-aware run-start search, and scan construction.
///
/// All operations borrow the page store per call and follow a scoped pin
/// discipline: every pinned page is released on every exit path, a parent is
/// unpinned before recursing into a child and re-pinned only when the child
/// reports a split. The one pin that outlives an operation is the leaf
/// handed to a scan session.
use crate::btree::header::{DeleteMode, IndexHeader};
use crate::btree::key::{compare_keys, Key, KeyType};
use crate::btree::node::{self, NodeType};
use crate::btree::scan::BTreeScan;
use crate::btree::trace::TraceObserver;
use crate::error::{ArborError, Result};
use crate::storage::page::{Page, PageId, INVALID_PAGE_ID};
use crate::storage::page_store::PageStore;
use crate::types::RecordId;

/// Maximum descent depth to prevent unbounded recursion on corrupted trees.
/// A 4096-byte page tree with 2 entries per index node reaches depth 64 at
/// 2^64 pages, far beyond practical limits.
const MAX_TREE_DEPTH: usize = 64;

/// Entry handed upward after a split: the separator key and the new page to
/// its right. A promotion reaching the root grows the tree by one level.
struct Promotion {
    key: Vec<u8>,
    right: PageId,
}

/// Open header state. The header page stays pinned while this exists; the
/// cached copy is authoritative because the tree has a single mutator.
struct HeaderHandle {
    page_id: PageId,
    info: IndexHeader,
}

/// A named B+Tree index over a page store.
pub struct BTreeFile {
    name: String,
    header: Option<HeaderHandle>,
    observer: Option<Box<dyn TraceObserver>>,
}

impl std::fmt::Debug for BTreeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeFile")
            .field("name", &self.name)
            .field("header", &self.header.as_ref().map(|h| &h.info))
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

impl BTreeFile {
    /// Open an existing index by name.
    pub fn open(store: &mut impl PageStore, name: &str) -> Result<Self> {
        let Some(page_id) = store.resolve_file(name)? else {
            return Err(ArborError::NotFound(name.to_string()));
        };
        Self::open_at(store, name, page_id)
    }

    /// Open the index bound to `name`, creating it first if absent. The key
    /// configuration of an existing index is never altered by this call.
    pub fn create_or_open(
        store: &mut impl PageStore,
        name: &str,
        key_type: KeyType,
        max_key_size: u16,
        delete_mode: DeleteMode,
    ) -> Result<Self> {
        if let Some(page_id) = store.resolve_file(name)? {
            return Self::open_at(store, name, page_id);
        }

        let mut page = store.allocate()?;
        let page_id = page.page_id();
        let info = IndexHeader {
            root: INVALID_PAGE_ID,
            key_type,
            max_key_size,
            delete_mode,
        };
        info.write_to(&mut page)?;
        store.unpin(&page, true)?;

        if let Err(e) = store.bind_file(name, page_id) {
            store.free(page_id)?;
            return Err(e);
        }
        tracing::debug!("created index '{}' with header page {}", name, page_id);

        // Hold the header pinned for the lifetime of the handle.
        let _ = store.pin(page_id)?;
        Ok(BTreeFile {
            name: name.to_string(),
            header: Some(HeaderHandle { page_id, info }),
            observer: None,
        })
    }

    fn open_at(store: &mut impl PageStore, name: &str, page_id: PageId) -> Result<Self> {
        let page = store.pin(page_id)?;
        let info = match IndexHeader::read_from(&page) {
            Ok(info) => info,
            Err(e) => {
                store.unpin(&page, false)?;
                return Err(e);
            }
        };
        // The pin taken above is kept until close or destroy.
        Ok(BTreeFile {
            name: name.to_string(),
            header: Some(HeaderHandle { page_id, info }),
            observer: None,
        })
    }

    /// Write back and release the header page. Idempotent.
    pub fn close(&mut self, store: &mut impl PageStore) -> Result<()> {
        if let Some(h) = self.header.take() {
            let mut page = Page::new(h.page_id);
            h.info.write_to(&mut page)?;
            store.unpin(&page, true)?;
        }
        Ok(())
    }

    /// Free every node reachable from the root, then the header page, and
    /// remove the name binding. Safe on an empty tree; no-op when closed.
    pub fn destroy(&mut self, store: &mut impl PageStore) -> Result<()> {
        let Some(h) = self.header.take() else {
            return Ok(());
        };

        if h.info.root != INVALID_PAGE_ID {
            self.destroy_subtree(store, h.info.root, 0)?;
        }

        // Release the open pin, then free the header page itself.
        let page = Page::new(h.page_id);
        store.unpin(&page, false)?;
        store.free(h.page_id)?;
        store.unbind_file(&self.name)?;
        tracing::debug!("destroyed index '{}'", self.name);
        Ok(())
    }

    fn destroy_subtree(
        &mut self,
        store: &mut impl PageStore,
        page_id: PageId,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(ArborError::Corruption(
                "tree depth exceeds maximum (possible cycle)".into(),
            ));
        }
        let page = store.pin(page_id)?;
        match node::node_type(&page) {
            Some(NodeType::Leaf) => {
                store.unpin(&page, false)?;
                store.free(page_id)?;
                Ok(())
            }
            Some(NodeType::Index) => {
                let n = node::entry_count(&page);
                let mut children = Vec::with_capacity(n as usize + 1);
                let Some(leftmost) = node::leftmost_child(&page) else {
                    store.unpin(&page, false)?;
                    return Err(ArborError::Corruption(format!(
                        "index node {} has no leftmost child",
                        page_id
                    )));
                };
                children.push(leftmost);
                for i in 0..n {
                    let Some(child) = node::index_child(&page, i) else {
                        store.unpin(&page, false)?;
                        return Err(ArborError::Corruption(format!(
                            "index node {} has a truncated entry",
                            page_id
                        )));
                    };
                    children.push(child);
                }
                store.unpin(&page, false)?;

                for child in children {
                    self.destroy_subtree(store, child, depth + 1)?;
                }
                store.free(page_id)?;
                Ok(())
            }
            _ => {
                store.unpin(&page, false)?;
                Err(ArborError::Corruption(format!(
                    "page {} is not a tree node",
                    page_id
                )))
            }
        }
    }

    /// Insert one (key, record id) pair. Duplicate keys are allowed and kept
    /// in arrival order; nothing is updated or rejected.
    pub fn insert(&mut self, store: &mut impl PageStore, key: &Key, rid: RecordId) -> Result<()> {
        let ekey = self.encode_checked(key)?;
        let root = self.header.as_ref().ok_or(ArborError::Closed)?.info.root;

        if root == INVALID_PAGE_ID {
            let mut page = store.allocate()?;
            let page_id = page.page_id();
            node::init_leaf(&mut page, INVALID_PAGE_ID, INVALID_PAGE_ID);
            if let Err(e) = node::leaf_insert(&mut page, &ekey, rid) {
                store.unpin(&page, false)?;
                store.free(page_id)?;
                return Err(e);
            }
            store.unpin(&page, true)?;
            self.update_root(store, page_id)?;
            tracing::debug!("index '{}' got root leaf {}", self.name, page_id);
            return Ok(());
        }

        if let Some(up) = self.insert_into(store, root, &ekey, rid, 0)? {
            // The old root becomes the leftmost child of a fresh root.
            let mut page = store.allocate()?;
            let new_root = page.page_id();
            node::init_index(&mut page, root);
            if let Err(e) = node::index_insert(&mut page, &up.key, up.right) {
                store.unpin(&page, false)?;
                store.free(new_root)?;
                return Err(e);
            }
            store.unpin(&page, true)?;
            self.update_root(store, new_root)?;
            tracing::debug!(
                "root split: new root {} over {} and {}",
                new_root,
                root,
                up.right
            );
        }
        Ok(())
    }

    /// Recursive descent for insert. Returns the promotion this level must
    /// hand to its parent, if a split happened here.
    fn insert_into(
        &mut self,
        store: &mut impl PageStore,
        page_id: PageId,
        ekey: &[u8],
        rid: RecordId,
        depth: usize,
    ) -> Result<Option<Promotion>> {
        if depth > MAX_TREE_DEPTH {
            return Err(ArborError::Corruption(
                "tree depth exceeds maximum (possible cycle)".into(),
            ));
        }
        let mut page = store.pin(page_id)?;

        match node::node_type(&page) {
            Some(NodeType::Leaf) => match node::leaf_insert(&mut page, ekey, rid) {
                Ok(()) => {
                    store.unpin(&page, true)?;
                    Ok(None)
                }
                Err(ArborError::PageOverflow) => self.split_leaf(store, page, ekey, rid),
                Err(e) => {
                    store.unpin(&page, false)?;
                    Err(e)
                }
            },
            Some(NodeType::Index) => {
                let Some(child) = node::find_child(&page, ekey) else {
                    store.unpin(&page, false)?;
                    return Err(ArborError::Corruption(format!(
                        "index node {} has no children",
                        page_id
                    )));
                };
                // Release this level while the child works; re-acquire only
                // if a promotion must land here.
                store.unpin(&page, false)?;
                let Some(up) = self.insert_into(store, child, ekey, rid, depth + 1)? else {
                    return Ok(None);
                };

                let mut page = store.pin(page_id)?;
                match node::index_insert(&mut page, &up.key, up.right) {
                    Ok(()) => {
                        store.unpin(&page, true)?;
                        Ok(None)
                    }
                    Err(ArborError::PageOverflow) => self.split_index(store, page, up),
                    Err(e) => {
                        store.unpin(&page, false)?;
                        Err(e)
                    }
                }
            }
            _ => {
                store.unpin(&page, false)?;
                Err(ArborError::Corruption(format!(
                    "page {} is not a tree node",
                    page_id
                )))
            }
        }
    }

    fn split_leaf(
        &mut self,
        store: &mut impl PageStore,
        page: Page,
        ekey: &[u8],
        rid: RecordId,
    ) -> Result<Option<Promotion>> {
        let old_id = page.page_id();
        let n = node::entry_count(&page);

        // Gather live entries plus the incoming one. The sort is stable and
        // the new entry is appended last, so an equal-key run keeps arrival
        // order.
        let mut entries: Vec<(Vec<u8>, RecordId)> = Vec::with_capacity(n as usize + 1);
        for i in 0..n {
            let Some((k, r)) = node::leaf_entry(&page, i) else {
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "leaf {} has a truncated entry",
                    old_id
                )));
            };
            entries.push((k.to_vec(), r));
        }
        entries.push((ekey.to_vec(), rid));
        entries.sort_by(|a, b| compare_keys(&a.0, &b.0));

        let mid = entries.len() / 2;
        let prev = node::prev_leaf(&page).unwrap_or(INVALID_PAGE_ID);
        let next = node::next_leaf(&page).unwrap_or(INVALID_PAGE_ID);

        let mut right = store.allocate()?;
        let right_id = right.page_id();
        node::init_leaf(&mut right, old_id, next);

        let mut left = Page::new(old_id);
        node::init_leaf(&mut left, prev, right_id);

        let filled = (|| -> Result<()> {
            for (k, r) in &entries[..mid] {
                left.insert_cell(&node::encode_leaf_cell(k, *r))?;
            }
            for (k, r) in &entries[mid..] {
                right.insert_cell(&node::encode_leaf_cell(k, *r))?;
            }
            Ok(())
        })();
        if let Err(e) = filled {
            store.unpin(&page, false)?;
            store.unpin(&right, false)?;
            store.free(right_id)?;
            return Err(e);
        }

        // The first key of the new leaf separates the halves; duplicates of
        // it may remain on both sides.
        let promoted = entries[mid].0.clone();

        store.unpin(&left, true)?;
        store.unpin(&right, true)?;

        // A former right neighbor must point back at the new leaf.
        if next != INVALID_PAGE_ID {
            let mut neighbor = store.pin(next)?;
            node::set_prev_leaf(&mut neighbor, right_id);
            store.unpin(&neighbor, true)?;
        }

        tracing::debug!("leaf {} split, new leaf {}", old_id, right_id);
        Ok(Some(Promotion {
            key: promoted,
            right: right_id,
        }))
    }

    fn split_index(
        &mut self,
        store: &mut impl PageStore,
        page: Page,
        up: Promotion,
    ) -> Result<Option<Promotion>> {
        let old_id = page.page_id();
        let n = node::entry_count(&page);

        let mut entries: Vec<(Vec<u8>, PageId)> = Vec::with_capacity(n as usize + 1);
        for i in 0..n {
            let Some((child, k)) = node::index_entry(&page, i) else {
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "index node {} has a truncated entry",
                    old_id
                )));
            };
            entries.push((k.to_vec(), child));
        }
        entries.push((up.key, up.right));
        entries.sort_by(|a, b| compare_keys(&a.0, &b.0));

        let mid = entries.len() / 2;
        let (mid_key, mid_child) = entries[mid].clone();

        let Some(leftmost) = node::leftmost_child(&page) else {
            store.unpin(&page, false)?;
            return Err(ArborError::Corruption(format!(
                "index node {} has no leftmost child",
                old_id
            )));
        };

        let mut right = store.allocate()?;
        let right_id = right.page_id();
        // The promoted entry's child becomes the new node's leftmost
        // pointer; the entry itself lives only in the parent from now on.
        node::init_index(&mut right, mid_child);

        let mut left = Page::new(old_id);
        node::init_index(&mut left, leftmost);

        let filled = (|| -> Result<()> {
            for (k, c) in &entries[..mid] {
                left.insert_cell(&node::encode_index_cell(*c, k))?;
            }
            for (k, c) in &entries[mid + 1..] {
                right.insert_cell(&node::encode_index_cell(*c, k))?;
            }
            Ok(())
        })();
        if let Err(e) = filled {
            store.unpin(&page, false)?;
            store.unpin(&right, false)?;
            store.free(right_id)?;
            return Err(e);
        }

        // A pair equal to the promoted (key, child) must not survive in the
        // left half; only the leftmost match is dropped.
        node::index_remove_entry(&mut left, &mid_key, mid_child);

        store.unpin(&left, true)?;
        store.unpin(&right, true)?;

        tracing::debug!("index node {} split, new node {}", old_id, right_id);
        Ok(Some(Promotion {
            key: mid_key,
            right: right_id,
        }))
    }

    /// Remove the entry matching both key and record id. Returns whether a
    /// match was found. Naive delete: no merging and no redistribution, so
    /// nodes may become arbitrarily sparse and depth never shrinks.
    pub fn delete(&mut self, store: &mut impl PageStore, key: &Key, rid: RecordId) -> Result<bool> {
        {
            let h = self.header.as_ref().ok_or(ArborError::Closed)?;
            if h.info.delete_mode != DeleteMode::Naive {
                return Err(ArborError::UnsupportedDeleteMode);
            }
        }
        let ekey = self.encode_checked(key)?;

        let Some((mut page, mut slot)) = self.find_run_start(store, Some(&ekey))? else {
            return Ok(false);
        };

        loop {
            if slot >= node::entry_count(&page) {
                let next = node::next_leaf(&page).unwrap_or(INVALID_PAGE_ID);
                store.unpin(&page, false)?;
                if next == INVALID_PAGE_ID {
                    return Ok(false);
                }
                page = store.pin(next)?;
                if node::node_type(&page) != Some(NodeType::Leaf) {
                    store.unpin(&page, false)?;
                    return Err(ArborError::Corruption(format!(
                        "page {} in leaf chain is not a leaf",
                        next
                    )));
                }
                slot = 0;
                continue;
            }

            let Some((k, r)) = node::leaf_entry(&page, slot) else {
                let id = page.page_id();
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "leaf {} has a truncated entry",
                    id
                )));
            };

            // Ascending order: once past the key it cannot exist.
            if compare_keys(k, &ekey) == std::cmp::Ordering::Greater {
                store.unpin(&page, false)?;
                return Ok(false);
            }
            if compare_keys(k, &ekey) == std::cmp::Ordering::Equal && r == rid {
                node::leaf_remove(&mut page, slot);
                store.unpin(&page, true)?;
                return Ok(true);
            }
            slot += 1;
        }
    }

    /// Find the leftmost leaf position at or after `lo` (the very first
    /// entry when `lo` is None). The returned leaf is pinned; ownership of
    /// that pin passes to the caller.
    pub(crate) fn find_run_start(
        &mut self,
        store: &mut impl PageStore,
        lo: Option<&[u8]>,
    ) -> Result<Option<(Page, u16)>> {
        let root = self.header.as_ref().ok_or(ArborError::Closed)?.info.root;
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut page_id = root;
        let mut page = store.pin(page_id)?;
        self.notify_visit(page_id);

        // Descend, always taking the leftmost subtree that could contain the
        // bound so duplicates to the left are never skipped.
        let mut depth = 0;
        while node::node_type(&page) == Some(NodeType::Index) {
            depth += 1;
            if depth > MAX_TREE_DEPTH {
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(
                    "tree depth exceeds maximum (possible cycle)".into(),
                ));
            }

            let Some(mut child) = node::leftmost_child(&page) else {
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "index node {} has no leftmost child",
                    page_id
                )));
            };
            if let Some(lo) = lo {
                let n = node::entry_count(&page);
                for i in 0..n {
                    let Some((c, k)) = node::index_entry(&page, i) else {
                        store.unpin(&page, false)?;
                        return Err(ArborError::Corruption(format!(
                            "index node {} has a truncated entry",
                            page_id
                        )));
                    };
                    if compare_keys(k, lo) == std::cmp::Ordering::Less {
                        child = c;
                    } else {
                        break;
                    }
                }
            }

            store.unpin(&page, false)?;
            page_id = child;
            page = store.pin(page_id)?;
            self.notify_visit(page_id);
        }

        if node::node_type(&page) != Some(NodeType::Leaf) {
            store.unpin(&page, false)?;
            return Err(ArborError::Corruption(format!(
                "descent ended on page {} which is not a leaf",
                page_id
            )));
        }

        // Skip empty leaves left behind by naive deletes.
        while node::entry_count(&page) == 0 {
            let next = node::next_leaf(&page).unwrap_or(INVALID_PAGE_ID);
            store.unpin(&page, false)?;
            if next == INVALID_PAGE_ID {
                return Ok(None);
            }
            page = store.pin(next)?;
            if node::node_type(&page) != Some(NodeType::Leaf) {
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "page {} in leaf chain is not a leaf",
                    next
                )));
            }
        }

        let Some(lo) = lo else {
            return Ok(Some((page, 0)));
        };

        // Forward to the first entry >= lo, hopping leaves as needed.
        let mut slot: u16 = 0;
        loop {
            if slot >= node::entry_count(&page) {
                let next = node::next_leaf(&page).unwrap_or(INVALID_PAGE_ID);
                store.unpin(&page, false)?;
                if next == INVALID_PAGE_ID {
                    return Ok(None);
                }
                page = store.pin(next)?;
                if node::node_type(&page) != Some(NodeType::Leaf) {
                    store.unpin(&page, false)?;
                    return Err(ArborError::Corruption(format!(
                        "page {} in leaf chain is not a leaf",
                        next
                    )));
                }
                slot = 0;
                continue;
            }
            let Some((k, _)) = node::leaf_entry(&page, slot) else {
                let id = page.page_id();
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "leaf {} has a truncated entry",
                    id
                )));
            };
            if compare_keys(k, lo) != std::cmp::Ordering::Less {
                return Ok(Some((page, slot)));
            }
            slot += 1;
        }
    }

    /// Construct a scan over `[lo, hi]`. Either bound may be absent; equal
    /// bounds give an exact-match scan that can still yield duplicates.
    pub fn scan(
        &mut self,
        store: &mut impl PageStore,
        lo: Option<&Key>,
        hi: Option<&Key>,
    ) -> Result<BTreeScan> {
        let (key_type, root) = {
            let h = self.header.as_ref().ok_or(ArborError::Closed)?;
            (h.info.key_type, h.info.root)
        };

        // Bounds must agree with the tree's key type; their length is not
        // checked (an over-long bound is still a valid bound).
        for bound in [lo, hi].into_iter().flatten() {
            if bound.key_type() != key_type {
                return Err(ArborError::KeyTypeMismatch);
            }
        }

        let lo_encoded = lo.map(|k| k.encode());
        let hi_encoded = hi.map(|k| k.encode());

        if root == INVALID_PAGE_ID {
            return Ok(BTreeScan::empty(key_type, hi_encoded));
        }

        let start = self.find_run_start(store, lo_encoded.as_deref())?;
        Ok(BTreeScan::new(key_type, hi_encoded, start))
    }

    /// Install a node-visit observer. Replaces any previous one.
    pub fn set_observer(&mut self, observer: Box<dyn TraceObserver>) {
        self.observer = Some(observer);
    }

    /// Remove the installed observer, if any.
    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    fn notify_visit(&mut self, page_id: PageId) {
        if let Some(observer) = self.observer.as_mut() {
            observer.node_visited(page_id);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.header.is_some()
    }

    /// Current root page; INVALID_PAGE_ID for an empty tree, None when the
    /// handle is closed.
    pub fn root_page_id(&self) -> Option<PageId> {
        self.header.as_ref().map(|h| h.info.root)
    }

    fn update_root(&mut self, store: &mut impl PageStore, new_root: PageId) -> Result<()> {
        let h = self.header.as_mut().ok_or(ArborError::Closed)?;
        h.info.root = new_root;
        let mut page = store.pin(h.page_id)?;
        h.info.write_to(&mut page)?;
        store.unpin(&page, true)?;
        Ok(())
    }

    fn encode_checked(&self, key: &Key) -> Result<Vec<u8>> {
        let h = self.header.as_ref().ok_or(ArborError::Closed)?;
        if key.key_type() != h.info.key_type {
            return Err(ArborError::KeyTypeMismatch);
        }
        let encoded = key.encode();
        if encoded.len() > h.info.max_key_size as usize {
            return Err(ArborError::KeyTooLong {
                got: encoded.len(),
                max: h.info.max_key_size as usize,
            });
        }
        Ok(encoded)
    }
}
