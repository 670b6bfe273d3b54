/// Scan session: a lazy forward cursor over a key range.
///
/// The cursor holds a pin on its current leaf and walks the sibling chain;
/// the pin is released when the scan runs past its upper bound, exhausts the
/// chain, or is closed. The entry most recently yielded by `next` can be
/// removed with `delete_current` without disturbing iteration over the
/// remaining entries.
use crate::btree::key::{compare_keys, Key, KeyType};
use crate::btree::node::{self, NodeType};
use crate::error::{ArborError, Result};
use crate::storage::page::{Page, INVALID_PAGE_ID};
use crate::storage::page_store::PageStore;
use crate::types::RecordId;

pub struct BTreeScan {
    key_type: KeyType,
    hi: Option<Vec<u8>>,
    /// Current leaf; the scan owns one pin on it while Some.
    leaf: Option<Page>,
    /// Next entry to yield.
    slot: u16,
    /// Whether `slot - 1` names an entry yielded by `next` and not deleted.
    have_current: bool,
}

impl std::fmt::Debug for BTreeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeScan")
            .field("key_type", &self.key_type)
            .field("hi", &self.hi)
            .field("leaf_pinned", &self.leaf.is_some())
            .field("slot", &self.slot)
            .field("have_current", &self.have_current)
            .finish()
    }
}

impl BTreeScan {
    pub(crate) fn new(key_type: KeyType, hi: Option<Vec<u8>>, start: Option<(Page, u16)>) -> Self {
        let (leaf, slot) = match start {
            Some((page, slot)) => (Some(page), slot),
            None => (None, 0),
        };
        BTreeScan {
            key_type,
            hi,
            leaf,
            slot,
            have_current: false,
        }
    }

    pub(crate) fn empty(key_type: KeyType, hi: Option<Vec<u8>>) -> Self {
        BTreeScan {
            key_type,
            hi,
            leaf: None,
            slot: 0,
            have_current: false,
        }
    }

    /// Yield the next entry within bounds, or None once the range or the
    /// leaf chain is exhausted (the held pin is released then).
    pub fn next(&mut self, store: &mut impl PageStore) -> Result<Option<(Key, RecordId)>> {
        loop {
            let Some(mut page) = self.leaf.take() else {
                return Ok(None);
            };
            self.have_current = false;

            if self.slot >= node::entry_count(&page) {
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
                self.leaf = Some(page);
                self.slot = 0;
                continue;
            }

            let Some((k, rid)) = node::leaf_entry(&page, self.slot) else {
                let id = page.page_id();
                store.unpin(&page, false)?;
                return Err(ArborError::Corruption(format!(
                    "leaf {} has a truncated entry",
                    id
                )));
            };

            if let Some(hi) = &self.hi {
                if compare_keys(k, hi) == std::cmp::Ordering::Greater {
                    store.unpin(&page, false)?;
                    return Ok(None);
                }
            }

            let key = match Key::decode(self.key_type, k) {
                Ok(key) => key,
                Err(e) => {
                    store.unpin(&page, false)?;
                    return Err(e);
                }
            };

            self.leaf = Some(page);
            self.slot += 1;
            self.have_current = true;
            return Ok(Some((key, rid)));
        }
    }

    /// Remove the entry most recently yielded by `next`. Returns false when
    /// there is no current entry: before the first `next`, after the scan
    /// ended, or when it was already deleted.
    pub fn delete_current(&mut self, store: &mut impl PageStore) -> Result<bool> {
        if !self.have_current {
            return Ok(false);
        }
        let Some(mut page) = self.leaf.take() else {
            return Ok(false);
        };

        let idx = self.slot - 1;
        node::leaf_remove(&mut page, idx);
        let page_id = page.page_id();
        store.unpin(&page, true)?;

        // Re-acquire for continued iteration; the entry that shifted into
        // the removed slot is the next to yield.
        let page = store.pin(page_id)?;
        self.leaf = Some(page);
        self.slot = idx;
        self.have_current = false;
        Ok(true)
    }

    /// Release the held leaf pin. Idempotent; a scan that ran to exhaustion
    /// has already released it.
    pub fn close(&mut self, store: &mut impl PageStore) -> Result<()> {
        if let Some(page) = self.leaf.take() {
            store.unpin(&page, false)?;
        }
        self.have_current = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::btree::header::DeleteMode;
    use crate::btree::key::{Key, KeyType};
    use crate::btree::ops::BTreeFile;
    use crate::storage::pager::Pager;
    use crate::types::RecordId;
    use tempfile::TempDir;

    fn setup() -> (Pager, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.adb");
        let pager = Pager::create(&path).unwrap();
        (pager, dir)
    }

    fn rid(n: u64) -> RecordId {
        RecordId::new(n, 0)
    }

    #[test]
    fn test_exact_match_scan_yields_all_duplicates() {
        let (mut pager, _dir) = setup();
        let mut index =
            BTreeFile::create_or_open(&mut pager, "idx", KeyType::Int, 4, DeleteMode::Naive)
                .unwrap();

        for i in 0..5 {
            index.insert(&mut pager, &Key::Int(1), rid(i)).unwrap();
        }
        index.insert(&mut pager, &Key::Int(0), rid(90)).unwrap();
        index.insert(&mut pager, &Key::Int(2), rid(91)).unwrap();

        let mut scan = index
            .scan(&mut pager, Some(&Key::Int(1)), Some(&Key::Int(1)))
            .unwrap();
        let mut rids = Vec::new();
        while let Some((key, r)) = scan.next(&mut pager).unwrap() {
            assert_eq!(key, Key::Int(1));
            rids.push(r);
        }
        assert_eq!(rids, vec![rid(0), rid(1), rid(2), rid(3), rid(4)]);

        scan.close(&mut pager).unwrap();
        index.close(&mut pager).unwrap();
        assert_eq!(pager.pinned_pages(), 0);
    }

    #[test]
    fn test_delete_through_cursor_keeps_iterating() {
        let (mut pager, _dir) = setup();
        let mut index =
            BTreeFile::create_or_open(&mut pager, "idx", KeyType::Int, 4, DeleteMode::Naive)
                .unwrap();

        for i in 0..10 {
            index.insert(&mut pager, &Key::Int(i), rid(i as u64)).unwrap();
        }

        // Delete every even key through the cursor
        let mut scan = index.scan(&mut pager, None, None).unwrap();
        while let Some((Key::Int(k), _)) = scan.next(&mut pager).unwrap() {
            if k % 2 == 0 {
                assert!(scan.delete_current(&mut pager).unwrap());
                // A second delete of the same entry is a no-op
                assert!(!scan.delete_current(&mut pager).unwrap());
            }
        }
        scan.close(&mut pager).unwrap();

        let mut scan = index.scan(&mut pager, None, None).unwrap();
        let mut remaining = Vec::new();
        while let Some((Key::Int(k), _)) = scan.next(&mut pager).unwrap() {
            remaining.push(k);
        }
        assert_eq!(remaining, vec![1, 3, 5, 7, 9]);

        index.close(&mut pager).unwrap();
        assert_eq!(pager.pinned_pages(), 0);
    }

    #[test]
    fn test_delete_current_before_first_next_is_noop() {
        let (mut pager, _dir) = setup();
        let mut index =
            BTreeFile::create_or_open(&mut pager, "idx", KeyType::Int, 4, DeleteMode::Naive)
                .unwrap();
        index.insert(&mut pager, &Key::Int(1), rid(1)).unwrap();

        let mut scan = index.scan(&mut pager, None, None).unwrap();
        assert!(!scan.delete_current(&mut pager).unwrap());
        scan.close(&mut pager).unwrap();
        index.close(&mut pager).unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut pager, _dir) = setup();
        let mut index =
            BTreeFile::create_or_open(&mut pager, "idx", KeyType::Int, 4, DeleteMode::Naive)
                .unwrap();
        index.insert(&mut pager, &Key::Int(1), rid(1)).unwrap();

        let mut scan = index.scan(&mut pager, None, None).unwrap();
        scan.close(&mut pager).unwrap();
        scan.close(&mut pager).unwrap();

        // A scan that ran dry has already dropped its pin
        let mut scan = index.scan(&mut pager, None, None).unwrap();
        while scan.next(&mut pager).unwrap().is_some() {}
        scan.close(&mut pager).unwrap();

        index.close(&mut pager).unwrap();
        assert_eq!(pager.pinned_pages(), 0);
    }
}
