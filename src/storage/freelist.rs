use crate::storage::page::PageId;

/// Simple freelist tracking free pages.
///
/// Free page IDs are held in memory and snapshotted into a single meta-page
/// cell on flush: [count: u64][id: u64]*. A snapshot that would not fit the
/// meta cell is truncated; the overflowed entries survive only until the
/// pager is reopened.
#[derive(Default)]
pub struct FreeList {
    free_pages: Vec<PageId>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a free page. Returns None if no free pages available.
    pub fn allocate(&mut self) -> Option<PageId> {
        self.free_pages.pop()
    }

    /// Return a page to the free list.
    /// Panics in debug mode if the page is already free (double-free).
    /// In release mode, silently ignores the duplicate to prevent data corruption.
    pub fn free(&mut self, page_id: PageId) {
        if self.free_pages.contains(&page_id) {
            debug_assert!(
                false,
                "double-free detected: page {} is already in freelist",
                page_id
            );
            return;
        }
        self.free_pages.push(page_id);
    }

    /// Number of free pages.
    pub fn len(&self) -> usize {
        self.free_pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free_pages.is_empty()
    }

    /// Serialize at most `max_entries` free page ids for persistence.
    pub fn serialize(&self, max_entries: usize) -> Vec<u8> {
        let n = self.free_pages.len().min(max_entries);
        let mut buf = Vec::with_capacity(8 + n * 8);
        buf.extend_from_slice(&(n as u64).to_le_bytes());
        for &page_id in &self.free_pages[..n] {
            buf.extend_from_slice(&page_id.to_le_bytes());
        }
        buf
    }

    /// Rebuild a freelist from its serialized snapshot.
    pub fn deserialize(bytes: &[u8]) -> Self {
        if bytes.len() < 8 {
            return Self::default();
        }
        let count = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let mut free_pages = Vec::with_capacity(count);
        for i in 0..count {
            let off = 8 + i * 8;
            if off + 8 > bytes.len() {
                break;
            }
            free_pages.push(u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()));
        }
        FreeList { free_pages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_from_empty() {
        let mut fl = FreeList::new();
        assert_eq!(fl.allocate(), None);
    }

    #[test]
    fn test_free_then_allocate() {
        let mut fl = FreeList::new();
        fl.free(7);
        fl.free(9);
        assert_eq!(fl.len(), 2);
        assert_eq!(fl.allocate(), Some(9));
        assert_eq!(fl.allocate(), Some(7));
        assert_eq!(fl.allocate(), None);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut fl = FreeList::new();
        fl.free(3);
        fl.free(11);
        fl.free(42);

        let bytes = fl.serialize(usize::MAX);
        let restored = FreeList::deserialize(&bytes);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn test_serialize_truncates_to_limit() {
        let mut fl = FreeList::new();
        for i in 0..10 {
            fl.free(i);
        }
        let bytes = fl.serialize(4);
        assert_eq!(bytes.len(), 8 + 4 * 8);
        let restored = FreeList::deserialize(&bytes);
        assert_eq!(restored.len(), 4);
    }
}
