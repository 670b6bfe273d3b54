use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;

use crate::error::{ArborError, Result};
use crate::storage::freelist::FreeList;
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use crate::storage::page_store::PageStore;

/// File header stored in page 0:
/// magic(8) + version(4) + page_count(8), then a freelist snapshot cell and
/// one directory cell per bound file name.
const MAGIC: &[u8; 8] = b"ARBORDB1";
const META_HEADER_SIZE: usize = 20;

/// Default LRU cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Upper bound on free page ids persisted in the meta-page snapshot.
const FREELIST_SNAPSHOT_MAX: usize = 256;

/// File-backed page store. Page 0 is the meta page; data pages live at
/// `page_id * PAGE_SIZE`. Writes go through on `unpin(dirty)`; the LRU cache
/// only ever holds clean copies. Pin counts are tracked per page so
/// unbalanced unpins and free-while-pinned are caught as errors.
pub struct Pager {
    file: File,
    page_count: u64,
    freelist: FreeList,
    cache: LruCache<PageId, Page>,
    pins: HashMap<PageId, u32>,
    directory: HashMap<String, PageId>,
}

impl Pager {
    /// Create a new page file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut pager = Pager {
            file,
            page_count: 1, // page 0 is the meta page
            freelist: FreeList::new(),
            cache: LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap()),
            pins: HashMap::new(),
            directory: HashMap::new(),
        };

        let meta = pager.build_meta_page()?;
        pager.write_page_to_disk(&meta)?;
        Ok(pager)
    }

    /// Open an existing page file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut pager = Pager {
            file,
            page_count: 0,
            freelist: FreeList::new(),
            cache: LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap()),
            pins: HashMap::new(),
            directory: HashMap::new(),
        };

        let meta = pager.read_page_from_disk(0)?;
        pager.read_meta_page(&meta)?;
        Ok(pager)
    }

    /// Rebuild the meta page (page 0) from current state.
    fn build_meta_page(&self) -> Result<Page> {
        let mut page = Page::new(0);

        let mut header = [0u8; META_HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&1u32.to_le_bytes()); // version
        header[12..20].copy_from_slice(&self.page_count.to_le_bytes());
        page.insert_cell(&header)
            .expect("meta header fits in empty page");

        let snapshot = self.freelist.serialize(FREELIST_SNAPSHOT_MAX);
        page.insert_cell(&snapshot)
            .map_err(|_| ArborError::PageAccess("freelist snapshot does not fit meta page".into()))?;

        // Deterministic order keeps the on-disk meta page stable.
        let mut names: Vec<&String> = self.directory.keys().collect();
        names.sort();
        for name in names {
            let page_id = self.directory[name];
            let mut cell = Vec::with_capacity(10 + name.len());
            cell.extend_from_slice(&page_id.to_le_bytes());
            cell.extend_from_slice(&(name.len() as u16).to_le_bytes());
            cell.extend_from_slice(name.as_bytes());
            page.insert_cell(&cell)
                .map_err(|_| ArborError::PageAccess("file directory does not fit meta page".into()))?;
        }

        Ok(page)
    }

    fn read_meta_page(&mut self, page: &Page) -> Result<()> {
        let header = page
            .cell(0)
            .ok_or_else(|| ArborError::Corruption("meta page has no header cell".into()))?;
        if header.len() < META_HEADER_SIZE || &header[0..8] != MAGIC {
            return Err(ArborError::Corruption("bad meta page magic".into()));
        }
        let _version = u32::from_le_bytes(header[8..12].try_into().unwrap());
        self.page_count = u64::from_le_bytes(header[12..20].try_into().unwrap());

        if let Some(snapshot) = page.cell(1) {
            self.freelist = FreeList::deserialize(snapshot);
        }

        for i in 2..page.cell_count() {
            let cell = page
                .cell(i)
                .ok_or_else(|| ArborError::Corruption("truncated meta directory cell".into()))?;
            if cell.len() < 10 {
                return Err(ArborError::Corruption("truncated meta directory cell".into()));
            }
            let page_id = u64::from_le_bytes(cell[0..8].try_into().unwrap());
            let name_len = u16::from_le_bytes(cell[8..10].try_into().unwrap()) as usize;
            if cell.len() < 10 + name_len {
                return Err(ArborError::Corruption("truncated meta directory cell".into()));
            }
            let name = String::from_utf8(cell[10..10 + name_len].to_vec())
                .map_err(|_| ArborError::Corruption("non-UTF-8 name in file directory".into()))?;
            self.directory.insert(name, page_id);
        }

        Ok(())
    }

    fn read_page_from_disk(&mut self, page_id: PageId) -> Result<Page> {
        let offset = page_id * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut data = [0u8; PAGE_SIZE];
        self.file.read_exact(&mut data)?;
        Ok(Page::from_bytes(data))
    }

    fn write_page_to_disk(&mut self, page: &Page) -> Result<()> {
        let offset = page.page_id() * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// Persist the meta page (page count, freelist snapshot, file directory).
    pub fn flush_meta(&mut self) -> Result<()> {
        let meta = self.build_meta_page()?;
        self.write_page_to_disk(&meta)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Total number of pages the file has ever grown to (including freed).
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Number of outstanding pins across all pages. Zero when no handle or
    /// scan is live; used by tests to assert pins never leak.
    pub fn pinned_pages(&self) -> usize {
        self.pins.values().map(|&c| c as usize).sum()
    }
}

impl PageStore for Pager {
    fn pin(&mut self, page_id: PageId) -> Result<Page> {
        if page_id == 0 || page_id >= self.page_count {
            return Err(ArborError::PageAccess(format!(
                "pin of invalid page {}",
                page_id
            )));
        }

        let page = if let Some(page) = self.cache.get(&page_id) {
            page.clone()
        } else {
            let page = self.read_page_from_disk(page_id)?;
            self.cache.put(page_id, page.clone());
            page
        };

        *self.pins.entry(page_id).or_insert(0) += 1;
        Ok(page)
    }

    fn unpin(&mut self, page: &Page, dirty: bool) -> Result<()> {
        let page_id = page.page_id();
        match self.pins.get_mut(&page_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.pins.remove(&page_id);
                }
            }
            _ => {
                return Err(ArborError::PageAccess(format!(
                    "unpin of page {} that is not pinned",
                    page_id
                )));
            }
        }

        if dirty {
            self.write_page_to_disk(page)?;
            self.cache.put(page_id, page.clone());
        }
        Ok(())
    }

    fn allocate(&mut self) -> Result<Page> {
        let page_id = if let Some(free_id) = self.freelist.allocate() {
            free_id
        } else {
            let id = self.page_count;
            self.page_count += 1;
            id
        };

        // Write the blank page through so the file always covers it.
        let page = Page::new(page_id);
        self.write_page_to_disk(&page)?;
        self.cache.put(page_id, page.clone());
        *self.pins.entry(page_id).or_insert(0) += 1;
        Ok(page)
    }

    fn free(&mut self, page_id: PageId) -> Result<()> {
        if self.pins.get(&page_id).copied().unwrap_or(0) > 0 {
            return Err(ArborError::PageAccess(format!(
                "free of page {} while pinned",
                page_id
            )));
        }
        self.cache.pop(&page_id);
        self.freelist.free(page_id);
        Ok(())
    }

    fn resolve_file(&mut self, name: &str) -> Result<Option<PageId>> {
        Ok(self.directory.get(name).copied())
    }

    fn bind_file(&mut self, name: &str, page_id: PageId) -> Result<()> {
        if self.directory.contains_key(name) {
            return Err(ArborError::PageAccess(format!(
                "file entry '{}' already exists",
                name
            )));
        }
        self.directory.insert(name.to_string(), page_id);
        self.flush_meta()
    }

    fn unbind_file(&mut self, name: &str) -> Result<()> {
        if self.directory.remove(name).is_none() {
            return Err(ArborError::PageAccess(format!(
                "file entry '{}' does not exist",
                name
            )));
        }
        self.flush_meta()
    }
}
