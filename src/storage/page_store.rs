use crate::error::Result;
use crate::storage::page::{Page, PageId};

/// Abstraction over the paged buffer layer consumed by the B-tree.
///
/// `pin` hands out a working copy of the page and takes a reference on it;
/// mutations are persisted by passing the copy back to `unpin` with
/// `dirty = true`. Pins must balance: every pinned page is unpinned on every
/// exit path, and a page may not be freed while pinned.
///
/// The file-directory methods map an index name to its header page, the
/// catalog role of the database layer beneath.
pub trait PageStore {
    /// Take a reference on `page_id` and return a copy of its contents.
    fn pin(&mut self, page_id: PageId) -> Result<Page>;

    /// Release one reference. With `dirty = true` the page contents are
    /// written back first.
    fn unpin(&mut self, page: &Page, dirty: bool) -> Result<()>;

    /// Allocate a fresh page. The returned page is pinned.
    fn allocate(&mut self) -> Result<Page>;

    /// Return a page to the store. The page must not be pinned.
    fn free(&mut self, page_id: PageId) -> Result<()>;

    /// Look up the page bound to `name`, if any.
    fn resolve_file(&mut self, name: &str) -> Result<Option<PageId>>;

    /// Bind `name` to `page_id`. Fails if the name is already bound.
    fn bind_file(&mut self, name: &str, page_id: PageId) -> Result<()>;

    /// Remove the binding for `name`. Fails if the name is not bound.
    fn unbind_file(&mut self, name: &str) -> Result<()>;
}
