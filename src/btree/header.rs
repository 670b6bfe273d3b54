/// Per-tree header page: the anchor every operation starts from.
///
/// The header occupies one page whose single cell holds the root reference
/// and the key configuration fixed at creation:
///   [tag: u8] [magic: u32] [root: u64] [key_type: u8] [max_key_size: u16] [delete_mode: u8]
use crate::btree::key::KeyType;
use crate::btree::node::NODE_TYPE_HEADER;
use crate::error::{ArborError, Result};
use crate::storage::page::{Page, PageId};

const MAGIC: u32 = 0x4254_5245; // "BTRE"
const HEADER_CELL_SIZE: usize = 17;

/// How `delete` treats undersized nodes. Only `Naive` (remove the entry,
/// never merge or redistribute) is implemented; `Rebalance` is recognized so
/// an index created with it fails deletes with `UnsupportedDeleteMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Naive,
    Rebalance,
}

impl DeleteMode {
    fn to_tag(self) -> u8 {
        match self {
            DeleteMode::Naive => 1,
            DeleteMode::Rebalance => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<DeleteMode> {
        match tag {
            1 => Some(DeleteMode::Naive),
            2 => Some(DeleteMode::Rebalance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexHeader {
    /// Root node, INVALID_PAGE_ID while the tree has no entries.
    pub root: PageId,
    pub key_type: KeyType,
    pub max_key_size: u16,
    pub delete_mode: DeleteMode,
}

impl IndexHeader {
    /// Serialize into `page`, replacing its contents.
    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        let page_id = page.page_id();
        *page = Page::new(page_id);

        let mut cell = [0u8; HEADER_CELL_SIZE];
        cell[0] = NODE_TYPE_HEADER;
        cell[1..5].copy_from_slice(&MAGIC.to_le_bytes());
        cell[5..13].copy_from_slice(&self.root.to_le_bytes());
        cell[13] = self.key_type.to_tag();
        cell[14..16].copy_from_slice(&self.max_key_size.to_le_bytes());
        cell[16] = self.delete_mode.to_tag();

        page.insert_cell(&cell)?;
        Ok(())
    }

    /// Deserialize from a pinned header page, validating the magic tag.
    pub fn read_from(page: &Page) -> Result<IndexHeader> {
        let cell = page
            .cell(0)
            .ok_or_else(|| ArborError::Corruption("header page has no anchor cell".into()))?;
        if cell.len() < HEADER_CELL_SIZE || cell[0] != NODE_TYPE_HEADER {
            return Err(ArborError::Corruption("page is not a tree header".into()));
        }
        let magic = u32::from_le_bytes(cell[1..5].try_into().unwrap());
        if magic != MAGIC {
            return Err(ArborError::Corruption(format!(
                "bad header magic {:#x}",
                magic
            )));
        }

        let root = u64::from_le_bytes(cell[5..13].try_into().unwrap());
        let key_type = KeyType::from_tag(cell[13])
            .ok_or_else(|| ArborError::Corruption(format!("unknown key type tag {}", cell[13])))?;
        let max_key_size = u16::from_le_bytes(cell[14..16].try_into().unwrap());
        let delete_mode = DeleteMode::from_tag(cell[16]).ok_or_else(|| {
            ArborError::Corruption(format!("unknown delete mode tag {}", cell[16]))
        })?;

        Ok(IndexHeader {
            root,
            key_type,
            max_key_size,
            delete_mode,
        })
    }
}
