use crate::storage::page::PageId;

/// Locator of a record in an external heap file: (page, slot).
///
/// The index stores locators as leaf payloads and compares them only for
/// equality; it never follows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_no: PageId,
    pub slot_no: u16,
}

/// Encoded size of a `RecordId` inside a leaf cell.
pub const RECORD_ID_SIZE: usize = 10;

impl RecordId {
    pub fn new(page_no: PageId, slot_no: u16) -> Self {
        RecordId { page_no, slot_no }
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.page_no.to_le_bytes());
        buf.extend_from_slice(&self.slot_no.to_le_bytes());
    }

    /// Decode from the fixed 10-byte form. Caller guarantees length.
    pub(crate) fn decode(bytes: &[u8]) -> RecordId {
        let page_no = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let slot_no = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        RecordId { page_no, slot_no }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}
