/// Key types and order-preserving key encoding.
///
/// Keys are stored and compared in encoded form so that all ordering is a
/// lexicographic byte comparison:
/// - Int: big-endian with the sign bit flipped (negative < positive)
/// - Bytes: raw bytes
///
/// An index is bound to one key type and maximum encoded size at creation;
/// the engine validates both before touching any page.
use crate::error::{ArborError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Bytes,
}

impl KeyType {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            KeyType::Int => 1,
            KeyType::Bytes => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<KeyType> {
        match tag {
            1 => Some(KeyType::Int),
            2 => Some(KeyType::Bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Int(i32),
    Bytes(Vec<u8>),
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Int(_) => KeyType::Int,
            Key::Bytes(_) => KeyType::Bytes,
        }
    }

    /// Order-preserving encoded form.
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Key::Int(v) => encode_i32(*v).to_vec(),
            Key::Bytes(b) => b.clone(),
        }
    }

    /// Decode an encoded key of the given type.
    pub(crate) fn decode(key_type: KeyType, bytes: &[u8]) -> Result<Key> {
        match key_type {
            KeyType::Int => {
                let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                    ArborError::Corruption(format!(
                        "integer key has {} bytes, expected 4",
                        bytes.len()
                    ))
                })?;
                Ok(Key::Int(decode_i32(&arr)))
            }
            KeyType::Bytes => Ok(Key::Bytes(bytes.to_vec())),
        }
    }
}

/// Encode i32 into 4 bytes that preserve sort order under byte comparison.
pub fn encode_i32(val: i32) -> [u8; 4] {
    // Flip the sign bit so that negative numbers sort before positive
    let unsigned = (val as u32) ^ (1u32 << 31);
    unsigned.to_be_bytes()
}

/// Decode i32 from order-preserving encoding.
pub fn decode_i32(bytes: &[u8; 4]) -> i32 {
    let unsigned = u32::from_be_bytes(*bytes);
    (unsigned ^ (1u32 << 31)) as i32
}

/// Compare two encoded keys.
/// Keys are variable-length bytes: the comparison is lexicographic.
pub fn compare_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.cmp(b)
}
