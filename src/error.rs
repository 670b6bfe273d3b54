use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArborError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page access failure: {0}")]
    PageAccess(String),

    #[error("page overflow: entry exceeds page capacity")]
    PageOverflow,

    #[error("index file not found: {0}")]
    NotFound(String),

    #[error("key of {got} bytes exceeds configured maximum of {max}")]
    KeyTooLong { got: usize, max: usize },

    #[error("key type does not match the type this index was created with")]
    KeyTypeMismatch,

    #[error("unsupported delete mode: only naive delete is implemented")]
    UnsupportedDeleteMode,

    #[error("index file is closed")]
    Closed,

    #[error("structural inconsistency: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, ArborError>;
