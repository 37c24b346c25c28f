//! Error types for document operations.

use linetime_types::{BlockId, TagId};
use thiserror::Error;

/// Errors from document, block and tag operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("block was deleted: {0}")]
    BlockDeleted(BlockId),

    #[error("tag not found: {0}")]
    TagNotFound(TagId),

    #[error("line {line} out of range (block has {len} lines)")]
    LineOutOfRange { line: usize, len: usize },

    #[error("column {column} out of range on line {line} (length {len})")]
    ColumnOutOfRange { line: usize, column: usize, len: usize },

    #[error("invalid range {start}..{end}")]
    InvalidRange { start: String, end: String },

    #[error("version index {index} out of bounds (timeline has {len} entries)")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("line is not part of block {0}")]
    NotObserved(BlockId),

    #[error("tag {tag} does not fit the current lines of block {block}")]
    TagMismatch { tag: TagId, block: BlockId },

    #[error("block {0} does not support {1}")]
    Unsupported(BlockId, &'static str),

    #[error("range overlaps a sibling of block {0}")]
    Overlap(BlockId),
}
