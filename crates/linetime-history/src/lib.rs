//! Line-granular version history for text documents.
//!
//! Every line mutation is recorded as a version with a timestamp from one
//! shared [`Clock`]. Any sub-range of a document can be carved out as a
//! block, rewound to an earlier state, cloned, or tagged, without diffs or
//! a file-based repository.
//!
//! # Structure
//!
//! - **Line sequence**: one arena-backed doubly-linked list of [`LineNode`]s
//!   per document. Nodes are never reordered; deleted lines stay in place
//!   with an inactive head so earlier states can still show them.
//! - **Views**: each node keeps one version chain per owning fork (the
//!   document root, or a clone). Inline child blocks read their owner's
//!   chain.
//! - **Blocks**: windows over the sequence bounded by a first and last node.
//!   Line numbers are 1-based over a block's *active* lines.
//!
//! # Time travel
//!
//! A rewind only moves head pointers and logs the jump at a fresh
//! timestamp, so "what was showing at T" stays answerable after any number
//! of jumps. Editing a rewound line appends a `Branch` copy first; history
//! is never rewritten.
//!
//! ```
//! use std::sync::Arc;
//! use linetime_history::{Clock, Document};
//!
//! let mut doc = Document::from_content("a\nb\nc", None, Arc::new(Clock::new()));
//! let root = doc.root();
//! doc.update_line(root, 2, "B").unwrap();
//! doc.apply_index(root, 0).unwrap();
//! assert_eq!(doc.full_text().unwrap(), "a\nb\nc");
//! ```

mod arena;
mod block;
pub mod clock;
mod document;
mod edit;
mod error;
mod history;
mod line;
mod snapshot;
mod tag;
mod timeline;
mod version;

pub use block::{Block, BlockVariant, Tag};
pub use clock::{Clock, ClockSink, Timestamp};
pub use document::Document;
pub use edit::Affected;
pub use error::HistoryError;
pub use history::{History, LineView, ViewKey};
pub use line::{Line, LineKey, LineKind, LineNode};
pub use version::{Version, VersionKey, VersionKind};

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
