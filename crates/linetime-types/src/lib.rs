//! Shared identity and block metadata types for linetime.
//!
//! A pure leaf crate: typed IDs, the EOL symbol, line/text ranges, and the
//! serializable snapshots (`BlockInfo`, `TagInfo`) that cross the session
//! boundary.
//!
//! | Type          | Purpose                                        |
//! |---------------|------------------------------------------------|
//! | [`BlockId`]   | Durable address of a block                     |
//! | [`TagId`]     | Durable address of a tag checkpoint            |
//! | [`SessionId`] | Which single-writer session                    |
//! | [`Eol`]       | Line terminator of a document                  |
//! | [`LineRange`] | Inclusive 1-based range of active lines        |
//! | [`TextRange`] | Editor selection (lines + columns)             |
//! | [`BlockInfo`] | Block position and history state               |
//! | [`TagInfo`]   | Tag metadata                                   |

pub mod block;
pub mod ids;

pub use block::{BlockInfo, BlockKind, Eol, LineRange, TagInfo, TextRange};
pub use ids::{BlockId, RequestId, SessionId, TagId};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
