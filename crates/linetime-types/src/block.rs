//! Block metadata shared between the history core and the session boundary.
//!
//! These are plain serializable records. The live block graph lives in
//! `linetime-history`; everything here is a snapshot taken from it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{BlockId, TagId};

/// End-of-line symbol of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Eol {
    /// `\n`
    #[default]
    #[strum(serialize = "lf", serialize = "\n")]
    Lf,
    /// `\r\n`
    #[strum(serialize = "crlf", serialize = "\r\n")]
    CrLf,
}

impl Eol {
    /// Detect the EOL symbol used by raw content. Defaults to `Lf`.
    pub fn detect(content: &str) -> Self {
        if content.contains("\r\n") {
            Eol::CrLf
        } else {
            Eol::Lf
        }
    }

    /// Parse from string (case-insensitive, accepts the literal symbols).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// The literal line terminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
        }
    }

    /// Short name for display and storage.
    pub fn name(&self) -> &'static str {
        match self {
            Eol::Lf => "lf",
            Eol::CrLf => "crlf",
        }
    }
}

/// What kind of block this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum BlockKind {
    /// Child window sharing its parent's line history.
    Inline,
    /// Owns its line history: a document root or a clone of another block.
    Fork,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Inline => "inline",
            BlockKind::Fork => "fork",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inclusive, 1-based range of active lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of lines covered, zero when inverted.
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Editor selection range: 1-based lines, 1-based character columns.
///
/// The end column is exclusive, so an empty range (`start == end`) is a pure
/// insertion point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl TextRange {
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// An empty range at a single position.
    pub fn caret(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }

    pub fn is_empty(&self) -> bool {
        self.start_line == self.end_line && self.start_column == self.end_column
    }
}

/// Snapshot of a block's position and history state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub id: BlockId,
    pub kind: BlockKind,
    pub parent: Option<BlockId>,
    pub origin: Option<BlockId>,
    /// Active range in the parent's line numbering (own numbering for forks).
    /// `None` when the block currently shows no lines.
    pub range: Option<LineRange>,
    pub line_count: usize,
    /// Length of the block's timeline.
    pub version_count: usize,
    pub version_index: usize,
    pub children: Vec<BlockId>,
    pub tag_count: usize,
}

/// Metadata returned when a tag is created or listed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub id: TagId,
    pub block_id: BlockId,
    pub name: String,
    pub description: Option<String>,
    /// Full block text at tag creation.
    pub text: String,
    pub timestamp: u64,
    /// Set when the caller gave no name, so an external namer may suggest one.
    pub needs_name: bool,
    /// Unix millis.
    pub created_at: u64,
}
