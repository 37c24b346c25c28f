//! Blocks and tags.
//!
//! A block is a window over a contiguous run of the document's line
//! sequence, bounded by its `first` and `last` nodes. Which nodes in that
//! run belong to it is recorded on the nodes themselves (their observer
//! maps), so blocks never hold line lists.

use std::collections::HashMap;

use indexmap::IndexMap;
use linetime_types::{BlockId, BlockKind, Eol, TagId, TagInfo};

use crate::clock::Timestamp;
use crate::line::LineKey;
use crate::version::VersionKey;

/// Inline blocks share their parent's version state; forks own theirs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockVariant {
    Inline { parent: BlockId },
    /// A document root (`origin: None`) or a clone of `origin`.
    Fork { origin: Option<BlockId> },
}

#[derive(Clone, Debug)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) eol: Eol,
    pub(crate) variant: BlockVariant,
    pub(crate) first: LineKey,
    pub(crate) last: LineKey,
    pub(crate) children: Vec<BlockId>,
    pub(crate) tags: IndexMap<TagId, Tag>,
    pub(crate) last_modified: Option<LineKey>,
    pub(crate) version_merging: bool,
    pub(crate) deleted: bool,
}

impl Block {
    pub(crate) fn new(id: BlockId, eol: Eol, variant: BlockVariant, first: LineKey, last: LineKey) -> Self {
        Self {
            id,
            eol,
            variant,
            first,
            last,
            children: Vec::new(),
            tags: IndexMap::new(),
            last_modified: None,
            version_merging: true,
            deleted: false,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn eol(&self) -> Eol {
        self.eol
    }

    pub fn variant(&self) -> BlockVariant {
        self.variant
    }

    pub fn kind(&self) -> BlockKind {
        match self.variant {
            BlockVariant::Inline { .. } => BlockKind::Inline,
            BlockVariant::Fork { .. } => BlockKind::Fork,
        }
    }

    pub fn parent(&self) -> Option<BlockId> {
        match self.variant {
            BlockVariant::Inline { parent } => Some(parent),
            BlockVariant::Fork { .. } => None,
        }
    }

    pub fn origin(&self) -> Option<BlockId> {
        match self.variant {
            BlockVariant::Fork { origin } => origin,
            BlockVariant::Inline { .. } => None,
        }
    }

    pub fn children(&self) -> &[BlockId] {
        &self.children
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn version_merging(&self) -> bool {
        self.version_merging
    }
}

/// Named checkpoint of every line head in a block.
#[derive(Clone, Debug)]
pub struct Tag {
    pub(crate) id: TagId,
    pub(crate) block: BlockId,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) text: String,
    pub(crate) timestamp: Timestamp,
    pub(crate) needs_name: bool,
    pub(crate) heads: HashMap<LineKey, VersionKey>,
    pub(crate) created_at: u64,
}

impl Tag {
    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full block text at creation.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The recorded head for `line`, if the line existed at creation.
    pub fn head_for(&self, line: LineKey) -> Option<VersionKey> {
        self.heads.get(&line).copied()
    }

    pub fn info(&self) -> TagInfo {
        TagInfo {
            id: self.id,
            block_id: self.block,
            name: self.name.clone(),
            description: self.description.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp.get(),
            needs_name: self.needs_name,
            created_at: self.created_at,
        }
    }
}
