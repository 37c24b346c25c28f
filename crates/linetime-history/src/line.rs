//! Line nodes and block-relative line handles.

use std::collections::BTreeMap;

use linetime_types::BlockId;
use serde::{Deserialize, Serialize};

use crate::arena::{Linked, Links, arena_key};
use crate::document::Document;
use crate::history::ViewKey;
use crate::version::Version;

arena_key!(
    /// Address of a [`LineNode`] in a document's line arena.
    LineKey
);

/// How a line position came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Present when its block was built from content.
    Original,
    /// Created by an edit.
    Inserted,
}

/// One position in the document's line sequence, shared by every block
/// whose range covers it.
#[derive(Clone, Debug)]
pub struct LineNode {
    pub(crate) kind: LineKind,
    pub(crate) links: Links<LineKey>,
    /// Observing block → the view it reads versions from. Inline blocks map
    /// to their owner's view.
    pub(crate) observers: BTreeMap<BlockId, ViewKey>,
}

impl LineNode {
    pub(crate) fn new(kind: LineKind) -> Self {
        Self {
            kind,
            links: Links::default(),
            observers: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> LineKind {
        self.kind
    }

    pub fn is_observed_by(&self, block: BlockId) -> bool {
        self.observers.contains_key(&block)
    }

    pub fn observers(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.observers.keys().copied()
    }

    /// Blocks reading `view` at this position.
    pub(crate) fn observers_of(&self, view: ViewKey) -> impl Iterator<Item = BlockId> + '_ {
        self.observers
            .iter()
            .filter(move |(_, v)| **v == view)
            .map(|(id, _)| *id)
    }
}

impl Linked<LineKey> for LineNode {
    fn links(&self) -> &Links<LineKey> {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links<LineKey> {
        &mut self.links
    }
}

/// A block's view of one line position.
#[derive(Clone, Copy)]
pub struct Line<'a> {
    doc: &'a Document,
    block: BlockId,
    node: LineKey,
    view: ViewKey,
}

impl<'a> Line<'a> {
    pub(crate) fn new(doc: &'a Document, block: BlockId, node: LineKey, view: ViewKey) -> Self {
        Self { doc, block, node, view }
    }

    pub fn key(&self) -> LineKey {
        self.node
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn kind(&self) -> LineKind {
        self.doc.lines[self.node].kind
    }

    /// The version this block currently shows.
    pub fn head(&self) -> &'a Version {
        self.doc.history.head(self.view)
    }

    pub fn content(&self) -> &'a str {
        self.head().content()
    }

    pub fn is_active(&self) -> bool {
        self.head().is_active()
    }

    /// 1-based position among the block's active lines.
    pub fn number(&self) -> Option<usize> {
        if !self.is_active() {
            return None;
        }
        self.doc
            .active_nodes(self.block)
            .ok()?
            .iter()
            .position(|n| *n == self.node)
            .map(|i| i + 1)
    }

    pub fn previous_active(&self) -> Option<Line<'a>> {
        self.walk(|links| links.prev, |block| block.first)
    }

    pub fn next_active(&self) -> Option<Line<'a>> {
        self.walk(|links| links.next, |block| block.last)
    }

    /// Every version of this line, oldest first.
    pub fn versions(&self) -> Vec<&'a Version> {
        self.doc
            .history
            .chain(self.view)
            .into_iter()
            .map(|k| self.doc.history.version(k))
            .collect()
    }

    fn walk(
        &self,
        step: impl Fn(&Links<LineKey>) -> Option<LineKey>,
        boundary: impl Fn(&crate::block::Block) -> LineKey,
    ) -> Option<Line<'a>> {
        let doc = self.doc;
        let stop = boundary(doc.blocks.get(&self.block)?);
        let mut cursor = self.node;
        while cursor != stop {
            cursor = step(&doc.lines.get(cursor)?.links)?;
            let node = &doc.lines[cursor];
            if let Some(view) = node.observers.get(&self.block) {
                if doc.history.head(*view).is_active() {
                    return Some(Line::new(doc, self.block, cursor, *view));
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for Line<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("block", &self.block)
            .field("node", &self.node)
            .field("content", &self.content())
            .finish()
    }
}
