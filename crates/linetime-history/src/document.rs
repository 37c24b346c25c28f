//! The line document: one shared line sequence and the blocks over it.
//!
//! # Model
//!
//! ```text
//! sequence:  L1 ─ L2 ─ N ─ L3 ─ L4          (document order, all blocks)
//!            │    │    │    │    │
//! observers: R    R,C  R,C  R,C  R          R = root, C = inline child
//!            │    │    │    │    │
//! views:     v1   v2   v3   v4   v5         one per owning fork, shared by
//!                                           inline descendants
//! ```
//!
//! A block's lines are the nodes between its `first` and `last` boundary
//! that list it as an observer. Its *active* lines are those whose head
//! version (in the view the block reads) is active; line numbers are
//! 1-based over active lines only.

use std::collections::HashMap;
use std::sync::Arc;

use linetime_types::{BlockId, BlockInfo, Eol, LineRange};

use crate::arena::{Arena, List};
use crate::block::{Block, BlockVariant};
use crate::clock::Clock;
use crate::Result;
use crate::error::HistoryError;
use crate::history::{History, ViewKey};
use crate::line::{Line, LineKey, LineKind, LineNode};

/// Split raw content into lines. A trailing terminator yields a final empty
/// line, matching what an editor shows.
pub(crate) fn split_lines(content: &str) -> Vec<String> {
    content.replace("\r\n", "\n").split('\n').map(str::to_string).collect()
}

/// A versioned text document.
pub struct Document {
    pub(crate) clock: Arc<Clock>,
    pub(crate) lines: Arena<LineKey, LineNode>,
    pub(crate) sequence: List<LineKey>,
    pub(crate) history: History,
    pub(crate) blocks: HashMap<BlockId, Block>,
    pub(crate) root: BlockId,
}

impl Document {
    /// Build a document whose root block holds `content`.
    ///
    /// The EOL symbol is detected from the content when not given.
    pub fn from_content(content: &str, eol: Option<Eol>, clock: Arc<Clock>) -> Self {
        let eol = eol.unwrap_or_else(|| Eol::detect(content));
        let root = BlockId::new();
        let mut lines: Arena<LineKey, LineNode> = Arena::new();
        let mut sequence = List::new();
        let mut history = History::new();

        let mut push = |text: &str| {
            let node = lines.insert(LineNode::new(LineKind::Original));
            sequence.push_back(&mut lines, node);
            let view = history.create_original(node, root, text, &clock);
            lines[node].observers.insert(root, view);
            node
        };
        let mut texts = split_lines(content).into_iter();
        let first = push(&texts.next().unwrap_or_default());
        let last = texts.fold(first, |_, text| push(&text));

        let mut blocks = HashMap::new();
        blocks.insert(root, Block::new(root, eol, BlockVariant::Fork { origin: None }, first, last));
        tracing::debug!(%root, lines = sequence.len(), "document built");

        Self {
            clock,
            lines,
            sequence,
            history,
            blocks,
            root,
        }
    }

    /// Set the root block's default merging mode. Blocks created later
    /// inherit it from their parent or source.
    pub fn with_version_merging(mut self, enabled: bool) -> Self {
        if let Some(root) = self.blocks.get_mut(&self.root) {
            root.version_merging = enabled;
        }
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn eol(&self) -> Eol {
        self.blocks.get(&self.root).map(Block::eol).unwrap_or_default()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// A live block.
    pub fn block(&self, id: BlockId) -> Result<&Block> {
        match self.blocks.get(&id) {
            Some(block) if block.deleted => Err(HistoryError::BlockDeleted(id)),
            Some(block) => Ok(block),
            None => Err(HistoryError::BlockNotFound(id)),
        }
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        match self.blocks.get_mut(&id) {
            Some(block) if block.deleted => Err(HistoryError::BlockDeleted(id)),
            Some(block) => Ok(block),
            None => Err(HistoryError::BlockNotFound(id)),
        }
    }

    /// Ids of every live block, in no particular order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.values().filter(|b| !b.deleted).map(Block::id).collect()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.block(id).is_ok()
    }

    /// The block and its inline ancestors, ending at the fork that owns the
    /// version state.
    pub(crate) fn ancestry(&self, id: BlockId) -> Result<Vec<BlockId>> {
        let mut chain = vec![id];
        let mut current = self.block(id)?;
        while let BlockVariant::Inline { parent } = current.variant {
            chain.push(parent);
            current = self.block(parent)?;
        }
        Ok(chain)
    }

    /// The fork whose views `id` reads.
    pub fn owner_of(&self, id: BlockId) -> Result<BlockId> {
        let chain = self.ancestry(id)?;
        Ok(chain[chain.len() - 1])
    }

    // =========================================================================
    // Line resolution
    // =========================================================================

    /// Every node the block observes, active or not, in document order.
    pub(crate) fn nodes_in(&self, id: BlockId) -> Result<Vec<LineKey>> {
        let block = self.block(id)?;
        let mut nodes = Vec::new();
        let mut cursor = Some(block.first);
        while let Some(key) = cursor {
            let Some(node) = self.lines.get(key) else { break };
            if node.observers.contains_key(&id) {
                nodes.push(key);
            }
            if key == block.last {
                break;
            }
            cursor = node.links.next;
        }
        Ok(nodes)
    }

    /// Nodes whose head, as seen by `id`, is active.
    pub(crate) fn active_nodes(&self, id: BlockId) -> Result<Vec<LineKey>> {
        let nodes = self.nodes_in(id)?;
        Ok(nodes
            .into_iter()
            .filter(|n| {
                self.lines[*n]
                    .observers
                    .get(&id)
                    .is_some_and(|view| self.history.head(*view).is_active())
            })
            .collect())
    }

    pub(crate) fn view_of(&self, node: LineKey, block: BlockId) -> Result<ViewKey> {
        self.lines
            .get(node)
            .and_then(|n| n.observers.get(&block).copied())
            .ok_or(HistoryError::NotObserved(block))
    }

    /// The node at 1-based active line `number`.
    pub(crate) fn active_node(&self, block: BlockId, number: usize) -> Result<LineKey> {
        let active = self.active_nodes(block)?;
        if number == 0 || number > active.len() {
            return Err(HistoryError::LineOutOfRange {
                line: number,
                len: active.len(),
            });
        }
        Ok(active[number - 1])
    }

    /// The active lines of a block.
    pub fn lines(&self, block: BlockId) -> Result<Vec<Line<'_>>> {
        self.active_nodes(block)?
            .into_iter()
            .map(|node| Ok(Line::new(self, block, node, self.view_of(node, block)?)))
            .collect()
    }

    /// Active line `number` (1-based).
    pub fn line(&self, block: BlockId, number: usize) -> Result<Line<'_>> {
        let node = self.active_node(block, number)?;
        Ok(Line::new(self, block, node, self.view_of(node, block)?))
    }

    pub fn line_count(&self, block: BlockId) -> Result<usize> {
        Ok(self.active_nodes(block)?.len())
    }

    // =========================================================================
    // Text
    // =========================================================================

    /// The block's active lines joined with its EOL symbol.
    pub fn text(&self, block: BlockId) -> Result<String> {
        let eol = self.block(block)?.eol;
        let lines = self.lines(block)?;
        Ok(lines.iter().map(|l| l.content()).collect::<Vec<_>>().join(eol.as_str()))
    }

    /// Text of the fork that contains `block`.
    pub fn root_text(&self, block: BlockId) -> Result<String> {
        self.text(self.owner_of(block)?)
    }

    /// Text of the document root.
    pub fn full_text(&self) -> Result<String> {
        self.text(self.root)
    }

    // =========================================================================
    // Info
    // =========================================================================

    pub fn block_info(&self, id: BlockId) -> Result<BlockInfo> {
        let block = self.block(id)?;
        let active = self.active_nodes(id)?;
        let range = match (block.parent(), active.first(), active.last()) {
            (_, None, _) | (_, _, None) => None,
            (None, Some(_), Some(_)) => Some(LineRange::new(1, active.len())),
            (Some(parent), Some(first), Some(last)) => {
                let outer = self.active_nodes(parent)?;
                let start = outer.iter().position(|n| n == first);
                let end = outer.iter().position(|n| n == last);
                start.zip(end).map(|(s, e)| LineRange::new(s + 1, e + 1))
            }
        };
        let timeline = self.timeline(id)?;

        Ok(BlockInfo {
            id,
            kind: block.kind(),
            parent: block.parent(),
            origin: block.origin(),
            range,
            line_count: active.len(),
            version_count: timeline.len(),
            version_index: self.current_version_index(id)?,
            children: block.children.clone(),
            tag_count: block.tags.len(),
        })
    }

    pub fn children_info(&self, id: BlockId) -> Result<Vec<BlockInfo>> {
        let children = self.block(id)?.children.clone();
        children.into_iter().map(|child| self.block_info(child)).collect()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root)
            .field("lines", &self.sequence.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
