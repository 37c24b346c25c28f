//! Child blocks, clones and block deletion.

use std::collections::{HashMap, HashSet};

use linetime_types::{BlockId, LineRange};

use crate::block::{Block, BlockVariant};
use crate::document::Document;
use crate::edit::check_line_range;
use crate::Result;
use crate::error::HistoryError;
use crate::line::{LineKey, LineKind, LineNode};

impl Document {
    // =========================================================================
    // Children
    // =========================================================================

    /// Carve an inline child over active lines `range` of `parent`.
    ///
    /// Returns `Ok(None)` when the range touches an existing child; a shared
    /// boundary line counts as overlap.
    pub fn create_child(&mut self, parent: BlockId, range: LineRange) -> Result<Option<BlockId>> {
        let (first, last) = self.bounds_in(parent, range)?;
        if let Some(sibling) = self.overlapping_child(parent, first, last, None)? {
            tracing::warn!(%parent, %sibling, ?range, "child range overlaps an existing child");
            return Ok(None);
        }

        let p = self.block(parent)?;
        let id = BlockId::new();
        let mut child = Block::new(id, p.eol, BlockVariant::Inline { parent }, first, last);
        child.version_merging = p.version_merging;

        for node in self.span(parent, first, last)? {
            let view = self.view_of(node, parent)?;
            self.lines[node].observers.insert(id, view);
        }
        self.blocks.insert(id, child);
        self.block_mut(parent)?.children.push(id);

        tracing::debug!(%parent, child = %id, ?range, "child created");
        Ok(Some(id))
    }

    /// Move an inline child to active lines `range` of its parent.
    ///
    /// Grandchildren anchored to the old first or last line follow the
    /// boundary; any left inverted or outside the new range are deleted.
    pub fn update_in_parent(&mut self, child: BlockId, range: LineRange) -> Result<()> {
        let parent = self
            .block(child)?
            .parent()
            .ok_or(HistoryError::Unsupported(child, "moving a block without a parent"))?;
        let (first, last) = self.bounds_in(parent, range)?;
        if self.overlapping_child(parent, first, last, Some(child))?.is_some() {
            return Err(HistoryError::Overlap(child));
        }
        self.rebind(child, first, last)?;
        tracing::debug!(%child, ?range, "child moved");
        Ok(())
    }

    fn rebind(&mut self, id: BlockId, first: LineKey, last: LineKey) -> Result<()> {
        let parent = self
            .block(id)?
            .parent()
            .ok_or(HistoryError::Unsupported(id, "moving a block without a parent"))?;
        let span = self.span(parent, first, last)?;
        let keep: HashSet<LineKey> = span.iter().copied().collect();

        for node in self.nodes_in(id)? {
            if !keep.contains(&node) {
                self.lines[node].observers.remove(&id);
            }
        }
        for node in &span {
            let view = self.view_of(*node, parent)?;
            self.lines[*node].observers.entry(id).or_insert(view);
        }

        let block = self.block_mut(id)?;
        let (old_first, old_last) = (block.first, block.last);
        block.first = first;
        block.last = last;
        let children = block.children.clone();

        let positions: HashMap<LineKey, usize> = span.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        for grandchild in children {
            let g = self.block(grandchild)?;
            let g_first = if g.first == old_first { first } else { g.first };
            let g_last = if g.last == old_last { last } else { g.last };
            match (positions.get(&g_first), positions.get(&g_last)) {
                (Some(s), Some(e)) if s <= e => self.rebind(grandchild, g_first, g_last)?,
                _ => {
                    tracing::debug!(block = %grandchild, "child no longer fits, deleting");
                    self.delete_block(grandchild)?;
                }
            }
        }
        Ok(())
    }

    /// Active-line range of `block` resolved to boundary nodes.
    fn bounds_in(&self, block: BlockId, range: LineRange) -> Result<(LineKey, LineKey)> {
        let active = self.active_nodes(block)?;
        check_line_range(range, active.len())?;
        Ok((active[range.start - 1], active[range.end - 1]))
    }

    /// Nodes `block` observes from `first` through `last`.
    fn span(&self, block: BlockId, first: LineKey, last: LineKey) -> Result<Vec<LineKey>> {
        let nodes = self.nodes_in(block)?;
        let start = nodes.iter().position(|n| *n == first);
        let end = nodes.iter().position(|n| *n == last);
        match start.zip(end) {
            Some((s, e)) if s <= e => Ok(nodes[s..=e].to_vec()),
            _ => Err(HistoryError::NotObserved(block)),
        }
    }

    fn overlapping_child(
        &self,
        parent: BlockId,
        first: LineKey,
        last: LineKey,
        except: Option<BlockId>,
    ) -> Result<Option<BlockId>> {
        let positions: HashMap<LineKey, usize> = self
            .nodes_in(parent)?
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect();
        let (Some(&start), Some(&end)) = (positions.get(&first), positions.get(&last)) else {
            return Err(HistoryError::NotObserved(parent));
        };

        for sibling in &self.block(parent)?.children {
            if Some(*sibling) == except {
                continue;
            }
            let s = self.block(*sibling)?;
            if let (Some(&s_start), Some(&s_end)) = (positions.get(&s.first), positions.get(&s.last)) {
                if start <= s_end && s_start <= end {
                    return Ok(Some(*sibling));
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete a block and its children. Nodes nobody observes any more
    /// leave the sequence; lines shared with other blocks stay.
    pub fn delete_block(&mut self, id: BlockId) -> Result<()> {
        if id == self.root {
            return Err(HistoryError::Unsupported(id, "deleting the document root"));
        }
        let children = self.block(id)?.children.clone();
        for child in children {
            self.delete_block(child)?;
        }

        let owns_views = matches!(self.block(id)?.variant, BlockVariant::Fork { .. });
        for node in self.nodes_in(id)? {
            let Some(view) = self.lines[node].observers.remove(&id) else { continue };
            if owns_views && !self.lines[node].observers.values().any(|v| *v == view) {
                self.history.remove_view(view);
            }
            if self.lines[node].observers.is_empty() {
                self.sequence.unlink(&mut self.lines, node);
                self.lines.remove(node);
            }
        }

        let block = self.block_mut(id)?;
        block.deleted = true;
        block.children.clear();
        block.tags.clear();
        block.last_modified = None;
        if let Some(parent) = block.parent() {
            if let Ok(p) = self.block_mut(parent) {
                p.children.retain(|c| *c != id);
            }
        }
        tracing::debug!(block = %id, "block deleted");
        Ok(())
    }

    // =========================================================================
    // Clones
    // =========================================================================

    /// Fork `source` into an independent block sharing its active lines.
    ///
    /// Each line starts from a copy of the source's current head; edits on
    /// either side do not affect the other. Children and tags stay behind.
    pub fn clone_block(&mut self, source: BlockId) -> Result<BlockId> {
        let src = self.block(source)?;
        let (eol, merging, src_last) = (src.eol, src.version_merging, src.last);
        let active = self.active_nodes(source)?;
        let id = BlockId::new();

        let (first, last) = match (active.first(), active.last()) {
            (Some(first), Some(last)) => {
                for node in &active {
                    let src_view = self.view_of(*node, source)?;
                    let head = self.history.view(src_view).head();
                    let view = self.history.create_cloned(*node, id, head, &self.clock);
                    self.lines[*node].observers.insert(id, view);
                }
                (*first, *last)
            }
            _ => {
                let node = self.lines.insert(LineNode::new(LineKind::Original));
                self.sequence.insert_after(&mut self.lines, Some(src_last), node);
                let view = self.history.create_original(node, id, "", &self.clock);
                self.lines[node].observers.insert(id, view);
                (node, node)
            }
        };

        let mut block = Block::new(id, eol, BlockVariant::Fork { origin: Some(source) }, first, last);
        block.version_merging = merging;
        self.blocks.insert(id, block);
        tracing::debug!(%source, clone = %id, lines = active.len(), "block cloned");
        Ok(id)
    }
}
