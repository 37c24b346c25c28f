//! Line edits on a block.
//!
//! Every edit returns the set of blocks that observed the change, so the
//! caller can refresh exactly those.

use std::collections::BTreeSet;

use linetime_types::{BlockId, LineRange, TextRange};

use crate::document::{Document, split_lines};
use crate::Result;
use crate::error::HistoryError;
use crate::history::ViewKey;
use crate::line::{LineKey, LineKind, LineNode};

/// Blocks touched by an edit.
pub type Affected = BTreeSet<BlockId>;

impl Document {
    // =========================================================================
    // Version merging
    // =========================================================================

    /// Forget the block's last modified line, so the next edit starts a
    /// fresh version.
    pub fn reset_version_merging(&mut self, block: BlockId) -> Result<()> {
        self.block_mut(block)?.last_modified = None;
        Ok(())
    }

    fn setup_version_merging(&mut self, block: BlockId, node: LineKey) -> Result<()> {
        let block = self.block_mut(block)?;
        if block.version_merging {
            block.last_modified = Some(node);
        }
        Ok(())
    }

    pub fn set_version_merging(&mut self, block: BlockId, enabled: bool) -> Result<()> {
        let block = self.block_mut(block)?;
        block.version_merging = enabled;
        if !enabled {
            block.last_modified = None;
        }
        Ok(())
    }

    // =========================================================================
    // Single-line edits
    // =========================================================================

    /// Insert `content` so it becomes active line `number` (1-based;
    /// `len + 1` appends).
    pub fn insert_line(&mut self, block: BlockId, number: usize, content: &str) -> Result<Affected> {
        self.reset_version_merging(block)?;
        self.insert_at(block, number, content)
    }

    /// Replace the content of active line `number`.
    ///
    /// Consecutive updates to the same line fold into one version while
    /// merging is on and no structural edit intervened.
    pub fn update_line(&mut self, block: BlockId, number: usize, content: &str) -> Result<Affected> {
        let node = self.active_node(block, number)?;
        let view = self.view_of(node, block)?;
        let b = self.block(block)?;
        let consecutive = b.version_merging && b.last_modified == Some(node);

        self.history.update(view, content, consecutive, &self.clock);
        self.setup_version_merging(block, node)?;
        tracing::debug!(%block, line = number, consecutive, "line updated");
        Ok(self.observers_sharing(node, view))
    }

    /// Mark active line `number` deleted. The node stays in the sequence so
    /// earlier states can still show it.
    pub fn delete_line(&mut self, block: BlockId, number: usize) -> Result<Affected> {
        self.reset_version_merging(block)?;
        let node = self.active_node(block, number)?;
        self.delete_node(block, node)
    }

    /// Delete an inclusive range of active lines.
    pub fn delete_lines(&mut self, block: BlockId, range: LineRange) -> Result<Affected> {
        self.reset_version_merging(block)?;
        let active = self.active_nodes(block)?;
        check_line_range(range, active.len())?;

        let mut affected = Affected::new();
        for node in active[range.start - 1..range.end].iter().rev() {
            affected.extend(self.delete_node(block, *node)?);
        }
        Ok(affected)
    }

    // =========================================================================
    // Multi-line replacement
    // =========================================================================

    /// Replace the text in `range` with `text`, which may span lines.
    ///
    /// Lines outside the replaced region keep their identity. A pure
    /// insertion that starts with a line break at the end of a line, or ends
    /// with one at the start of a line, leaves that line untouched and only
    /// adds new lines after or before it.
    pub fn update_lines(&mut self, block: BlockId, range: TextRange, text: &str) -> Result<Affected> {
        self.reset_version_merging(block)?;
        let active = self.active_nodes(block)?;
        let len = active.len();
        check_text_range(range, len)?;

        let start_content = self.content_of(block, active[range.start_line - 1])?;
        let end_content = self.content_of(block, active[range.end_line - 1])?;
        let start_chars = start_content.chars().count();
        let end_chars = end_content.chars().count();
        check_column(range.start_line, range.start_column, start_chars)?;
        check_column(range.end_line, range.end_column, end_chars)?;

        let text = text.replace("\r\n", "\n");
        let prefix: String = start_content.chars().take(range.start_column - 1).collect();
        let suffix: String = end_content.chars().skip(range.end_column - 1).collect();
        let replacement = split_lines(&format!("{prefix}{text}{suffix}"));

        let pure = range.is_empty();
        let at_start = pure && range.start_column == 1;
        let at_end = pure && range.start_column == start_chars + 1;
        let start = range.start_line;
        let mut affected = Affected::new();

        if at_start && text.ends_with('\n') {
            // New lines go above; the start line's content is the last
            // replacement line and stays as it is.
            for (j, line) in replacement[..replacement.len() - 1].iter().enumerate() {
                affected.extend(self.insert_at(block, start + j, line)?);
            }
        } else if at_end && text.starts_with('\n') {
            for (j, line) in replacement[1..].iter().enumerate() {
                affected.extend(self.insert_at(block, start + 1 + j, line)?);
            }
        } else {
            let existing = &active[start - 1..range.end_line];
            let kept = existing.len().min(replacement.len());

            for node in existing[kept..].iter().rev() {
                affected.extend(self.delete_node(block, *node)?);
            }
            for (node, line) in existing[..kept].iter().zip(&replacement) {
                let view = self.view_of(*node, block)?;
                self.history.update(view, line, false, &self.clock);
                affected.extend(self.observers_sharing(*node, view));
            }
            for (j, line) in replacement.iter().enumerate().skip(kept) {
                affected.extend(self.insert_at(block, start + j, line)?);
            }
        }

        tracing::debug!(
            %block,
            start,
            end = range.end_line,
            lines = replacement.len(),
            "lines replaced"
        );
        Ok(affected)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn content_of(&self, block: BlockId, node: LineKey) -> Result<String> {
        let view = self.view_of(node, block)?;
        Ok(self.history.head(view).content().to_string())
    }

    /// Blocks reading `view` at `node`.
    pub(crate) fn observers_sharing(&self, node: LineKey, view: ViewKey) -> Affected {
        self.lines
            .get(node)
            .map(|n| n.observers_of(view).collect())
            .unwrap_or_default()
    }

    fn delete_node(&mut self, block: BlockId, node: LineKey) -> Result<Affected> {
        let view = self.view_of(node, block)?;
        self.history.delete(view, &self.clock);
        tracing::debug!(%block, ?node, "line deleted");
        Ok(self.observers_sharing(node, view))
    }

    fn insert_at(&mut self, block: BlockId, number: usize, content: &str) -> Result<Affected> {
        let active = self.active_nodes(block)?;
        if number == 0 || number > active.len() + 1 {
            return Err(HistoryError::LineOutOfRange {
                line: number,
                len: active.len(),
            });
        }
        let after = number.checked_sub(2).map(|i| active[i]);
        self.insert_node(block, after, content)
    }

    /// Splice a new node after `after` (before the block's first node when
    /// `None`) and make every block whose range now covers it observe it.
    fn insert_node(&mut self, block: BlockId, after: Option<LineKey>, content: &str) -> Result<Affected> {
        let chain = self.ancestry(block)?;
        let owner = chain[chain.len() - 1];
        let old_first = self.block(block)?.first;

        let node = self.lines.insert(LineNode::new(LineKind::Inserted));
        match after {
            Some(after) => self.sequence.insert_after(&mut self.lines, Some(after), node),
            None => self.sequence.insert_before(&mut self.lines, Some(old_first), node),
        }
        let view = self.history.create_inserted(node, owner, content, &self.clock);

        for id in &chain {
            self.lines[node].observers.insert(*id, view);
            let b = self.block_mut(*id)?;
            match after {
                None if b.first == old_first => b.first = node,
                Some(after) if b.last == after => b.last = node,
                _ => {}
            }
        }

        if let Some(after) = after {
            for id in &chain {
                let children = self.block(*id)?.children.clone();
                for child in children {
                    if !chain.contains(&child) {
                        self.absorb(child, after, node, view)?;
                    }
                }
            }
        }

        tracing::debug!(%block, ?node, "line inserted");
        Ok(self.observers_sharing(node, view))
    }

    /// A child covering `after` covers the node inserted right behind it,
    /// growing when `after` was its last line.
    fn absorb(&mut self, child: BlockId, after: LineKey, node: LineKey, view: ViewKey) -> Result<()> {
        if !self.lines[after].observers.contains_key(&child) {
            return Ok(());
        }
        self.lines[node].observers.insert(child, view);
        let b = self.block_mut(child)?;
        if b.last == after {
            b.last = node;
        }
        let grandchildren = b.children.clone();
        for grandchild in grandchildren {
            self.absorb(grandchild, after, node, view)?;
        }
        Ok(())
    }
}

pub(crate) fn check_line_range(range: LineRange, len: usize) -> Result<()> {
    if range.start == 0 || range.start > len {
        return Err(HistoryError::LineOutOfRange { line: range.start, len });
    }
    if range.end > len {
        return Err(HistoryError::LineOutOfRange { line: range.end, len });
    }
    if range.end < range.start {
        return Err(HistoryError::InvalidRange {
            start: range.start.to_string(),
            end: range.end.to_string(),
        });
    }
    Ok(())
}

fn check_text_range(range: TextRange, len: usize) -> Result<()> {
    check_line_range(LineRange::new(range.start_line, range.end_line), len)?;
    if range.start_line == range.end_line && range.end_column < range.start_column {
        return Err(HistoryError::InvalidRange {
            start: format!("{}:{}", range.start_line, range.start_column),
            end: format!("{}:{}", range.end_line, range.end_column),
        });
    }
    Ok(())
}

fn check_column(line: usize, column: usize, len: usize) -> Result<()> {
    if column == 0 || column > len + 1 {
        return Err(HistoryError::ColumnOutOfRange { line, column, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::Clock;
    use crate::version::VersionKind;

    fn doc(content: &str) -> Document {
        Document::from_content(content, None, Arc::new(Clock::new()))
    }

    fn versions_of(d: &Document, block: BlockId, number: usize) -> Vec<VersionKind> {
        d.line(block, number).unwrap().versions().iter().map(|v| v.kind()).collect()
    }

    #[test]
    fn test_insert_line_middle_and_ends() {
        let mut d = doc("a\nb");
        let root = d.root();
        d.insert_line(root, 2, "mid").unwrap();
        d.insert_line(root, 1, "top").unwrap();
        d.insert_line(root, 5, "end").unwrap();
        assert_eq!(d.full_text().unwrap(), "top\na\nmid\nb\nend");
        assert_eq!(d.line(root, 1).unwrap().kind(), LineKind::Inserted);
        assert_eq!(
            versions_of(&d, root, 1),
            vec![VersionKind::PreInsertion, VersionKind::Edit]
        );
    }

    #[test]
    fn test_insert_line_rejects_out_of_range() {
        let mut d = doc("a");
        let root = d.root();
        assert_eq!(
            d.insert_line(root, 3, "x").unwrap_err(),
            HistoryError::LineOutOfRange { line: 3, len: 1 }
        );
        assert!(d.insert_line(root, 0, "x").is_err());
    }

    #[test]
    fn test_consecutive_updates_merge() {
        let mut d = doc("a");
        let root = d.root();
        d.update_line(root, 1, "ab").unwrap();
        d.update_line(root, 1, "abc").unwrap();
        assert_eq!(versions_of(&d, root, 1).len(), 2);

        d.set_version_merging(root, false).unwrap();
        d.update_line(root, 1, "abcd").unwrap();
        assert_eq!(versions_of(&d, root, 1).len(), 3);
    }

    #[test]
    fn test_structural_edit_breaks_merge_run() {
        let mut d = doc("a\nb");
        let root = d.root();
        d.update_line(root, 1, "a1").unwrap();
        d.insert_line(root, 3, "c").unwrap();
        d.update_line(root, 1, "a2").unwrap();
        assert_eq!(
            versions_of(&d, root, 1),
            vec![VersionKind::Original, VersionKind::Edit, VersionKind::Edit]
        );
    }

    #[test]
    fn test_trailing_whitespace_does_not_grow_history() {
        let mut d = doc("foo");
        let root = d.root();
        d.set_version_merging(root, false).unwrap();
        d.update_line(root, 1, "foo ").unwrap();
        d.update_line(root, 1, "foo  ").unwrap();
        assert_eq!(versions_of(&d, root, 1).len(), 2);
        assert_eq!(d.full_text().unwrap(), "foo  ");
    }

    #[test]
    fn test_delete_lines_hides_but_keeps_nodes() {
        let mut d = doc("a\nb\nc\nd");
        let root = d.root();
        d.delete_lines(root, LineRange::new(2, 3)).unwrap();
        assert_eq!(d.full_text().unwrap(), "a\nd");
        assert_eq!(d.nodes_in(root).unwrap().len(), 4);
    }

    #[test]
    fn test_delete_lines_validates_range() {
        let mut d = doc("a\nb");
        let root = d.root();
        assert!(matches!(
            d.delete_lines(root, LineRange::new(2, 1)),
            Err(HistoryError::InvalidRange { .. })
        ));
        assert!(d.delete_lines(root, LineRange::new(1, 3)).is_err());
    }

    #[test]
    fn test_update_lines_in_place() {
        let mut d = doc("hello world\nsecond");
        let root = d.root();
        let before = d.line(root, 2).unwrap().key();
        d.update_lines(root, TextRange::new(1, 7, 1, 12), "there").unwrap();
        assert_eq!(d.full_text().unwrap(), "hello there\nsecond");
        assert_eq!(d.line(root, 2).unwrap().key(), before);
    }

    #[test]
    fn test_update_lines_newline_at_line_end_adds_after() {
        let mut d = doc("a\nb");
        let root = d.root();
        let a = d.line(root, 1).unwrap().key();
        d.update_lines(root, TextRange::caret(1, 2), "\nx").unwrap();
        assert_eq!(d.full_text().unwrap(), "a\nx\nb");
        assert_eq!(d.line(root, 1).unwrap().key(), a);
        assert_eq!(versions_of(&d, root, 1), vec![VersionKind::Original]);
        assert_eq!(d.line(root, 2).unwrap().kind(), LineKind::Inserted);
    }

    #[test]
    fn test_update_lines_newline_at_line_start_adds_before() {
        let mut d = doc("a\nb");
        let root = d.root();
        let b = d.line(root, 2).unwrap().key();
        d.update_lines(root, TextRange::caret(2, 1), "x\ny\n").unwrap();
        assert_eq!(d.full_text().unwrap(), "a\nx\ny\nb");
        assert_eq!(d.line(root, 4).unwrap().key(), b);
        assert_eq!(versions_of(&d, root, 4), vec![VersionKind::Original]);
    }

    #[test]
    fn test_update_lines_split_line() {
        let mut d = doc("abcd");
        let root = d.root();
        d.update_lines(root, TextRange::caret(1, 3), "\n").unwrap();
        assert_eq!(d.full_text().unwrap(), "ab\ncd");
        assert_eq!(d.line(root, 1).unwrap().kind(), LineKind::Original);
        assert_eq!(d.line(root, 2).unwrap().kind(), LineKind::Inserted);
    }

    #[test]
    fn test_update_lines_join_deletes_surplus() {
        let mut d = doc("one\ntwo\nthree\nfour");
        let root = d.root();
        let four = d.line(root, 4).unwrap().key();
        d.update_lines(root, TextRange::new(1, 4, 3, 1), " + ").unwrap();
        assert_eq!(d.full_text().unwrap(), "one + three\nfour");
        assert_eq!(d.line(root, 2).unwrap().key(), four);
    }

    #[test]
    fn test_update_lines_crlf_text() {
        let mut d = doc("a\r\nb");
        let root = d.root();
        d.update_lines(root, TextRange::caret(1, 2), "\r\nz").unwrap();
        assert_eq!(d.full_text().unwrap(), "a\r\nz\r\nb");
    }

    #[test]
    fn test_update_lines_rejects_bad_columns() {
        let mut d = doc("abc");
        let root = d.root();
        assert_eq!(
            d.update_lines(root, TextRange::caret(1, 5), "x").unwrap_err(),
            HistoryError::ColumnOutOfRange { line: 1, column: 5, len: 3 }
        );
        assert!(matches!(
            d.update_lines(root, TextRange::new(1, 3, 1, 2), "x"),
            Err(HistoryError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_insert_into_emptied_block() {
        let mut d = doc("only");
        let root = d.root();
        d.delete_line(root, 1).unwrap();
        assert_eq!(d.line_count(root).unwrap(), 0);
        d.insert_line(root, 1, "fresh").unwrap();
        assert_eq!(d.full_text().unwrap(), "fresh");
    }
}
