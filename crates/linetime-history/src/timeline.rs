//! Index-based time navigation.
//!
//! A block's timeline lists every selectable version of its lines in
//! timestamp order. Placeholders stand in for the content that follows
//! them, branch copies are bookkeeping, and the initial load collapses into
//! a single baseline entry at index 0.

use linetime_types::BlockId;

use crate::clock::Timestamp;
use crate::document::Document;
use crate::Result;
use crate::error::HistoryError;
use crate::version::{VersionKey, VersionKind};

impl Document {
    /// Selectable versions of `block`, oldest first.
    pub fn timeline(&self, block: BlockId) -> Result<Vec<VersionKey>> {
        let history = &self.history;
        let mut entries = Vec::new();
        for node in self.nodes_in(block)? {
            let view = self.view_of(node, block)?;
            for key in history.chain(view) {
                let version = history.version(key);
                let after_placeholder = version
                    .previous()
                    .is_some_and(|prev| history.version(prev).is_pre_insertion());
                match version.kind() {
                    VersionKind::Branch => {}
                    VersionKind::Edit if after_placeholder => {}
                    _ => entries.push(key),
                }
            }
        }
        entries.sort_by_key(|key| history.version(*key).timestamp());

        let baseline = entries
            .iter()
            .take_while(|key| history.version(**key).kind() == VersionKind::Original)
            .count();
        if baseline > 1 {
            entries.drain(1..baseline);
        }
        Ok(entries)
    }

    /// Position in the timeline of the most recent head across the block.
    pub fn current_version_index(&self, block: BlockId) -> Result<usize> {
        let timeline = self.timeline(block)?;
        let history = &self.history;

        let mut latest: Option<VersionKey> = None;
        for node in self.nodes_in(block)? {
            let head = history.view(self.view_of(node, block)?).head();
            if latest.is_none_or(|l| history.version(head).timestamp() > history.version(l).timestamp()) {
                latest = Some(head);
            }
        }
        let Some(mut key) = latest else { return Ok(0) };

        loop {
            let version = history.version(key);
            match version.kind() {
                VersionKind::Original => return Ok(0),
                VersionKind::Branch => match version.origin() {
                    Some(origin) => key = origin,
                    None => break,
                },
                VersionKind::Edit => {
                    if let Some(prev) = version.previous().filter(|p| history.version(*p).is_pre_insertion()) {
                        key = prev;
                    }
                    break;
                }
                VersionKind::PreInsertion | VersionKind::Deletion => break,
            }
        }
        Ok(timeline.iter().position(|k| *k == key).unwrap_or(0))
    }

    /// Move `block` to timeline entry `index`.
    ///
    /// Stepping onto or off an inserted line's placeholder toggles that line
    /// instead of showing the placeholder state twice.
    pub fn apply_index(&mut self, block: BlockId, index: usize) -> Result<()> {
        self.reset_version_merging(block)?;
        let timeline = self.timeline(block)?;
        if index >= timeline.len() {
            return Err(HistoryError::IndexOutOfBounds {
                index,
                len: timeline.len(),
            });
        }
        let current = self.current_version_index(block)?;

        let history = &self.history;
        let selected = timeline[index];
        let prev = index.checked_sub(1).map(|i| timeline[i]);
        let next = timeline.get(index + 1).copied();
        let latest = timeline[current];

        let is_placeholder = |key: VersionKey| history.version(key).is_pre_insertion();
        let successor = |key: VersionKey| history.version(key).next();
        let engaged = |key: VersionKey| history.is_head(key);
        let released = |key: VersionKey| successor(key).is_some_and(|n| history.is_head(n));

        let target = if prev == Some(latest) && is_placeholder(latest) && engaged(latest) {
            successor(latest)
        } else if next == Some(latest) && is_placeholder(latest) && released(latest) {
            Some(latest)
        } else if is_placeholder(selected) && (engaged(selected) || released(selected)) {
            successor(selected)
        } else {
            Some(selected)
        };
        let target = target.unwrap_or(selected);

        tracing::debug!(%block, index, current, ?target, "applying version index");
        self.apply_version(block, target)
    }

    /// Show `version` on its own line and whatever was current at its
    /// timestamp everywhere else in the block.
    pub fn apply_version(&mut self, block: BlockId, version: VersionKey) -> Result<()> {
        let (owner_view, at) = {
            let v = self.history.version(version);
            (v.view, v.timestamp())
        };
        let jump = self.clock.next();
        for node in self.nodes_in(block)? {
            let view = self.view_of(node, block)?;
            if view == owner_view {
                self.history.set_head(view, version, jump);
            } else {
                self.history.load_timestamp(view, at, jump);
            }
        }
        Ok(())
    }

    /// Show every line of `block` as it was at `at`.
    pub fn load_timestamp(&mut self, block: BlockId, at: Timestamp) -> Result<()> {
        self.reset_version_merging(block)?;
        let jump = self.clock.next();
        for node in self.nodes_in(block)? {
            let view = self.view_of(node, block)?;
            self.history.load_timestamp(view, at, jump);
        }
        tracing::debug!(%block, %at, "loaded timestamp");
        Ok(())
    }
}
