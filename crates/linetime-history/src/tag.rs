//! Tag checkpoints.

use std::collections::HashMap;

use linetime_types::{BlockId, TagId, TagInfo, now_millis};

use crate::block::Tag;
use crate::document::Document;
use crate::Result;
use crate::error::HistoryError;

impl Document {
    /// Record the current head of every line in `block`.
    ///
    /// Without a name the tag is called `Tag N` and flagged so an external
    /// namer can suggest something better.
    pub fn create_tag(
        &mut self,
        block: BlockId,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<TagInfo> {
        let mut heads = HashMap::new();
        for node in self.nodes_in(block)? {
            let view = self.view_of(node, block)?;
            heads.insert(node, self.history.view(view).head());
        }
        let text = self.text(block)?;
        let timestamp = self.clock.next();

        let b = self.block_mut(block)?;
        let needs_name = name.is_none();
        let name = name.unwrap_or_else(|| format!("Tag {}", b.tags.len() + 1));
        let tag = Tag {
            id: TagId::new(),
            block,
            name,
            description,
            text,
            timestamp,
            needs_name,
            heads,
            created_at: now_millis(),
        };
        let info = tag.info();
        b.tags.insert(tag.id, tag);

        tracing::debug!(%block, tag = %info.id, name = %info.name, "tag created");
        Ok(info)
    }

    /// Restore `block` to a tag.
    ///
    /// Lines created after the tag fall back to their placeholder. Any other
    /// line the tag has no head for fails the whole load before anything
    /// moves.
    pub fn load_tag(&mut self, block: BlockId, tag: TagId) -> Result<()> {
        self.reset_version_merging(block)?;
        let heads = self
            .block(block)?
            .tags
            .get(&tag)
            .map(|t| t.heads.clone())
            .ok_or(HistoryError::TagNotFound(tag))?;

        let mut plan = Vec::new();
        for node in self.nodes_in(block)? {
            let view = self.view_of(node, block)?;
            let target = match heads.get(&node) {
                Some(version) => self
                    .history
                    .versions
                    .get(*version)
                    .filter(|v| v.view == view)
                    .map(|_| *version),
                None => self
                    .history
                    .view(view)
                    .chain
                    .first()
                    .filter(|first| self.history.version(*first).is_pre_insertion()),
            };
            let target = target.ok_or(HistoryError::TagMismatch { tag, block })?;
            plan.push((view, target));
        }

        let jump = self.clock.next();
        for (view, version) in plan {
            self.history.set_head(view, version, jump);
        }
        tracing::debug!(%block, %tag, "tag loaded");
        Ok(())
    }

    pub fn tag(&self, block: BlockId, tag: TagId) -> Result<&Tag> {
        self.block(block)?.tags.get(&tag).ok_or(HistoryError::TagNotFound(tag))
    }

    /// Tags of `block` in creation order.
    pub fn list_tags(&self, block: BlockId) -> Result<Vec<TagInfo>> {
        Ok(self.block(block)?.tags().map(Tag::info).collect())
    }
}
