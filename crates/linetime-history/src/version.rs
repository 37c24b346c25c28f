//! Version nodes.

use serde::{Deserialize, Serialize};

use crate::arena::{Linked, Links, arena_key};
use crate::clock::Timestamp;
use crate::history::ViewKey;

arena_key!(
    /// Address of a [`Version`] in a document's version arena.
    VersionKey
);

/// Why a version exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    /// First version of a line that existed when its owner was built
    /// (loaded from content, or cloned from another block).
    Original,
    /// Inactive placeholder for "this inserted line does not exist yet".
    PreInsertion,
    /// Content written by an edit.
    Edit,
    /// Inactive marker for "this line was deleted".
    Deletion,
    /// Copy of an older head appended so an edit made after rewinding
    /// extends the chain instead of rewriting it.
    Branch,
}

/// One line's content at one timestamp.
///
/// Immutable once created except `content`, which the owning history may
/// rewrite while the version is still the line's head.
#[derive(Clone, Debug)]
pub struct Version {
    pub(crate) view: ViewKey,
    pub(crate) timestamp: Timestamp,
    pub(crate) kind: VersionKind,
    pub(crate) active: bool,
    pub(crate) content: String,
    pub(crate) origin: Option<VersionKey>,
    pub(crate) links: Links<VersionKey>,
}

impl Version {
    pub(crate) fn new(
        view: ViewKey,
        timestamp: Timestamp,
        kind: VersionKind,
        active: bool,
        content: impl Into<String>,
        origin: Option<VersionKey>,
    ) -> Self {
        Self {
            view,
            timestamp,
            kind,
            active,
            content: content.into(),
            origin,
            links: Links::default(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn kind(&self) -> VersionKind {
        self.kind
    }

    /// Whether the line exists in this version.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// The version this one was copied from. Provenance only.
    pub fn origin(&self) -> Option<VersionKey> {
        self.origin
    }

    pub fn previous(&self) -> Option<VersionKey> {
        self.links.prev
    }

    pub fn next(&self) -> Option<VersionKey> {
        self.links.next
    }

    pub fn is_pre_insertion(&self) -> bool {
        self.kind == VersionKind::PreInsertion
    }
}

impl Linked<VersionKey> for Version {
    fn links(&self) -> &Links<VersionKey> {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links<VersionKey> {
        &mut self.links
    }
}
