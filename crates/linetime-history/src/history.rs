//! Per-line version history.
//!
//! Each line position has one [`LineView`] per owning block (a document root
//! or a clone). The view holds the line's version chain, the current head,
//! and a log of explicit head jumps. Inline blocks share their owner's view.
//!
//! The chain is append-only. Rewinding moves the head; editing a rewound
//! head first appends a `Branch` copy, so earlier versions never change
//! except by the fold rule on the current head.

use linetime_types::BlockId;

use crate::arena::{Arena, List, arena_key};
use crate::clock::{Clock, Timestamp};
use crate::line::LineKey;
use crate::version::{Version, VersionKey, VersionKind};

arena_key!(
    /// Address of a [`LineView`].
    ViewKey
);

/// Head re-pointed at `timestamp` by a time-travel operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HeadEvent {
    pub(crate) timestamp: Timestamp,
    pub(crate) version: VersionKey,
}

/// One owner's version state for one line position.
#[derive(Clone, Debug)]
pub struct LineView {
    pub(crate) node: LineKey,
    pub(crate) owner: BlockId,
    pub(crate) chain: List<VersionKey>,
    pub(crate) head: VersionKey,
    pub(crate) head_log: Vec<HeadEvent>,
}

impl LineView {
    pub fn node(&self) -> LineKey {
        self.node
    }

    /// The fork or root block whose history this is.
    pub fn owner(&self) -> BlockId {
        self.owner
    }

    pub fn head(&self) -> VersionKey {
        self.head
    }

    pub fn version_count(&self) -> usize {
        self.chain.len()
    }
}

/// Arena of views and versions for one document.
#[derive(Default)]
pub struct History {
    pub(crate) versions: Arena<VersionKey, Version>,
    pub(crate) views: Arena<ViewKey, LineView>,
}

/// Trailing whitespace never starts a new version on its own.
fn same_ignoring_trailing_ws(a: &str, b: &str) -> bool {
    a.trim_end() == b.trim_end()
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self, key: VersionKey) -> &Version {
        &self.versions[key]
    }

    pub fn view(&self, key: ViewKey) -> &LineView {
        &self.views[key]
    }

    pub fn head(&self, view: ViewKey) -> &Version {
        &self.versions[self.views[view].head]
    }

    pub fn is_head(&self, version: VersionKey) -> bool {
        let view = self.versions[version].view;
        self.views[view].head == version
    }

    /// Versions of a view, oldest first.
    pub fn chain(&self, view: ViewKey) -> Vec<VersionKey> {
        self.views[view].chain.iter(&self.versions).collect()
    }

    // =========================================================================
    // View construction
    // =========================================================================

    fn create_view(&mut self, node: LineKey, owner: BlockId, first: Version) -> ViewKey {
        let first = self.versions.insert(first);
        let view = self.views.insert(LineView {
            node,
            owner,
            chain: List::new(),
            head: first,
            head_log: Vec::new(),
        });
        self.versions[first].view = view;
        let mut chain = List::new();
        chain.push_back(&mut self.versions, first);
        self.views[view].chain = chain;
        view
    }

    /// View for a line that exists from the start: one active version.
    pub fn create_original(&mut self, node: LineKey, owner: BlockId, content: &str, clock: &Clock) -> ViewKey {
        let ts = clock.next();
        self.create_view(
            node,
            owner,
            Version::new(ViewKey::placeholder(), ts, VersionKind::Original, true, content, None),
        )
    }

    /// View for a newly inserted line: placeholder, then content.
    pub fn create_inserted(&mut self, node: LineKey, owner: BlockId, content: &str, clock: &Clock) -> ViewKey {
        let ts = clock.next();
        let view = self.create_view(
            node,
            owner,
            Version::new(ViewKey::placeholder(), ts, VersionKind::PreInsertion, false, "", None),
        );
        self.append(view, VersionKind::Edit, true, content.to_string(), None, clock);
        view
    }

    /// View for a clone: starts at a copy of the origin's head.
    pub fn create_cloned(&mut self, node: LineKey, owner: BlockId, origin: VersionKey, clock: &Clock) -> ViewKey {
        let ts = clock.next();
        let content = self.versions[origin].content.clone();
        self.create_view(
            node,
            owner,
            Version::new(ViewKey::placeholder(), ts, VersionKind::Original, true, content, Some(origin)),
        )
    }

    pub fn remove_view(&mut self, view: ViewKey) {
        if let Some(removed) = self.views.remove(view) {
            let chain: Vec<_> = removed.chain.iter(&self.versions).collect();
            for version in chain {
                self.versions.remove(version);
            }
        }
    }

    fn append(
        &mut self,
        view: ViewKey,
        kind: VersionKind,
        active: bool,
        content: String,
        origin: Option<VersionKey>,
        clock: &Clock,
    ) -> VersionKey {
        let ts = clock.next();
        let key = self.versions.insert(Version::new(view, ts, kind, active, content, origin));
        let mut chain = self.views[view].chain;
        chain.push_back(&mut self.versions, key);
        let line = &mut self.views[view];
        line.chain = chain;
        line.head = key;
        key
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Record new content for a line.
    ///
    /// `consecutive` is set when the line is the editing block's last
    /// modified line with merging enabled.
    pub fn update(&mut self, view: ViewKey, content: &str, consecutive: bool, clock: &Clock) -> VersionKey {
        let head = self.views[view].head;
        {
            let current = &self.versions[head];
            if current.active && current.content == content {
                return head;
            }
        }

        if self.views[view].chain.last() != Some(head) {
            self.clone_head_to_end(view, clock);
        }

        let head = self.views[view].head;
        let current = &self.versions[head];
        if current.active && current.kind == VersionKind::Edit {
            let whitespace_only = same_ignoring_trailing_ws(&current.content, content)
                && current
                    .links
                    .prev
                    .map(|prev| same_ignoring_trailing_ws(&self.versions[prev].content, content))
                    .unwrap_or(true);
            if whitespace_only || consecutive {
                tracing::trace!(?view, "folding edit into head");
                self.versions[head].content = content.to_string();
                return head;
            }
        }

        self.append(view, VersionKind::Edit, true, content.to_string(), None, clock)
    }

    /// Mark the line absent from now on. Never folded.
    pub fn delete(&mut self, view: ViewKey, clock: &Clock) -> VersionKey {
        let line = &self.views[view];
        let head = line.head;
        let origin = (line.chain.last() != Some(head)).then_some(head);
        let content = self.versions[head].content.clone();
        self.append(view, VersionKind::Deletion, false, content, origin, clock)
    }

    /// Append a copy of the current head and make it head.
    pub fn clone_head_to_end(&mut self, view: ViewKey, clock: &Clock) -> VersionKey {
        let head = self.views[view].head;
        let (active, content) = {
            let current = &self.versions[head];
            (current.active, current.content.clone())
        };
        self.append(view, VersionKind::Branch, active, content, Some(head), clock)
    }

    // =========================================================================
    // Time travel
    // =========================================================================

    /// The version that was showing at `at`.
    ///
    /// Takes the latest version not newer than `at` (the first version when
    /// the line is younger than `at`), then lets any head jump between that
    /// version and `at` override it.
    pub fn get_version(&self, view: ViewKey, at: Timestamp) -> VersionKey {
        let line = &self.views[view];
        let found = line
            .chain
            .iter_rev(&self.versions)
            .find(|key| self.versions[*key].timestamp <= at)
            .or(line.chain.first())
            .unwrap_or(line.head);
        let found_ts = self.versions[found].timestamp;

        line.head_log
            .iter()
            .rev()
            .find(|event| event.timestamp > found_ts && event.timestamp < at)
            .map(|event| event.version)
            .unwrap_or(found)
    }

    /// Move the head to whatever was showing at `at`, logging the jump at `jump`.
    pub fn load_timestamp(&mut self, view: ViewKey, at: Timestamp, jump: Timestamp) -> VersionKey {
        let line = &self.views[view];
        let head = line.head;
        if line.chain.last() == Some(head) {
            let head_ts = self.versions[head].timestamp;
            let repointed_since = line.head_log.last().is_some_and(|e| e.timestamp > head_ts);
            if head_ts <= at && !repointed_since {
                return head;
            }
        }
        let target = self.get_version(view, at);
        self.set_head(view, target, jump);
        target
    }

    /// Point the head at `version`. Returns whether it moved.
    pub fn set_head(&mut self, view: ViewKey, version: VersionKey, jump: Timestamp) -> bool {
        let line = &mut self.views[view];
        if line.head == version {
            return false;
        }
        line.head = version;
        match line.head_log.last_mut() {
            Some(last) if last.timestamp == jump => last.version = version,
            _ => line.head_log.push(HeadEvent {
                timestamp: jump,
                version,
            }),
        }
        true
    }
}

impl ViewKey {
    /// Stand-in until the view that owns a first version exists.
    fn placeholder() -> Self {
        <Self as crate::arena::ArenaKey>::from_index(u32::MAX as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaKey;

    fn setup() -> (History, Clock, LineKey, BlockId) {
        (History::new(), Clock::new(), LineKey::from_index(0), BlockId::new())
    }

    fn contents(history: &History, view: ViewKey) -> Vec<String> {
        history
            .chain(view)
            .into_iter()
            .map(|k| history.version(k).content().to_string())
            .collect()
    }

    #[test]
    fn test_update_unchanged_is_noop() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "same", &clock);
        let head = h.view(view).head();
        assert_eq!(h.update(view, "same", false, &clock), head);
        assert_eq!(h.view(view).version_count(), 1);
    }

    #[test]
    fn test_trailing_whitespace_folds_after_first_edit() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "foo", &clock);

        h.update(view, "foo ", false, &clock);
        h.update(view, "foo  ", false, &clock);

        assert_eq!(h.view(view).version_count(), 2);
        assert_eq!(h.head(view).content(), "foo  ");
        assert_eq!(contents(&h, view), vec!["foo", "foo  "]);
    }

    #[test]
    fn test_consecutive_edits_fold() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "a", &clock);
        h.update(view, "ab", false, &clock);
        h.update(view, "abc", true, &clock);
        assert_eq!(contents(&h, view), vec!["a", "abc"]);

        h.update(view, "abcd", false, &clock);
        assert_eq!(contents(&h, view), vec!["a", "abc", "abcd"]);
    }

    #[test]
    fn test_original_version_is_never_folded() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "a", &clock);
        h.update(view, "ab", true, &clock);
        assert_eq!(contents(&h, view), vec!["a", "ab"]);
    }

    #[test]
    fn test_inserted_line_starts_with_placeholder() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_inserted(node, owner, "new", &clock);
        let chain = h.chain(view);
        assert_eq!(chain.len(), 2);
        assert!(h.version(chain[0]).is_pre_insertion());
        assert!(!h.version(chain[0]).is_active());
        assert!(h.version(chain[1]).is_active());
        assert_eq!(h.view(view).head(), chain[1]);
    }

    #[test]
    fn test_delete_appends_inactive_version() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "x", &clock);
        let deleted = h.delete(view, &clock);
        assert!(!h.version(deleted).is_active());
        assert_eq!(h.version(deleted).kind(), VersionKind::Deletion);
        assert_eq!(h.view(view).version_count(), 2);
    }

    #[test]
    fn test_chain_timestamps_strictly_increase() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_inserted(node, owner, "a", &clock);
        for text in ["b", "c", "d"] {
            h.update(view, text, false, &clock);
        }
        h.delete(view, &clock);
        let stamps: Vec<_> = h.chain(view).iter().map(|k| h.version(*k).timestamp()).collect();
        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_get_version_before_creation_returns_first() {
        let (mut h, clock, node, owner) = setup();
        clock.next();
        clock.next();
        let view = h.create_inserted(node, owner, "late", &clock);
        let first = h.chain(view)[0];
        assert_eq!(h.get_version(view, Timestamp::new(1)), first);
    }

    #[test]
    fn test_edit_after_rewind_branches() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "v1", &clock);
        let original = h.view(view).head();
        h.update(view, "v2", false, &clock);

        let jump = clock.next();
        h.set_head(view, original, jump);
        h.update(view, "v3", false, &clock);

        let chain = h.chain(view);
        let kinds: Vec<_> = chain.iter().map(|k| h.version(*k).kind()).collect();
        assert_eq!(
            kinds,
            vec![VersionKind::Original, VersionKind::Edit, VersionKind::Branch, VersionKind::Edit]
        );
        assert_eq!(h.version(chain[1]).content(), "v2");
        assert_eq!(h.version(chain[2]).origin(), Some(original));
        assert_eq!(h.head(view).content(), "v3");
    }

    #[test]
    fn test_head_jump_is_respected_by_later_queries() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "v1", &clock);
        let v1 = h.view(view).head();
        let v2 = h.update(view, "v2", false, &clock);

        let jump = clock.next();
        h.set_head(view, v1, jump);
        let after_jump = clock.next();

        assert_eq!(h.get_version(view, after_jump), v1);
        assert_eq!(h.get_version(view, h.version(v2).timestamp()), v2);
    }

    #[test]
    fn test_load_timestamp_fast_path_keeps_head() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "v1", &clock);
        let v2 = h.update(view, "v2", false, &clock);
        let later = clock.next();
        let jump = clock.next();
        assert_eq!(h.load_timestamp(view, later, jump), v2);
        assert!(h.view(view).head_log.is_empty());
    }

    #[test]
    fn test_load_timestamp_rewinds_and_logs() {
        let (mut h, clock, node, owner) = setup();
        let view = h.create_original(node, owner, "v1", &clock);
        let v1 = h.view(view).head();
        let v1_ts = h.version(v1).timestamp();
        h.update(view, "v2", false, &clock);
        let jump = clock.next();

        assert_eq!(h.load_timestamp(view, v1_ts, jump), v1);
        assert_eq!(h.view(view).head_log, vec![HeadEvent { timestamp: jump, version: v1 }]);
    }
}
