//! A session: the documents one client has open, and the rules for running
//! its requests.
//!
//! Reads share the session's lock; every write takes it exclusively, so a
//! write waits for in-flight reads and later requests wait for the write.
//! Requests that name a `previous_request_id` additionally wait for that
//! request to complete.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use linetime_history::{Clock, Document, HistoryError};
use linetime_types::{BlockId, BlockInfo, Eol, RequestId, SessionId, now_millis};
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock, broadcast};
use tracing::{debug, info};

use crate::Result;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::protocol::{Operation, Reply};
use crate::store::{ChainSnapshot, StoreHandle};

/// Notifications published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An edit changed what these blocks show.
    BlocksChanged {
        request_id: RequestId,
        blocks: Vec<BlockId>,
    },
    /// A run of version-index requests ended with `block` at this index.
    ChainSettled { block: BlockId, version_index: usize },
    DocumentLoaded { root: BlockId },
    DocumentUnloaded { root: BlockId },
}

struct OpenDocument {
    doc: Document,
    path: Option<PathBuf>,
}

#[derive(Default)]
struct SessionState {
    /// Keyed by root block.
    documents: HashMap<BlockId, OpenDocument>,
    /// Block being scrubbed by consecutive `set_version_index` requests.
    chain: Option<BlockId>,
}

impl SessionState {
    fn holds(doc: &Document, block: BlockId) -> bool {
        matches!(doc.block(block), Ok(_) | Err(HistoryError::BlockDeleted(_)))
    }

    fn document_of(&self, block: BlockId) -> Result<&Document> {
        self.documents
            .values()
            .map(|open| &open.doc)
            .find(|doc| Self::holds(doc, block))
            .ok_or(KernelError::BlockNotFound(block))
    }

    fn document_of_mut(&mut self, block: BlockId) -> Result<&mut Document> {
        self.documents
            .values_mut()
            .map(|open| &mut open.doc)
            .find(|doc| Self::holds(doc, block))
            .ok_or(KernelError::BlockNotFound(block))
    }

    fn root_at(&self, path: &Path) -> Option<BlockId> {
        self.documents
            .iter()
            .find(|(_, open)| open.path.as_deref() == Some(path))
            .map(|(root, _)| *root)
    }

    fn root_mut(&mut self, block: BlockId) -> Result<&mut OpenDocument> {
        if !self.documents.contains_key(&block) {
            return Err(match self.document_of(block) {
                Ok(_) => KernelError::NotARoot(block),
                Err(e) => e,
            });
        }
        self.documents
            .get_mut(&block)
            .ok_or(KernelError::BlockNotFound(block))
    }
}

/// Request ids completed recently, bounded to a window.
struct Completed {
    order: VecDeque<RequestId>,
    ids: HashSet<RequestId>,
    window: usize,
}

impl Completed {
    fn new(window: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            window: window.max(1),
        }
    }

    fn insert(&mut self, id: RequestId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.window {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn contains(&self, id: RequestId) -> bool {
        self.ids.contains(&id)
    }
}

pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    completed: Mutex<Completed>,
    notify: Notify,
    events: broadcast::Sender<SessionEvent>,
    clock: Arc<Clock>,
    store: Option<StoreHandle>,
    config: Arc<KernelConfig>,
}

impl Session {
    pub fn new(id: SessionId, clock: Arc<Clock>, store: Option<StoreHandle>, config: Arc<KernelConfig>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            id,
            state: RwLock::new(SessionState::default()),
            completed: Mutex::new(Completed::new(config.completed_window)),
            notify: Notify::new(),
            events,
            clock,
            store,
            config,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Causal ordering
    // =========================================================================

    /// Wait until `previous` has completed, up to the configured timeout.
    pub async fn wait_for(&self, previous: RequestId) -> Result<()> {
        let waited = self.config.causal_wait();
        let waiting = async {
            loop {
                let notified = self.notify.notified();
                let mut notified = std::pin::pin!(notified);
                notified.as_mut().enable();
                if self.completed.lock().contains(previous) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(waited, waiting)
            .await
            .map_err(|_| KernelError::CausalTimeout {
                request: previous,
                waited,
            })
    }

    /// Mark a request finished, successful or not.
    pub fn complete(&self, request_id: RequestId) {
        self.completed.lock().insert(request_id);
        self.notify.notify_waiters();
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Run a document operation under the session's read/write discipline.
    pub async fn run(&self, request_id: RequestId, op: Operation) -> Result<Reply> {
        if op.is_write() {
            let mut state = self.state.write().await;
            let continues_chain =
                matches!(&op, Operation::SetVersionIndex { block, .. } if state.chain == Some(*block));
            if !continues_chain {
                self.settle_chain(&mut state);
            }
            self.write(&mut state, request_id, op)
        } else {
            let state = self.state.read().await;
            Self::read(&state, op)
        }
    }

    fn read(state: &SessionState, op: Operation) -> Result<Reply> {
        match op {
            Operation::GetText { block } => Ok(Reply::Text {
                text: state.document_of(block)?.text(block)?,
            }),
            Operation::GetRootText { block } => Ok(Reply::Text {
                text: state.document_of(block)?.root_text(block)?,
            }),
            Operation::GetBlockInfo { block } => Ok(Reply::Block {
                info: state.document_of(block)?.block_info(block)?,
            }),
            Operation::GetChildrenInfo { block } => Ok(Reply::Blocks {
                blocks: state.document_of(block)?.children_info(block)?,
            }),
            Operation::ListTags { block } => Ok(Reply::Tags {
                tags: state.document_of(block)?.list_tags(block)?,
            }),
            other => Err(KernelError::Misrouted(other.name())),
        }
    }

    fn write(&self, state: &mut SessionState, request_id: RequestId, op: Operation) -> Result<Reply> {
        match op {
            Operation::LineChange { block, line, text } => {
                let doc = state.document_of_mut(block)?;
                let affected = doc.update_line(block, line, &text)?;
                Ok(self.changed(request_id, affected.into_iter().collect()))
            }
            Operation::MultiLineChange {
                block,
                range,
                text,
                range_length,
                range_offset,
            } => {
                debug!(%block, ?range, ?range_length, ?range_offset, "multi-line change");
                let doc = state.document_of_mut(block)?;
                let affected = doc.update_lines(block, range, &text)?;
                Ok(self.changed(request_id, affected.into_iter().collect()))
            }
            Operation::CreateChild { block, range } => {
                let doc = state.document_of_mut(block)?;
                let child = match doc.create_child(block, range)? {
                    Some(child) => Some(doc.block_info(child)?),
                    None => None,
                };
                Ok(Reply::Child { block: child })
            }
            Operation::DeleteBlock { block } => {
                state.document_of_mut(block)?.delete_block(block)?;
                Ok(Reply::Done)
            }
            Operation::CopyBlock { block } => {
                let doc = state.document_of_mut(block)?;
                let copy = doc.clone_block(block)?;
                Ok(Reply::Block {
                    info: doc.block_info(copy)?,
                })
            }
            Operation::SetVersionIndex { block, index } => {
                let doc = state.document_of_mut(block)?;
                doc.apply_index(block, index)?;
                let text = doc.text(block)?;
                state.chain = Some(block);
                Ok(Reply::Text { text })
            }
            Operation::ApplyTag { block, tag } => {
                let doc = state.document_of_mut(block)?;
                doc.load_tag(block, tag)?;
                Ok(Reply::Text { text: doc.text(block)? })
            }
            Operation::SaveTag {
                block,
                name,
                description,
            } => {
                let tag = state.document_of_mut(block)?.create_tag(block, name, description)?;
                if let Some(store) = &self.store {
                    store.save_tag(self.id, tag.clone());
                }
                Ok(Reply::Tag { tag })
            }
            other => Err(KernelError::Misrouted(other.name())),
        }
    }

    fn changed(&self, request_id: RequestId, blocks: Vec<BlockId>) -> Reply {
        self.publish(SessionEvent::BlocksChanged {
            request_id,
            blocks: blocks.clone(),
        });
        Reply::Affected { blocks }
    }

    /// End the version-index chain, if one is open, recording where the
    /// block was left.
    fn settle_chain(&self, state: &mut SessionState) {
        let Some(block) = state.chain.take() else {
            return;
        };
        let Ok(doc) = state.document_of(block) else {
            return;
        };
        let (Ok(version_index), Ok(text)) = (doc.current_version_index(block), doc.text(block)) else {
            return;
        };

        debug!(session = %self.id, %block, version_index, "version chain settled");
        if let Some(store) = &self.store {
            store.save_snapshot(ChainSnapshot {
                session: self.id,
                block,
                version_index,
                text,
                created_at: now_millis(),
            });
        }
        self.publish(SessionEvent::ChainSettled { block, version_index });
    }

    /// Wait for in-flight requests, settle any open chain, then flush the
    /// store.
    pub async fn quiesce(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            self.settle_chain(&mut state);
        }
        match &self.store {
            Some(store) => store.flush().await,
            None => Ok(()),
        }
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Open a document. If another load already opened `path` in this
    /// session, its root is returned instead and `content` is dropped.
    pub async fn open_document(&self, content: &str, eol: Option<Eol>, path: Option<PathBuf>) -> Result<BlockInfo> {
        let mut state = self.state.write().await;
        if let Some(root) = path.as_deref().and_then(|p| state.root_at(p)) {
            debug!(session = %self.id, %root, "document already open at path");
            return Ok(state.document_of(root)?.block_info(root)?);
        }
        self.settle_chain(&mut state);

        let doc = Document::from_content(content, eol, self.clock.clone())
            .with_version_merging(self.config.version_merging);
        let root = doc.root();
        let info = doc.block_info(root)?;
        info!(session = %self.id, %root, lines = info.line_count, path = ?path, "document loaded");
        state.documents.insert(root, OpenDocument { doc, path });
        self.publish(SessionEvent::DocumentLoaded { root });
        Ok(info)
    }

    /// Root block of the document open at `path`.
    pub async fn find_path(&self, path: &Path) -> Option<BlockId> {
        self.state.read().await.root_at(path)
    }

    pub async fn block_info(&self, block: BlockId) -> Result<BlockInfo> {
        let state = self.state.read().await;
        Ok(state.document_of(block)?.block_info(block)?)
    }

    /// Point a document at a new path. Returns the previous path.
    pub async fn set_path(&self, root: BlockId, path: PathBuf) -> Result<Option<PathBuf>> {
        let mut state = self.state.write().await;
        self.settle_chain(&mut state);
        let open = state.root_mut(root)?;
        Ok(open.path.replace(path))
    }

    /// Drop a document. Returns the path it was open at.
    pub async fn remove_document(&self, root: BlockId) -> Result<Option<PathBuf>> {
        let mut state = self.state.write().await;
        self.settle_chain(&mut state);
        state.root_mut(root)?;
        let path = state.documents.remove(&root).and_then(|open| open.path);
        info!(session = %self.id, %root, "document unloaded");
        self.publish(SessionEvent::DocumentUnloaded { root });
        Ok(path)
    }

    /// Drop every document. Returns the paths that were open.
    pub async fn remove_all(&self) -> Vec<PathBuf> {
        let mut state = self.state.write().await;
        self.settle_chain(&mut state);
        let mut paths = Vec::new();
        for (root, open) in state.documents.drain() {
            self.publish(SessionEvent::DocumentUnloaded { root });
            paths.extend(open.path);
        }
        paths
    }
}
