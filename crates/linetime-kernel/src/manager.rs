//! The session registry and request router.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use linetime_history::Clock;
use linetime_types::{BlockId, BlockInfo, Eol, RequestId, SessionId, now_millis};
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::protocol::{Operation, Reply, Request, Response};
use crate::session::Session;
use crate::store::{Store, StoreHandle};

/// Owns the shared clock, the store, and every open session.
///
/// A file path can be open in at most one session at a time.
pub struct SessionManager {
    config: Arc<KernelConfig>,
    clock: Arc<Clock>,
    store: Option<StoreHandle>,
    sessions: DashMap<SessionId, Arc<Session>>,
    open_files: DashMap<PathBuf, SessionId>,
}

impl SessionManager {
    /// Open the configured store (if any) and resume the clock above its
    /// high-water mark.
    pub fn new(config: KernelConfig) -> Result<Self> {
        let (clock, store) = match &config.database {
            Some(path) => {
                let store = Store::open(path)?;
                let high_water = store.high_water()?;
                for stale in store.open_sessions()? {
                    store.session_closed(stale, now_millis())?;
                }
                let handle = StoreHandle::spawn(store)?;
                info!(database = %path.display(), high_water = high_water.get(), "store opened");
                let clock = Clock::resume(high_water).with_sink(handle.clock_sink());
                (clock, Some(handle))
            }
            None => (Clock::new(), None),
        };

        Ok(Self {
            config: Arc::new(config),
            clock: Arc::new(clock),
            store,
            sessions: DashMap::new(),
            open_files: DashMap::new(),
        })
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn create_session(&self) -> Arc<Session> {
        let id = SessionId::new();
        let session = Arc::new(Session::new(
            id,
            self.clock.clone(),
            self.store.clone(),
            self.config.clone(),
        ));
        self.sessions.insert(id, session.clone());
        if let Some(store) = &self.store {
            store.session_opened(id, now_millis());
        }
        info!(session = %id, "session created");
        session
    }

    pub fn session(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(KernelError::SessionNotFound(id))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Quiesce, unload everything, and forget the session.
    ///
    /// The session is closed even if the final flush reports failures;
    /// those are returned afterwards.
    pub async fn close_session(&self, id: SessionId) -> Result<()> {
        let session = self.session(id)?;
        let flushed = session.quiesce().await;
        for path in session.remove_all().await {
            self.open_files.remove_if(&path, |_, owner| *owner == id);
        }
        self.sessions.remove(&id);
        if let Some(store) = &self.store {
            store.session_closed(id, now_millis());
        }
        info!(session = %id, "session closed");
        flushed
    }

    /// Quiesce every session, then flush the store.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| *s.key()).collect();
        let mut result = Ok(());
        for id in ids {
            if let Err(e) = self.close_session(id).await {
                warn!(session = %id, error = %e, "session did not close cleanly");
                result = Err(e);
            }
        }
        self.flush().await?;
        result
    }

    pub async fn flush(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.flush().await,
            None => Ok(()),
        }
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Load a file into a session.
    ///
    /// Fails with `FileInUse` if another session has it open; loading it
    /// again in the same session returns the existing root.
    pub async fn load_file(&self, session: &Session, path: &Path) -> Result<BlockInfo> {
        let path = tokio::fs::canonicalize(path).await?;
        let held = self.claim(session.id(), &path)?;
        if held {
            if let Some(root) = session.find_path(&path).await {
                debug!(session = %session.id(), path = %path.display(), "file already open");
                return session.block_info(root).await;
            }
        }

        // A concurrent load in this session may still be reading the file;
        // `open_document` settles which of the two gets to open it.
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                if !held {
                    self.release(session.id(), &path);
                }
                return Err(e.into());
            }
        };
        let eol = Eol::detect(&content);
        session.open_document(&content, Some(eol), Some(path)).await
    }

    /// Load raw content with no backing file.
    pub async fn load_content(&self, session: &Session, content: &str, eol: Option<Eol>) -> Result<BlockInfo> {
        session.open_document(content, eol, None).await
    }

    /// Move a document to a new path, under the same rules as loading.
    pub async fn update_path(&self, session: &Session, root: BlockId, path: &Path) -> Result<()> {
        let path = normalize(path).await;
        if self.claim(session.id(), &path)? {
            match session.find_path(&path).await {
                Some(existing) if existing == root => return Ok(()),
                Some(_) => return Err(KernelError::FileInUse(path)),
                None => {}
            }
        }

        match session.set_path(root, path.clone()).await {
            Ok(previous) => {
                if let Some(previous) = previous {
                    self.release(session.id(), &previous);
                }
                debug!(session = %session.id(), %root, path = %path.display(), "path updated");
                Ok(())
            }
            Err(e) => {
                self.release(session.id(), &path);
                Err(e)
            }
        }
    }

    pub async fn unload(&self, session: &Session, root: BlockId) -> Result<()> {
        if let Some(path) = session.remove_document(root).await? {
            self.release(session.id(), &path);
        }
        Ok(())
    }

    /// Register `path` for `session`. Returns whether the session already
    /// held it.
    fn claim(&self, session: SessionId, path: &Path) -> Result<bool> {
        match self.open_files.entry(path.to_path_buf()) {
            Entry::Occupied(entry) if *entry.get() == session => Ok(true),
            Entry::Occupied(_) => {
                warn!(%session, path = %path.display(), "file in use by another session");
                Err(KernelError::FileInUse(path.to_path_buf()))
            }
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(false)
            }
        }
    }

    fn release(&self, session: SessionId, path: &Path) {
        self.open_files.remove_if(path, |_, owner| *owner == session);
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Run one request to completion. Never fails; errors become error
    /// responses.
    pub async fn handle(&self, request: Request) -> Response {
        let request_id = request.request_id;
        let op = request.op.name();
        match self.dispatch(request).await {
            Ok(reply) => Response::ok(request_id, reply),
            Err(e) => {
                debug!(request_id, op, error = %e, "request failed");
                Response::error(request_id, e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Reply> {
        if request.op == Operation::CreateSession {
            let session = self.create_session();
            return Ok(Reply::Session {
                session_id: session.id(),
            });
        }

        let session = self.session(request.session_id.ok_or(KernelError::MissingSession)?)?;
        if let Some(previous) = request.previous_request_id {
            if let Err(e) = session.wait_for(previous).await {
                session.complete(request.request_id);
                return Err(e);
            }
        }
        let result = self.execute(&session, request.request_id, request.op).await;
        session.complete(request.request_id);
        result
    }

    async fn execute(&self, session: &Session, request_id: RequestId, op: Operation) -> Result<Reply> {
        match op {
            Operation::CloseSession => self.close_session(session.id()).await.map(|()| Reply::Done),
            Operation::WaitForQuiescence => session.quiesce().await.map(|()| Reply::Done),
            Operation::LoadFile { path } => {
                let info = self.load_file(session, &path).await?;
                Ok(Reply::Block { info })
            }
            Operation::LoadContent { content, eol } => {
                let info = self.load_content(session, &content, eol).await?;
                Ok(Reply::Block { info })
            }
            Operation::UpdatePath { block, path } => {
                self.update_path(session, block, &path).await?;
                Ok(Reply::Done)
            }
            Operation::UnloadFile { block } => {
                self.unload(session, block).await?;
                Ok(Reply::Done)
            }
            op => session.run(request_id, op).await,
        }
    }
}

/// Canonical form of a path that may not exist yet.
async fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = tokio::fs::canonicalize(path).await {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => tokio::fs::canonicalize(parent)
            .await
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_without_session_fails() {
        let manager = SessionManager::new(KernelConfig::default()).unwrap();
        let response = manager
            .handle(Request {
                session_id: None,
                request_id: 1,
                previous_request_id: None,
                op: Operation::GetText { block: BlockId::new() },
            })
            .await;
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_create_session_via_request() {
        let manager = SessionManager::new(KernelConfig::default()).unwrap();
        let response = manager
            .handle(Request {
                session_id: None,
                request_id: 1,
                previous_request_id: None,
                op: Operation::CreateSession,
            })
            .await;
        let crate::protocol::Outcome::Ok(Reply::Session { session_id }) = response.outcome else {
            panic!("unexpected response: {response:?}");
        };
        assert!(manager.session(session_id).is_ok());
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_update_path_releases_old_path() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        std::fs::write(&old, "a\nb").unwrap();

        let manager = SessionManager::new(KernelConfig::default()).unwrap();
        let a = manager.create_session();
        let b = manager.create_session();
        let root = manager.load_file(&a, &old).await.unwrap().id;

        manager.update_path(&a, root, &new).await.unwrap();
        // the old path is free again
        std::fs::write(&new, "x").unwrap();
        manager.load_file(&b, &old).await.unwrap();
        let err = manager.load_file(&b, &new).await.unwrap_err();
        assert!(matches!(err, KernelError::FileInUse(_)));
    }
}
