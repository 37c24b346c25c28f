//! SQLite persistence for the clock, sessions, tags and chain snapshots.
//!
//! Callers never wait on the database. Writes go through a [`StoreHandle`]
//! to a dedicated writer thread that owns the connection; failures are
//! logged and collected, then reported by the next [`StoreHandle::flush`].

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use linetime_history::{ClockSink, Timestamp};
use linetime_types::{BlockId, SessionId, TagInfo};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, params};
use tokio::sync::{mpsc, oneshot};

use crate::Result;
use crate::error::KernelError;

const SCHEMA: &str = r#"
-- Timestamp high-water mark (single row)
CREATE TABLE IF NOT EXISTS clock (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    high_water INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    opened_at INTEGER NOT NULL,
    closed_at INTEGER
);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    block_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    text TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    needs_name INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tags_block ON tags(block_id, timestamp);

-- Block state recorded when a version-index chain is interrupted
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    block_id TEXT NOT NULL,
    version_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_block ON snapshots(block_id, id);
"#;

/// Block state captured when a version-scrub chain settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub session: SessionId,
    pub block: BlockId,
    pub version_index: usize,
    pub text: String,
    pub created_at: u64,
}

/// Database handle.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Clock
    // =========================================================================

    /// The persisted high-water mark, `ZERO` for a fresh database.
    pub fn high_water(&self) -> SqliteResult<Timestamp> {
        let value: Option<i64> = self
            .conn
            .query_row("SELECT high_water FROM clock WHERE id = 0", [], |row| row.get(0))
            .optional()?;
        Ok(Timestamp::new(value.unwrap_or(0) as u64))
    }

    /// Raise the high-water mark. Never lowers it.
    pub fn set_high_water(&self, high_water: Timestamp) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO clock (id, high_water) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET high_water = MAX(high_water, excluded.high_water)",
            params![high_water.get() as i64],
        )?;
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn session_opened(&self, id: SessionId, at: u64) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (id, opened_at, closed_at) VALUES (?1, ?2, NULL)",
            params![id.to_string(), at as i64],
        )?;
        Ok(())
    }

    pub fn session_closed(&self, id: SessionId, at: u64) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE sessions SET closed_at = ?1 WHERE id = ?2",
            params![at as i64, id.to_string()],
        )?;
        Ok(())
    }

    /// Sessions that were opened and never closed.
    pub fn open_sessions(&self) -> SqliteResult<Vec<SessionId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM sessions WHERE closed_at IS NULL ORDER BY opened_at")?;
        let rows = stmt.query_map([], |row| id_column(row, 0))?;
        rows.collect()
    }

    // =========================================================================
    // Tags
    // =========================================================================

    pub fn save_tag(&self, session: SessionId, tag: &TagInfo) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO tags
             (id, session_id, block_id, name, description, text, timestamp, needs_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                tag.id.to_string(),
                session.to_string(),
                tag.block_id.to_string(),
                tag.name,
                tag.description,
                tag.text,
                tag.timestamp as i64,
                tag.needs_name,
                tag.created_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Tags recorded for a block, oldest first.
    pub fn tags_for(&self, block: BlockId) -> SqliteResult<Vec<TagInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, block_id, name, description, text, timestamp, needs_name, created_at
             FROM tags WHERE block_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![block.to_string()], |row| {
            let timestamp: i64 = row.get(5)?;
            let created_at: i64 = row.get(7)?;
            Ok(TagInfo {
                id: id_column(row, 0)?,
                block_id: id_column(row, 1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                text: row.get(4)?,
                timestamp: timestamp as u64,
                needs_name: row.get(6)?,
                created_at: created_at as u64,
            })
        })?;
        rows.collect()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn save_snapshot(&self, snapshot: &ChainSnapshot) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO snapshots (session_id, block_id, version_index, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.session.to_string(),
                snapshot.block.to_string(),
                snapshot.version_index as i64,
                snapshot.text,
                snapshot.created_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Snapshots of a block, oldest first.
    pub fn snapshots_for(&self, session: SessionId, block: BlockId) -> SqliteResult<Vec<ChainSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT version_index, text, created_at FROM snapshots
             WHERE session_id = ?1 AND block_id = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session.to_string(), block.to_string()], |row| {
            let version_index: i64 = row.get(0)?;
            let created_at: i64 = row.get(2)?;
            Ok(ChainSnapshot {
                session,
                block,
                version_index: version_index as usize,
                text: row.get(1)?,
                created_at: created_at as u64,
            })
        })?;
        rows.collect()
    }
}

/// Read a text column holding a typed id.
fn id_column<T>(row: &Row<'_>, idx: usize) -> SqliteResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// Background writer
// ============================================================================

/// One queued write.
#[derive(Debug)]
enum StoreOp {
    HighWater(Timestamp),
    SessionOpened { id: SessionId, at: u64 },
    SessionClosed { id: SessionId, at: u64 },
    Tag { session: SessionId, tag: TagInfo },
    Snapshot(ChainSnapshot),
    Flush(oneshot::Sender<Vec<String>>),
}

/// Fire-and-forget access to a [`Store`] running on its own thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl StoreHandle {
    /// Move `store` onto a writer thread.
    pub fn spawn(store: Store) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("linetime-store".into())
            .spawn(move || run_writer(store, rx))?;
        Ok(Self { tx })
    }

    fn send(&self, op: StoreOp) {
        if self.tx.send(op).is_err() {
            tracing::warn!("store writer has stopped, dropping write");
        }
    }

    pub fn session_opened(&self, id: SessionId, at: u64) {
        self.send(StoreOp::SessionOpened { id, at });
    }

    pub fn session_closed(&self, id: SessionId, at: u64) {
        self.send(StoreOp::SessionClosed { id, at });
    }

    pub fn save_tag(&self, session: SessionId, tag: TagInfo) {
        self.send(StoreOp::Tag { session, tag });
    }

    pub fn save_snapshot(&self, snapshot: ChainSnapshot) {
        self.send(StoreOp::Snapshot(snapshot));
    }

    /// Wait until every write queued so far has been attempted.
    ///
    /// Fails with the failures collected since the previous flush.
    pub async fn flush(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx.send(StoreOp::Flush(reply)).map_err(|_| KernelError::StoreClosed)?;
        let failures = done.await.map_err(|_| KernelError::StoreClosed)?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(KernelError::Durability(failures))
        }
    }

    /// A clock sink that queues high-water updates.
    pub fn clock_sink(&self) -> Arc<dyn ClockSink> {
        Arc::new(StoreSink(self.clone()))
    }
}

struct StoreSink(StoreHandle);

impl ClockSink for StoreSink {
    fn advanced(&self, high_water: Timestamp) {
        self.0.send(StoreOp::HighWater(high_water));
    }
}

/// Logs and collects failures until the next flush.
#[derive(Default)]
struct Failures(Vec<String>);

impl Failures {
    fn record(&mut self, what: &str, result: SqliteResult<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, what, "store write failed");
            self.0.push(format!("{what}: {e}"));
        }
    }
}

fn run_writer(store: Store, mut rx: mpsc::UnboundedReceiver<StoreOp>) {
    let mut failures = Failures::default();

    while let Some(first) = rx.blocking_recv() {
        // Drain what is already queued so a burst of clock advances
        // becomes one write.
        let mut batch = vec![first];
        while let Ok(op) = rx.try_recv() {
            batch.push(op);
        }

        let mut high_water: Option<Timestamp> = None;
        for op in batch {
            match op {
                StoreOp::HighWater(ts) => {
                    high_water = Some(high_water.map_or(ts, |hw| hw.max(ts)));
                }
                StoreOp::SessionOpened { id, at } => failures.record("session", store.session_opened(id, at)),
                StoreOp::SessionClosed { id, at } => failures.record("session", store.session_closed(id, at)),
                StoreOp::Tag { session, tag } => failures.record("tag", store.save_tag(session, &tag)),
                StoreOp::Snapshot(snapshot) => failures.record("snapshot", store.save_snapshot(&snapshot)),
                StoreOp::Flush(reply) => {
                    if let Some(hw) = high_water.take() {
                        failures.record("clock", store.set_high_water(hw));
                    }
                    let _ = reply.send(std::mem::take(&mut failures.0));
                }
            }
        }
        if let Some(hw) = high_water {
            failures.record("clock", store.set_high_water(hw));
        }
    }
    tracing::debug!("store writer exiting");
}

#[cfg(test)]
mod tests {
    use linetime_types::TagId;

    use super::*;

    fn tag(block: BlockId, timestamp: u64) -> TagInfo {
        TagInfo {
            id: TagId::new(),
            block_id: block,
            name: format!("Tag {timestamp}"),
            description: None,
            text: "a\nb".into(),
            timestamp,
            needs_name: true,
            created_at: 1,
        }
    }

    #[test]
    fn test_high_water_only_rises() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.high_water().unwrap(), Timestamp::ZERO);
        store.set_high_water(Timestamp::new(10)).unwrap();
        store.set_high_water(Timestamp::new(4)).unwrap();
        assert_eq!(store.high_water().unwrap(), Timestamp::new(10));
    }

    #[test]
    fn test_tags_roundtrip_in_order() {
        let store = Store::in_memory().unwrap();
        let session = SessionId::new();
        let block = BlockId::new();
        let later = tag(block, 9);
        let earlier = tag(block, 3);
        store.save_tag(session, &later).unwrap();
        store.save_tag(session, &earlier).unwrap();
        store.save_tag(session, &tag(BlockId::new(), 5)).unwrap();

        let tags = store.tags_for(block).unwrap();
        assert_eq!(tags, vec![earlier, later]);
    }

    #[test]
    fn test_open_sessions() {
        let store = Store::in_memory().unwrap();
        let (a, b) = (SessionId::new(), SessionId::new());
        store.session_opened(a, 1).unwrap();
        store.session_opened(b, 2).unwrap();
        store.session_closed(a, 3).unwrap();
        assert_eq!(store.open_sessions().unwrap(), vec![b]);
    }

    #[test]
    fn test_snapshots() {
        let store = Store::in_memory().unwrap();
        let snapshot = ChainSnapshot {
            session: SessionId::new(),
            block: BlockId::new(),
            version_index: 2,
            text: "x".into(),
            created_at: 7,
        };
        store.save_snapshot(&snapshot).unwrap();
        assert_eq!(
            store.snapshots_for(snapshot.session, snapshot.block).unwrap(),
            vec![snapshot]
        );
    }

    #[tokio::test]
    async fn test_writer_persists_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lt.db");
        let handle = StoreHandle::spawn(Store::open(&path).unwrap()).unwrap();

        let sink = handle.clock_sink();
        for ts in 1..=50 {
            sink.advanced(Timestamp::new(ts));
        }
        handle.flush().await.unwrap();

        let reader = Store::open(&path).unwrap();
        assert_eq!(reader.high_water().unwrap(), Timestamp::new(50));
    }
}
