//! Integration tests for the session layer: file ownership, causal ordering,
//! version-chain settlement and persistence.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use linetime_kernel::{
    KernelConfig, KernelError, Operation, Outcome, Reply, Request, Response, SessionEvent, SessionManager, Store,
};
use linetime_types::{BlockId, SessionId};

// ============================================================================
// Shared test setup
// ============================================================================

fn manager() -> SessionManager {
    SessionManager::new(KernelConfig::default()).unwrap()
}

fn manager_with_db(path: &Path) -> SessionManager {
    SessionManager::new(KernelConfig {
        database: Some(path.to_path_buf()),
        ..KernelConfig::default()
    })
    .unwrap()
}

fn request(session: SessionId, request_id: u64, op: Operation) -> Request {
    Request {
        session_id: Some(session),
        request_id,
        previous_request_id: None,
        op,
    }
}

fn reply(response: Response) -> Reply {
    match response.outcome {
        Outcome::Ok(reply) => reply,
        Outcome::Error(message) => panic!("request {} failed: {message}", response.request_id),
    }
}

fn text(response: Response) -> String {
    match reply(response) {
        Reply::Text { text } => text,
        other => panic!("expected text, got {other:?}"),
    }
}

async fn load(manager: &SessionManager, session: SessionId, content: &str) -> BlockId {
    let response = manager
        .handle(request(session, 0, Operation::LoadContent {
            content: content.into(),
            eol: None,
        }))
        .await;
    match reply(response) {
        Reply::Block { info } => info.id,
        other => panic!("expected block, got {other:?}"),
    }
}

// ============================================================================
// File ownership
// ============================================================================

#[tokio::test]
async fn test_file_in_use_by_other_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "one\ntwo\n").unwrap();

    let manager = manager();
    let a = manager.create_session();
    let b = manager.create_session();

    let first = manager.load_file(&a, &path).await.unwrap();
    assert_eq!(first.line_count, 3);

    let err = manager.load_file(&b, &path).await.unwrap_err();
    assert!(matches!(err, KernelError::FileInUse(_)));

    // same session gets the same document back
    let again = manager.load_file(&a, &path).await.unwrap();
    assert_eq!(again.id, first.id);
}

/// A file large enough that reading it overlaps with a second load.
fn large_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("large.txt");
    let content: String = (0..20_000).map(|i| format!("line {i}\n")).collect();
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_cannot_share_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = large_file(dir.path());

    for _ in 0..10 {
        let manager = Arc::new(manager());
        let loads: Vec<_> = (0..2)
            .map(|_| {
                let manager = manager.clone();
                let session = manager.create_session();
                let path = path.clone();
                tokio::spawn(async move { manager.load_file(&session, &path).await })
            })
            .collect();

        let mut opened = 0;
        let mut in_use = 0;
        for load in loads {
            match load.await.unwrap() {
                Ok(_) => opened += 1,
                Err(KernelError::FileInUse(_)) => in_use += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((opened, in_use), (1, 1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_in_one_session_share_a_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = large_file(dir.path());

    for _ in 0..10 {
        let manager = Arc::new(manager());
        let session = manager.create_session();
        let loads: Vec<_> = (0..2)
            .map(|_| {
                let manager = manager.clone();
                let session = session.clone();
                let path = path.clone();
                tokio::spawn(async move { manager.load_file(&session, &path).await })
            })
            .collect();

        let mut roots = Vec::new();
        for load in loads {
            roots.push(load.await.unwrap().unwrap().id);
        }
        assert_eq!(roots[0], roots[1]);

        // one unload frees the file for everyone
        manager.unload(&session, roots[0]).await.unwrap();
        let other = manager.create_session();
        manager.load_file(&other, &path).await.unwrap();
        let err = manager.load_file(&session, &path).await.unwrap_err();
        assert!(matches!(err, KernelError::FileInUse(_)));
    }
}

#[tokio::test]
async fn test_unload_and_close_release_files() {
    let dir = tempfile::tempdir().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    std::fs::write(&one, "1").unwrap();
    std::fs::write(&two, "2").unwrap();

    let manager = manager();
    let a = manager.create_session();
    let b = manager.create_session();
    let root = manager.load_file(&a, &one).await.unwrap().id;
    manager.load_file(&a, &two).await.unwrap();

    manager.unload(&a, root).await.unwrap();
    manager.load_file(&b, &one).await.unwrap();

    manager.close_session(a.id()).await.unwrap();
    assert!(matches!(manager.session(a.id()), Err(KernelError::SessionNotFound(_))));
    manager.load_file(&b, &two).await.unwrap();
}

#[tokio::test]
async fn test_missing_file_is_not_claimed() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager();
    let a = manager.create_session();
    assert!(manager.load_file(&a, &dir.path().join("absent.txt")).await.is_err());
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_edit_then_rewind_through_requests() {
    let manager = manager();
    let session = manager.create_session().id();
    let root = load(&manager, session, "a\nb\nc").await;

    let affected = reply(
        manager
            .handle(request(session, 1, Operation::LineChange {
                block: root,
                line: 2,
                text: "B".into(),
            }))
            .await,
    );
    assert_eq!(affected, Reply::Affected { blocks: vec![root] });

    let rewound = manager
        .handle(request(session, 2, Operation::SetVersionIndex { block: root, index: 0 }))
        .await;
    assert_eq!(text(rewound), "a\nb\nc");

    let forward = manager
        .handle(request(session, 3, Operation::SetVersionIndex { block: root, index: 1 }))
        .await;
    assert_eq!(text(forward), "a\nB\nc");
}

#[tokio::test]
async fn test_overlapping_child_replies_none() {
    let manager = manager();
    let session = manager.create_session().id();
    let root = load(&manager, session, "a\nb\nc\nd").await;

    let first = reply(
        manager
            .handle(request(session, 1, Operation::CreateChild {
                block: root,
                range: linetime_types::LineRange::new(1, 2),
            }))
            .await,
    );
    assert!(matches!(first, Reply::Child { block: Some(_) }));

    let overlap = reply(
        manager
            .handle(request(session, 2, Operation::CreateChild {
                block: root,
                range: linetime_types::LineRange::new(2, 3),
            }))
            .await,
    );
    assert_eq!(overlap, Reply::Child { block: None });
}

#[tokio::test]
async fn test_json_request_roundtrip() {
    let manager = manager();
    let session = manager.create_session().id();
    let root = load(&manager, session, "x\ny").await;

    let line = format!(r#"{{"session_id":"{session}","request_id":5,"op":"get_text","block":"{root}"}}"#);
    let request: Request = serde_json::from_str(&line).unwrap();
    let response = manager.handle(request).await;
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"request_id": 5, "outcome": {"ok": {"type": "text", "text": "x\ny"}}})
    );
}

#[tokio::test]
async fn test_unknown_session_is_an_error_response() {
    let manager = manager();
    let response = manager
        .handle(request(SessionId::new(), 1, Operation::WaitForQuiescence))
        .await;
    let Outcome::Error(message) = response.outcome else {
        panic!("expected error");
    };
    assert!(message.contains("session not found"));
}

// ============================================================================
// Causal ordering
// ============================================================================

#[tokio::test]
async fn test_request_waits_for_previous() {
    let manager = Arc::new(manager());
    let session = manager.create_session().id();
    let root = load(&manager, session, "a\nb").await;

    let waiting = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut read = request(session, 2, Operation::GetText { block: root });
            read.previous_request_id = Some(1);
            manager.handle(read).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());

    manager
        .handle(request(session, 1, Operation::LineChange {
            block: root,
            line: 1,
            text: "A".into(),
        }))
        .await;

    assert_eq!(text(waiting.await.unwrap()), "A\nb");
}

#[tokio::test]
async fn test_causal_wait_times_out() {
    let manager = SessionManager::new(KernelConfig {
        causal_wait_ms: 30,
        ..KernelConfig::default()
    })
    .unwrap();
    let session = manager.create_session().id();
    let root = load(&manager, session, "a").await;

    let mut read = request(session, 2, Operation::GetText { block: root });
    read.previous_request_id = Some(99);
    let response = manager.handle(read).await;
    let Outcome::Error(message) = response.outcome else {
        panic!("expected timeout");
    };
    assert!(message.contains("request 99"));
}

// ============================================================================
// Version chains
// ============================================================================

#[tokio::test]
async fn test_edit_settles_version_chain() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lt.db");
    let manager = manager_with_db(&db);
    let session = manager.create_session();
    let mut events = session.subscribe();
    let id = session.id();
    let root = load(&manager, id, "a\nb").await;

    let change = |request_id, line, text: &str| {
        request(id, request_id, Operation::LineChange {
            block: root,
            line,
            text: text.into(),
        })
    };
    reply(manager.handle(change(1, 1, "a1")).await);
    assert!(matches!(events.recv().await.unwrap(), SessionEvent::DocumentLoaded { .. }));
    assert!(matches!(events.recv().await.unwrap(), SessionEvent::BlocksChanged { request_id: 1, .. }));

    for request_id in 2..4 {
        reply(
            manager
                .handle(request(id, request_id, Operation::SetVersionIndex { block: root, index: 0 }))
                .await,
        );
    }
    assert!(events.try_recv().is_err());

    reply(manager.handle(change(4, 2, "b1")).await);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ChainSettled {
            block: root,
            version_index: 0
        }
    );

    manager.flush().await.unwrap();
    let snapshots = Store::open(&db).unwrap().snapshots_for(id, root).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].text, "a\nb");
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_high_water_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lt.db");

    let before = {
        let manager = manager_with_db(&db);
        let session = manager.create_session().id();
        load(&manager, session, "a\nb\nc").await;
        manager.shutdown().await.unwrap();
        manager.clock().high_water()
    };
    assert!(before.get() >= 3);

    let manager = manager_with_db(&db);
    assert_eq!(manager.clock().high_water(), before);
    assert!(manager.clock().next() > before);
}

#[tokio::test]
async fn test_saved_tag_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lt.db");
    let manager = manager_with_db(&db);
    let session = manager.create_session().id();
    let root = load(&manager, session, "a\nb").await;

    let saved = reply(
        manager
            .handle(request(session, 1, Operation::SaveTag {
                block: root,
                name: None,
                description: Some("first draft".into()),
            }))
            .await,
    );
    let Reply::Tag { tag } = saved else {
        panic!("expected tag, got {saved:?}");
    };
    assert_eq!(tag.name, "Tag 1");
    assert!(tag.needs_name);

    manager
        .handle(request(session, 2, Operation::WaitForQuiescence))
        .await;
    let stored = Store::open(&db).unwrap().tags_for(root).unwrap();
    assert_eq!(stored, vec![tag]);
}

#[tokio::test]
async fn test_store_failures_surface_from_quiescence() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lt.db");
    let manager = manager_with_db(&db);
    let session = manager.create_session().id();
    let root = load(&manager, session, "a\nb").await;
    manager.flush().await.unwrap();

    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("DROP TABLE tags")
        .unwrap();

    // the in-memory tag still succeeds
    let saved = manager
        .handle(request(session, 1, Operation::SaveTag {
            block: root,
            name: Some("draft".into()),
            description: None,
        }))
        .await;
    assert!(saved.is_ok());

    let quiesced = manager
        .handle(request(session, 2, Operation::WaitForQuiescence))
        .await;
    let Outcome::Error(message) = quiesced.outcome else {
        panic!("expected durability failure");
    };
    assert!(message.contains("no such table: tags"), "{message}");

    // failures are reported once
    manager.flush().await.unwrap();
}

#[tokio::test]
async fn test_flush_reports_durability_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lt.db");
    let manager = manager_with_db(&db);
    let session = manager.create_session().id();
    let root = load(&manager, session, "a").await;
    manager.flush().await.unwrap();

    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("DROP TABLE tags")
        .unwrap();
    reply(
        manager
            .handle(request(session, 1, Operation::SaveTag {
                block: root,
                name: None,
                description: None,
            }))
            .await,
    );

    match manager.flush().await {
        Err(KernelError::Durability(failures)) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("tag: "), "{failures:?}");
        }
        other => panic!("expected durability error, got {other:?}"),
    }
}
