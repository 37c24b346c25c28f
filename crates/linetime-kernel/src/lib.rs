//! # linetime-kernel
//!
//! Sessions over `linetime-history` documents.
//!
//! A [`SessionManager`] owns the shared [`Clock`](linetime_history::Clock)
//! and the SQLite [`Store`]. Clients open a [`Session`], load documents into
//! it, and send [`Request`]s; each becomes one [`Response`]. A file can be
//! open in one session at a time.
//!
//! Persistence never sits on the request path: the clock high-water mark,
//! tags and version-chain snapshots are queued to a writer thread, and
//! failures surface from the next flush.

pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod store;

pub use config::KernelConfig;
pub use error::KernelError;
pub use manager::SessionManager;
pub use protocol::{Operation, Outcome, Reply, Request, Response};
pub use session::{Session, SessionEvent};
pub use store::{ChainSnapshot, Store, StoreHandle};

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, KernelError>;
