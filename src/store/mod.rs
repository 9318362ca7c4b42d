//! Durable persistence for sessions, breaks, and Pomodoro cycles.
//!
//! The engine only ever touches the store through [`SessionStore`], and only
//! with idempotent single-row operations keyed by primary key. Two
//! implementations ship with the crate: [`SqliteStore`] for durable history
//! and [`MemoryStore`] for tests and embedders without persistence needs.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PomodoroCycle, Session, SessionBreak, SessionId};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// Full-row update by primary key; `NotFound` when the row is absent.
    async fn update_session(&self, session: &Session) -> StoreResult<()>;

    async fn append_break(&self, brk: &SessionBreak) -> StoreResult<()>;

    async fn update_break(&self, brk: &SessionBreak) -> StoreResult<()>;

    async fn append_cycle(&self, cycle: &PomodoroCycle) -> StoreResult<()>;

    async fn update_cycle(&self, cycle: &PomodoroCycle) -> StoreResult<()>;

    /// Record the furthest page reached in a linked document.
    async fn update_document_progress(&self, document_id: Uuid, page: u32) -> StoreResult<()>;
}
