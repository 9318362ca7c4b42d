use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{CycleId, PomodoroCycle, Session, SessionBreak, SessionId};

use super::{SessionStore, StoreError, StoreResult};

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<SessionId, Session>,
    breaks: HashMap<Uuid, SessionBreak>,
    cycles: HashMap<CycleId, PomodoroCycle>,
    document_pages: HashMap<Uuid, u32>,
}

/// In-memory store for tests and embedders that do not need durable history.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent update operations fail, for exercising storage
    /// failure paths in tests.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn breaks_for(&self, id: SessionId) -> Vec<SessionBreak> {
        let mut breaks: Vec<SessionBreak> = self
            .inner
            .lock()
            .unwrap()
            .breaks
            .values()
            .filter(|b| b.session_id == id)
            .cloned()
            .collect();
        breaks.sort_by_key(|b| b.started_at);
        breaks
    }

    pub fn cycles_for(&self, id: SessionId) -> Vec<PomodoroCycle> {
        let mut cycles: Vec<PomodoroCycle> = self
            .inner
            .lock()
            .unwrap()
            .cycles
            .values()
            .filter(|c| c.session_id == id)
            .cloned()
            .collect();
        cycles.sort_by_key(|c| c.cycle_number);
        cycles
    }

    pub fn document_page(&self, document_id: Uuid) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .document_pages
            .get(&document_id)
            .copied()
    }

    fn check_fail(&self) -> StoreResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("simulated backend failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.inner.lock().unwrap().sessions.get(&id).cloned())
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        self.check_fail()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("session {}", session.id))),
        }
    }

    async fn append_break(&self, brk: &SessionBreak) -> StoreResult<()> {
        self.check_fail()?;
        self.inner.lock().unwrap().breaks.insert(brk.id, brk.clone());
        Ok(())
    }

    async fn update_break(&self, brk: &SessionBreak) -> StoreResult<()> {
        self.check_fail()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.breaks.get_mut(&brk.id) {
            Some(existing) => {
                *existing = brk.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("break {}", brk.id))),
        }
    }

    async fn append_cycle(&self, cycle: &PomodoroCycle) -> StoreResult<()> {
        self.check_fail()?;
        self.inner
            .lock()
            .unwrap()
            .cycles
            .insert(cycle.id, cycle.clone());
        Ok(())
    }

    async fn update_cycle(&self, cycle: &PomodoroCycle) -> StoreResult<()> {
        self.check_fail()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.cycles.get_mut(&cycle.id) {
            Some(existing) => {
                *existing = cycle.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("cycle {}", cycle.id))),
        }
    }

    async fn update_document_progress(&self, document_id: Uuid, page: u32) -> StoreResult<()> {
        self.check_fail()?;
        self.inner
            .lock()
            .unwrap()
            .document_pages
            .insert(document_id, page);
        Ok(())
    }
}
