use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{BroadcastHub, ObserverHandle};
use crate::config::{SessionPolicy, TimerConfig};
use crate::error::{Result, SessionError};
use crate::models::{
    ActivityKind, CycleCompletion, CycleId, CycleKind, InterruptionSource, PomodoroCycle,
    Session, SessionEnd, SessionId, SessionPatch, SessionSpec,
};
use crate::protocol::ServerMessage;
use crate::session::machine::{EndOutcome, SessionMachine};
use crate::store::SessionStore;
use crate::timer::TimerState;

use super::task::{session_loop, Command};

const COMMAND_BUFFER: usize = 32;

struct SessionHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

struct SupervisorInner {
    config: TimerConfig,
    store: Arc<dyn SessionStore>,
    hub: BroadcastHub,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

/// Registry of live sessions and the control surface over them.
///
/// One timekeeping task runs per live session; the supervisor owns the map
/// from session id to that task's control channel and cancellation token,
/// with lifecycle tied strictly to `start` and `end`.
#[derive(Clone)]
pub struct SessionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl SessionSupervisor {
    pub fn new(store: Arc<dyn SessionStore>, config: TimerConfig) -> Self {
        let hub = BroadcastHub::new(config.observer_capacity);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                store,
                hub,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a new session: persist the record, then spawn its timer task.
    ///
    /// Under the exclusive policy this fails with a conflict while any
    /// session is live, and creates nothing.
    pub async fn start(&self, spec: SessionSpec) -> Result<Session> {
        let mut sessions = self.inner.sessions.lock().await;

        if self.inner.config.policy == SessionPolicy::Exclusive {
            if let Some(live_id) = sessions.keys().next() {
                return Err(SessionError::Conflict(format!(
                    "session {live_id} is already live"
                )));
            }
        }

        let now = Utc::now();
        let session = Session::new(spec, now);
        self.inner.store.create_session(&session).await?;

        let machine = SessionMachine::new(session.clone(), self.inner.config.clone());
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(session_loop(
            machine,
            Arc::clone(&self.inner.store),
            self.inner.hub.clone(),
            rx,
            cancel.clone(),
            self.inner.config.clone(),
        ));

        sessions.insert(session.id, SessionHandle { tx, cancel, join });
        info!("Started session {} ({})", session.id, session.kind.as_str());
        Ok(session)
    }

    pub async fn update(&self, id: SessionId, patch: SessionPatch) -> Result<Session> {
        match self
            .send_command(id, |reply| Command::Update(patch, reply))
            .await
        {
            Some(result) => result,
            None => Err(self.classify_missing(id).await),
        }
    }

    pub async fn pause(&self, id: SessionId) -> Result<Session> {
        match self.send_command(id, Command::Pause).await {
            Some(result) => result,
            None => Err(self.classify_missing(id).await),
        }
    }

    pub async fn resume(&self, id: SessionId) -> Result<Session> {
        match self.send_command(id, Command::Resume).await {
            Some(result) => result,
            None => Err(self.classify_missing(id).await),
        }
    }

    /// End the session and tear its task down. The task is removed from the
    /// registry only on success; ending an already-ended id reports the
    /// invalid state without touching the persisted record.
    pub async fn end(&self, id: SessionId, final_data: SessionEnd) -> Result<EndOutcome> {
        match self
            .send_command(id, |reply| Command::End(final_data, reply))
            .await
        {
            Some(result) => {
                if result.is_ok() {
                    self.remove_session(id).await;
                }
                result
            }
            None => Err(self.classify_missing(id).await),
        }
    }

    /// Record user activity. No-op (false) when the session is unknown,
    /// ended, or paused.
    pub async fn register_activity(&self, id: SessionId, kind: ActivityKind) -> bool {
        self.send_command(id, |reply| Command::Activity(kind, reply))
            .await
            .unwrap_or(false)
    }

    /// Record an interruption. No-op (false) when the session is unknown or
    /// ended.
    pub async fn register_interruption(
        &self,
        id: SessionId,
        source: InterruptionSource,
    ) -> bool {
        self.send_command(id, |reply| Command::Interruption(source, reply))
            .await
            .unwrap_or(false)
    }

    pub async fn timer_state(&self, id: SessionId) -> Result<TimerState> {
        match self.send_command(id, Command::State).await {
            Some(state) => Ok(state),
            None => Err(SessionError::NotFound(format!(
                "session {id} has no live timer"
            ))),
        }
    }

    pub async fn start_pomodoro(
        &self,
        id: SessionId,
        cycle_number: u32,
        kind: CycleKind,
        planned_minutes: u32,
    ) -> Result<PomodoroCycle> {
        let planned_ms = u64::from(planned_minutes.max(1)) * 60_000;
        match self
            .send_command(id, |reply| Command::StartCycle {
                cycle_number,
                kind,
                planned_ms,
                reply,
            })
            .await
        {
            Some(result) => result,
            None => Err(self.classify_missing(id).await),
        }
    }

    pub async fn complete_pomodoro(
        &self,
        id: SessionId,
        cycle_id: CycleId,
        completion: CycleCompletion,
    ) -> Result<PomodoroCycle> {
        match self
            .send_command(id, |reply| Command::CompleteCycle {
                cycle_id,
                completion,
                reply,
            })
            .await
        {
            Some(result) => result,
            None => Err(self.classify_missing(id).await),
        }
    }

    /// Subscribe to a session's real-time stream. Reconnecting is simply
    /// resubscribing; the next tick delivers fresh state.
    pub fn subscribe(&self, id: SessionId) -> (ObserverHandle, mpsc::Receiver<ServerMessage>) {
        self.inner.hub.subscribe(id)
    }

    pub fn unsubscribe(&self, id: SessionId, handle: ObserverHandle) {
        self.inner.hub.unsubscribe(id, handle)
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    /// Number of live sessions, for health reporting.
    pub async fn active_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// End every live session best-effort before process exit. Failures are
    /// logged as recovery events; nothing is silently dropped.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.inner.sessions.lock().await.keys().copied().collect();

        for id in ids {
            match self.end(id, SessionEnd::default()).await {
                Ok(outcome) => {
                    if let Some(err) = outcome.persist_error {
                        warn!("Recovery: final persist failed for session {id}: {err}");
                    }
                }
                Err(err) => {
                    warn!("Recovery: could not finalize session {id} during shutdown: {err}");
                }
            }
        }
    }

    async fn send_command<R>(
        &self,
        id: SessionId,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Option<R> {
        let tx = {
            let sessions = self.inner.sessions.lock().await;
            sessions.get(&id).map(|handle| handle.tx.clone())
        };
        let tx = tx?;

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(build(reply_tx)).await.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    /// Decide what to report for an id with no live task: an ended session
    /// is an invalid-state error (so `end` twice reads as such), anything
    /// else is not found.
    async fn classify_missing(&self, id: SessionId) -> SessionError {
        match self.inner.store.get_session(id).await {
            Ok(Some(session)) if !session.is_live() => {
                SessionError::InvalidState(format!("session {id} already ended"))
            }
            Ok(Some(_)) => SessionError::NotFound(format!("session {id} has no live timer")),
            Ok(None) => SessionError::NotFound(format!("session {id}")),
            Err(err) => err.into(),
        }
    }

    async fn remove_session(&self, id: SessionId) {
        let handle = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.remove(&id)
        };

        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(err) = handle.join.await {
                error!("Timer task for session {id} failed to join: {err}");
            }
        }
    }
}
