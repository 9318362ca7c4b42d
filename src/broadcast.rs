//! Fan-out of session snapshots to live observers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::mpsc;

use crate::models::SessionId;
use crate::protocol::ServerMessage;

/// Identifies one subscription so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

struct Observer {
    handle: u64,
    tx: mpsc::Sender<ServerMessage>,
}

#[derive(Default)]
struct HubInner {
    next_handle: u64,
    observers: HashMap<SessionId, Vec<Observer>>,
}

/// Per-session observer registry with bounded, non-blocking delivery.
///
/// Publishing never waits: an observer whose buffer is full or whose
/// receiver is gone is silently dropped from membership, so one stalled
/// connection cannot hold up a session's timer loop or its other observers.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<Mutex<HubInner>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, id: SessionId) -> (ObserverHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner
            .observers
            .entry(id)
            .or_default()
            .push(Observer { handle, tx });
        (ObserverHandle(handle), rx)
    }

    pub fn unsubscribe(&self, id: SessionId, handle: ObserverHandle) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(observers) = inner.observers.get_mut(&id) {
            observers.retain(|observer| observer.handle != handle.0);
            if observers.is_empty() {
                inner.observers.remove(&id);
            }
        }
    }

    pub fn publish(&self, id: SessionId, message: &ServerMessage) {
        let mut inner = self.inner.lock().unwrap();
        let Some(observers) = inner.observers.get_mut(&id) else {
            return;
        };

        observers.retain(|observer| match observer.tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(err) => {
                debug!("Dropping observer {} for session {id}: {err}", observer.handle);
                false
            }
        });

        if observers.is_empty() {
            inner.observers.remove(&id);
        }
    }

    pub fn observer_count(&self, id: SessionId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .observers
            .get(&id)
            .map_or(0, Vec::len)
    }

    /// Total observers across all sessions, for health reporting.
    pub fn connection_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .observers
            .values()
            .map(Vec::len)
            .sum()
    }

    pub(crate) fn close_session(&self, id: SessionId) {
        self.inner.lock().unwrap().observers.remove(&id);
    }
}
