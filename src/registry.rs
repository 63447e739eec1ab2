//! Process-wide set of live sessions.

use crate::error::RegistryError;
use crate::peer::types::SessionId;
use crate::session::Session;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    live: HashMap<SessionId, Arc<Session>>,
    draining: bool,
}

/// Sessions that have not reached `closed` yet.
///
/// Only live ids are checked for duplicates. Ids are 128 random bits, so a
/// retired id coming back is not guarded against and nothing is kept for
/// sessions that are gone.
///
/// The lock is only held for map mutation, never across an await.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.draining {
            return Err(RegistryError::ShuttingDown);
        }
        let id = session.id().clone();
        if inner.live.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        inner.live.insert(id, session);
        Ok(())
    }

    /// A session that is already failed or closed but not yet removed by its
    /// supervisor is reported as not found.
    pub fn lookup(&self, id: &SessionId) -> Result<Arc<Session>, RegistryError> {
        self.inner
            .lock()
            .live
            .get(id)
            .filter(|session| session.state().is_live())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Removes `id` if present.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.inner.lock().live.remove(id);
        if removed.is_some() {
            tracing::debug!(session = %id, "deregistered");
        }
        removed
    }

    /// Stops accepting sessions, closes every member concurrently and waits
    /// for all of them. Individual close failures are logged.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock();
            inner.draining = true;
            inner.live.values().cloned().collect()
        };
        tracing::info!("closing {} session(s)", sessions.len());

        let results = join_all(sessions.iter().map(|s| s.close())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(session = %session.id(), "close failed during shutdown: {err}");
            }
        }

        self.inner.lock().live.clear();
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().draining
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.inner.lock().live.keys().cloned().collect();
        ids.sort();
        ids
    }
}
