//! Tracking of live browser sessions so they can be force-closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use finsync_core::{BrowserSession, EntityKey};
use futures::future::join_all;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// Close failed or timed out; the process was killed.
    Killed,
    /// Close and kill both failed.
    Leaked,
}

/// Close `session`, falling back to a kill when close errors or exceeds `timeout`.
pub async fn close_session(session: &dyn BrowserSession, timeout: Duration) -> CloseOutcome {
    let reason = match tokio::time::timeout(timeout, session.close()).await {
        Ok(Ok(())) => {
            debug!(session = session.id(), "browser session closed");
            return CloseOutcome::Closed;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("close timed out after {timeout:?}"),
    };

    warn!(session = session.id(), reason = %reason, "killing browser session");
    match session.kill() {
        Ok(()) => CloseOutcome::Killed,
        Err(e) => {
            warn!(session = session.id(), error = %e, "failed to kill browser session");
            CloseOutcome::Leaked
        }
    }
}

/// Entity key to active browser session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<EntityKey, Arc<dyn BrowserSession>>>,
}

impl SessionRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKey, Arc<dyn BrowserSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, key: &EntityKey, session: Arc<dyn BrowserSession>) {
        if let Some(old) = self.lock().insert(key.clone(), session) {
            warn!(entity = %key, old = old.id(), "replaced untracked browser session");
        }
    }

    pub fn remove(&self, key: &EntityKey) -> Option<Arc<dyn BrowserSession>> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every tracked session in parallel.
    pub async fn close_all(&self, timeout: Duration) -> Vec<CloseOutcome> {
        let drained: Vec<(EntityKey, Arc<dyn BrowserSession>)> = self.lock().drain().collect();
        if drained.is_empty() {
            return Vec::new();
        }
        info!(count = drained.len(), "Force-closing browser sessions");
        join_all(
            drained
                .iter()
                .map(|(_, session)| close_session(session.as_ref(), timeout)),
        )
        .await
    }
}
