//! Session context and storage.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedMutexGuard, TryLockError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::transcript::Transcript;

/// Mutable state of one conversation.
#[derive(Debug)]
pub struct ChatSession {
    pub transcript: Transcript,
    /// A user turn was submitted and no reply has been streamed for it yet.
    pub awaiting_reply: bool,
}

/// Cloneable reference to a session in the store.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<SessionEntry>,
}

#[derive(Debug)]
struct SessionEntry {
    id: String,
    /// Remote thread backing this conversation.
    thread_id: String,
    state: Arc<tokio::sync::Mutex<ChatSession>>,
    /// Token of the reply currently streaming, if any.
    cancel: Mutex<Option<CancellationToken>>,
    /// Files generated by runs in this session; only these are proxied.
    files: RwLock<HashSet<String>>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl SessionHandle {
    fn new(id: String, thread_id: String, transcript: Transcript) -> Self {
        Self {
            inner: Arc::new(SessionEntry {
                id,
                thread_id,
                state: Arc::new(tokio::sync::Mutex::new(ChatSession {
                    transcript,
                    awaiting_reply: false,
                })),
                cancel: Mutex::new(None),
                files: RwLock::new(HashSet::new()),
                last_activity: RwLock::new(Utc::now()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.inner.thread_id
    }

    /// Take the session without waiting.
    ///
    /// Fails while another request (typically a streaming reply) holds it.
    pub fn try_lock(&self) -> Result<OwnedMutexGuard<ChatSession>, TryLockError> {
        let guard = Arc::clone(&self.inner.state).try_lock_owned()?;
        self.touch();
        Ok(guard)
    }

    /// Register the token of the reply that is about to stream.
    pub fn set_cancel(&self, token: CancellationToken) {
        *self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Forget the token once the reply has finished.
    pub fn clear_cancel(&self) {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Cancel the streaming reply. Returns `false` if nothing was streaming.
    pub fn cancel(&self) -> bool {
        let guard = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Update the last activity timestamp.
    pub fn touch(&self) {
        *self
            .inner
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Check whether the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        let last = *self
            .inner
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        // A negative difference means clock skew; treat as active.
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }

    /// Record a file produced by a run so the proxy may serve it.
    pub fn allow_file(&self, file_id: impl Into<String>) {
        self.inner
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_id.into());
    }

    #[must_use]
    pub fn serves_file(&self, file_id: &str) -> bool {
        self.inner
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(file_id)
    }

    #[cfg(test)]
    fn backdate(&self, by: Duration) {
        let mut guard = self
            .inner
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard -= chrono::Duration::from_std(by).unwrap_or_default();
    }
}

/// Thread-safe store for sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session bound to `thread_id` and return it.
    pub fn create(&self, thread_id: impl Into<String>, transcript: Transcript) -> SessionHandle {
        let id = Uuid::new_v4().to_string();
        let handle = SessionHandle::new(id.clone(), thread_id.into(), transcript);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.clone());
        handle
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the sessions idle longer than `timeout`.
    ///
    /// The caller owns cleanup of the remote threads.
    pub fn take_expired(&self, timeout: Duration) -> Vec<SessionHandle> {
        let mut guard = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, handle)| handle.is_expired_with_timeout(timeout))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| guard.remove(id))
            .collect()
    }
}
