//! Call session registry.
//!
//! Owns the mapping from call id to transcript. It is the only shared,
//! mutable state in the call path, so it also owns per-call serialization:
//! [`SessionRegistry::acquire`] hands out a guard that callers hold for the
//! whole handling of one webhook event. Overlapping deliveries for the same
//! call then queue behind each other instead of racing on the transcript,
//! while different calls proceed independently.

use crate::error::ConversationError;
use async_trait::async_trait;
use callbridge_types::{CallId, Turn};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

/// Conversation state for one phone call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    pub call_id: CallId,
    /// `transcript[0]` is always the system prompt.
    pub transcript: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    fn seeded(call_id: CallId, system_prompt: &str, greeting: &str) -> Self {
        Self {
            call_id,
            transcript: vec![Turn::system(system_prompt), Turn::assistant(greeting)],
            created_at: Utc::now(),
        }
    }
}

/// Result of [`SessionRegistry::get_or_create`].
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session: CallSession,
    /// `true` when this lookup created the session.
    pub created: bool,
}

/// Exclusive right to handle events for one call. Released on drop.
#[derive(Debug)]
pub struct CallGuard {
    call_id: CallId,
    guard: OwnedMutexGuard<()>,
    locks: Arc<Mutex<LockMap>>,
}

impl CallGuard {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }
}

impl Drop for CallGuard {
    // Forget the call's lock once no other task holds or waits on it. Every
    // `acquire` clones the lock under the map mutex, so a count of two (map
    // plus this guard) cannot grow while we hold that mutex.
    fn drop(&mut self) {
        let mut locks = lock_map(&self.locks);
        let ours = OwnedMutexGuard::mutex(&self.guard);
        let idle = locks
            .get(&self.call_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, ours) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&self.call_id);
        }
    }
}

/// Storage for call sessions.
///
/// Implementations must create at most one session per call id, keep
/// transcripts append-only, and never resurrect a destroyed session from
/// `append_turn`.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Waits until no other task holds the guard for `call_id`.
    async fn acquire(&self, call_id: &CallId) -> CallGuard;

    /// Returns the session for `call_id`, creating one seeded with
    /// `[system(system_prompt), assistant(greeting)]` if none exists.
    async fn get_or_create(&self, call_id: &CallId, system_prompt: &str, greeting: &str)
        -> SessionEntry;

    async fn append_turn(&self, call_id: &CallId, turn: Turn) -> Result<(), ConversationError>;

    /// Removes the session, returning it if it existed. Idempotent.
    async fn destroy(&self, call_id: &CallId) -> Option<CallSession>;

    async fn snapshot(&self, call_id: &CallId) -> Result<Vec<Turn>, ConversationError>;

    /// Number of live sessions.
    async fn active_calls(&self) -> usize;
}

type CallLock = Arc<tokio::sync::Mutex<()>>;
type LockMap = HashMap<CallId, CallLock>;

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|poisoned| {
        tracing::error!("call lock map poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Process-local registry. Sessions do not survive a restart.
///
/// Uses `std::sync::Mutex` for both maps: every acquisition is a brief
/// `HashMap` operation that never spans an `.await`. Per-call locks live
/// independently of sessions: `destroy` never touches them, and the last
/// guard to leave an uncontended lock removes it.
#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    sessions: Mutex<HashMap<CallId, CallSession>>,
    locks: Arc<Mutex<LockMap>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<CallId, CallSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| {
            tracing::error!("session map lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn acquire(&self, call_id: &CallId) -> CallGuard {
        let lock = lock_map(&self.locks)
            .entry(call_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        CallGuard {
            call_id: call_id.clone(),
            guard,
            locks: Arc::clone(&self.locks),
        }
    }

    async fn get_or_create(
        &self,
        call_id: &CallId,
        system_prompt: &str,
        greeting: &str,
    ) -> SessionEntry {
        let mut sessions = self.sessions();
        let mut created = false;
        let session = sessions.entry(call_id.clone()).or_insert_with(|| {
            created = true;
            CallSession::seeded(call_id.clone(), system_prompt, greeting)
        });
        if created {
            tracing::info!(call_id = %call_id, "created call session");
        }
        SessionEntry {
            session: session.clone(),
            created,
        }
    }

    async fn append_turn(&self, call_id: &CallId, turn: Turn) -> Result<(), ConversationError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(call_id)
            .ok_or_else(|| ConversationError::SessionNotFound(call_id.clone()))?;
        session.transcript.push(turn);
        Ok(())
    }

    async fn destroy(&self, call_id: &CallId) -> Option<CallSession> {
        let removed = self.sessions().remove(call_id);
        if removed.is_some() {
            tracing::info!(call_id = %call_id, "destroyed call session");
        }
        removed
    }

    async fn snapshot(&self, call_id: &CallId) -> Result<Vec<Turn>, ConversationError> {
        self.sessions()
            .get(call_id)
            .map(|session| session.transcript.clone())
            .ok_or_else(|| ConversationError::SessionNotFound(call_id.clone()))
    }

    async fn active_calls(&self) -> usize {
        self.sessions().len()
    }
}
