//! In-memory session store with LRU eviction.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::persist::SharedPersistence;
use seren_agent::{ConversationHistory, SessionId, SharedRegistry};

/// Default number of sessions kept in memory before LRU eviction.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of sessions to keep before evicting the least
    /// recently used.
    pub max_sessions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }
}

/// A cheap handle to one session's live state.
///
/// History and registry are shared; cloning the handle clones the
/// references, not the data. The handle stays valid after the session is
/// evicted from the store, it just can no longer be looked up.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Display name of the active model profile.
    pub profile: String,
    pub history: Arc<Mutex<ConversationHistory>>,
    pub registry: SharedRegistry,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("messages", &self.history.lock().len())
            .finish()
    }
}

struct SessionEntry {
    handle: SessionHandle,
    busy: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Session store with LRU eviction and a coarse lock.
///
/// One lock guards the whole table. Operations only take it for map
/// lookups and busy-flag flips, never across I/O, so contention stays
/// negligible next to model latency.
pub struct SessionStore {
    inner: Mutex<LruCache<SessionId, SessionEntry>>,
    persistence: SharedPersistence,
    config: StoreConfig,
}

impl SessionStore {
    pub fn new(config: StoreConfig, persistence: SharedPersistence) -> Self {
        let cap = NonZeroUsize::new(config.max_sessions)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            persistence,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create a fresh session with an empty history.
    pub fn create(
        &self,
        profile: impl Into<String>,
        registry: SharedRegistry,
    ) -> SessionHandle {
        let handle = SessionHandle {
            id: SessionId::new(),
            profile: profile.into(),
            history: Arc::new(Mutex::new(ConversationHistory::new())),
            registry,
        };
        tracing::info!(session = %handle.id, profile = %handle.profile, "session created");
        self.insert(handle.clone());
        handle
    }

    /// Resume a session from persistent storage.
    ///
    /// If the session is still cached its live state wins and storage is
    /// not consulted. Otherwise the full history is loaded once and the
    /// session re-enters the cache with a fresh registry, ready for tool
    /// rediscovery.
    pub async fn resume(
        &self,
        id: SessionId,
        profile: impl Into<String>,
        registry: SharedRegistry,
    ) -> Result<SessionHandle> {
        if let Some(handle) = self.get(id) {
            return Ok(handle);
        }

        let messages = self.persistence.load_history(id).await?;
        tracing::info!(session = %id, messages = messages.len(), "session resumed from storage");

        let handle = SessionHandle {
            id,
            profile: profile.into(),
            history: Arc::new(Mutex::new(ConversationHistory::from_messages(messages))),
            registry,
        };
        self.insert(handle.clone());
        Ok(handle)
    }

    /// Look up a cached session, marking it recently used.
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner.lock().get(&id).map(|e| e.handle.clone())
    }

    /// Drop a session from the cache. Returns true if it was present.
    pub fn remove(&self, id: SessionId) -> bool {
        self.inner.lock().pop(&id).is_some()
    }

    /// Mark a session busy for the duration of a turn.
    ///
    /// A session runs at most one turn at a time; a second concurrent
    /// turn is rejected with [`Error::Busy`] rather than queued.
    pub fn begin_turn(&self, id: SessionId) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(&id).ok_or(Error::NotFound(id))?;
        if entry.busy {
            return Err(Error::Busy(id));
        }
        entry.busy = true;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Clear the busy flag after a turn ends, however it ended.
    pub fn end_turn(&self, id: SessionId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(&id) {
            entry.busy = false;
            entry.updated_at = Utc::now();
        }
    }

    /// Whether a cached session is mid-turn.
    pub fn is_busy(&self, id: SessionId) -> bool {
        self.inner.lock().peek(&id).map(|e| e.busy).unwrap_or(false)
    }

    /// When a cached session was created.
    pub fn created_at(&self, id: SessionId) -> Option<DateTime<Utc>> {
        self.inner.lock().peek(&id).map(|e| e.created_at)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn insert(&self, handle: SessionHandle) {
        let id = handle.id;
        let now = Utc::now();
        let entry = SessionEntry {
            handle,
            busy: false,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.lock();
        // push returns the displaced pair even on a same-key replace;
        // only a different key is a real eviction.
        if let Some((evicted, _)) = inner.push(id, entry) {
            if evicted != id {
                tracing::debug!(session = %evicted, "evicted least recently used session");
            }
        }
    }
}
