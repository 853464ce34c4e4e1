//! In-memory sessions keyed by an opaque identifier carried in a cookie.
//!
//! The registry is the only writer of session lifecycle: it creates sessions,
//! refreshes their expiry on every access and drops them once expired. An
//! expired session is indistinguishable from one that never existed; the next
//! request presenting its identifier gets a fresh session with a new id.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Name of the cookie that carries the session identifier.
pub const SESSION_COOKIE: &str = "SESSIONID";

/// Per-client attribute bag, shared by every request presenting the same id.
#[derive(Debug)]
pub struct Session {
    id: String,
    data: DashMap<String, Value>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            data: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|value| value.clone())
    }

    /// Stores a value; the last write for a key wins.
    pub fn set<T>(&self, key: &str, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
struct Tracked {
    session: Arc<Session>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Tracked>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live session for `id`, refreshing its expiry, or a new
    /// session under a fresh identifier when `id` is absent, empty, unknown
    /// or expired.
    pub fn get_or_create(&self, id: Option<&str>) -> Arc<Session> {
        let now = Instant::now();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if let Some(mut tracked) = self.sessions.get_mut(id) {
                if tracked.expires_at > now {
                    tracked.expires_at = now + self.ttl;
                    return tracked.session.clone();
                }
            }
            // expired but not swept yet
            self.sessions
                .remove_if(id, |_, tracked| tracked.expires_at <= now);
        }
        self.create_at(now)
    }

    pub fn create(&self) -> Arc<Session> {
        self.create_at(Instant::now())
    }

    fn create_at(&self, now: Instant) -> Arc<Session> {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let session = Arc::new(Session::new(id));
                slot.insert(Tracked {
                    session: session.clone(),
                    expires_at: now + self.ttl,
                });
                tracing::debug!(session = %session.id(), "session created");
                return session;
            }
        }
    }

    /// Looks a session up without refreshing it.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .filter(|tracked| tracked.expires_at > Instant::now())
            .map(|tracked| tracked.session.clone())
    }

    pub fn expires_at(&self, id: &str) -> Option<Instant> {
        self.sessions.get(id).map(|tracked| tracked.expires_at)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, tracked)| tracked.session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes every session whose expiry is at or before now.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, tracked| tracked.expires_at > now);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.sessions.len(), "swept expired sessions");
        }
        removed
    }

    /// Runs [`SessionRegistry::sweep`] on its own schedule until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}
