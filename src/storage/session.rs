//! In-memory session store.
//!
//! A session is valid while both hold:
//! - `now - created_at <= session_ttl`
//! - `now - last_activity_at <= inactivity_ttl`
//!
//! Validity is re-checked on every access. Invalid sessions are evicted lazily
//! on access and periodically by [`SessionStore::sweep`]. A removed id is never
//! valid again.
//!
//! A lazily evicted session that still holds a remote browser is parked until
//! the next sweep (or a terminate for the same id) claims it, so its VM is
//! always handed to someone who can stop it.

use crate::auth::session::generate_session_id;
use crate::clock::Clock;
use crate::models::{RemoteSession, Session};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    /// Evicted on access with a remote still attached.
    evicted: Vec<Session>,
}

impl Inner {
    fn evict(&mut self, id: &str) {
        if let Some(session) = self.sessions.remove(id) {
            if session.remote.is_some() {
                self.evicted.push(session);
            }
        }
    }
}

pub struct SessionStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    session_ttl_ms: u64,
    inactivity_ttl_ms: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, session_ttl: Duration, inactivity_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            session_ttl_ms: millis(session_ttl),
            inactivity_ttl_ms: millis(inactivity_ttl),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    pub fn inactivity_ttl(&self) -> Duration {
        Duration::from_millis(self.inactivity_ttl_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_valid(&self, session: &Session, now: u64) -> bool {
        now.saturating_sub(session.created_at) <= self.session_ttl_ms
            && now.saturating_sub(session.last_activity_at) <= self.inactivity_ttl_ms
    }

    /// Create a session owned by `owner_address`.
    ///
    /// Does not check for an existing session; that check belongs to the caller.
    pub fn create(&self, owner_address: &str, is_shared: bool) -> Session {
        let now = self.clock.now_ms();
        let session = Session {
            id: generate_session_id(),
            created_at: now,
            last_activity_at: now,
            owner_address: owner_address.to_string(),
            is_shared,
            member_addresses: vec![owner_address.to_string()],
            remote: None,
        };
        self.lock()
            .sessions
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Get a live session. Evicts and returns `None` if either TTL has passed.
    pub fn get(&self, id: &str) -> Option<Session> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let session = inner.sessions.get(id)?;
        if !self.is_valid(session, now) {
            inner.evict(id);
            return None;
        }
        Some(session.clone())
    }

    /// Record activity on a live session.
    pub fn touch(&self, id: &str) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(id) else {
            return false;
        };
        if !self.is_valid(session, now) {
            inner.evict(id);
            return false;
        }
        session.last_activity_at = now;
        true
    }

    /// Add `address` to a live shared session and record activity.
    ///
    /// Private, expired and unknown sessions all yield `None`.
    pub fn join(&self, id: &str, address: &str) -> Option<Session> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let session = inner.sessions.get_mut(id)?;
        if !session.is_shared {
            return None;
        }
        if !self.is_valid(session, now) {
            inner.evict(id);
            return None;
        }
        if !session.member_addresses.iter().any(|a| a == address) {
            session.member_addresses.push(address.to_string());
        }
        session.last_activity_at = now;
        Some(session.clone())
    }

    /// Attach the provider's handles. Only succeeds once per live session.
    pub fn attach_remote(&self, id: &str, remote: RemoteSession) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(id) else {
            return false;
        };
        if session.remote.is_some() || !self.is_valid(session, now) {
            return false;
        }
        session.remote = Some(remote);
        true
    }

    /// Remove a session unconditionally.
    pub fn delete(&self, id: &str) -> bool {
        self.lock().sessions.remove(id).is_some()
    }

    /// Claim a session that was evicted on access while its remote was still attached.
    ///
    /// The caller becomes responsible for terminating the remote.
    pub fn take_evicted(&self, id: &str) -> Option<Session> {
        let mut inner = self.lock();
        let index = inner.evicted.iter().position(|s| s.id == id)?;
        Some(inner.evicted.swap_remove(index))
    }

    /// Remove every session past either TTL and return them, together with any
    /// evicted session whose remote has not been claimed yet.
    pub fn sweep(&self) -> Vec<Session> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| !self.is_valid(s, now))
            .map(|(id, _)| id.clone())
            .collect();
        let mut removed: Vec<Session> = std::mem::take(&mut inner.evicted);
        removed.extend(expired.iter().filter_map(|id| inner.sessions.remove(id)));
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
