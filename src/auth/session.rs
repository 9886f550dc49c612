use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo_types::User;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct Slot {
    user: User,
    last_seen: Instant,
}

/// Authenticated users keyed by per-client session id. Each client only
/// ever touches its own slot through a [`ClientSession`].
///
/// Slots idle longer than `idle_timeout` are dropped, and the map never
/// holds more than `max_sessions`; the least recently seen slot goes first.
/// An evicted client falls back to its persistent token.
pub struct SessionStore {
    slots: RwLock<HashMap<Uuid, Slot>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Handle for a client that presented `id` (or none yet).
    pub fn client(self: &Arc<Self>, id: Option<Uuid>) -> ClientSession {
        ClientSession {
            id,
            changed: false,
            store: Arc::clone(self),
        }
    }

    fn is_idle(&self, slot: &Slot, now: Instant) -> bool {
        now.duration_since(slot.last_seen) > self.idle_timeout
    }

    /// Make room for one more slot.
    fn evict(&self, slots: &mut HashMap<Uuid, Slot>, now: Instant) {
        let before = slots.len();
        slots.retain(|_, slot| !self.is_idle(slot, now));
        while slots.len() >= self.max_sessions {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_seen)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    slots.remove(&id);
                }
                None => break,
            }
        }
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, remaining = slots.len(), "sessions evicted");
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}

/// One client's session slot.
pub struct ClientSession {
    id: Option<Uuid>,
    changed: bool,
    store: Arc<SessionStore>,
}

impl ClientSession {
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    /// Whether the id changed during this request and the client needs a
    /// new `sid` cookie (or a removal, when `id()` is `None`).
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// The stored user, marking the slot as seen. An idle slot is dropped
    /// and reads as anonymous.
    pub async fn get(&self) -> Option<User> {
        let id = self.id?;
        let now = Instant::now();
        let mut slots = self.store.slots.write().await;
        if self.store.is_idle(slots.get(&id)?, now) {
            slots.remove(&id);
            return None;
        }
        let slot = slots.get_mut(&id)?;
        slot.last_seen = now;
        Some(slot.user.clone())
    }

    /// Store `user` under a newly minted id. Rotating on every sign-in keeps
    /// a client-chosen id from ever becoming authenticated.
    pub async fn set(&mut self, user: User) {
        let new_id = Uuid::new_v4();
        let now = Instant::now();
        let mut slots = self.store.slots.write().await;
        if let Some(old) = self.id.take() {
            slots.remove(&old);
        }
        self.store.evict(&mut slots, now);
        debug!(user_id = user.id, "session established");
        slots.insert(new_id, Slot { user, last_seen: now });
        self.id = Some(new_id);
        self.changed = true;
    }

    /// Replace the stored user without rotating, e.g. after a refetch.
    pub async fn refresh(&self, user: User) {
        if let Some(id) = self.id {
            if let Some(slot) = self.store.slots.write().await.get_mut(&id) {
                slot.user = user;
                slot.last_seen = Instant::now();
            }
        }
    }

    /// Drop this client's slot. No-op when already anonymous.
    pub async fn clear(&mut self) {
        if let Some(id) = self.id.take() {
            self.store.slots.write().await.remove(&id);
            self.changed = true;
        }
    }
}
