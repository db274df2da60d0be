//! Bounded, per-identifier conversation store.
//!
//! The map itself sits behind a short-lived `std` mutex that is never held
//! across an `.await`. Each session lives in its own `tokio` mutex, so
//! requests for different identifiers run in parallel while requests for the
//! same identifier queue up behind the one in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::types::Turn;

/// Default number of sessions kept in memory.
pub const DEFAULT_SESSION_CAPACITY: usize = 100;

/// One conversation. Turns are append-only.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    turns: Vec<Turn>,
    created_at: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            created_at: now,
            last_touched: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_touched(&self) -> DateTime<Utc> {
        self.last_touched
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.last_touched = Utc::now();
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
        self.last_touched = Utc::now();
    }
}

/// Exclusive access to one session for the duration of a request.
pub type SessionLease = OwnedMutexGuard<Session>;

struct Entry {
    slot: Arc<AsyncMutex<Session>>,
    /// Commit order; the smallest is the least recently touched.
    seq: u64,
}

impl Entry {
    /// Leased or waited on by a request. Only the map holds an idle slot.
    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.slot) > 1
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Evict least-recently-touched idle sessions until at most `keep`
    /// remain. Busy sessions and `exempt` are skipped, so the store may stay
    /// above `keep` while every other session is in use.
    fn evict_down_to(&mut self, keep: usize, exempt: Option<&str>) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > keep {
            let Some(oldest) = self
                .entries
                .iter()
                .filter(|(id, e)| Some(id.as_str()) != exempt && !e.is_busy())
                .min_by_key(|(_, e)| e.seq)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }
}

pub struct SessionStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The map is left consistent at every await-free step, so a poisoned
        // lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lease the session called `id`, creating an empty one when unseen.
    ///
    /// Leasing neither touches the session nor evicts others; both happen on
    /// [`commit`](Self::commit). The returned lease waits for any request
    /// already holding the session.
    pub async fn get_or_create(&self, id: &str) -> SessionLease {
        let slot = {
            let mut inner = self.lock();
            match inner.entries.get(id) {
                Some(entry) => entry.slot.clone(),
                None => {
                    let seq = inner.bump();
                    let slot = Arc::new(AsyncMutex::new(Session::new(id.to_owned())));
                    inner.entries.insert(id.to_owned(), Entry { slot: slot.clone(), seq });
                    debug!(session_id = id, "session created");
                    slot
                }
            }
        };
        slot.lock_owned().await
    }

    /// Append `turns` to the leased session and mark it most recently
    /// touched, then evict idle sessions beyond capacity. Returns the full
    /// history after the commit.
    pub fn commit(&self, lease: &mut SessionLease, turns: Vec<Turn>) -> Vec<Turn> {
        lease.extend(turns);
        let history = lease.turns().to_vec();

        let mut inner = self.lock();
        let seq = inner.bump();
        let slot = OwnedMutexGuard::mutex(lease);
        match inner.entries.get_mut(lease.id()) {
            Some(entry) if Arc::ptr_eq(&entry.slot, slot) => entry.seq = seq,
            Some(_) => {
                warn!(session_id = lease.id(), "session replaced while leased; commit kept out of the store");
            }
            None => {
                // Removed while in flight.
                inner.entries.insert(
                    lease.id().to_owned(),
                    Entry {
                        slot: slot.clone(),
                        seq,
                    },
                );
            }
        }

        let evicted = inner.evict_down_to(self.capacity, Some(lease.id()));
        if !evicted.is_empty() {
            info!(evicted = ?evicted, "session store at capacity; evicted least recently used");
        }
        history
    }

    /// Give a lease back without committing. A session created for it that
    /// never received a turn is dropped again, unless another request is
    /// already waiting on it.
    pub fn release(&self, lease: SessionLease) {
        if lease.turns().is_empty() {
            let mut inner = self.lock();
            let unused = inner.entries.get(lease.id()).is_some_and(|entry| {
                Arc::ptr_eq(&entry.slot, OwnedMutexGuard::mutex(&lease))
                    && Arc::strong_count(&entry.slot) == 2
            });
            if unused {
                inner.entries.remove(lease.id());
                debug!(session_id = lease.id(), "unused session discarded");
            }
        }
    }

    /// Append one turn to `id`, creating the session when unseen.
    pub async fn append(&self, id: &str, turn: Turn) {
        let mut lease = self.get_or_create(id).await;
        self.commit(&mut lease, vec![turn]);
    }

    /// Evict least-recently-touched idle sessions while over capacity.
    /// Returns the evicted identifiers, oldest first.
    pub fn evict_if_over_capacity(&self) -> Vec<String> {
        self.lock().evict_down_to(self.capacity, None)
    }

    /// Snapshot of the turns of `id`, without touching it.
    pub async fn history(&self, id: &str) -> Option<Vec<Turn>> {
        let slot = self.lock().entries.get(id).map(|e| e.slot.clone())?;
        let session = slot.lock().await;
        Some(session.turns().to_vec())
    }

    /// Drop the whole session. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn contents(turns: Option<Vec<Turn>>) -> Vec<String> {
        turns.unwrap_or_default().into_iter().map(|t| t.content).collect()
    }

    #[tokio::test]
    async fn creating_past_capacity_evicts_least_recently_touched() {
        let store = SessionStore::new(100);
        for i in 0..100 {
            store.append(&format!("s{i}"), Turn::user("hi")).await;
        }
        // s0 is the oldest by insertion but is touched again.
        store.append("s0", Turn::user("again")).await;
        assert_eq!(store.len(), 100);

        store.append("s100", Turn::user("hi")).await;
        assert_eq!(store.len(), 100);
        assert!(store.contains("s0"));
        assert!(!store.contains("s1"));
        assert!(store.contains("s2"));
        assert!(store.contains("s100"));
    }

    #[tokio::test]
    async fn append_is_ordered_and_history_is_isolated() {
        let store = SessionStore::default();
        store.append("a", Turn::user("one")).await;
        store.append("b", Turn::user("other")).await;
        store.append("a", Turn::assistant("two")).await;

        assert_eq!(contents(store.history("a").await), vec!["one", "two"]);
        assert_eq!(store.history("b").await.unwrap().len(), 1);
        assert!(store.history("c").await.is_none());
    }

    #[tokio::test]
    async fn leased_sessions_are_never_evicted() {
        let store = SessionStore::new(2);
        let mut lease = store.get_or_create("a").await;
        store.append("b", Turn::user("b")).await;
        store.append("c", Turn::user("c")).await;
        assert!(store.contains("a"));
        assert!(!store.contains("b"));

        store.commit(&mut lease, vec![Turn::user("kept")]);
        drop(lease);
        assert_eq!(contents(store.history("a").await), vec!["kept"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn recency_follows_commit_order() {
        let store = SessionStore::new(2);
        store.append("a", Turn::user("a")).await;
        let mut lease = store.get_or_create("b").await;
        store.append("c", Turn::user("c")).await;
        // `b` was leased before `c` was created but commits after it.
        store.commit(&mut lease, vec![Turn::user("b")]);
        drop(lease);

        store.append("d", Turn::user("d")).await;
        assert!(store.contains("b"));
        assert!(!store.contains("c"));
        assert!(store.contains("d"));
    }

    #[tokio::test]
    async fn released_lease_leaves_no_trace() {
        let store = SessionStore::new(1);
        store.append("kept", Turn::user("hi")).await;

        let lease = store.get_or_create("fresh").await;
        store.release(lease);
        assert!(!store.contains("fresh"));
        assert!(store.contains("kept"));

        let lease = store.get_or_create("kept").await;
        store.release(lease);
        assert_eq!(contents(store.history("kept").await), vec!["hi"]);
    }

    #[tokio::test]
    async fn commit_after_remove_restores_the_session() {
        let store = SessionStore::default();
        let mut lease = store.get_or_create("s").await;
        assert!(store.remove("s"));
        let history = store.commit(&mut lease, vec![Turn::user("late")]);
        drop(lease);
        assert_eq!(history.len(), 1);
        assert_eq!(contents(store.history("s").await), vec!["late"]);
    }

    #[tokio::test]
    async fn remove_and_explicit_eviction() {
        let store = SessionStore::new(2);
        store.append("x", Turn::user("x")).await;
        store.append("y", Turn::user("y")).await;
        assert!(store.remove("x"));
        assert!(!store.remove("x"));
        assert!(store.evict_if_over_capacity().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_session_requests_are_serialized() {
        let store = Arc::new(SessionStore::default());
        let mut lease = store.get_or_create("s").await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut lease = store.get_or_create("s").await;
                store.commit(&mut lease, vec![Turn::user("second")]);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Other identifiers are not blocked.
        let other = store.get_or_create("t").await;
        store.release(other);

        store.commit(&mut lease, vec![Turn::user("first")]);
        drop(lease);
        waiter.await.unwrap();

        assert_eq!(contents(store.history("s").await), vec!["first", "second"]);
    }
}
