use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::Error;

/// Default number of simultaneous tile pipelines and HTTP requests.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Per-session guard against duplicate and unbounded work.
///
/// Holds the set of keys (remote paths) currently being fetched, the keys
/// completed in this session, the keys the server does not have, and two gates of equal capacity: one slot
/// per tile pipeline and one slot per HTTP request. A request slot is only
/// held for the duration of a single request, so nested reference fetches
/// share the ceiling without being able to deadlock the tile gate.
#[derive(Debug)]
pub struct TaskDedup {
    in_flight: Mutex<HashSet<String>>,
    completed: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    tiles: Semaphore,
    requests: Semaphore,
    capacity: usize,
}

impl TaskDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            in_flight: Mutex::new(HashSet::new()),
            completed: Mutex::new(HashSet::new()),
            missing: Mutex::new(HashSet::new()),
            tiles: Semaphore::new(capacity),
            requests: Semaphore::new(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks `key` as in flight. Returns `false` if it already was; the caller
    /// must then skip the work.
    pub fn try_begin(&self, key: &str) -> bool {
        lock(&self.in_flight).insert(key.to_owned())
    }

    /// Releases `key`. Must follow every successful [`try_begin`](Self::try_begin).
    pub fn end(&self, key: &str) {
        lock(&self.in_flight).remove(key);
    }

    /// Whether the work for `key` already completed in this session.
    pub fn is_completed(&self, key: &str) -> bool {
        lock(&self.completed).contains(key)
    }

    /// Whether the server answered 404 for `key` earlier in this session.
    pub fn is_missing(&self, key: &str) -> bool {
        lock(&self.missing).contains(key)
    }

    /// Claims `key` unless it is in flight or already completed.
    ///
    /// The claim ends the key when dropped, on every exit path.
    pub fn claim(&self, key: &str) -> Option<Claim<'_>> {
        let completed = lock(&self.completed);
        if completed.contains(key) || !self.try_begin(key) {
            return None;
        }
        drop(completed);

        Some(Claim {
            dedup: self,
            key: key.to_owned(),
        })
    }

    /// Waits for a tile pipeline slot. The slot is released on drop.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, Error> {
        self.tiles.acquire().await.map_err(|_| Error::GateClosed)
    }

    /// Waits for an HTTP request slot. The slot is released on drop.
    pub async fn acquire_request(&self) -> Result<SemaphorePermit<'_>, Error> {
        self.requests.acquire().await.map_err(|_| Error::GateClosed)
    }

    /// Free tile pipeline slots.
    pub fn available(&self) -> usize {
        self.tiles.available_permits()
    }
}

impl Default for TaskDedup {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

/// Exclusive right to work on one key.
#[derive(Debug)]
pub struct Claim<'a> {
    dedup: &'a TaskDedup,
    key: String,
}

impl Claim<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records the key as done so later claims in this session are refused.
    pub fn complete(self) {
        lock(&self.dedup.completed).insert(self.key.clone());
    }

    /// Records the key as absent on the server. Later claims still succeed,
    /// callers check [`TaskDedup::is_missing`] first.
    pub fn missing(self) {
        lock(&self.dedup.missing).insert(self.key.clone());
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.dedup.end(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn begin_twice_is_refused_until_end() {
        let dedup = TaskDedup::default();
        assert!(dedup.try_begin("ws2/Models/a.ac"));
        assert!(!dedup.try_begin("ws2/Models/a.ac"));
        dedup.end("ws2/Models/a.ac");
        assert!(dedup.try_begin("ws2/Models/a.ac"));
    }

    #[test]
    fn dropped_claim_releases_the_key() {
        let dedup = TaskDedup::default();
        {
            let claim = dedup.claim("k").unwrap();
            assert_eq!(claim.key(), "k");
            assert!(dedup.claim("k").is_none());
        }
        assert!(dedup.claim("k").is_some());
        assert!(!dedup.is_completed("k"));
    }

    #[test]
    fn completed_claims_are_not_repeated() {
        let dedup = TaskDedup::default();
        dedup.claim("k").unwrap().complete();
        assert!(dedup.is_completed("k"));
        assert!(dedup.claim("k").is_none());
        // the in-flight set itself is free again
        assert!(dedup.try_begin("k"));
    }

    #[test]
    fn missing_keys_are_remembered() {
        let dedup = TaskDedup::default();
        assert!(!dedup.is_missing("osm2city/Roads/e000n40/e008n47.txz"));
        dedup.claim("osm2city/Roads/e000n40/e008n47.txz").unwrap().missing();
        assert!(dedup.is_missing("osm2city/Roads/e000n40/e008n47.txz"));
        assert!(!dedup.is_completed("osm2city/Roads/e000n40/e008n47.txz"));
    }

    #[tokio::test]
    async fn gate_blocks_at_capacity_and_releases_on_drop() {
        let dedup = Arc::new(TaskDedup::new(1));
        let slot = dedup.acquire().await.unwrap();
        assert_eq!(dedup.available(), 0);

        let waiter = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                let _slot = dedup.acquire().await.unwrap();
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(slot);
        waiter.await.unwrap();
        assert_eq!(dedup.available(), 1);
    }

    #[tokio::test]
    async fn slot_is_released_when_work_fails() {
        let dedup = TaskDedup::new(1);
        let work = async {
            let _slot = dedup.acquire().await?;
            Err::<(), Error>(Error::NotFound { url: "x".into() })
        };
        assert!(work.await.is_err());
        assert_eq!(dedup.available(), 1);
    }
}
