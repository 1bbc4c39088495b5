use moka::{future::Cache, Expiry};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

/// Per-client rolling admission counter
///
/// `admitted_count` stays in `[1, max_requests]` once the first request for
/// the key has been admitted. A freshly created entry starts at 0, which is
/// only ever observed under the entry lock before its first decision.
#[derive(Debug, Clone, Copy)]
pub struct ClientState {
    pub admitted_count: u32,
    pub last_admission: Instant,
}

impl ClientState {
    fn fresh() -> Self {
        Self {
            admitted_count: 0,
            last_admission: Instant::now(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.admitted_count == 0
    }
}

/// Shared handle to one client's state, carrying its eviction TTL
///
/// The state lives behind an `Arc<Mutex<..>>` so eviction cannot invalidate
/// a handle that a decision in flight still holds, and so concurrent
/// read-modify-write sequences on the same key are serialized.
#[derive(Clone)]
pub struct StateHandle {
    ttl: Duration,
    pub state: Arc<Mutex<ClientState>>,
}

struct PerEntryExpiry;

impl Expiry<String, StateHandle> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StateHandle,
        _current_time: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StateHandle,
        _current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache of per-client admission state with per-entry TTL
///
/// Entries are never deleted explicitly; they expire `ttl` after the most
/// recent write, at which point the client is indistinguishable from one
/// that was never seen.
pub struct ClientStateStore {
    cache: Cache<String, StateHandle>,
}

impl ClientStateStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryExpiry)
            .build();

        Self { cache }
    }

    /// Look up the state for a key without creating it
    pub async fn get(&self, key: &str) -> Option<StateHandle> {
        self.cache.get(key).await
    }

    /// Atomic get-or-insert: exactly one caller creates the entry, every
    /// other concurrent caller for the same key receives that same handle
    pub async fn entry(&self, key: &str, ttl: Duration) -> StateHandle {
        self.cache
            .entry(key.to_string())
            .or_insert_with(async {
                StateHandle {
                    ttl,
                    state: Arc::new(Mutex::new(ClientState::fresh())),
                }
            })
            .await
            .into_value()
    }

    /// Re-insert a handle after a write so its TTL slides forward from now
    pub async fn touch(&self, key: &str, handle: StateHandle) {
        self.cache.insert(key.to_string(), handle).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
