//! # Session Store
//!
//! Keyed, TTL-bounded accumulation of partial form data across screens. This
//! is the one piece of shared mutable state in the endpoint, so the rules
//! are strict:
//!
//! - The store hands out records behind a per-key `tokio::sync::Mutex`.
//!   Holding that lock across the state-machine step is what serializes a
//!   session's requests; unrelated sessions never contend.
//! - Only the flow state machine (via the orchestrator) mutates a record.
//!   The store itself just creates, finds, and evicts.
//! - Replay detection: each record remembers a fingerprint of the last
//!   decrypted request and the plaintext response it produced. At-least-once
//!   delivery upstream makes duplicates a normal event, not an anomaly —
//!   they must return the identical response, not advance the form twice.
//! - The out-of-band sweep acquires the same per-key lock (non-blocking)
//!   before evicting, so it can never delete a record out from under an
//!   in-flight request.
//!
//! The store is injected, explicitly owned state — not a module-level
//! singleton — so tests run against small, short-TTL instances.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{MAX_LIVE_SESSIONS, SESSION_TTL, TERMINAL_SESSION_TTL};
use crate::screens::Screen;

/// Errors the store can report. Deliberately short list — almost everything
/// interesting happens under the per-key lock, in the state machine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused to create a new session.
    #[error("session store at capacity ({0} live sessions)")]
    AtCapacity(usize),
}

/// SHA-256 of a decrypted request body. Replays of the same logical message
/// hash identically regardless of envelope-level re-encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprints the decrypted request plaintext.
    pub fn of(plaintext: &[u8]) -> Self {
        let digest = Sha256::digest(plaintext);
        Self(digest.into())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is plenty for log correlation.
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Everything we know about one in-progress form session.
///
/// Owned exclusively by the store; mutated only while its per-key lock is
/// held.
#[derive(Debug)]
pub struct SessionRecord {
    /// The flow correlation token this record belongs to.
    pub flow_token: String,
    /// Where the bystander currently is in the form.
    pub current_screen: Screen,
    /// Fields accumulated across all screens so far. Survives BACK.
    pub collected: Map<String, Value>,
    /// Whether this session has seen INIT. A record that hasn't (fresh, or
    /// recycled after TTL expiry) answers any request with INIT semantics.
    pub initialized: bool,
    /// Set once the flow reaches SUCCESS or a terminal error. No further
    /// transitions are accepted; the record lingers only to absorb replays.
    pub terminal: bool,
    created_at: Instant,
    last_seen_at: Instant,
    last_fingerprint: Option<Fingerprint>,
    cached_response: Option<Vec<u8>>,
}

impl SessionRecord {
    fn new(flow_token: &str) -> Self {
        let now = Instant::now();
        Self {
            flow_token: flow_token.to_string(),
            current_screen: Screen::first(),
            collected: Map::new(),
            initialized: false,
            terminal: false,
            created_at: now,
            last_seen_at: now,
            last_fingerprint: None,
            cached_response: None,
        }
    }

    /// Refreshes the activity timestamp. Every handled request calls this.
    pub fn touch(&mut self) {
        self.last_seen_at = Instant::now();
    }

    /// How long since this session last saw a request.
    pub fn idle_for(&self) -> Duration {
        self.last_seen_at.elapsed()
    }

    /// Time since the session was created. Useful for logs, nothing else.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Resets the record to a fresh, uninitialized state in place. Used when
    /// a request arrives for a session the TTL has already expired — the
    /// caller treats it as a brand-new session rather than an error.
    pub fn reset(&mut self) {
        *self = Self::new(&self.flow_token);
    }

    /// Returns the previously computed response if `fingerprint` matches the
    /// last request handled for this session.
    pub fn replay(&self, fingerprint: &Fingerprint) -> Option<Vec<u8>> {
        match (&self.last_fingerprint, &self.cached_response) {
            (Some(last), Some(response)) if last == fingerprint => Some(response.clone()),
            _ => None,
        }
    }

    /// Records the request fingerprint and the plaintext response it
    /// produced, for replay short-circuiting.
    pub fn remember(&mut self, fingerprint: Fingerprint, response: Vec<u8>) {
        self.last_fingerprint = Some(fingerprint);
        self.cached_response = Some(response);
    }
}

/// Tuning for a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Idle TTL for live sessions.
    pub ttl: Duration,
    /// Idle TTL for sessions that reached a terminal state.
    pub terminal_ttl: Duration,
    /// Maximum number of live sessions before new ones are refused.
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: SESSION_TTL,
            terminal_ttl: TERMINAL_SESSION_TTL,
            capacity: MAX_LIVE_SESSIONS,
        }
    }
}

/// The session map. Cheap to share behind an `Arc`; all interior
/// synchronization is per-key.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<SessionRecord>>>,
    config: StoreConfig,
}

impl SessionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Finds the session for `flow_token`, creating it if absent.
    ///
    /// The caller must lock the returned mutex before reading or writing the
    /// record; that lock is the per-session serialization point. The
    /// capacity check is advisory — two racing first requests may overshoot
    /// the bound by one, which is fine; the bound exists to stop unbounded
    /// growth, not to be exact.
    pub fn get_or_create(
        &self,
        flow_token: &str,
    ) -> Result<Arc<Mutex<SessionRecord>>, StoreError> {
        if !self.sessions.contains_key(flow_token) && self.sessions.len() >= self.config.capacity
        {
            return Err(StoreError::AtCapacity(self.config.capacity));
        }
        let slot = self
            .sessions
            .entry(flow_token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionRecord::new(flow_token))))
            .clone();
        Ok(slot)
    }

    /// Whether `record` has outlived its TTL. Terminal records use the
    /// shorter terminal TTL.
    pub fn is_expired(&self, record: &SessionRecord) -> bool {
        let ttl = if record.terminal {
            self.config.terminal_ttl
        } else {
            self.config.ttl
        };
        record.idle_for() > ttl
    }

    /// Drops every expired session whose lock is free.
    ///
    /// A session whose lock is held has a request in flight and is by
    /// definition not idle — it is skipped and caught on a later sweep.
    /// Returns the number of sessions evicted.
    pub fn evict_expired(&self) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|_, slot| match slot.try_lock() {
            Ok(record) => {
                if self.is_expired(&record) {
                    evicted += 1;
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });
        evicted
    }

    /// Number of live sessions, terminal stragglers included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Runs the eviction sweep forever on `interval`. Spawn once at startup.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = store.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, live = store.len(), "session sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_ttl_store() -> SessionStore {
        SessionStore::new(StoreConfig {
            ttl: Duration::from_millis(20),
            terminal_ttl: Duration::from_millis(5),
            capacity: 4,
        })
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_record() {
        let store = SessionStore::new(StoreConfig::default());
        let a = store.get_or_create("token-1").unwrap();
        let b = store.get_or_create("token-1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn distinct_tokens_get_distinct_records() {
        let store = SessionStore::new(StoreConfig::default());
        let a = store.get_or_create("token-1").unwrap();
        let b = store.get_or_create("token-2").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn capacity_refuses_new_sessions_but_not_existing_ones() {
        let store = short_ttl_store();
        for i in 0..4 {
            store.get_or_create(&format!("t{i}")).unwrap();
        }
        assert!(matches!(
            store.get_or_create("one-too-many"),
            Err(StoreError::AtCapacity(4))
        ));
        // Existing sessions are still served.
        assert!(store.get_or_create("t0").is_ok());
    }

    #[tokio::test]
    async fn replay_returns_cached_response_only_on_matching_fingerprint() {
        let store = SessionStore::new(StoreConfig::default());
        let slot = store.get_or_create("t").unwrap();
        let mut record = slot.lock().await;

        let fp = Fingerprint::of(b"request-body");
        assert!(record.replay(&fp).is_none());

        record.remember(fp, b"response-body".to_vec());
        assert_eq!(record.replay(&fp).unwrap(), b"response-body");
        assert!(record.replay(&Fingerprint::of(b"different")).is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions() {
        let store = short_ttl_store();
        store.get_or_create("stale").unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.evict_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sweep_skips_sessions_with_a_request_in_flight() {
        let store = short_ttl_store();
        let slot = store.get_or_create("busy").unwrap();
        let _guard = slot.lock().await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        // Locked: the sweep must leave it alone no matter how old it looks.
        assert_eq!(store.evict_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn terminal_sessions_expire_on_the_shorter_ttl() {
        let store = short_ttl_store();
        let slot = store.get_or_create("done").unwrap();
        {
            let mut record = slot.lock().await;
            record.terminal = true;
            record.touch();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Past terminal_ttl (5ms) but within live ttl (20ms).
        assert_eq!(store.evict_expired(), 1);
    }

    #[tokio::test]
    async fn reset_recycles_an_expired_record_in_place() {
        let store = short_ttl_store();
        let slot = store.get_or_create("t").unwrap();
        {
            let mut record = slot.lock().await;
            record.initialized = true;
            record.current_screen = Screen::Location;
            record
                .collected
                .insert("conscious".into(), serde_json::json!("yes"));
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let mut record = slot.lock().await;
        assert!(store.is_expired(&record));
        record.reset();
        assert!(!record.initialized);
        assert_eq!(record.current_screen, Screen::first());
        assert!(record.collected.is_empty());
        assert!(!store.is_expired(&record));
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        assert_eq!(Fingerprint::of(b"abc"), Fingerprint::of(b"abc"));
        assert_ne!(Fingerprint::of(b"abc"), Fingerprint::of(b"abd"));
    }
}
