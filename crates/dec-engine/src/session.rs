//! Conversation state, keyed by session and indexed by environment.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dec_core::ids::{EnvironmentId, SessionId};
use dec_core::messages::{ChatMessage, PromptMessage};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub trait EvictionPolicy: Send + Sync {
    fn should_evict(&self, session: &Session, now: DateTime<Utc>) -> bool;
}

/// Sessions live for the lifetime of the process.
pub struct NeverEvict;

impl EvictionPolicy for NeverEvict {
    fn should_evict(&self, _session: &Session, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Evict sessions untouched for longer than the timeout.
pub struct IdleTimeout(pub Duration);

impl EvictionPolicy for IdleTimeout {
    fn should_evict(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.updated_at > self.0
    }
}

/// Append-only conversation record.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub env_id: EnvironmentId,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new(env_id: EnvironmentId, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            env_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// History in the shape sent to the model.
    pub fn prompt_history(&self) -> Vec<PromptMessage> {
        self.messages.iter().map(PromptMessage::from).collect()
    }
}

pub struct SessionHandle {
    id: SessionId,
    env_id: EnvironmentId,
    state: RwLock<Session>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            env_id: session.env_id.clone(),
            state: RwLock::new(session),
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn env_id(&self) -> &EnvironmentId {
        &self.env_id
    }

    pub fn snapshot(&self) -> Session {
        self.state.read().clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn prompt_history(&self) -> Vec<PromptMessage> {
        self.state.read().prompt_history()
    }

    pub fn append(&self, message: ChatMessage, now: DateTime<Utc>) {
        let mut state = self.state.write();
        state.messages.push(message);
        state.updated_at = now;
    }

    /// Wait for exclusive use of this session for one turn.
    pub async fn lock_turn(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn_lock).lock_owned().await
    }

    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    by_env: DashMap<EnvironmentId, SessionId>,
    clock: Arc<dyn Clock>,
    eviction: Box<dyn EvictionPolicy>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_env: DashMap::new(),
            clock: Arc::new(SystemClock),
            eviction: Box::new(NeverEvict),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_eviction(mut self, policy: impl EvictionPolicy + 'static) -> Self {
        self.eviction = Box::new(policy);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The environment's session, created on first use. Concurrent callers
    /// for the same environment all get the same session.
    pub fn get_or_create(&self, env: &EnvironmentId) -> Arc<SessionHandle> {
        match self.by_env.entry(env.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(handle) = self.sessions.get(entry.get()) {
                    return Arc::clone(handle.value());
                }
                // index outlived its session
                let handle = self.create(env);
                entry.insert(handle.id.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.create(env);
                entry.insert(handle.id.clone());
                handle
            }
        }
    }

    fn create(&self, env: &EnvironmentId) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(Session::new(env.clone(), self.now())));
        self.sessions.insert(handle.id.clone(), Arc::clone(&handle));
        info!(session_id = %handle.id, env_id = %env, "session created");
        handle
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|h| Arc::clone(h.value()))
    }

    pub fn find_by_env(&self, env: &EnvironmentId) -> Option<Arc<SessionHandle>> {
        let id = self.by_env.get(env)?.value().clone();
        self.get(&id)
    }

    /// Explicit teardown.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let (_, handle) = self.sessions.remove(id)?;
        self.by_env.remove_if(&handle.env_id, |_, sid| sid == id);
        debug!(session_id = %id, "session removed");
        Some(handle)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// The environment's session with its turn lock held. A session evicted
    /// while the caller waited for the lock is replaced by a live one.
    pub async fn acquire_turn(&self, env: &EnvironmentId) -> (Arc<SessionHandle>, OwnedMutexGuard<()>) {
        loop {
            let handle = self.get_or_create(env);
            let guard = handle.lock_turn().await;
            if self.contains(handle.id()) {
                return (handle, guard);
            }
            debug!(session_id = %handle.id, env_id = %env, "session evicted while waiting, retrying");
        }
    }

    /// Apply the eviction policy. Sessions with a turn in flight are kept.
    ///
    /// The turn lock is held across removal, so a turn started through
    /// [`SessionStore::acquire_turn`] never lands on an evicted session.
    pub fn evict_expired(&self) -> usize {
        let now = self.now();
        let candidates: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .filter(|h| self.eviction.should_evict(&h.state.read(), now))
            .map(|h| Arc::clone(h.value()))
            .collect();
        let mut evicted = 0;
        for handle in candidates {
            let Ok(_turn) = handle.turn_lock.try_lock() else {
                continue;
            };
            if self.remove(&handle.id).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(count = evicted, "evicted idle sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
    }

    #[test]
    fn get_or_create_reuses_session_per_env() {
        let store = SessionStore::new();
        let a = store.get_or_create(&EnvironmentId::from_raw("a"));
        let again = store.get_or_create(&EnvironmentId::from_raw("a"));
        let b = store.get_or_create(&EnvironmentId::from_raw("b"));
        assert_eq!(a.id(), again.id());
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
        assert_eq!(store.find_by_env(&EnvironmentId::from_raw("b")).unwrap().id(), b.id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_messages_create_one_session() {
        let store = Arc::new(SessionStore::new());
        let env = EnvironmentId::from_raw("race");
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                let env = env.clone();
                tokio::spawn(async move { store.get_or_create(&env).id().clone() })
            })
            .collect();
        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_updates_timestamp_and_keeps_order() {
        let clock = clock();
        let store = SessionStore::new().with_clock(clock.clone());
        let handle = store.get_or_create(&EnvironmentId::from_raw("e"));
        let created = handle.snapshot().created_at;

        clock.advance(Duration::seconds(5));
        handle.append(ChatMessage::user("one", vec![], store.now()), store.now());
        handle.append(ChatMessage::assistant("two", store.now()), store.now());

        let session = handle.snapshot();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "one");
        assert_eq!(session.updated_at - created, Duration::seconds(5));
        assert_eq!(handle.prompt_history()[1].text_content(), "two");
    }

    #[test]
    fn remove_tears_down_index() {
        let store = SessionStore::new();
        let env = EnvironmentId::from_raw("e");
        let first = store.get_or_create(&env);
        assert!(store.remove(first.id()).is_some());
        assert!(store.is_empty());
        assert!(store.find_by_env(&env).is_none());
        let second = store.get_or_create(&env);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn never_evict_by_default() {
        let clock = clock();
        let store = SessionStore::new().with_clock(clock.clone());
        store.get_or_create(&EnvironmentId::from_raw("e"));
        clock.advance(Duration::days(365));
        assert_eq!(store.evict_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn idle_timeout_evicts_untouched_sessions() {
        let clock = clock();
        let store = SessionStore::new()
            .with_clock(clock.clone())
            .with_eviction(IdleTimeout(Duration::minutes(30)));
        let idle = store.get_or_create(&EnvironmentId::from_raw("idle"));
        let busy = store.get_or_create(&EnvironmentId::from_raw("busy"));
        clock.advance(Duration::minutes(20));
        let fresh = store.get_or_create(&EnvironmentId::from_raw("fresh"));
        fresh.append(ChatMessage::user("hi", vec![], store.now()), store.now());

        clock.advance(Duration::minutes(15));
        let _guard = busy.lock_turn().await;
        assert_eq!(store.evict_expired(), 1);
        assert!(store.get(idle.id()).is_none());
        assert!(store.get(busy.id()).is_some());
        assert!(store.get(fresh.id()).is_some());
    }

    #[tokio::test]
    async fn acquire_after_eviction_gets_live_session() {
        let clock = clock();
        let store = SessionStore::new()
            .with_clock(clock.clone())
            .with_eviction(IdleTimeout(Duration::minutes(30)));
        let env = EnvironmentId::from_raw("e");
        let stale = store.get_or_create(&env);

        clock.advance(Duration::hours(1));
        assert_eq!(store.evict_expired(), 1);

        let (handle, _guard) = store.acquire_turn(&env).await;
        assert_ne!(handle.id(), stale.id());
        assert!(store.contains(handle.id()));
    }

    #[tokio::test]
    async fn acquire_retries_when_session_removed_while_waiting() {
        let store = Arc::new(SessionStore::new());
        let env = EnvironmentId::from_raw("e");
        let stale = store.get_or_create(&env);
        let held = stale.lock_turn().await;

        let waiter = {
            let store = Arc::clone(&store);
            let env = env.clone();
            tokio::spawn(async move {
                let (handle, _guard) = store.acquire_turn(&env).await;
                handle.id().clone()
            })
        };
        tokio::task::yield_now().await;
        store.remove(stale.id());
        drop(held);

        let id = waiter.await.unwrap();
        assert_ne!(&id, stale.id());
        assert!(store.contains(&id));
    }

    #[tokio::test]
    async fn turn_lock_serializes() {
        let store = SessionStore::new();
        let handle = store.get_or_create(&EnvironmentId::from_raw("e"));
        let guard = handle.lock_turn().await;
        assert!(handle.is_busy());
        drop(guard);
        assert!(!handle.is_busy());
    }
}
