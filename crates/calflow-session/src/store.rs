//! Capacity-bounded local session cache with a persisted snapshot.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use calflow_core::{KeyValueStore, KvError, Session, SessionId, now_ms};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Key the snapshot persists under.
const SNAPSHOT_KEY: &str = "sessions";

/// Default cache capacity.
pub const DEFAULT_CAPACITY: usize = 50;

/// Store change notification.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A session was inserted or updated.
    Saved(Session),
    /// A session was removed, by dismissal or capacity eviction.
    Deleted(SessionId),
    /// The whole cache was emptied.
    Cleared,
}

/// Sink for fire-and-forget reconciliation triggers.
///
/// The store only reports "this session changed" and "this session was
/// dismissed"; the hook decides what, if anything, to do remotely.
pub trait SyncHook: Send + Sync {
    fn session_saved(&self, session: &Session);
    fn session_dismissed(&self, id: &SessionId);
}

/// In-process cache of sessions, bounded in size, persisted as a single
/// snapshot, and observable through a broadcast channel.
///
/// Writes never surface errors to the caller: the in-memory cache is
/// authoritative for the UI, and persistence failures are logged.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    capacity: usize,
    kv: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<StoreEvent>,
    sync: RwLock<Option<Arc<dyn SyncHook>>>,
}

impl SessionStore {
    /// Create a store over the given snapshot backend.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            kv,
            events,
            sync: RwLock::new(None),
        }
    }

    /// Attach the reconciliation hook invoked after saves and dismissals.
    pub fn set_sync_hook(&self, hook: Arc<dyn SyncHook>) {
        if let Ok(mut slot) = self.sync.write() {
            *slot = Some(hook);
        }
    }

    /// Load the persisted snapshot into memory. Called once at startup.
    pub async fn load(&self) {
        let raw = match self.kv.get(SNAPSHOT_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!("failed to read session snapshot: {e}");
                return;
            }
        };
        match serde_json::from_str::<Vec<Session>>(&raw) {
            Ok(list) => {
                let Ok(mut sessions) = self.sessions.write() else {
                    return;
                };
                for session in list {
                    sessions.insert(session.id.clone(), session);
                }
                debug!(count = sessions.len(), "session snapshot loaded");
            }
            Err(e) => warn!("discarding unreadable session snapshot: {e}"),
        }
    }

    /// Upsert a session.
    ///
    /// The existing record's creation time and guest token stick, and the
    /// status only moves forward; a write that would regress a status is
    /// dropped. Cache mutation and subscriber notification complete before
    /// this returns; the remote sync runs fire-and-forget.
    pub async fn save(&self, session: Session) {
        let Some((saved, evicted)) = self.upsert(session) else {
            return;
        };

        let mut events: Vec<StoreEvent> = evicted.into_iter().map(StoreEvent::Deleted).collect();
        events.push(StoreEvent::Saved(saved.clone()));
        self.persist_then_notify(events).await;

        if let Some(hook) = self.sync_hook() {
            hook.session_saved(&saved);
        }
    }

    /// Fetch one session by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    /// All cached sessions, most recently updated first.
    #[must_use]
    pub fn get_all(&self) -> Vec<Session> {
        let mut list: Vec<Session> = match self.sessions.read() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Remove a session at the user's request.
    ///
    /// Unlike capacity eviction, dismissal propagates to the remote
    /// history store through the sync hook.
    pub async fn delete(&self, id: &str) {
        let removed = match self.sessions.write() {
            Ok(mut sessions) => sessions.remove(id),
            Err(_) => None,
        };
        let Some(removed) = removed else {
            return;
        };

        self.persist_then_notify(vec![StoreEvent::Deleted(removed.id.clone())])
            .await;

        if let Some(hook) = self.sync_hook() {
            hook.session_dismissed(&removed.id);
        }
    }

    /// Empty the cache. Remote history is left untouched.
    pub async fn clear(&self) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.clear();
        }
        self.persist_then_notify(vec![StoreEvent::Cleared]).await;
    }

    /// Subscribe to store changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, session: Session) -> Option<(Session, Vec<SessionId>)> {
        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(e) => {
                warn!("session cache lock poisoned: {e}");
                return None;
            }
        };

        let mut incoming = session;
        if let Some(existing) = sessions.get(&incoming.id) {
            if existing.status.merge(incoming.status) != incoming.status {
                debug!(id = %incoming.id, "dropping write that would regress status");
                return None;
            }
            incoming.created_at = existing.created_at;
            if incoming.access_token.is_none() {
                incoming.access_token = existing.access_token.clone();
            }
        }
        incoming.updated_at = now_ms();

        sessions.insert(incoming.id.clone(), incoming.clone());
        let evicted = evict_beyond(&mut sessions, self.capacity);
        Some((incoming, evicted))
    }

    /// Persist the snapshot, then emit `events` plus a deletion per entry
    /// dropped by quota pressure. Notification happens even when
    /// persistence fails.
    async fn persist_then_notify(&self, events: Vec<StoreEvent>) {
        for id in self.persist_snapshot().await {
            let _ = self.events.send(StoreEvent::Deleted(id));
        }
        for event in events {
            let _ = self.events.send(event);
        }
    }

    /// Write the full session set to storage. On quota exhaustion, evict
    /// down to half capacity and retry once; returns the ids dropped that
    /// way.
    async fn persist_snapshot(&self) -> Vec<SessionId> {
        let Some(snapshot) = self.snapshot_json() else {
            return Vec::new();
        };
        match self.kv.set(SNAPSHOT_KEY, snapshot).await {
            Ok(()) => Vec::new(),
            Err(KvError::QuotaExceeded) => {
                let evicted = match self.sessions.write() {
                    Ok(mut sessions) => evict_beyond(&mut sessions, self.capacity / 2),
                    Err(_) => Vec::new(),
                };
                warn!(
                    evicted = evicted.len(),
                    "storage quota exhausted, pruned session cache"
                );
                if let Some(snapshot) = self.snapshot_json() {
                    if let Err(e) = self.kv.set(SNAPSHOT_KEY, snapshot).await {
                        warn!("session snapshot still failing after prune: {e}");
                    }
                }
                evicted
            }
            Err(e) => {
                warn!("failed to persist session snapshot: {e}");
                Vec::new()
            }
        }
    }

    fn snapshot_json(&self) -> Option<String> {
        let sessions = self.sessions.read().ok()?;
        let list: Vec<&Session> = sessions.values().collect();
        serde_json::to_string(&list).ok()
    }

    fn sync_hook(&self) -> Option<Arc<dyn SyncHook>> {
        self.sync.read().ok()?.clone()
    }
}

/// Remove least-recently-updated entries until at most `keep` remain.
/// Ties on `updated_at` break by id so eviction order is deterministic.
fn evict_beyond(sessions: &mut HashMap<SessionId, Session>, keep: usize) -> Vec<SessionId> {
    if sessions.len() <= keep {
        return Vec::new();
    }
    let mut order: Vec<(i64, SessionId)> = sessions
        .values()
        .map(|s| (s.updated_at, s.id.clone()))
        .collect();
    order.sort();

    let excess = sessions.len() - keep;
    let evicted: Vec<SessionId> = order.into_iter().take(excess).map(|(_, id)| id).collect();
    for id in &evicted {
        sessions.remove(id);
    }
    evicted
}
