use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opsgate_agent::{AgentRuntime, SessionContext};
use opsgate_core::config::ServerConfig;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub type SessionSlot = Arc<Mutex<SessionContext>>;

struct Entry {
    slot: SessionSlot,
    last_used: Instant,
}

/// Chat sessions keyed by id. Each session has its own lock, so one session's turns run
/// strictly in order while different sessions proceed concurrently.
pub struct SessionStore {
    entries: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(Duration::from_secs(config.session_idle_secs), config.max_sessions)
    }

    /// Returns the session for `id`, creating it on first use. `None` starts a fresh session.
    pub async fn checkout(
        &self,
        runtime: &AgentRuntime,
        id: Option<&str>,
    ) -> (String, SessionSlot) {
        self.checkout_at(runtime, id, Instant::now()).await
    }

    async fn checkout_at(
        &self,
        runtime: &AgentRuntime,
        id: Option<&str>,
        now: Instant,
    ) -> (String, SessionSlot) {
        let mut entries = self.entries.lock().await;
        self.evict_idle(&mut entries, now);

        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(entry) = entries.get_mut(&id) {
            entry.last_used = now;
            return (id, entry.slot.clone());
        }

        while entries.len() >= self.max_sessions {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            debug!(
                event_name = "session.evicted",
                session_id = %oldest,
                reason = "capacity",
                "session evicted"
            );
        }

        let slot = Arc::new(Mutex::new(runtime.new_session(id.clone())));
        entries.insert(id.clone(), Entry { slot: slot.clone(), last_used: now });
        debug!(
            event_name = "session.created",
            session_id = %id,
            sessions = entries.len(),
            "session created"
        );
        (id, slot)
    }

    /// Clears history and violation count. Returns false for an unknown session.
    pub async fn reset(&self, id: &str) -> bool {
        let slot = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(id) {
                Some(entry) => {
                    entry.last_used = Instant::now();
                    entry.slot.clone()
                }
                None => return false,
            }
        };

        slot.lock().await.reset();
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn evict_idle(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.last_used) <= self.idle_timeout;
            if !keep {
                debug!(
                    event_name = "session.evicted",
                    session_id = %id,
                    reason = "idle",
                    "session evicted"
                );
            }
            keep
        });
    }
}
