use std::sync::Arc;

use opsgate_agent::AgentRuntime;
use opsgate_core::OperationExecutor;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::sessions::SessionStore;

/// Shared, read-mostly handles. Fixed at startup; per-session state lives in the store.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<dyn OperationExecutor>,
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionStore>,
    bearer_digest: Arc<[u8; 32]>,
}

impl AppState {
    pub fn new(
        executor: Arc<dyn OperationExecutor>,
        runtime: Arc<AgentRuntime>,
        sessions: SessionStore,
        bearer_token: &SecretString,
    ) -> Self {
        Self {
            executor,
            runtime,
            sessions: Arc::new(sessions),
            bearer_digest: Arc::new(digest(bearer_token.expose_secret())),
        }
    }

    /// Compares digests so the check takes the same time whatever the presented token is.
    pub(crate) fn bearer_matches(&self, presented: &str) -> bool {
        let presented = digest(presented);
        presented
            .iter()
            .zip(self.bearer_digest.iter())
            .fold(0u8, |acc, (left, right)| acc | (left ^ right))
            == 0
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}
