use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::info;

use crate::session::Session;

pub type SessionStore = Arc<dyn SessionStoreType>;

/// Keyed session persistence. `set` is a full replacement and must be atomic
/// with respect to concurrent `get`s of the same id.
#[async_trait]
pub trait SessionStoreType: Send + Sync + Debug {
    async fn get(&self, session_id: &str) -> Option<Session>;
    async fn set(&self, session: Session);
    async fn delete(&self, session_id: &str);
}

/// Default store: a process-wide cache that drops sessions after a period
/// of inactivity.
#[derive(Debug)]
pub struct InMemorySessionStore {
    cache: Cache<String, Session>,
}

impl InMemorySessionStore {
    /// Creates a store whose sessions idle out after `ttl_secs`.
    pub fn new(ttl_secs: u64) -> Arc<Self> {
        let cache = Cache::builder()
            .time_to_idle(Duration::from_secs(ttl_secs))
            .eviction_listener(|key: Arc<String>, _session: Session, cause| {
                info!("session evicted: id={}, cause={:?}", key, cause);
            })
            .build();
        Arc::new(Self { cache })
    }
}

#[async_trait]
impl SessionStoreType for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Option<Session> {
        self.cache.get(session_id).await
    }

    async fn set(&self, session: Session) {
        self.cache.insert(session.id.clone(), session).await;
    }

    async fn delete(&self, session_id: &str) {
        self.cache.invalidate(session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::session::SessionStatus;
    use serde_json::json;

    fn sample_session() -> Session {
        let flow = Flow::from_json(
            &json!({
                "version": "1.0",
                "id": "f1",
                "name": "f1",
                "entryNode": "start",
                "nodes": [{"id": "start", "type": "start", "config": {}}],
                "edges": [],
                "variables": [],
                "tools": []
            })
            .to_string(),
        )
        .unwrap();
        Session::new(&flow)
    }

    #[tokio::test]
    async fn set_then_get_returns_replacement() {
        let store = InMemorySessionStore::new(60);
        let mut session = sample_session();
        let id = session.id.clone();

        store.set(session.clone()).await;
        assert_eq!(store.get(&id).await.unwrap().status, SessionStatus::Active);

        session.status = SessionStatus::WaitingInput;
        store.set(session).await;
        assert_eq!(
            store.get(&id).await.unwrap().status,
            SessionStatus::WaitingInput
        );
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = InMemorySessionStore::new(60);
        let session = sample_session();
        let id = session.id.clone();

        store.set(session).await;
        store.delete(&id).await;
        assert!(store.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let store = InMemorySessionStore::new(60);
        assert!(store.get("nope").await.is_none());
    }
}
