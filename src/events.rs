use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::error::ErrorBody;
use crate::session::SessionStatus;

/// Lifecycle events fanned out to subscribers for observability. The bus is
/// for logging, metrics and debug UIs, never for inter-component
/// coordination.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    SessionStarted {
        session_id: String,
        flow_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        session_id: String,
        node_id: String,
        node_kind: String,
    },
    NodeCompleted {
        session_id: String,
        node_id: String,
        node_kind: String,
        duration_ms: i64,
    },
    NodeError {
        session_id: String,
        node_id: String,
        error: ErrorBody,
    },
    MessageSent {
        session_id: String,
        node_id: String,
        message: String,
    },
    InputReceived {
        session_id: String,
        input: String,
    },
    SessionCompleted {
        session_id: String,
        status: SessionStatus,
    },
    SessionEscalated {
        session_id: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        priority: Option<String>,
    },
}

pub type SubscriberId = u64;
pub type EventHandler = Arc<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// Synchronous fan-out bus. Subscribers run in subscription order on the
/// emitting task; a panicking subscriber is caught and logged so it can
/// never abort a run.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriberId, EventHandler)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or(0);
        write!(f, "EventBus({count} subscribers)")
    }
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, handler: EventHandler) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .retain(|(sid, _)| *sid != id);
    }

    pub fn emit(&self, event: &RuntimeEvent) {
        // snapshot first so a handler may subscribe/unsubscribe re-entrantly
        let handlers: Vec<EventHandler> = {
            let guard = self.subscribers.read().expect("event bus lock poisoned");
            guard.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("event subscriber panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn session_completed(id: &str) -> RuntimeEvent {
        RuntimeEvent::SessionCompleted {
            session_id: id.to_string(),
            status: SessionStatus::Completed,
        }
    }

    #[test]
    fn subscribers_see_events_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(Arc::new(move |_e| {
                seen.lock().unwrap().push(tag);
            }));
        }

        bus.emit(&session_completed("s1"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let id = {
            let count = count.clone();
            bus.subscribe(Arc::new(move |_e| {
                *count.lock().unwrap() += 1;
            }))
        };

        bus.emit(&session_completed("s1"));
        bus.unsubscribe(id);
        bus.emit(&session_completed("s1"));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_fanout() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe(Arc::new(|_e| panic!("bad subscriber")));
        {
            let reached = reached.clone();
            bus.subscribe(Arc::new(move |_e| {
                *reached.lock().unwrap() = true;
            }));
        }

        bus.emit(&session_completed("s1"));
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn events_serialize_with_tag() {
        let v = serde_json::to_value(session_completed("s9")).unwrap();
        assert_eq!(v["event"], "session_completed");
        assert_eq!(v["session_id"], "s9");
        assert_eq!(v["status"], "completed");
    }
}
