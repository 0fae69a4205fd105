use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{EngineError, ErrorBody, ErrorCode};
use crate::events::{EventBus, EventHandler, RuntimeEvent, SubscriberId};
use crate::executor::execute_node;
use crate::flow::{Flow, NodeKind};
use crate::handlers::NodeContext;
use crate::service::Services;
use crate::session::{ExecutionStep, Session, SessionStatus};
use crate::store::SessionStore;

/// The run-loop driver. Owns the injected collaborators and serialises all
/// execution per session id; everything else it needs each turn is read
/// back out of the session store.
pub struct Engine {
    store: SessionStore,
    services: Services,
    events: Arc<EventBus>,
    config: RuntimeConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: SessionStore, services: Services) -> Arc<Self> {
        Self::with_config(store, services, RuntimeConfig::from_env())
    }

    pub fn with_config(store: SessionStore, services: Services, config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            services,
            events: EventBus::new(),
            config,
            locks: DashMap::new(),
        })
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn subscribe(&self, handler: EventHandler) -> SubscriberId {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.events.unsubscribe(id);
    }

    /// Creates a session at the flow's entry node and runs until the flow
    /// pauses for input or terminates.
    #[tracing::instrument(name = "start_session", skip(self, flow), fields(flow_id = %flow.id))]
    pub async fn start_session(&self, flow: &Flow) -> Result<Session, EngineError> {
        if flow.node(&flow.entry_node).is_none() {
            return Err(EngineError::EntryNotFound(flow.entry_node.clone()));
        }

        let mut session = Session::new(flow);
        let lock = self.lock_for(&session.id);
        let _guard = lock.lock().await;

        self.store.set(session.clone()).await;
        self.events.emit(&RuntimeEvent::SessionStarted {
            session_id: session.id.clone(),
            flow_id: flow.id.clone(),
            timestamp: session.created_at,
        });

        self.drive(flow, &mut session, None).await;
        self.store.set(session.clone()).await;
        drop(_guard);
        self.release_lock(&session);
        Ok(session)
    }

    /// Resumes a waiting session with one turn of user input. The input is
    /// consumed by exactly the first handler invocation.
    #[tracing::instrument(name = "process_input", skip(self, flow, input))]
    pub async fn process_input(
        &self,
        flow: &Flow,
        session_id: &str,
        input: &str,
    ) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::WaitingInput {
            return Err(EngineError::SessionNotWaiting(session_id.to_string()));
        }

        self.events.emit(&RuntimeEvent::InputReceived {
            session_id: session.id.clone(),
            input: input.to_string(),
        });
        session.status = SessionStatus::Active;

        self.drive(flow, &mut session, Some(input.to_string())).await;
        self.store.set(session.clone()).await;
        drop(_guard);
        self.release_lock(&session);
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.store.get(session_id).await
    }

    /// Marks a live session abandoned. Terminal sessions are returned
    /// unchanged, so the call is idempotent.
    pub async fn end_session(&self, session_id: &str) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if !session.status.is_terminal() {
            session.status = SessionStatus::Abandoned;
            session.touch();
            self.events.emit(&RuntimeEvent::SessionCompleted {
                session_id: session.id.clone(),
                status: session.status,
            });
            self.store.set(session.clone()).await;
        }
        drop(_guard);
        self.release_lock(&session);
        Ok(session)
    }

    /// Delivers the caller-side input deadline: routes a waiting session to
    /// the collect node's `timeoutNodeId`, or times the session out when
    /// none is configured. The runtime itself never polls for this.
    pub async fn timeout_input(
        &self,
        flow: &Flow,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::WaitingInput {
            return Err(EngineError::SessionNotWaiting(session_id.to_string()));
        }

        let target = flow.node(&session.current_node_id).and_then(|n| match &n.kind {
            NodeKind::CollectInput(cfg) => cfg
                .timeout
                .as_ref()
                .and_then(|t| t.timeout_node_id.clone()),
            _ => None,
        });

        match target {
            Some(target) => {
                session.status = SessionStatus::Active;
                session.current_node_id = target;
                session.touch();
                self.drive(flow, &mut session, None).await;
            }
            None => {
                session.status = SessionStatus::Timeout;
                session.touch();
                self.events.emit(&RuntimeEvent::SessionCompleted {
                    session_id: session.id.clone(),
                    status: SessionStatus::Timeout,
                });
            }
        }

        self.store.set(session.clone()).await;
        drop(_guard);
        self.release_lock(&session);
        Ok(session)
    }

    /// The interpreter loop. One iteration per handler invocation, bounded
    /// by `max_steps`; the session is persisted once by the caller on exit.
    async fn drive(&self, flow: &Flow, session: &mut Session, mut pending_input: Option<String>) {
        let mut steps = 0usize;
        loop {
            if steps >= self.config.max_steps {
                self.fail(
                    flow,
                    session,
                    ErrorBody::new(
                        ErrorCode::MaxStepsExceeded,
                        format!("step bound of {} reached", self.config.max_steps),
                    ),
                );
                return;
            }

            let Some(node) = flow.node(&session.current_node_id) else {
                let current = session.current_node_id.clone();
                self.fail(
                    flow,
                    session,
                    ErrorBody::new(
                        ErrorCode::NodeNotFound,
                        format!("node `{}` does not exist in flow `{}`", current, flow.id),
                    ),
                );
                return;
            };

            self.events.emit(&RuntimeEvent::NodeStarted {
                session_id: session.id.clone(),
                node_id: node.id.clone(),
                node_kind: node.kind.name().to_string(),
            });

            let started = Instant::now();
            let input = pending_input.take();
            let result = {
                let ctx = NodeContext {
                    flow,
                    session,
                    input: input.as_deref(),
                    services: &self.services,
                    config: &self.config,
                };
                execute_node(node, &ctx).await
            };
            let duration = started.elapsed().as_millis() as i64;

            let mut step = ExecutionStep::new(&node.id, node.kind.name());
            step.input = input;
            step.output = result.output.clone();
            step.duration = duration;
            step.error = result.error.clone();
            session.push_step(step);

            match &result.error {
                Some(error) => self.events.emit(&RuntimeEvent::NodeError {
                    session_id: session.id.clone(),
                    node_id: node.id.clone(),
                    error: error.clone(),
                }),
                None => self.events.emit(&RuntimeEvent::NodeCompleted {
                    session_id: session.id.clone(),
                    node_id: node.id.clone(),
                    node_kind: node.kind.name().to_string(),
                    duration_ms: duration,
                }),
            }

            if !result.variables.is_empty() {
                session.apply_variables(result.variables.clone());
            }

            if let Some(message) = &result.message {
                self.events.emit(&RuntimeEvent::MessageSent {
                    session_id: session.id.clone(),
                    node_id: node.id.clone(),
                    message: message.clone(),
                });
            }

            if result.error.is_some() {
                session.status = SessionStatus::Error;
                session.touch();
                self.events.emit(&RuntimeEvent::SessionCompleted {
                    session_id: session.id.clone(),
                    status: SessionStatus::Error,
                });
                return;
            }

            if result.wait_for_input {
                session.status = SessionStatus::WaitingInput;
                session.touch();
                debug!(session_id = %session.id, node_id = %node.id, "session paused for input");
                return;
            }

            if let Some(status) = result.end {
                if status == SessionStatus::Escalated {
                    if let NodeKind::Escalate(cfg) = &node.kind {
                        self.events.emit(&RuntimeEvent::SessionEscalated {
                            session_id: session.id.clone(),
                            reason: cfg.reason.clone(),
                            queue: cfg.queue.clone(),
                            priority: cfg.priority.clone(),
                        });
                    }
                }
                session.status = status;
                session.touch();
                self.events.emit(&RuntimeEvent::SessionCompleted {
                    session_id: session.id.clone(),
                    status,
                });
                return;
            }

            let next = match result.next_node_id {
                Some(id) => Some(id),
                None => pick_edge(flow, &node.id, result.output.as_ref()),
            };
            match next {
                Some(id) => {
                    session.current_node_id = id;
                    steps += 1;
                }
                None => {
                    // nowhere left to go: a clean completion
                    session.status = SessionStatus::Completed;
                    session.touch();
                    self.events.emit(&RuntimeEvent::SessionCompleted {
                        session_id: session.id.clone(),
                        status: SessionStatus::Completed,
                    });
                    return;
                }
            }
        }
    }

    /// Fatal run-loop error: recorded as a synthetic step so the session
    /// carries it in `history[last].error`, then the session is closed.
    fn fail(&self, flow: &Flow, session: &mut Session, error: ErrorBody) {
        let node_kind = flow
            .node(&session.current_node_id)
            .map(|n| n.kind.name())
            .unwrap_or("unknown");
        let mut step = ExecutionStep::new(&session.current_node_id, node_kind);
        step.error = Some(error.clone());
        session.push_step(step);

        self.events.emit(&RuntimeEvent::NodeError {
            session_id: session.id.clone(),
            node_id: session.current_node_id.clone(),
            error,
        });
        session.status = SessionStatus::Error;
        session.touch();
        self.events.emit(&RuntimeEvent::SessionCompleted {
            session_id: session.id.clone(),
            status: SessionStatus::Error,
        });
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, session: &Session) {
        if session.status.is_terminal() {
            self.locks.remove(&session.id);
        }
    }
}

/// Edge selection when a handler did not name a target: the first edge
/// whose `sourceHandle` or `label` matches a hint in the step output, else
/// the first outgoing edge in declaration order.
fn pick_edge(flow: &Flow, node_id: &str, output: Option<&Value>) -> Option<String> {
    let edges = flow.outgoing_edges(node_id);
    if edges.is_empty() {
        return None;
    }
    let hints = edge_hints(output);
    if !hints.is_empty() {
        if let Some(edge) = edges.iter().find(|e| {
            e.source_handle
                .as_deref()
                .is_some_and(|h| hints.iter().any(|hint| hint == h))
                || e.label
                    .as_deref()
                    .is_some_and(|l| hints.iter().any(|hint| hint == l))
        }) {
            return Some(edge.target.clone());
        }
    }
    Some(edges[0].target.clone())
}

fn edge_hints(output: Option<&Value>) -> Vec<String> {
    let mut hints = Vec::new();
    if let Some(Value::Object(map)) = output {
        for key in ["handle", "branch", "label"] {
            if let Some(Value::String(s)) = map.get(key) {
                hints.push(s.clone());
            }
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow_with_labelled_edges() -> Flow {
        Flow::from_json(
            &json!({
                "version": "1.0",
                "id": "f",
                "name": "f",
                "entryNode": "a",
                "nodes": [
                    {"id": "a", "type": "message", "config": {"message": "x"}},
                    {"id": "b", "type": "end", "config": {}},
                    {"id": "c", "type": "end", "config": {}}
                ],
                "edges": [
                    {"id": "e1", "source": "a", "target": "b", "label": "yes"},
                    {"id": "e2", "source": "a", "target": "c", "label": "no"}
                ],
                "variables": [],
                "tools": []
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn pick_edge_prefers_labelled_match() {
        let flow = flow_with_labelled_edges();
        let output = json!({"branch": "no"});
        assert_eq!(pick_edge(&flow, "a", Some(&output)), Some("c".to_string()));
    }

    #[test]
    fn pick_edge_defaults_to_first_edge() {
        let flow = flow_with_labelled_edges();
        assert_eq!(pick_edge(&flow, "a", None), Some("b".to_string()));
        assert_eq!(
            pick_edge(&flow, "a", Some(&json!({"branch": "maybe"}))),
            Some("b".to_string())
        );
        assert_eq!(pick_edge(&flow, "b", None), None);
    }
}
