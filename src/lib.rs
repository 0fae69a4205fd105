//! parley: a runtime for declarative conversational agent flows.
//!
//! A flow is a typed node graph (greet, collect input, classify intent,
//! search knowledge, call tools, branch, escalate, end) executed against
//! durable per-user sessions. The engine advances node by node, pauses on
//! user input, and resumes from the persisted session on the next turn.

pub mod ai;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod flow;
pub mod handlers;
pub mod logger;
pub mod service;
pub mod session;
pub mod store;
pub mod value;

pub use config::RuntimeConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorBody, ErrorCode};
pub use events::{EventBus, RuntimeEvent};
pub use flow::{Flow, FlowRegistry};
pub use service::Services;
pub use session::{Session, SessionStatus};
pub use store::{InMemorySessionStore, SessionStore};
