//! Bundled `AiService` adapters: a deterministic keyword classifier used as
//! the offline fallback provider, and a local Ollama server client. Cloud
//! providers plug in through the same trait from outside this crate.

pub mod ollama;
pub mod rules;

pub use ollama::OllamaClassifier;
pub use rules::RulesClassifier;
