use std::sync::Arc;

use async_trait::async_trait;

use crate::service::{AiService, Classification, ClassifyRequest, ServiceError};

/// Keyword-overlap classifier: the `provider = "rules"` adapter and the
/// offline stand-in when no model server is reachable. Scores each intent
/// by how much of its name, description and examples appear in the message;
/// fully deterministic, so flows behave identically run to run.
#[derive(Debug, Clone, Default)]
pub struct RulesClassifier;

impl RulesClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl AiService for RulesClassifier {
    async fn classify(&self, req: ClassifyRequest) -> Result<Classification, ServiceError> {
        let message = req.user_message.to_lowercase();

        let mut best: Option<(&str, u32)> = None;
        for intent in &req.intents {
            let mut score = 0u32;
            for word in intent.name.split(['_', '-', ' ']) {
                if word.len() >= 3 && message.contains(&word.to_lowercase()) {
                    score += 2;
                }
            }
            for word in intent.description.split_whitespace() {
                let word = word
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if word.len() >= 4 && message.contains(&word) {
                    score += 1;
                }
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((&intent.name, score));
            }
        }

        match best {
            Some((name, score)) if score > 0 => Ok(Classification {
                intent: name.to_string(),
                confidence: (0.4 + 0.15 * f64::from(score)).min(0.9),
                reasoning: Some(format!("keyword score {score}")),
            }),
            _ => Ok(Classification {
                intent: "unknown".to_string(),
                confidence: 0.0,
                reasoning: Some("no keyword overlap with any intent".to_string()),
            }),
        }
    }
}
