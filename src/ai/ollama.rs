use async_trait::async_trait;
use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::service::{AiService, Classification, ClassifyRequest, ServiceError};

const DEFAULT_MODEL: &str = "llama3:latest";

/// `AiService` backed by a local Ollama server. The model is asked for a
/// strict JSON verdict; an unparseable reply surfaces as a provider error so
/// the router's fallback policy can take over.
#[derive(Debug, Clone)]
pub struct OllamaClassifier {
    pub ollama_host: Option<Url>,
    pub ollama_port: Option<u16>,
    pub default_model: String,
}

impl Default for OllamaClassifier {
    fn default() -> Self {
        Self {
            ollama_host: None,
            ollama_port: None,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl OllamaClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(host: Url, port: u16) -> Self {
        Self {
            ollama_host: Some(host),
            ollama_port: Some(port),
            ..Self::default()
        }
    }

    fn client(&self) -> Ollama {
        if let (Some(host), Some(port)) = (&self.ollama_host, self.ollama_port) {
            Ollama::new(host.clone(), port)
        } else {
            Ollama::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    intent: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[async_trait]
impl AiService for OllamaClassifier {
    async fn classify(&self, req: ClassifyRequest) -> Result<Classification, ServiceError> {
        let model = req
            .model
            .as_ref()
            .and_then(|m| m.model.clone())
            .unwrap_or_else(|| self.default_model.clone());

        let intent_lines: String = req
            .intents
            .iter()
            .map(|i| format!("- {}: {}\n", i.name, i.description))
            .collect();
        let system_prompt = format!(
            "{}\n\nClassify the user message into exactly one of these intents:\n{}\nRespond with valid JSON only:\n{{\"intent\": \"<name>\", \"confidence\": <number 0..1>, \"reasoning\": \"<short>\"}}",
            req.system_prompt, intent_lines
        );

        let history = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(req.user_message.clone()),
        ];
        let mut chat_req = ChatMessageRequest::new(model, history);
        if let Some(temperature) = req.model.as_ref().and_then(|m| m.temperature) {
            chat_req = chat_req.options(GenerationOptions::default().temperature(temperature as f32));
        }

        let mut client = self.client();
        let resp = client
            .send_chat_messages_with_history(&mut vec![], chat_req)
            .await
            .map_err(|e| ServiceError::Provider(format!("chat API error: {e}")))?;
        let reply = resp.message.content;

        let verdict: Verdict = serde_json::from_str(reply.trim()).map_err(|e| {
            warn!("unparseable classifier reply: {reply}");
            ServiceError::Provider(format!("invalid JSON from model: {e}"))
        })?;
        Ok(Classification {
            intent: verdict.intent,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            reasoning: verdict.reasoning,
        })
    }

    async fn generate(&self, prompt: String) -> Result<String, ServiceError> {
        let req = GenerationRequest::new(self.default_model.clone(), prompt);
        let resp = self
            .client()
            .generate(req)
            .await
            .map_err(|e| ServiceError::Provider(format!("generate API error: {e}")))?;
        Ok(resp.response)
    }
}
