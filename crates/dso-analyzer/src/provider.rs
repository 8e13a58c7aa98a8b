//! AI chat capability, abstracted behind a trait so the analyzer doesn't
//! care which backend answers it.
//!
//! Grounded on `backend/common/ai_provider/provider.go` (the `AIProvider`
//! interface and `NewAIProvider` factory) and `backend/common/config/ai_config.go`
//! (`AIConfig`). Both concrete backends speak an OpenAI-compatible
//! chat-completions body; Volcengine's Ark endpoint is wire-compatible with
//! OpenAI's, so it reuses the same request/response shapes as the OpenAI
//! backend with a different base URL and bearer token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dso_error::AnalyzerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct AiProviderConfig {
    pub kind: String,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout_sec: u64,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn chat(&self, prompt: &str) -> Result<String, AnalyzerError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Backs both `openai` and `volcengine`: an OpenAI-compatible
/// `/chat/completions` endpoint reached with a bearer token.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(cfg: &AiProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    async fn chat(&self, prompt: &str) -> Result<String, AnalyzerError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyzerError::Failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AnalyzerError::Failed(format!(
                "ai provider returned status {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AnalyzerError::Failed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AnalyzerError::Failed("empty choices in ai response".to_string()))
    }
}

/// Mirrors `NewAIProvider`'s switch: unrecognized `kind` falls back to the
/// OpenAI-compatible implementation rather than erroring.
pub fn build_provider(cfg: &AiProviderConfig) -> Arc<dyn AiProvider> {
    match cfg.kind.as_str() {
        "openai" | "volcengine" => Arc::new(OpenAiCompatibleProvider::new(cfg)),
        other => {
            tracing::warn!(kind = other, "unknown ai provider kind, defaulting to openai-compatible");
            Arc::new(OpenAiCompatibleProvider::new(cfg))
        }
    }
}
