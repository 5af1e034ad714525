//! HTTP scene service speaking the OpenAI-compatible chat completions API.
//!
//! Each query is a single non-streaming request: a system prompt plus one user
//! message carrying the prompt text and the frame as an inline `data:` URL.

use crate::config::SceneConfig;
use crate::error::{AssistantError, Result};
use crate::ports::{Frame, SceneService};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Vision chat-completions client.
pub struct HttpSceneService {
    config: SceneConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSceneService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSceneService")
            .field("api_url", &self.config.api_url)
            .field("model", &self.config.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpSceneService {
    /// Create a client. The API key is resolved once, here.
    pub fn new(config: SceneConfig) -> Self {
        let api_key = config.effective_api_key();
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        )
    }

    fn build_body(&self, frame: &Frame, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": self.config.system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompt },
                        { "type": "image_url", "image_url": { "url": frame.to_data_url() } }
                    ]
                }
            ]
        })
    }

    async fn complete(&self, frame: &Frame, prompt: &str) -> Result<String> {
        let url = self.endpoint();
        debug!(%url, model = %self.config.model, bytes = frame.bytes.len(), "scene query");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.build_body(frame, prompt));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AssistantError::Query(format!("scene request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Query(format!("invalid scene response: {e}")))?;
        extract_answer(&payload)
    }
}

#[async_trait]
impl SceneService for HttpSceneService {
    async fn describe_scene(&self, frame: &Frame) -> Result<String> {
        let prompt = self.config.describe_prompt.clone();
        self.complete(frame, &prompt).await
    }

    async fn answer_question(&self, frame: &Frame, question: &str) -> Result<String> {
        self.complete(frame, question).await
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> AssistantError {
    let detail = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => AssistantError::Query(format!("scene service rejected credentials: {detail}")),
        429 => AssistantError::Query(format!("scene service rate limited: {detail}")),
        code => AssistantError::Query(format!("scene service HTTP {code}: {detail}")),
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_owned()
            } else {
                body.chars().take(500).collect()
            }
        })
}

fn extract_answer(payload: &serde_json::Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_owned())
        .ok_or_else(|| AssistantError::Query("scene response had no message content".into()))
}
