//! Google Gemini `generateContent` client.

use crate::config::LlmConfig;
use crate::conversation::{ConversationTurn, Part, Role};
use crate::error::{LlmError, Result};
use crate::llm::ModelInput;
use crate::llm::traits::ChatModel;

use anyhow::Context as _;
use base64::Engine as _;

/// Gemini chat model called over REST.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiModel {
    /// Create a client for the configured model.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingProviderKey("gemini".into()).into());
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout_secs) = config.timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(timeout_secs));
        }
        let http_client = builder
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

impl ChatModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        history: &[ConversationTurn],
        input: &ModelInput,
    ) -> std::result::Result<String, LlmError> {
        let body = build_request_body(history, input);

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ProviderRequest(e.to_string()))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            LlmError::ProviderRequest(format!("failed to read response body: {e}"))
        })?;

        let response_body: serde_json::Value =
            serde_json::from_str(&response_text).map_err(|e| {
                LlmError::ProviderRequest(format!(
                    "Gemini response ({status}) is not valid JSON: {e}\nBody: {}",
                    truncate_body(&response_text)
                ))
            })?;

        if !status.is_success() {
            let message = response_body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(LlmError::ProviderRequest(format!(
                "Gemini API error ({status}): {message}"
            )));
        }

        parse_response(&response_body)
    }
}

/// Build the `generateContent` body: stored history followed by the new
/// user message.
fn build_request_body(history: &[ConversationTurn], input: &ModelInput) -> serde_json::Value {
    let mut contents: Vec<serde_json::Value> = history.iter().map(convert_turn).collect();

    let mut parts = Vec::new();
    if !input.text.is_empty() {
        parts.push(serde_json::json!({ "text": input.text }));
    }
    for image in &input.images {
        parts.push(serde_json::json!({
            "inline_data": {
                "mime_type": image.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&image.data),
            }
        }));
    }
    contents.push(serde_json::json!({ "role": Role::User.to_string(), "parts": parts }));

    serde_json::json!({ "contents": contents })
}

fn convert_turn(turn: &ConversationTurn) -> serde_json::Value {
    // Image bytes are not kept in history, so earlier images become a marker.
    let parts: Vec<serde_json::Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => serde_json::json!({ "text": text }),
            Part::Image(image) => serde_json::json!({ "text": format!("[image: {}]", image.filename) }),
        })
        .collect();

    serde_json::json!({ "role": turn.role.to_string(), "parts": parts })
}

fn parse_response(body: &serde_json::Value) -> std::result::Result<String, LlmError> {
    let Some(candidate) = body["candidates"].get(0) else {
        let reason = body["promptFeedback"]["blockReason"]
            .as_str()
            .map(|reason| format!("prompt blocked: {reason}"))
            .unwrap_or_else(|| "no candidates returned".into());
        return Err(LlmError::EmptyResponse(reason));
    };

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate["finishReason"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        return Err(LlmError::EmptyResponse(format!("finish reason: {reason}")));
    }

    Ok(text)
}

fn truncate_body(body: &str) -> &str {
    const LIMIT: usize = 500;
    if body.len() <= LIMIT {
        return body;
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
