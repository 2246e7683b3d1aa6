use crate::config::ChatConfig;
use crate::error::{LLMError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Client for one-shot multimodal questions against an OpenAI-compatible API
pub struct VisionChatClient {
    config: ChatConfig,
    client: Client,
}

impl VisionChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        config.validate().map_err(LLMError::Config)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LLMError::MissingApiKey(self.config.base_url.clone()))
    }

    /// Ask `prompt` about the image at `image_url` (usually a `data:image/jpeg;base64,` URI)
    pub async fn ask(&self, prompt: &str, image_url: &str) -> Result<String> {
        let api_key = self.api_key()?;
        let body = build_request_body(&self.config, prompt, image_url);

        // Never log the full key
        let key_prefix = api_key.get(..8).filter(|_| api_key.len() > 8).unwrap_or("***");
        debug!(model = %self.config.model, "Sending vision chat request with key {}...", key_prefix);

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == 429 {
            return Err(LLMError::RateLimit);
        }
        if status == 401 || status == 403 {
            return Err(LLMError::AuthenticationFailed);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(500).collect();
            return Err(LLMError::InvalidResponse(format!("HTTP {}: {}", status, text)));
        }

        let json: Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .ok_or_else(|| LLMError::InvalidResponse("No message content in response".to_string()))?;

        Ok(extract_text(content))
    }
}

/// Build the `chat/completions` request body: system prompt, then one user
/// turn carrying the text prompt and the image.
pub fn build_request_body(config: &ChatConfig, prompt: &str, image_url: &str) -> Value {
    json!({
        "model": config.model,
        "messages": [
            {
                "role": "system",
                "content": config.system_prompt,
            },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            },
        ],
        "temperature": config.temperature.clamp(0.0, 2.0),
        "max_tokens": config.max_tokens,
    })
}

/// Pull plain text out of a message `content` field.
///
/// Providers return either a string, a string that itself holds a JSON list of
/// `{"text": ...}` parts, a list of parts, or a single part object.
pub fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(parts)) => parts
                .first()
                .and_then(|p| p.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| s.clone()),
            _ => s.clone(),
        },
        Value::Array(parts) => match parts.first() {
            Some(first) => match first.get("text") {
                Some(Value::String(text)) => text.clone(),
                _ => value_to_string(first),
            },
            None => String::new(),
        },
        Value::Object(map) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => content.to_string(),
        },
        other => value_to_string(other),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
