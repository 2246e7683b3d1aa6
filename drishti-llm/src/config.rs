use serde::{Deserialize, Serialize};

/// DashScope's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a smart visual analysis assistant. \
You understand image content and answer questions about it. Your tasks are: \
1. analyze the image the user provides; \
2. identify objects, people and the scene; \
3. answer the user's questions about the image; \
4. offer useful observations and suggestions. \
Answer concisely and accurately.";

/// Settings for the vision-language chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,
    /// Multimodal model name
    pub model: String,
    /// API key; `None` means the endpoint is not usable
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "qwen-vl-plus".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 1000,
            timeout_secs: 60,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err("Chat base_url must be an http(s) URL".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("Chat model must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 2.0".to_string());
        }
        if self.max_tokens == 0 || self.max_tokens > 8192 {
            return Err("max_tokens must be between 1 and 8192".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
    }
}
