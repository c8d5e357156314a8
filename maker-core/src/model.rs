//! `ModelClient`: the language-model collaborator contract (spec §6).

use crate::error::{MakerError, MakerResult};
use crate::state::MakerConfig;
use async_trait::async_trait;

/// Generates text from a system/user prompt pair. Implementations may be
/// schema-constrained (JSON mode) or free-form; callers that need structured
/// output strip code fences themselves via [`strip_code_fence`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> MakerResult<String>;

    /// The opaque model tag this client serves, matched against
    /// `AgentProfile.model_tag` by the Scheduler.
    fn model_tag(&self) -> &str;
}

/// Strips a single leading/trailing ``` fence (with optional language tag)
/// from a model response, the way the Decomposer and Voter both need to
/// before calling `serde_json::from_str` (spec §4.4 "model responses are
/// frequently fenced").
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches('\n');
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Google Gemini adapter over `reqwest`.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model_tag: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model_tag: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model_tag: model_tag.into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> MakerResult<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.endpoint, self.model_tag, self.api_key
        );
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "parts": [{ "text": user_prompt }] }],
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MakerError::Model(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MakerError::Model(format!("gemini returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MakerError::Model(e.to_string()))?;

        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MakerError::Model("gemini response missing candidate text".to_string()))
    }

    fn model_tag(&self) -> &str {
        &self.model_tag
    }
}

/// OpenAI-compatible chat-completions adapter over `reqwest`.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model_tag: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model_tag: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model_tag: model_tag.into(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> MakerResult<String> {
        let body = serde_json::json!({
            "model": self.model_tag,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MakerError::Model(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MakerError::Model(format!("openai returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MakerError::Model(e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MakerError::Model("openai response missing choice content".to_string()))
    }

    fn model_tag(&self) -> &str {
        &self.model_tag
    }
}

/// Builds the default `ModelClient` for a profile's `model_tag`, selecting
/// the provider family from `MakerConfig.llm_provider` (spec §6.1).
pub fn default_model_client(config: &MakerConfig, model_tag: &str) -> MakerResult<Box<dyn ModelClient>> {
    let api_key = config
        .provider_credentials
        .0
        .clone()
        .ok_or_else(|| MakerError::config("no provider credentials configured"))?;

    Ok(match config.llm_provider {
        crate::state::LlmProvider::Gemini => Box::new(GeminiClient::new(api_key, model_tag)),
        crate::state::LlmProvider::OpenAi => Box::new(OpenAiClient::new(api_key, model_tag)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\":1}");
    }

    #[test]
    fn strip_code_fence_passes_through_plain_text() {
        assert_eq!(strip_code_fence("plain"), "plain");
    }

    #[test]
    fn default_model_client_requires_credentials() {
        let config = MakerConfig::default();
        assert!(default_model_client(&config, "coder").is_err());
    }
}
