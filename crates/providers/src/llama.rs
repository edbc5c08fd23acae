//! Llama-family adapter speaking an OpenAI-compatible chat-completions API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::provider::{GenerationOptions, ProviderError, TextProvider};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct LlamaProvider {
    name: String,
    api_key: Option<SecretString>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlamaProvider {
    pub fn new(api_key: Option<SecretString>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: Option<SecretString>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: "llama".to_string(),
            api_key,
            model: model.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextProvider for LlamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        let has_key = self
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty());
        has_key && !self.model.trim().is_empty()
    }

    async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let Some(api_key) = self.api_key.as_ref() else {
            return Err(ProviderError::classified(&self.name, Some(401), "api key not configured"));
        };

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "top_p": options.top_p,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| ProviderError::classified(&self.name, None, error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::classified(&self.name, Some(status.as_u16()), detail));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|error| {
            ProviderError::classified(&self.name, None, format!("malformed response: {error}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::classified(&self.name, None, "response contained no choices")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_requires_both_key_and_model() {
        let configured = LlamaProvider::new(Some("key".into()), "llama-3.3-70b");
        assert!(configured.is_configured());

        let no_key = LlamaProvider::new(None, "llama-3.3-70b");
        assert!(!no_key.is_configured());

        let blank_model = LlamaProvider::new(Some("key".into()), "  ");
        assert!(!blank_model.is_configured());
    }

    #[tokio::test]
    async fn generation_without_key_fails_as_access_denied() {
        let provider = LlamaProvider::new(None, "llama-3.3-70b");
        let error = provider
            .generate_text("hello", &GenerationOptions::default())
            .await
            .expect_err("missing key must fail");

        assert_eq!(error.category, crate::provider::ErrorCategory::AccessDenied);
    }
}
