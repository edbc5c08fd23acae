//! Scripted provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::{GenerationOptions, ProviderError, TextProvider};

/// A provider that replays a script of canned results.
///
/// When the script runs out it echoes a deterministic acknowledgement of
/// the prompt, which is what `--offline` runs rely on.
pub struct MockProvider {
    name: String,
    model: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses<I>(name: impl Into<String>, responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ProviderError>>,
    {
        let provider = Self::new(name);
        {
            let mut script = provider.script.lock().expect("mock script lock");
            script.extend(responses);
        }
        provider
    }

    pub fn push(&self, response: Result<String, ProviderError>) {
        self.script.lock().expect("mock script lock").push_back(response);
    }

    /// Prompts seen so far, in call order.
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("mock prompt lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().expect("mock prompt lock").len()
    }
}

#[async_trait]
impl TextProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn generate_text(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().expect("mock prompt lock").push(prompt.to_string());

        let scripted = self.script.lock().expect("mock script lock").pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(format!("[{}] {}", self.name, prompt.lines().next().unwrap_or_default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorCategory;

    #[tokio::test]
    async fn replays_script_in_order_then_echoes() {
        let provider = MockProvider::with_responses(
            "primary",
            [
                Ok("first".to_string()),
                Err(ProviderError::new("primary", ErrorCategory::QuotaExceeded, "quota")),
            ],
        );
        let options = GenerationOptions::default();

        assert_eq!(provider.generate_text("a", &options).await.unwrap(), "first");
        assert!(provider.generate_text("b", &options).await.is_err());
        let echoed = provider.generate_text("c", &options).await.unwrap();
        assert!(echoed.contains("c"));
        assert_eq!(provider.call_count(), 3);
    }
}
