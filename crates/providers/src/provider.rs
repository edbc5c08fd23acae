//! Provider adapter contract and error classification.

use async_trait::async_trait;
use thiserror::Error;

/// Knobs recognized by every text-generation backend.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Marks requests that carry multi-turn business framing; these get
    /// the longer attempt timeout.
    pub business_context: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 4000, top_p: 1.0, business_context: false }
    }
}

impl GenerationOptions {
    pub fn business(mut self) -> Self {
        self.business_context = true;
        self
    }
}

/// What went wrong with one generation attempt, as far as the pool's
/// recovery rules care.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    QuotaExceeded,
    AccessDenied,
    RateLimited,
    Timeout,
    TemporaryServerError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::QuotaExceeded => "quota_exceeded",
            ErrorCategory::AccessDenied => "access_denied",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::TemporaryServerError => "temporary_server_error",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{provider} generation failed ({}): {message}", .category.as_str())]
pub struct ProviderError {
    pub provider: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self { provider: provider.to_string(), category, message: message.into() }
    }

    /// Classify a raw transport or API error from its status code and
    /// message text.
    pub fn classified(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { provider: provider.to_string(), category: classify(status, &message), message }
    }
}

/// Pure classification over status code and message substrings.
pub fn classify(status: Option<u16>, message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    let mentions_quota =
        message.contains("quota") || message.contains("rate limit") || message.contains("exceeded");

    match status {
        Some(402) => return ErrorCategory::QuotaExceeded,
        Some(429) => {
            return if mentions_quota {
                ErrorCategory::QuotaExceeded
            } else {
                ErrorCategory::RateLimited
            };
        }
        Some(401) | Some(403) => return ErrorCategory::AccessDenied,
        Some(code) if (500..600).contains(&code) => return ErrorCategory::TemporaryServerError,
        _ => {}
    }

    if mentions_quota {
        return ErrorCategory::QuotaExceeded;
    }
    if message.contains("unauthorized")
        || message.contains("forbidden")
        || message.contains("invalid api key")
    {
        return ErrorCategory::AccessDenied;
    }
    if message.contains("timeout") || message.contains("timed out") {
        return ErrorCategory::Timeout;
    }
    if message.contains("unavailable") || message.contains("try again") {
        return ErrorCategory::TemporaryServerError;
    }

    ErrorCategory::Unknown
}

/// Uniform interface over a text-generation backend.
///
/// Adapters are stateless beyond their static configuration; the pool
/// owns all retry, cooldown, and failover behavior.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// True iff both an API key and a model identifier are present.
    fn is_configured(&self) -> bool;

    async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_with_quota_message_is_quota_exceeded() {
        assert_eq!(classify(Some(429), "monthly quota exceeded"), ErrorCategory::QuotaExceeded);
        assert_eq!(classify(Some(402), "payment required"), ErrorCategory::QuotaExceeded);
    }

    #[test]
    fn bare_429_is_rate_limited() {
        assert_eq!(classify(Some(429), "too many requests"), ErrorCategory::RateLimited);
    }

    #[test]
    fn auth_failures_are_access_denied() {
        assert_eq!(classify(Some(401), "bad key"), ErrorCategory::AccessDenied);
        assert_eq!(classify(Some(403), "no"), ErrorCategory::AccessDenied);
        assert_eq!(classify(None, "Invalid API key provided"), ErrorCategory::AccessDenied);
    }

    #[test]
    fn timeouts_and_5xx_are_transient() {
        assert_eq!(classify(None, "request timed out after 15s"), ErrorCategory::Timeout);
        assert_eq!(classify(Some(503), "overloaded"), ErrorCategory::TemporaryServerError);
        assert_eq!(
            classify(None, "model temporarily unavailable, try again"),
            ErrorCategory::TemporaryServerError
        );
    }

    #[test]
    fn anything_else_is_unknown() {
        assert_eq!(classify(None, "malformed request body"), ErrorCategory::Unknown);
    }

    #[test]
    fn quota_substring_wins_without_status_code() {
        assert_eq!(classify(None, "rate limit reached for model"), ErrorCategory::QuotaExceeded);
    }
}
