//! Text-generation providers and the failover pool for Atlas.
//!
//! Two concrete backends (a Llama-family OpenAI-compatible API and
//! Gemini's REST API) are reduced to the single [`TextProvider`]
//! contract. [`ProviderPool`] owns every recovery concern: cooldowns,
//! exponential backoff, provider switching, and the global attempt
//! budget. Callers see either generated text or an error that
//! aggregates every provider's last failure.

pub mod gemini;
pub mod llama;
pub mod mock;
pub mod pool;
pub mod provider;

pub use gemini::GeminiProvider;
pub use llama::LlamaProvider;
pub use mock::MockProvider;
pub use pool::{AttemptFailure, BackoffStatus, PoolConfig, PoolError, ProviderPool, ProviderWait};
pub use provider::{classify, ErrorCategory, GenerationOptions, ProviderError, TextProvider};
