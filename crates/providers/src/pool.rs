//! Provider pool: ordered failover with cooldowns and bounded retries.
//!
//! One pool instance is shared process-wide by concurrent plan
//! executions. All mutable state (cooldown table, active-provider
//! pointer, failure exponents) lives behind an internal mutex; the lock
//! is never held across sleeps or outbound calls. Between a cooldown
//! read and the sleep that follows, another execution may mutate the
//! table; a stale read costs at most a suboptimal provider choice.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{ErrorCategory, GenerationOptions, ProviderError, TextProvider};

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub base_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Attempt budget across all providers combined.
    pub max_global_attempts: u32,
    pub request_timeout: Duration,
    /// Longer timeout for business-context-flagged requests.
    pub business_timeout: Duration,
    /// How long after a fallback success before the primary is preferred
    /// again.
    pub primary_grace: Duration,
    /// Backoff status older than this reads as absent.
    pub status_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 1_000,
            backoff_multiplier: 1.5,
            max_backoff_ms: 60_000,
            max_global_attempts: 6,
            request_timeout: Duration::from_secs(15),
            business_timeout: Duration::from_secs(30),
            primary_grace: Duration::from_secs(5),
            status_ttl: Duration::from_secs(120),
        }
    }
}

/// `min(max_backoff, base * multiplier^exponent)`.
pub fn compute_backoff(config: &PoolConfig, exponent: u32) -> Duration {
    let scaled = config.base_backoff_ms as f64 * config.backoff_multiplier.powi(exponent as i32);
    Duration::from_millis(scaled.min(config.max_backoff_ms as f64) as u64)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub provider: String,
    pub attempt: u32,
    pub error: String,
}

#[derive(Clone, Debug, Error)]
pub enum PoolError {
    #[error("no configured text provider is available")]
    NoProviders,
    #[error("non-recoverable provider error: {0}")]
    NonRecoverable(ProviderError),
    #[error("generation was cancelled")]
    Cancelled,
    #[error("all providers exhausted after {} attempts: {}", .attempts.len(), summarize(.attempts))]
    Exhausted { attempts: Vec<AttemptFailure> },
}

fn summarize(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|failure| {
            format!("{} (attempt {}): {}", failure.provider, failure.attempt, failure.error)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Snapshot of the pool's recovery state, for surfacing to a human.
#[derive(Clone, Debug, Serialize)]
pub struct BackoffStatus {
    pub active_provider: String,
    pub attempts_made: u32,
    pub providers: Vec<ProviderWait>,
    pub all_cooling: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderWait {
    pub provider: String,
    pub configured: bool,
    pub remaining_wait_ms: u64,
}

struct PoolState {
    active: usize,
    cooldown_until: HashMap<String, Instant>,
    exponents: HashMap<String, u32>,
    return_to_primary_at: Option<Instant>,
    last_activity: Option<Instant>,
    attempts_made: u32,
}

pub struct ProviderPool {
    providers: Vec<Arc<dyn TextProvider>>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

enum Selection {
    Ready { index: usize },
    Cooling { index: usize, wait: Duration },
    Empty,
}

impl ProviderPool {
    /// `providers` is ordered: primary first, fallbacks after.
    pub fn new(providers: Vec<Arc<dyn TextProvider>>, config: PoolConfig) -> Self {
        Self {
            providers,
            config,
            state: Mutex::new(PoolState {
                active: 0,
                cooldown_until: HashMap::new(),
                exponents: HashMap::new(),
                return_to_primary_at: None,
                last_activity: None,
                attempts_made: 0,
            }),
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|provider| provider.name().to_string()).collect()
    }

    pub fn configured_providers(&self) -> Vec<(String, bool)> {
        self.providers
            .iter()
            .map(|provider| (provider.name().to_string(), provider.is_configured()))
            .collect()
    }

    /// Run one request through the failover state machine.
    pub async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<String, PoolError> {
        let attempt_timeout = if options.business_context {
            self.config.business_timeout
        } else {
            self.config.request_timeout
        };

        let mut attempts: Vec<AttemptFailure> = Vec::new();
        // Providers that already used their one same-provider retry for
        // this request.
        let mut retried: HashMap<usize, bool> = HashMap::new();

        for attempt in 1..=self.config.max_global_attempts {
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            let selection = {
                let mut state = self.state.lock().await;
                state.last_activity = Some(Instant::now());
                state.attempts_made = attempt;
                self.select_provider(&mut state)
            };

            let index = match selection {
                Selection::Empty => return Err(PoolError::NoProviders),
                Selection::Ready { index } => index,
                Selection::Cooling { index, wait } => {
                    debug!(
                        event_name = "providers.pool.waiting_for_cooldown",
                        provider = self.providers[index].name(),
                        wait_ms = wait.as_millis() as u64,
                        "all providers cooling, waiting for the shortest cooldown"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    index
                }
            };

            let provider = Arc::clone(&self.providers[index]);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                attempted = tokio::time::timeout(attempt_timeout, provider.generate_text(prompt, options)) => {
                    match attempted {
                        Ok(result) => result,
                        // A timed-out attempt takes the same path as any
                        // transient provider failure.
                        Err(_) => Err(ProviderError::new(
                            provider.name(),
                            ErrorCategory::Timeout,
                            format!("attempt timed out after {}ms", attempt_timeout.as_millis()),
                        )),
                    }
                }
            };

            let error = match outcome {
                Ok(text) => {
                    let mut state = self.state.lock().await;
                    state.cooldown_until.remove(provider.name());
                    state.exponents.remove(provider.name());
                    state.last_activity = Some(Instant::now());
                    if index != 0 {
                        state.return_to_primary_at = Some(Instant::now() + self.config.primary_grace);
                    }
                    debug!(
                        event_name = "providers.pool.generated",
                        provider = provider.name(),
                        attempt,
                        "generation succeeded"
                    );
                    return Ok(text);
                }
                Err(error) => error,
            };

            warn!(
                event_name = "providers.pool.attempt_failed",
                provider = provider.name(),
                attempt,
                category = error.category.as_str(),
                error = %error.message,
                "generation attempt failed"
            );
            attempts.push(AttemptFailure {
                provider: provider.name().to_string(),
                attempt,
                error: error.to_string(),
            });

            match error.category {
                ErrorCategory::QuotaExceeded | ErrorCategory::RateLimited => {
                    let mut state = self.state.lock().await;
                    self.apply_cooldown(&mut state, index, false);
                    self.switch_away(&mut state, index);
                }
                ErrorCategory::Timeout | ErrorCategory::TemporaryServerError => {
                    let already_retried = retried.insert(index, true).unwrap_or(false);
                    if already_retried {
                        let mut state = self.state.lock().await;
                        self.apply_cooldown(&mut state, index, true);
                        self.switch_away(&mut state, index);
                    }
                    // First transient failure: stay on the same provider
                    // for one more attempt.
                }
                ErrorCategory::AccessDenied => {
                    let mut state = self.state.lock().await;
                    self.apply_cooldown(&mut state, index, true);
                    self.switch_away(&mut state, index);
                }
                ErrorCategory::Unknown => {
                    return Err(PoolError::NonRecoverable(error));
                }
            }
        }

        info!(
            event_name = "providers.pool.exhausted",
            attempts = attempts.len(),
            "global attempt budget exhausted"
        );
        Err(PoolError::Exhausted { attempts })
    }

    /// Recovery state for the caller to surface; absent once stale.
    pub async fn backoff_status(&self) -> Option<BackoffStatus> {
        let state = self.state.lock().await;
        let last_activity = state.last_activity?;
        if last_activity.elapsed() > self.config.status_ttl {
            return None;
        }

        let now = Instant::now();
        let providers: Vec<ProviderWait> = self
            .providers
            .iter()
            .map(|provider| ProviderWait {
                provider: provider.name().to_string(),
                configured: provider.is_configured(),
                remaining_wait_ms: state
                    .cooldown_until
                    .get(provider.name())
                    .and_then(|until| until.checked_duration_since(now))
                    .map(|remaining| remaining.as_millis() as u64)
                    .unwrap_or(0),
            })
            .collect();
        let all_cooling = providers
            .iter()
            .filter(|wait| wait.configured)
            .all(|wait| wait.remaining_wait_ms > 0)
            && providers.iter().any(|wait| wait.configured);

        Some(BackoffStatus {
            active_provider: self
                .providers
                .get(state.active)
                .map(|provider| provider.name().to_string())
                .unwrap_or_default(),
            attempts_made: state.attempts_made,
            providers,
            all_cooling,
        })
    }

    fn apply_cooldown(&self, state: &mut PoolState, index: usize, halved: bool) {
        let name = self.providers[index].name().to_string();
        let exponent = *state.exponents.get(&name).unwrap_or(&0);
        let cooldown = compute_backoff(&self.config, if halved { exponent / 2 } else { exponent });
        state.cooldown_until.insert(name.clone(), Instant::now() + cooldown);
        state.exponents.insert(name.clone(), exponent + 1);
        info!(
            event_name = "providers.pool.cooldown_set",
            provider = %name,
            cooldown_ms = cooldown.as_millis() as u64,
            exponent,
            "provider placed in cooldown"
        );
    }

    /// Move the active pointer to the next configured provider that is
    /// not in cooldown, if any.
    fn switch_away(&self, state: &mut PoolState, from: usize) {
        let now = Instant::now();
        for offset in 1..self.providers.len().max(1) {
            let candidate = (from + offset) % self.providers.len();
            let provider = &self.providers[candidate];
            if !provider.is_configured() {
                continue;
            }
            let cooling = state
                .cooldown_until
                .get(provider.name())
                .is_some_and(|until| *until > now);
            if !cooling {
                state.active = candidate;
                return;
            }
        }
        // Everyone is cooling; selection will wait for the shortest one.
    }

    /// Prefer an immediately available provider over waiting; when every
    /// configured provider is cooling, pick the shortest remaining wait.
    fn select_provider(&self, state: &mut PoolState) -> Selection {
        let now = Instant::now();

        if let Some(return_at) = state.return_to_primary_at {
            if now >= return_at {
                state.active = 0;
                state.return_to_primary_at = None;
            }
        }

        let configured: Vec<usize> = (0..self.providers.len())
            .filter(|&index| self.providers[index].is_configured())
            .collect();
        if configured.is_empty() {
            return Selection::Empty;
        }

        // Ready provider closest to the active pointer wins.
        for offset in 0..self.providers.len() {
            let candidate = (state.active + offset) % self.providers.len();
            if !configured.contains(&candidate) {
                continue;
            }
            let cooling = state
                .cooldown_until
                .get(self.providers[candidate].name())
                .is_some_and(|until| *until > now);
            if !cooling {
                state.active = candidate;
                return Selection::Ready { index: candidate };
            }
        }

        // All cooling: shortest remaining cooldown breaks the tie.
        let shortest = configured
            .into_iter()
            .filter_map(|index| {
                state
                    .cooldown_until
                    .get(self.providers[index].name())
                    .map(|until| (index, until.saturating_duration_since(now)))
            })
            .min_by_key(|(_, wait)| *wait);

        match shortest {
            Some((index, wait)) => {
                state.active = index;
                Selection::Cooling { index, wait }
            }
            None => Selection::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn quota_error(provider: &str) -> ProviderError {
        ProviderError::new(provider, ErrorCategory::QuotaExceeded, "quota exceeded")
    }

    fn pool_with(providers: Vec<Arc<dyn TextProvider>>) -> ProviderPool {
        ProviderPool::new(providers, PoolConfig::default())
    }

    #[test]
    fn backoff_is_monotonic_until_the_cap() {
        let config = PoolConfig::default();
        let mut previous = Duration::ZERO;
        for exponent in 0..16 {
            let cooldown = compute_backoff(&config, exponent);
            assert!(cooldown >= previous, "cooldown shrank at exponent {exponent}");
            assert!(cooldown <= Duration::from_millis(config.max_backoff_ms));
            previous = cooldown;
        }
        assert_eq!(compute_backoff(&config, 15), Duration::from_millis(config.max_backoff_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_serves_request_when_primary_hits_quota() {
        let primary = Arc::new(MockProvider::with_responses(
            "primary",
            [Err(quota_error("primary"))],
        ));
        let fallback =
            Arc::new(MockProvider::with_responses("fallback", [Ok("from fallback".to_string())]));
        let pool = pool_with(vec![primary.clone(), fallback.clone()]);

        let text = pool
            .generate_text("hello", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .expect("fallback should serve the request");

        assert_eq!(text, "from fallback");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);

        let status = pool.backoff_status().await.expect("status should be fresh");
        let primary_wait = status
            .providers
            .iter()
            .find(|wait| wait.provider == "primary")
            .expect("primary listed");
        assert!(primary_wait.remaining_wait_ms > 0, "primary should be cooling");
    }

    #[tokio::test(start_paused = true)]
    async fn cooling_primary_is_skipped_until_cooldown_elapses() {
        let primary = Arc::new(MockProvider::with_responses(
            "primary",
            [Err(quota_error("primary"))],
        ));
        let fallback = Arc::new(MockProvider::new("fallback"));
        let pool = pool_with(vec![primary.clone(), fallback.clone()]);
        let cancel = CancellationToken::new();

        pool.generate_text("first", &GenerationOptions::default(), &cancel).await.unwrap();
        // Second request arrives while the primary is still cooling.
        pool.generate_text("second", &GenerationOptions::default(), &cancel).await.unwrap();

        assert_eq!(primary.call_count(), 1, "cooling primary must not be retried");
        assert_eq!(fallback.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_is_restored_after_grace_and_cooldown() {
        let primary = Arc::new(MockProvider::with_responses(
            "primary",
            [Err(quota_error("primary"))],
        ));
        let fallback = Arc::new(MockProvider::new("fallback"));
        let pool = pool_with(vec![primary.clone(), fallback.clone()]);
        let cancel = CancellationToken::new();

        pool.generate_text("first", &GenerationOptions::default(), &cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        pool.generate_text("second", &GenerationOptions::default(), &cancel).await.unwrap();

        assert_eq!(primary.call_count(), 2, "primary should serve again after grace");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_earns_one_same_provider_retry() {
        let primary = Arc::new(MockProvider::with_responses(
            "primary",
            [
                Err(ProviderError::new("primary", ErrorCategory::TemporaryServerError, "try again")),
                Ok("recovered".to_string()),
            ],
        ));
        let fallback = Arc::new(MockProvider::new("fallback"));
        let pool = pool_with(vec![primary.clone(), fallback.clone()]);

        let text = pool
            .generate_text("hello", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "recovered");
        assert_eq!(primary.call_count(), 2);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_error_aborts_without_switching() {
        let primary = Arc::new(MockProvider::with_responses(
            "primary",
            [Err(ProviderError::new("primary", ErrorCategory::Unknown, "malformed body"))],
        ));
        let fallback = Arc::new(MockProvider::new("fallback"));
        let pool = pool_with(vec![primary.clone(), fallback.clone()]);

        let error = pool
            .generate_text("hello", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .expect_err("unknown errors are non-recoverable");

        assert!(matches!(error, PoolError::NonRecoverable(_)));
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_aggregates_every_provider_failure() {
        let failures = |name: &str| {
            std::iter::repeat_with({
                let name = name.to_string();
                move || Err(quota_error(&name))
            })
            .take(8)
        };
        let primary = Arc::new(MockProvider::with_responses("primary", failures("primary")));
        let fallback = Arc::new(MockProvider::with_responses("fallback", failures("fallback")));
        let pool = pool_with(vec![primary, fallback]);

        let error = pool
            .generate_text("hello", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .expect_err("pure quota failures must exhaust the budget");

        let PoolError::Exhausted { attempts } = error else {
            panic!("expected exhaustion, got {error:?}");
        };
        assert_eq!(attempts.len(), PoolConfig::default().max_global_attempts as usize);
        assert!(attempts.iter().any(|failure| failure.provider == "primary"));
        assert!(attempts.iter().any(|failure| failure.provider == "fallback"));
        assert!(attempts.iter().all(|failure| failure.error.contains("quota")));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_cooldown_waits() {
        let primary = Arc::new(MockProvider::with_responses(
            "primary",
            std::iter::repeat_with(|| Err(quota_error("primary"))).take(8),
        ));
        let pool = pool_with(vec![primary]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = pool
            .generate_text("hello", &GenerationOptions::default(), &cancel)
            .await
            .expect_err("cancelled token must stop the request");
        assert!(matches!(error, PoolError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_status_expires_after_staleness_window() {
        let provider = Arc::new(MockProvider::new("primary"));
        let pool = pool_with(vec![provider]);
        pool.generate_text("hello", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(pool.backoff_status().await.is_some());
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(pool.backoff_status().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pool_without_configured_providers_reports_no_providers() {
        struct Unconfigured;

        #[async_trait::async_trait]
        impl TextProvider for Unconfigured {
            fn name(&self) -> &str {
                "unconfigured"
            }
            fn model(&self) -> &str {
                ""
            }
            fn is_configured(&self) -> bool {
                false
            }
            async fn generate_text(
                &self,
                _prompt: &str,
                _options: &GenerationOptions,
            ) -> Result<String, ProviderError> {
                unreachable!("unconfigured providers are never attempted")
            }
        }

        let pool = pool_with(vec![Arc::new(Unconfigured)]);
        let error = pool
            .generate_text("hello", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .expect_err("no providers should be selectable");
        assert!(matches!(error, PoolError::NoProviders));
    }
}
