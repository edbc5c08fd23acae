use std::sync::Arc;

use atlas_providers::{BackoffStatus, ProviderPool};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pool: Arc<ProviderPool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub configured: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub providers: Vec<ProviderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffStatus>,
    pub checked_at: String,
}

pub fn router(pool: Arc<ProviderPool>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { pool })
}

/// Ready when at least one provider carries an api key. Recent failover
/// activity is reported but does not degrade readiness on its own.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let providers: Vec<ProviderStatus> = state
        .pool
        .configured_providers()
        .into_iter()
        .map(|(name, configured)| ProviderStatus { name, configured })
        .collect();
    let ready = providers.iter().any(|provider| provider.configured);
    let backoff = state.pool.backoff_status().await;

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "atlas-server runtime initialized".to_string(),
        },
        providers,
        backoff,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atlas_providers::{
        LlamaProvider, MockProvider, PoolConfig, ProviderPool, TextProvider,
    };
    use axum::{extract::State, http::StatusCode, Json};

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_a_provider_is_configured() {
        let provider: Arc<dyn TextProvider> =
            Arc::new(MockProvider::with_responses("mock", Vec::new()));
        let pool = Arc::new(ProviderPool::new(vec![provider], PoolConfig::default()));

        let (status, Json(payload)) = health(State(HealthState { pool })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert!(payload.providers.iter().any(|provider| provider.configured));
        assert!(payload.backoff.is_none(), "an idle pool reports no backoff activity");
    }

    #[tokio::test]
    async fn health_degrades_when_no_provider_has_a_key() {
        let provider: Arc<dyn TextProvider> =
            Arc::new(LlamaProvider::new(None, "llama-3.3-70b-versatile"));
        let pool = Arc::new(ProviderPool::new(vec![provider], PoolConfig::default()));

        let (status, Json(payload)) = health(State(HealthState { pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
