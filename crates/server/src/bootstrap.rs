use std::sync::Arc;

use atlas_core::config::{AppConfig, ConfigError, LoadOptions};
use atlas_core::orchestrator::Orchestrator;
use atlas_graph::{GraphStore, MemoryGraphStore};
use atlas_providers::ProviderPool;
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub graph: Arc<dyn GraphStore>,
    pub pool: Arc<ProviderPool>,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        primary_provider = config.providers.primary.as_str(),
        "starting application bootstrap"
    );

    let pool = Arc::new(config.build_pool());
    let configured = pool.configured_providers();
    for (provider, is_configured) in &configured {
        info!(
            event_name = "system.bootstrap.provider",
            provider = provider.as_str(),
            configured = is_configured,
            "provider registered"
        );
    }
    if !configured.iter().any(|(_, is_configured)| *is_configured) {
        warn!(
            event_name = "system.bootstrap.no_configured_provider",
            "no provider has an api key; plan steps that call a provider will fail"
        );
    }

    let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::seeded());
    info!(event_name = "system.bootstrap.graph_seeded", "in-memory catalog seeded");

    let orchestrator =
        Arc::new(Orchestrator::with_config(graph.clone(), pool.clone(), config.orchestrator_config()));

    Ok(Application { config, graph, pool, orchestrator })
}

#[cfg(test)]
mod tests {
    use atlas_core::config::{ConfigOverrides, LoadOptions, ProviderName};
    use atlas_graph::EntityKind;

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_builds_a_pool_in_configured_failover_order() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                primary_provider: Some(ProviderName::Gemini),
                gemini_api_key: Some("gemini-test-key".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with default config");

        // The default gemini fallback collapses into the promoted primary.
        assert_eq!(app.pool.provider_names(), vec!["gemini".to_string()]);
    }

    #[tokio::test]
    async fn bootstrap_seeds_a_queryable_catalog() {
        let app = bootstrap(LoadOptions::default())
            .await
            .expect("bootstrap should succeed with default config");

        let matches = app
            .graph
            .lookup_nodes(EntityKind::Industry, "Banking")
            .await
            .expect("seeded catalog lookup should succeed");
        assert!(!matches.is_empty(), "seeded catalog should contain a Banking industry");
    }
}
