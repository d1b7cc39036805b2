//! Node bootstrap.
//!
//! Resolves the backend configuration from the file or from the sealed copy a
//! previous run left in the state directory, then starts the backend.

use std::sync::Arc;

use ironvault_broker::LogBroker;
use ironvault_iam::{
    Backend, BackendOptions, BackendState, IdentitySystem,
    backend::{ConfigStorage, FileConfigStorage},
};
use snafu::ResultExt;
use tracing::info;

use crate::{
    config::Config,
    error::{BootstrapSnafu, Result},
};

/// Starts a backend for `config` against `broker` and `identity`.
///
/// A backend section in `config` is sealed into the state directory when it
/// differs from the stored one.
///
/// # Errors
///
/// Returns [`ServerError::Bootstrap`](crate::error::ServerError::Bootstrap)
/// if no configuration is available, it is invalid, or the backend fails to
/// restore its topics.
pub async fn bootstrap_node(
    config: &Config,
    broker: Arc<dyn LogBroker>,
    identity: Arc<dyn IdentitySystem>,
) -> Result<Backend> {
    let storage = FileConfigStorage::open(&config.state_dir).context(BootstrapSnafu)?;
    let state = BackendState::load(&storage).context(BootstrapSnafu)?;
    if let Some(backend) = &config.backend {
        persist_if_changed(&state, &storage, backend.clone())?;
    }
    let live = state.live().context(BootstrapSnafu)?;
    info!(
        state_dir = %config.state_dir.display(),
        self_topic = %live.topics.self_topic_name,
        root_topic = %live.topics.root_topic_name,
        "backend configuration loaded"
    );

    let options = BackendOptions::builder()
        .config(live)
        .broker(broker)
        .identity(identity)
        .replicas(config.replicas.clone())
        .maybe_group(config.consumer_group.clone())
        .build();
    Backend::start(options).await.context(BootstrapSnafu)
}

fn persist_if_changed(
    state: &BackendState,
    storage: &dyn ConfigStorage,
    backend: ironvault_iam::BackendConfig,
) -> Result<()> {
    if state.live().is_ok_and(|live| *live == backend) {
        return Ok(());
    }
    state.configure_persisted(storage, backend).context(BootstrapSnafu)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use ironvault_broker::MemoryBroker;
    use ironvault_iam::{BackendConfig, MemoryIdentitySystem};
    use ironvault_test_utils::{TestDir, TestKeys, test_broker_config, test_consumer_config, test_topics_config};
    use ironvault_types::{ErrorCode, HasErrorCode};

    use super::*;
    use crate::error::ServerError;

    fn backend_config() -> BackendConfig {
        BackendConfig {
            broker: test_broker_config(&TestKeys::generate()),
            topics: test_topics_config("root_source.auth", "auth", &TestKeys::generate()),
            consumer: test_consumer_config(),
        }
    }

    async fn bootstrap(config: &Config) -> Result<Backend> {
        bootstrap_node(config, Arc::new(MemoryBroker::new()), Arc::new(MemoryIdentitySystem::new())).await
    }

    #[tokio::test]
    async fn test_sealed_configuration_survives_restart() {
        let dir = TestDir::new();
        let mut config = Config { state_dir: dir.join("state"), ..Config::default() };
        config.backend = Some(backend_config());
        let first = bootstrap(&config).await.expect("first start");
        first.shutdown().await.expect("shutdown");

        config.backend = None;
        let second = bootstrap(&config).await.expect("from sealed state");
        assert_eq!(second.config().topics.self_topic_name, "auth");
        second.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_missing_configuration_is_reported() {
        let dir = TestDir::new();
        let config = Config { state_dir: dir.join("state"), ..Config::default() };
        match bootstrap(&config).await {
            Err(ServerError::Bootstrap { source }) => assert_eq!(source.code(), ErrorCode::ObjectNotConfigured),
            other => panic!("expected NotConfigured, got {other:?}"),
        }
    }
}
