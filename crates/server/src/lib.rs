//! ironvault node.
//!
//! Loads the node configuration, bootstraps the backend and runs its topic
//! consumers until a shutdown signal arrives or a consumer fails.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod shutdown;

use std::{future::Future, sync::Arc};

use ironvault_broker::{LogBroker, MemoryBroker};
use ironvault_iam::{IdentitySystem, MemoryIdentitySystem};
use snafu::ResultExt;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    error::{ConsumerSnafu, Result, ShutdownSnafu},
};

/// Runs a node against an in-process broker and identity system until `shutdown` resolves.
///
/// # Errors
///
/// Returns bootstrap errors and the first consumer failure.
pub async fn run_standalone(config: &Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    let broker: Arc<dyn LogBroker> = Arc::new(MemoryBroker::new());
    let identity: Arc<dyn IdentitySystem> = Arc::new(MemoryIdentitySystem::new());
    warn!("standalone mode: the broker and identity system live in this process only");
    run(config, broker, identity, shutdown).await
}

/// Runs a node until `shutdown` resolves or a consumer stops.
///
/// # Errors
///
/// Returns bootstrap errors and the first consumer failure.
pub async fn run(
    config: &Config,
    broker: Arc<dyn LogBroker>,
    identity: Arc<dyn IdentitySystem>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut backend = bootstrap::bootstrap_node(config, broker, identity).await?;
    info!("node ready");

    let exit = tokio::select! {
        () = shutdown => None,
        exit = backend.next_exit() => exit,
    };
    let failure = match exit {
        None => None,
        Some((scope, Ok(()))) => {
            warn!(scope = %scope, "consumer stopped unexpectedly");
            None
        },
        Some((scope, Err(e))) => {
            error!(scope = %scope, error = %e, "consumer failed, stopping node");
            Some((scope, e))
        },
    };

    let stopped = backend.shutdown().await;
    if let Some((scope, source)) = failure {
        return Err(source).context(ConsumerSnafu { scope });
    }
    stopped.context(ShutdownSnafu)?;
    info!("node stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use ironvault_iam::BackendConfig;
    use ironvault_test_utils::{TestDir, TestKeys, test_broker_config, test_consumer_config, test_topics_config};

    use super::*;

    #[tokio::test]
    async fn test_standalone_runs_until_shutdown() {
        let dir = TestDir::new();
        let config = Config {
            state_dir: dir.join("state"),
            backend: Some(BackendConfig {
                broker: test_broker_config(&TestKeys::generate()),
                topics: test_topics_config("root_source.auth", "auth", &TestKeys::generate()),
                consumer: test_consumer_config(),
            }),
            ..Config::default()
        };
        run_standalone(&config, tokio::time::sleep(Duration::from_millis(50))).await.expect("clean run");
        assert!(dir.join("state").join("broker_config.bin").exists());
    }
}
