//! Backend lifecycle.
//!
//! A [`Backend`] is started from a live [`BackendConfig`]. Startup restores
//! the root, self and generation topics into a fresh store and then spawns
//! one [`TopicConsumer`] per topic, all bound to one cancellation token.
//! [`Backend::shutdown`] cancels the token and waits for every consumer.

mod config;
mod state;
mod storage;

use std::sync::Arc;

use ironvault_broker::{
    LogBroker, MessageDecoder, MessageEncoder, PayloadCipher, TopicConsumer, TopicSpec, VerifierSet,
    encryption_disabled,
};
use ironvault_types::{GENERATION_TOPIC, topic::replica_topic};
use snafu::ResultExt;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use self::{
    config::BackendConfig,
    state::{BackendPhase, BackendState},
    storage::{CONFIG_KEY, ConfigStorage, FileConfigStorage, MemoryConfigStorage},
};
use crate::{
    destination::{GenerationDestination, ReplicaDestination, SelfDestination},
    dispatch::{Dispatcher, Registry, Scope},
    downstream::IdentitySystem,
    error::{ConfigSnafu, IamError, Result, TaskSnafu},
    restore::Restorer,
    store::{IamStore, Publisher},
};

/// Inputs of [`Backend::start`].
#[derive(bon::Builder)]
pub struct BackendOptions {
    /// Live configuration.
    config: Arc<BackendConfig>,
    /// Log the topics live in.
    broker: Arc<dyn LogBroker>,
    /// Identity system downstream actions run against.
    identity: Arc<dyn IdentitySystem>,
    /// Replica names this instance publishes authoritative objects to, under
    /// its root source name.
    #[builder(default)]
    replicas: Vec<String>,
    /// Consumer group offsets are committed under. Defaults to the self topic name.
    #[builder(into)]
    group: Option<String>,
}

type ConsumerExit = (Scope, std::result::Result<ironvault_broker::Result<()>, JoinError>);

/// A running instance: its store and its consumers.
pub struct Backend {
    store: Arc<IamStore>,
    config: Arc<BackendConfig>,
    cancellation_token: CancellationToken,
    consumers: JoinSet<ConsumerExit>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("self_topic", &self.config.topics.self_topic_name)
            .field("root_topic", &self.config.topics.root_topic_name)
            .field("consumers", &self.consumers.len())
            .finish_non_exhaustive()
    }
}

struct Decoders {
    root: MessageDecoder,
    local: MessageDecoder,
    generation: MessageDecoder,
}

impl Decoders {
    fn new(config: &BackendConfig, own_key: [u8; 32]) -> Result<Self> {
        let root_key = config.topics.root_key().context(ConfigSnafu)?;
        let peers = config.topics.peer_keys().context(ConfigSnafu)?;
        let cipher = if encryption_disabled() {
            None
        } else {
            Some(PayloadCipher::new(config.broker.encryption_key_bytes().context(ConfigSnafu)?))
        };
        let trusted_locally = || std::iter::once(own_key).chain(peers.iter().copied());
        Ok(Self {
            root: MessageDecoder::new(VerifierSet::new([root_key])?, cipher.clone()),
            local: MessageDecoder::new(VerifierSet::new(trusted_locally())?, cipher),
            generation: MessageDecoder::new(VerifierSet::new(trusted_locally())?, None),
        })
    }
}

impl Backend {
    /// Restores every topic and starts the consumers.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns key material, topic creation and restore errors. No consumer
    /// is running when an error is returned.
    pub async fn start(options: BackendOptions) -> Result<Self> {
        let BackendOptions { config, broker, identity, replicas, group } = options;
        config.validate()?;
        let topics = &config.topics;
        let group = group.unwrap_or_else(|| topics.self_topic_name.clone());
        let endpoints = config.broker.endpoints.len();

        let encoder = MessageEncoder::from_config(&config.broker)?;
        let decoders = Decoders::new(&config, encoder.public_key())?;

        for spec in [
            TopicSpec::new(&topics.root_topic_name, endpoints),
            TopicSpec::new(&topics.self_topic_name, endpoints),
            TopicSpec::generation(endpoints),
        ] {
            broker.create_topic(&spec)?;
        }

        let mut publisher = Publisher::new(Arc::clone(&broker), encoder)
            .destination(SelfDestination::new(&topics.self_topic_name))
            .destination(GenerationDestination);
        let replica_topics = replicas
            .iter()
            .map(|replica| replica_topic(topics.root_source_name(), replica))
            .filter(|topic| !matches!(topic, Ok(t) if *t == topics.root_topic_name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if !replica_topics.is_empty() {
            for topic in &replica_topics {
                broker.create_topic(&TopicSpec::new(topic, endpoints))?;
            }
            info!(replicas = ?replica_topics, "publishing to replica topics");
            publisher = publisher.destination(ReplicaDestination::new(replica_topics));
        }

        let store = IamStore::open()?;
        let registry = Registry::standard();
        let restorer = Restorer::builder()
            .store(&store)
            .registry(&registry)
            .broker(broker.as_ref())
            .batch_size(config.consumer.batch_size)
            .skip_on_wrong_signature(topics.skip_on_wrong_signature)
            .build();
        restorer.restore(&topics.root_topic_name, &decoders.root)?;
        restorer.restore(&topics.self_topic_name, &decoders.local)?;
        restorer.restore(GENERATION_TOPIC, &decoders.generation)?;

        let store = Arc::new(store.publishing(publisher));
        let registry = Arc::new(registry);
        let cancellation_token = CancellationToken::new();
        let mut consumers = JoinSet::new();
        for (scope, topic, decoder) in [
            (Scope::Root, topics.root_topic_name.clone(), decoders.root),
            (Scope::Local, topics.self_topic_name.clone(), decoders.local),
            (Scope::Generation, GENERATION_TOPIC.to_string(), decoders.generation),
        ] {
            let handler = Dispatcher::new(scope, Arc::clone(&store), Arc::clone(&registry), Arc::clone(&identity));
            let handle = TopicConsumer::builder()
                .broker(Arc::clone(&broker))
                .handler(Arc::new(handler))
                .decoder(decoder)
                .topic(topic)
                .group(group.clone())
                .config(config.consumer.clone())
                .skip_on_wrong_signature(topics.skip_on_wrong_signature)
                .cancellation_token(cancellation_token.child_token())
                .build()
                .start();
            consumers.spawn(async move { (scope, handle.await) });
        }
        info!(self_topic = %topics.self_topic_name, root_topic = %topics.root_topic_name, group, "backend started");

        Ok(Self { store, config, cancellation_token, consumers })
    }

    /// The store consumers write to.
    #[must_use]
    pub fn store(&self) -> &Arc<IamStore> {
        &self.store
    }

    /// Configuration the backend was started with.
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Token every consumer is bound to.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Waits for the next consumer to stop. `None` once every consumer has stopped.
    pub async fn next_exit(&mut self) -> Option<(Scope, Result<()>)> {
        let exit = self.consumers.join_next().await?;
        Some(match exit {
            Ok((scope, finished)) => (scope, flatten(scope, finished)),
            Err(e) => (Scope::Root, TaskSnafu { task: "consumer", message: e.to_string() }.fail()),
        })
    }

    /// Cancels every consumer and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns the first consumer failure; every consumer has stopped either way.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancellation_token.cancel();
        let mut first: Option<IamError> = None;
        while let Some((scope, result)) = self.next_exit().await {
            if let Err(e) = result {
                warn!(scope = %scope, error = %e, "consumer failed before shutdown");
                first.get_or_insert(e);
            }
        }
        info!(self_topic = %self.config.topics.self_topic_name, "backend stopped");
        first.map_or(Ok(()), Err)
    }
}

fn flatten(scope: Scope, finished: std::result::Result<ironvault_broker::Result<()>, JoinError>) -> Result<()> {
    match finished {
        Ok(result) => Ok(result?),
        Err(e) => TaskSnafu { task: format!("{scope} consumer"), message: e.to_string() }.fail(),
    }
}
