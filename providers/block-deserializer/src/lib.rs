//! Block Deserializer
//!
//! Turns raw chain block payloads into indexable documents. Contract payloads
//! are decoded with the schema that was in force at each block, duplicate
//! action traces are collapsed, system tables get typed projections and every
//! document is routed round-robin over numbered index partitions.

pub mod abi;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod router;
pub mod schema;
pub mod serialize;
pub mod store;
pub mod transforms;
pub mod type_cache;
pub mod types;

pub use config::DeserializerConfig;
pub use decoder::{Decoder, RowData};
pub use dedup::dedupe;
pub use error::{DecodeError, PipelineError, SchemaError, SerializationError, TransformError};
pub use pipeline::{BlockProcessor, BlockStats};
pub use router::{IndexPublisher, Router};
pub use schema::ContractSchema;
pub use transforms::TransformRegistry;
pub use type_cache::{ChainAbiSource, SchemaStore, TypeCache};

use anyhow::{Context, Result};
use consumer::BlockConsumer;
use events::{spawn_stream_listener, NatsControlSink};
use router::{spawn_publisher, NatsPublisher};
use std::sync::Arc;
use store::{HttpChainApi, RedisSchemaStore};
use tracing::{info, instrument};

/// The deserializer service wired to NATS, Redis and the chain API
pub struct BlockDeserializer {
    config: DeserializerConfig,
    client: async_nats::Client,
    cache: Arc<TypeCache>,
    processor: Arc<BlockProcessor>,
}

impl BlockDeserializer {
    /// Connects every collaborator named by `config`
    #[instrument(skip(config), fields(chain = %config.chain, queue = %config.worker_queue))]
    pub async fn new(config: DeserializerConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        info!("Connecting to NATS at {}", config.nats_url);
        let client = async_nats::connect(&config.nats_url)
            .await
            .context("Failed to connect to NATS")?;

        let store = RedisSchemaStore::connect(&config.redis_url, &config.chain).await?;
        let chain_api = HttpChainApi::new(&config.chain_api_url)?;
        let cache = Arc::new(TypeCache::new(
            Arc::new(store),
            Arc::new(chain_api),
            decoder::chain_base_types(),
            config.cache.clone(),
        ));
        let decoder = Decoder::new(Arc::clone(&cache)).context("Failed to load built-in schemas")?;

        let (emitter, _publisher) = spawn_publisher(
            Arc::new(NatsPublisher::new(client.clone())),
            config.output_buffer,
        );
        let router = Router::new(
            &config.chain,
            config.index_partitions,
            config.action_partition_ratio,
            emitter,
        );
        info!("Routing over {} index queues", router.queues().len());

        let processor = BlockProcessor::new(
            config.processing.clone(),
            Arc::new(decoder),
            Arc::new(TransformRegistry::system()),
            Arc::new(router),
            Arc::new(NatsControlSink::new(client.clone(), &config.chain)),
        );

        Ok(Self {
            config,
            client,
            cache,
            processor: Arc::new(processor),
        })
    }

    pub fn processor(&self) -> &Arc<BlockProcessor> {
        &self.processor
    }

    /// Runs the cache sweeper, the stream switch listener and the block
    /// consumer. Returns when the consumer stops.
    pub async fn run(&self) -> Result<()> {
        let sweeper = self.cache.spawn_sweeper(self.config.sweep_interval());
        let listener = spawn_stream_listener(
            self.client.clone(),
            &self.config.chain,
            self.processor.allow_streaming(),
        )
        .await?;

        let consumer = BlockConsumer::new(self.client.clone(), self.config.clone());
        let result = consumer.run(&self.processor).await;

        sweeper.abort();
        listener.abort();
        result
    }
}
