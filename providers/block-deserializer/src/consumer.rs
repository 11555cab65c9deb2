//! JetStream intake: block payloads are pulled in batches of up to
//! `prefetch` messages and acknowledged or rejected as a whole.

use crate::config::DeserializerConfig;
use crate::error::PipelineError;
use crate::pipeline::BlockProcessor;
use crate::types::BlockPayload;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::PullConsumer, AckKind};
use async_nats::Client;
use futures::StreamExt;
use index_queues::{pattern_block_queues, pattern_index_all};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const FETCH_EXPIRY: Duration = Duration::from_secs(1);

/// Parses every message of a batch. One malformed payload rejects the batch.
pub fn parse_batch<'a, I>(payloads: I) -> Result<Vec<BlockPayload>, PipelineError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    payloads
        .into_iter()
        .map(|bytes| {
            serde_json::from_slice(bytes).map_err(|e| PipelineError::InvalidPayload(e.to_string()))
        })
        .collect()
}

pub struct BlockConsumer {
    jetstream: jetstream::Context,
    config: DeserializerConfig,
}

impl BlockConsumer {
    pub fn new(client: Client, config: DeserializerConfig) -> Self {
        Self {
            jetstream: jetstream::new(client),
            config,
        }
    }

    fn blocks_stream_name(&self) -> String {
        format!("{}_BLOCKS", self.config.stream_name)
    }

    fn index_stream_name(&self) -> String {
        format!("{}_INDEX", self.config.stream_name)
    }

    async fn ensure_stream(
        &self,
        name: String,
        subject: String,
        retention: jetstream::stream::RetentionPolicy,
    ) -> Result<jetstream::stream::Stream> {
        match self.jetstream.get_stream(&name).await {
            Ok(stream) => {
                info!("Using existing stream: {}", name);
                Ok(stream)
            }
            Err(_) => {
                info!("Creating stream {} on {}", name, subject);
                self.jetstream
                    .create_stream(jetstream::stream::Config {
                        name: name.clone(),
                        subjects: vec![subject],
                        retention,
                        storage: jetstream::stream::StorageType::File,
                        discard: jetstream::stream::DiscardPolicy::Old,
                        ..Default::default()
                    })
                    .await
                    .with_context(|| format!("Failed to create stream {}", name))
            }
        }
    }

    /// Declares the inbound block stream and the index stream that holds
    /// every routed partition
    pub async fn ensure_streams(&self) -> Result<jetstream::stream::Stream> {
        let chain = &self.config.chain;
        self.ensure_stream(
            self.index_stream_name(),
            pattern_index_all(chain),
            jetstream::stream::RetentionPolicy::Limits,
        )
        .await?;
        self.ensure_stream(
            self.blocks_stream_name(),
            pattern_block_queues(chain),
            jetstream::stream::RetentionPolicy::WorkQueue,
        )
        .await
    }

    async fn ensure_consumer(&self, stream: &jetstream::stream::Stream) -> Result<PullConsumer> {
        let name = self.config.consumer_name();
        match stream.get_consumer(&name).await {
            Ok(consumer) => {
                info!("Using existing consumer: {}", name);
                Ok(consumer)
            }
            Err(_) => {
                info!("Creating consumer {} on {}", name, self.config.worker_queue);
                stream
                    .create_consumer(jetstream::consumer::pull::Config {
                        durable_name: Some(name.clone()),
                        filter_subject: self.config.worker_queue.clone(),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        max_deliver: self.config.max_deliver,
                        max_ack_pending: self.config.prefetch as i64,
                        ack_wait: Duration::from_secs(30),
                        ..Default::default()
                    })
                    .await
                    .context("Failed to create consumer")
            }
        }
    }

    /// Pulls and processes batches. Returns only when stream or consumer
    /// setup fails.
    pub async fn run(&self, processor: &BlockProcessor) -> Result<()> {
        let stream = self.ensure_streams().await?;
        let consumer = self.ensure_consumer(&stream).await?;
        info!(
            "Consuming {} with prefetch {}",
            self.config.worker_queue, self.config.prefetch
        );

        loop {
            let mut batch = match consumer
                .batch()
                .max_messages(self.config.prefetch)
                .expires(FETCH_EXPIRY)
                .messages()
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to request batch: {}", e);
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    continue;
                }
            };

            let mut messages = Vec::with_capacity(self.config.prefetch);
            while let Some(message) = batch.next().await {
                match message {
                    Ok(message) => messages.push(message),
                    Err(e) => warn!("Error receiving message: {}", e),
                }
            }
            if messages.is_empty() {
                continue;
            }

            let outcome = match parse_batch(messages.iter().map(|m| m.payload.as_ref())) {
                Ok(payloads) => processor.process_batch(&payloads).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(stats) => {
                    debug!("Batch of {} processed: {:?}", messages.len(), stats);
                    settle(&messages, AckKind::Ack).await;
                }
                Err(e) => {
                    error!(
                        "Rejecting batch of {} (retryable: {}): {}",
                        messages.len(),
                        e.is_retryable(),
                        e
                    );
                    settle(&messages, AckKind::Nak(None)).await;
                }
            }
        }
    }
}

async fn settle(messages: &[jetstream::Message], kind: AckKind) {
    for message in messages {
        if let Err(e) = message.ack_with(kind.clone()).await {
            error!("Failed to settle message: {}", e);
        }
    }
}
