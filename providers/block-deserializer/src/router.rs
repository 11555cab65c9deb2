//! Output routing: round-robin partition counters and the bounded publisher
//!
//! Documents are serialized on the processing side and handed to a single
//! publisher task over a bounded channel. A full channel suspends the
//! producer, so a slow transport slows down batch processing instead of
//! growing memory.

use crate::error::PipelineError;
use async_nats::jetstream;
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use index_queues::{all_index_queues, index_queue, stream_subject, IndexKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// One round-robin counter per record kind
#[derive(Debug)]
pub struct PartitionCounters {
    counters: HashMap<IndexKind, (AtomicU32, u32)>,
}

impl PartitionCounters {
    pub fn new(base: u32, ratio: u32) -> Self {
        let counters = IndexKind::ALL
            .iter()
            .map(|kind| (*kind, (AtomicU32::new(1), kind.partitions(base, ratio))))
            .collect();
        Self { counters }
    }

    pub fn partitions(&self, kind: IndexKind) -> u32 {
        self.counters.get(&kind).map_or(1, |(_, count)| *count)
    }

    /// Next partition for `kind`, cycling through `1..=partitions`
    pub fn next(&self, kind: IndexKind) -> u32 {
        let Some((counter, count)) = self.counters.get(&kind) else {
            return 1;
        };
        let count = *count;
        match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(if current >= count { 1 } else { current + 1 })
        }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

/// A message waiting for the publisher task
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
    /// Index queues are persisted and acknowledged, the live stream is not
    pub durable: bool,
}

/// Transport for routed documents
#[async_trait]
pub trait IndexPublisher: Send + Sync {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PipelineError>;
}

/// JetStream for index queues, core NATS for the live stream
#[derive(Clone)]
pub struct NatsPublisher {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsPublisher {
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }
}

fn header_map(headers: &[(String, String)]) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map
}

#[async_trait]
impl IndexPublisher for NatsPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PipelineError> {
        let headers = header_map(&message.headers);
        let payload = Bytes::from(message.payload.clone());

        if !message.durable {
            return self
                .client
                .publish_with_headers(message.subject.clone(), headers, payload)
                .await
                .map_err(|e| {
                    PipelineError::Publish(format!("Failed to publish to {}: {}", message.subject, e))
                });
        }

        self.jetstream
            .publish_with_headers(message.subject.clone(), headers, payload)
            .await
            .map_err(|e| {
                PipelineError::Publish(format!("Failed to publish to {}: {}", message.subject, e))
            })?
            .await
            .map_err(|e| {
                PipelineError::Publish(format!("Publish ack failed for {}: {}", message.subject, e))
            })?;
        Ok(())
    }
}

enum Outgoing {
    Publish(OutboundMessage),
    /// Resolves once everything sent before it was handled, with the first
    /// publish failure since the previous flush
    Flush(oneshot::Sender<Result<(), PipelineError>>),
}

/// Producer handle of the publisher channel
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<Outgoing>,
}

impl Emitter {
    /// Queues a message, waiting while the channel is full
    pub async fn send(&self, message: OutboundMessage) -> Result<(), PipelineError> {
        self.tx
            .send(Outgoing::Publish(message))
            .await
            .map_err(|_| PipelineError::PublisherClosed)
    }

    /// Waits until every queued message was published
    pub async fn flush(&self) -> Result<(), PipelineError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Outgoing::Flush(reply))
            .await
            .map_err(|_| PipelineError::PublisherClosed)?;
        done.await.map_err(|_| PipelineError::PublisherClosed)?
    }
}

/// Starts the publisher task. It ends when every [`Emitter`] is dropped.
pub fn spawn_publisher(publisher: Arc<dyn IndexPublisher>, capacity: usize) -> (Emitter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut failure: Option<PipelineError> = None;
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Publish(message) => {
                    // after a failure the batch is rejected anyway
                    if failure.is_some() {
                        continue;
                    }
                    if let Err(e) = publisher.publish(&message).await {
                        error!("Publish to {} failed: {}", message.subject, e);
                        failure = Some(e);
                    }
                }
                Outgoing::Flush(reply) => {
                    let result = failure.take().map_or(Ok(()), Err);
                    let _ = reply.send(result);
                }
            }
        }
        info!("Publisher task stopped");
    });

    (Emitter { tx }, handle)
}

/// Routes documents to numbered index partitions
pub struct Router {
    chain: String,
    base: u32,
    ratio: u32,
    counters: PartitionCounters,
    emitter: Emitter,
}

impl Router {
    pub fn new(chain: &str, base: u32, ratio: u32, emitter: Emitter) -> Self {
        Self {
            chain: chain.to_string(),
            base,
            ratio,
            counters: PartitionCounters::new(base, ratio),
            emitter,
        }
    }

    /// Partition for the next document of `kind`
    pub fn route(&self, kind: IndexKind) -> u32 {
        self.counters.next(kind)
    }

    pub fn counters(&self) -> &PartitionCounters {
        &self.counters
    }

    /// Every index queue this router can publish to
    pub fn queues(&self) -> Vec<String> {
        all_index_queues(&self.chain, self.base, self.ratio)
    }

    /// Serializes `document` and queues it on the next partition of `kind`
    pub async fn emit<T: Serialize + Sync>(&self, kind: IndexKind, document: &T) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(document)?;
        let subject = index_queue(&self.chain, kind, self.route(kind));
        debug!("Routing {} document to {}", kind, subject);
        self.emitter
            .send(OutboundMessage {
                subject,
                payload,
                headers: Vec::new(),
                durable: true,
            })
            .await
    }

    /// Publishes `document` on the live stream subject
    pub async fn stream<T: Serialize + Sync>(
        &self,
        document: &T,
        headers: Vec<(String, String)>,
    ) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(document)?;
        self.emitter
            .send(OutboundMessage {
                subject: stream_subject(&self.chain),
                payload,
                headers,
                durable: false,
            })
            .await
    }

    pub async fn flush(&self) -> Result<(), PipelineError> {
        self.emitter.flush().await
    }
}
