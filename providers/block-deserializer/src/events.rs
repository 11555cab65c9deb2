//! Control events exchanged with the supervisor and the schema store

use crate::error::PipelineError;
use crate::types::{AbiUpdate, DecodeErrorEvent};
use async_nats::{Client, Message};
use async_trait::async_trait;
use futures::StreamExt;
use index_queues::{control_subject, events};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Envelope of every control message: `{"event": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ControlMessage {
    pub fn new<T: Serialize>(event: &str, data: &T) -> Result<Self, PipelineError> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// Outbound control events
#[async_trait]
pub trait ControlSink: Send + Sync {
    /// A new schema version was decoded from chain state
    async fn save_abi(&self, update: &AbiUpdate) -> Result<(), PipelineError>;

    /// A row could not be decoded with its resolved schema
    async fn decode_error(&self, event: &DecodeErrorEvent) -> Result<(), PipelineError>;
}

/// Publishes control events on `{chain}.control.{event}`
#[derive(Clone)]
pub struct NatsControlSink {
    client: Client,
    chain: String,
}

impl NatsControlSink {
    pub fn new(client: Client, chain: &str) -> Self {
        Self {
            client,
            chain: chain.to_string(),
        }
    }

    async fn send(&self, message: ControlMessage) -> Result<(), PipelineError> {
        let subject = control_subject(&self.chain, &message.event);
        let payload = serde_json::to_vec(&message)?;
        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| PipelineError::Control(format!("Failed to publish to {}: {}", subject, e)))
    }
}

#[async_trait]
impl ControlSink for NatsControlSink {
    async fn save_abi(&self, update: &AbiUpdate) -> Result<(), PipelineError> {
        self.send(ControlMessage::new(events::SAVE_ABI, update)?).await
    }

    async fn decode_error(&self, event: &DecodeErrorEvent) -> Result<(), PipelineError> {
        self.send(ControlMessage::new(events::DS_ERROR, event)?).await
    }
}

/// In-process sink, for embedding and tests
#[derive(Clone)]
pub struct ChannelControlSink {
    tx: mpsc::Sender<ControlMessage>,
}

impl ChannelControlSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, message: ControlMessage) -> Result<(), PipelineError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| PipelineError::Control("control channel closed".to_string()))
    }
}

#[async_trait]
impl ControlSink for ChannelControlSink {
    async fn save_abi(&self, update: &AbiUpdate) -> Result<(), PipelineError> {
        self.send(ControlMessage::new(events::SAVE_ABI, update)?).await
    }

    async fn decode_error(&self, event: &DecodeErrorEvent) -> Result<(), PipelineError> {
        self.send(ControlMessage::new(events::DS_ERROR, event)?).await
    }
}

/// Applies an inbound control message to the streaming switch. Returns
/// whether the message was understood.
pub fn apply_stream_toggle(message: &ControlMessage, allow_streaming: &AtomicBool) -> bool {
    if message.event != events::CONNECT_STREAM {
        return false;
    }
    let enabled = message.data.as_bool().unwrap_or(true);
    allow_streaming.store(enabled, Ordering::Release);
    info!("Live streaming {}", if enabled { "enabled" } else { "disabled" });
    true
}

fn parse_control(message: &Message) -> Option<ControlMessage> {
    match serde_json::from_slice(&message.payload) {
        Ok(control) => Some(control),
        Err(e) => {
            warn!("Ignoring malformed control message on {}: {}", message.subject, e);
            None
        }
    }
}

/// Listens for the supervisor's stream connection message and flips
/// `allow_streaming` accordingly
pub async fn spawn_stream_listener(
    client: Client,
    chain: &str,
    allow_streaming: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<()>> {
    let subject = control_subject(chain, events::CONNECT_STREAM);
    let mut subscriber = client.subscribe(subject.clone()).await?;
    info!("Subscribed to {}", subject);

    Ok(tokio::spawn(async move {
        while let Some(message) = subscriber.next().await {
            if let Some(control) = parse_control(&message) {
                if !apply_stream_toggle(&control, &allow_streaming) {
                    debug!("Unhandled control event {}", control.event);
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_sink_envelopes() {
        let (sink, mut rx) = ChannelControlSink::new(4);
        sink.save_abi(&AbiUpdate {
            account: "eosio.token".to_string(),
            block: 12,
            abi: "{}".to_string(),
        })
        .await
        .unwrap();
        sink.decode_error(&DecodeErrorEvent::delta(12, "eosio.token", "accounts", "short"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, "save_abi");
        assert_eq!(first.data, json!({"account": "eosio.token", "block": 12, "abi": "{}"}));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, "ds_error");
        assert_eq!(second.data["type"], "delta_ds_error");
        assert_eq!(second.data["table"], "accounts");
    }

    #[tokio::test]
    async fn test_closed_channel_is_control_error() {
        let (sink, rx) = ChannelControlSink::new(1);
        drop(rx);
        let err = sink
            .decode_error(&DecodeErrorEvent::delta(1, "a", "b", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Control(_)));
    }

    #[test]
    fn test_stream_toggle() {
        let flag = AtomicBool::new(false);
        let connect: ControlMessage =
            serde_json::from_value(json!({"event": "connect_ws"})).unwrap();
        assert!(apply_stream_toggle(&connect, &flag));
        assert!(flag.load(Ordering::Acquire));

        let disconnect = ControlMessage {
            event: "connect_ws".to_string(),
            data: json!(false),
        };
        assert!(apply_stream_toggle(&disconnect, &flag));
        assert!(!flag.load(Ordering::Acquire));

        let other = ControlMessage {
            event: "save_abi".to_string(),
            data: Value::Null,
        };
        assert!(!apply_stream_toggle(&other, &flag));
    }
}
