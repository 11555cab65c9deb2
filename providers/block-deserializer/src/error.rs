//! Error types for the block deserializer

use thiserror::Error;

/// Errors raised while reading or writing the chain binary encoding
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SerializationError {
    #[error("Read past end of buffer: needed {needed} byte(s), {remaining} left")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("Invalid varuint32 encoding")]
    InvalidVarint,

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Invalid key or signature: {0}")]
    InvalidKey(String),

    #[error("Invalid time value: {0}")]
    InvalidTime(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type mismatch for {type_name}: {reason}")]
    TypeMismatch { type_name: String, reason: String },
}

impl SerializationError {
    pub(crate) fn mismatch(type_name: &str, reason: impl Into<String>) -> Self {
        SerializationError::TypeMismatch {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Schema resolution and construction errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// No schema could be obtained for the account
    #[error("Schema unavailable for {account}: {reason}")]
    Unavailable { account: String, reason: String },

    /// A schema was obtained but could not be turned into a type table
    #[error("Malformed schema for {account}: {reason}")]
    Malformed { account: String, reason: String },

    /// A type name referenced by the schema does not exist
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// The versioned schema store failed
    #[error("Schema store error: {0}")]
    Store(String),
}

/// Decoding failures for actions, table rows and nested records
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Action {account}::{name} is not declared in the schema")]
    UnknownAction { account: String, name: String },

    #[error("Failed to decode {type_name}: {source}")]
    Serialization {
        type_name: String,
        #[source]
        source: SerializationError,
    },

    #[error("Invalid schema definition: {0}")]
    InvalidAbi(String),
}

/// Failures of a specialized table projection
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("Invalid asset string: {0:?}")]
    InvalidAsset(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Batch-level failures that reject the whole in-flight batch
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Output publisher is closed")]
    PublisherClosed,

    #[error("Control channel error: {0}")]
    Control(String),

    #[error("Invalid block payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl PipelineError {
    /// Whether a redelivery of the same batch can be expected to succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Publish(_) | PipelineError::PublisherClosed | PipelineError::Control(_)
        )
    }
}
