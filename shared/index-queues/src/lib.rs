//! Queue and Subject Registry for the Block Deserializer
//!
//! Every subject the deserializer consumes from or publishes to is built here,
//! so producers, consumers and queue declaration agree on one naming scheme.
//!
//! # Subject Hierarchy Overview
//!
//! ```text
//! {chain}.blocks.{worker}                 # Raw block payloads, one queue per deserializer
//! {chain}.index.{kind}.{partition}        # Routed documents awaiting indexing
//! {chain}.stream                          # Live fan-out of actions and deltas
//! {chain}.control.{event}                 # Supervisor / schema store events
//! ```
//!
//! Partitions are numbered from 1.

pub mod control;
pub mod inbound;
pub mod index;

pub use control::*;
pub use inbound::*;
pub use index::*;

/// Constants for control event names
pub mod events {
    pub const SAVE_ABI: &str = "save_abi";
    pub const DS_ERROR: &str = "ds_error";
    pub const CONNECT_STREAM: &str = "connect_ws";
}

/// Constants for live stream header values
pub mod stream_events {
    pub const TRACE: &str = "trace";
    pub const DELTA: &str = "delta";
}
