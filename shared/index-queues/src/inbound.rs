//! Inbound Subject Patterns
//!
//! ```text
//! {chain}.blocks.{worker}                 # Raw blocks assigned to one deserializer
//! {chain}.blocks.>                        # All block queues for a chain
//! ```

/// Block queue for a single deserializer worker
///
/// Example: `eos.blocks.3`
pub fn block_queue(chain: &str, worker: u32) -> String {
    format!("{}.blocks.{}", chain, worker)
}

/// Pattern covering every block queue of a chain
///
/// Example: `eos.blocks.>`
pub fn pattern_block_queues(chain: &str) -> String {
    format!("{}.blocks.>", chain)
}

/// Live stream subject carrying actions and deltas with routing headers
///
/// Example: `eos.stream`
pub fn stream_subject(chain: &str) -> String {
    format!("{}.stream", chain)
}
