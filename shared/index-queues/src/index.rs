//! Index Queue Patterns
//!
//! Routed documents are spread over numbered partitions per record kind:
//! ```text
//! {chain}.index.blocks.{n}                # n in 1..=base
//! {chain}.index.actions.{n}               # n in 1..=base*ratio
//! {chain}.index.deltas.{n}                # n in 1..=base*ratio
//! {chain}.index.abis.1                    # always a single partition
//! {chain}.index.table_voters.{n}          # n in 1..=base
//! {chain}.index.table_proposals.{n}       # n in 1..=base
//! {chain}.index.table_accounts.{n}        # n in 1..=base
//! ```

use std::fmt;

/// Record kinds that leave the deserializer for the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKind {
    Block,
    Action,
    Delta,
    Abi,
    TableVoters,
    TableProposals,
    TableAccounts,
}

impl IndexKind {
    /// Every kind, in declaration order
    pub const ALL: [IndexKind; 7] = [
        IndexKind::Block,
        IndexKind::Action,
        IndexKind::Delta,
        IndexKind::Abi,
        IndexKind::TableVoters,
        IndexKind::TableProposals,
        IndexKind::TableAccounts,
    ];

    /// Subject token for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Block => "blocks",
            IndexKind::Action => "actions",
            IndexKind::Delta => "deltas",
            IndexKind::Abi => "abis",
            IndexKind::TableVoters => "table_voters",
            IndexKind::TableProposals => "table_proposals",
            IndexKind::TableAccounts => "table_accounts",
        }
    }

    /// Number of partitions for this kind.
    ///
    /// Actions and deltas scale with `ratio`, ABI updates always use one
    /// partition. Zero inputs are treated as one.
    pub fn partitions(&self, base: u32, ratio: u32) -> u32 {
        let base = base.max(1);
        match self {
            IndexKind::Abi => 1,
            IndexKind::Action | IndexKind::Delta => base.saturating_mul(ratio.max(1)),
            _ => base,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index queue subject for a kind and partition
///
/// Example: `eos.index.actions.4`
pub fn index_queue(chain: &str, kind: IndexKind, partition: u32) -> String {
    format!("{}.index.{}.{}", chain, kind.as_str(), partition)
}

/// Pattern for every partition of a kind
///
/// Example: `eos.index.deltas.*`
pub fn pattern_index_kind(chain: &str, kind: IndexKind) -> String {
    format!("{}.index.{}.*", chain, kind.as_str())
}

/// Pattern for every index queue of a chain
pub fn pattern_index_all(chain: &str) -> String {
    format!("{}.index.>", chain)
}

/// Every index queue that must exist for the given partitioning, in kind
/// order and then partition order.
pub fn all_index_queues(chain: &str, base: u32, ratio: u32) -> Vec<String> {
    IndexKind::ALL
        .iter()
        .flat_map(|kind| {
            (1..=kind.partitions(base, ratio)).map(move |n| index_queue(chain, *kind, n))
        })
        .collect()
}
