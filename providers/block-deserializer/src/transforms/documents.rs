//! Specialized projections attached to delta documents and the latest-state
//! documents some handlers produce

use crate::types::PermissionLevel;
use index_queues::IndexKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `@<label>` sub-documents, at most one per handler that matched the row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projections {
    #[serde(rename = "@voters", default, skip_serializing_if = "Option::is_none")]
    pub voters: Option<VotersProjection>,
    #[serde(rename = "@global.data", default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalProjection>,
    #[serde(rename = "@producers", default, skip_serializing_if = "Option::is_none")]
    pub producers: Option<ProducerProjection>,
    #[serde(rename = "@userres", default, skip_serializing_if = "Option::is_none")]
    pub userres: Option<ResourceProjection>,
    #[serde(rename = "@delband", default, skip_serializing_if = "Option::is_none")]
    pub delband: Option<DelegationProjection>,
    #[serde(rename = "@proposal", default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<ProposalProjection>,
    #[serde(rename = "@approvals", default, skip_serializing_if = "Option::is_none")]
    pub approvals: Option<ApprovalsProjection>,
    #[serde(rename = "@accounts", default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<BalanceProjection>,
}

impl Projections {
    pub fn is_empty(&self) -> bool {
        self == &Projections::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotersProjection {
    pub is_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producers: Option<Vec<String>>,
    pub last_vote_weight: f64,
    pub proxied_vote_weight: f64,
    pub staked: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalProjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name_close: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pervote_bucket_fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_producer_schedule_update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perblock_bucket: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pervote_bucket: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_activated_stake: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_voteshare_change_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_unpaid_voteshare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_producer_vote_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ram_bytes_reserved: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ram_kb_reserved: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ram_stake: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_unpaid_blocks: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerProjection {
    pub total_votes: f64,
    pub is_active: bool,
    pub unpaid_blocks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProjection {
    pub owner: String,
    pub net_weight: f64,
    pub cpu_weight: f64,
    pub total_weight: f64,
    pub ram_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationProjection {
    pub from: String,
    pub to: String,
    pub net_weight: f64,
    pub cpu_weight: f64,
    pub total_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalProjection {
    pub proposal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Value>,
}

/// Approval entry; `time` is only recorded by the second approvals table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub actor: String,
    pub permission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl From<PermissionLevel> for Approval {
    fn from(level: PermissionLevel) -> Self {
        Self {
            actor: level.actor,
            permission: level.permission,
            time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalsProjection {
    pub proposal_name: String,
    pub requested_approvals: Vec<Approval>,
    pub provided_approvals: Vec<Approval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceProjection {
    pub amount: f64,
    pub symbol: String,
}

/// Latest voter state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterState {
    pub voter: String,
    pub primary_key: String,
    pub block_num: u32,
    #[serde(flatten)]
    pub votes: VotersProjection,
}

/// Latest multisig proposal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalState {
    pub proposer: String,
    pub proposal_name: String,
    pub requested_approvals: Vec<Approval>,
    pub provided_approvals: Vec<Approval>,
    /// A removed approvals row means the proposal was executed or cancelled
    pub executed: bool,
    pub primary_key: String,
    pub block_num: u32,
}

/// Latest token balance of one account for one contract and symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub code: String,
    pub scope: String,
    pub present: bool,
    pub primary_key: String,
    pub block_num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// Latest-state document and the table kind it is routed to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateDocument {
    Voter(VoterState),
    Proposal(ProposalState),
    Account(AccountState),
}

impl StateDocument {
    pub fn kind(&self) -> IndexKind {
        match self {
            StateDocument::Voter(_) => IndexKind::TableVoters,
            StateDocument::Proposal(_) => IndexKind::TableProposals,
            StateDocument::Account(_) => IndexKind::TableAccounts,
        }
    }
}
