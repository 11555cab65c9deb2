//! System contract table handlers

use super::asset::{round4, Asset};
use super::documents::*;
use super::{TableHandler, TablePattern, TransformContext};
use crate::error::TransformError;
use crate::types::{DeltaDocument, PermissionLevel};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const SYSTEM_ACCOUNT: &str = "eosio";
const MSIG_ACCOUNT: &str = "eosio.msig";

/// Raw core token amounts carry four implied decimals
const CORE_PRECISION: f64 = 10_000.0;

type Result<T> = std::result::Result<T, TransformError>;

fn data_object(delta: &DeltaDocument) -> Result<&Map<String, Value>> {
    delta
        .data
        .as_ref()
        .and_then(Value::as_object)
        .ok_or_else(|| TransformError::MissingField("data".to_string()))
}

fn field<'a>(data: &'a Map<String, Value>, name: &str) -> Result<&'a Value> {
    data.get(name)
        .ok_or_else(|| TransformError::MissingField(name.to_string()))
}

fn invalid(name: &str, reason: impl Into<String>) -> TransformError {
    TransformError::InvalidField {
        field: name.to_string(),
        reason: reason.into(),
    }
}

fn string_field(data: &Map<String, Value>, name: &str) -> Result<String> {
    field(data, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(name, "expected string"))
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn f64_field(data: &Map<String, Value>, name: &str) -> Result<f64> {
    number(field(data, name)?).ok_or_else(|| invalid(name, "expected number"))
}

fn bool_field(data: &Map<String, Value>, name: &str) -> Result<bool> {
    match field(data, name)? {
        Value::Bool(b) => Ok(*b),
        other => number(other)
            .map(|n| n != 0.0)
            .ok_or_else(|| invalid(name, "expected bool")),
    }
}

fn opt_f64(data: &Map<String, Value>, name: &str) -> Option<f64> {
    data.get(name).and_then(number)
}

fn opt_u64(data: &Map<String, Value>, name: &str) -> Option<u64> {
    data.get(name).and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn opt_string(data: &Map<String, Value>, name: &str) -> Option<String> {
    data.get(name).and_then(Value::as_str).map(str::to_string)
}

fn asset_field(data: &Map<String, Value>, name: &str) -> Result<Asset> {
    let raw = field(data, name)?
        .as_str()
        .ok_or_else(|| TransformError::InvalidAsset(data[name].to_string()))?;
    Asset::parse(raw)
}

fn typed_field<T: for<'de> Deserialize<'de>>(data: &Map<String, Value>, name: &str) -> Result<T> {
    serde_json::from_value(field(data, name)?.clone()).map_err(|e| invalid(name, e.to_string()))
}

fn remove_fields(delta: &mut DeltaDocument, names: &[&str]) {
    if let Some(Value::Object(map)) = delta.data.as_mut() {
        for name in names {
            map.remove(*name);
        }
    }
}

/// `eosio:voters`
pub struct VotersHandler;

impl TableHandler for VotersHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(SYSTEM_ACCOUNT, "voters")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let owner = string_field(data, "owner")?;
        let proxy = string_field(data, "proxy")?;
        let producers: Vec<String> = typed_field(data, "producers")?;
        let votes = VotersProjection {
            is_proxy: bool_field(data, "is_proxy")?,
            proxy: (!proxy.is_empty()).then_some(proxy),
            producers: (!producers.is_empty()).then_some(producers),
            last_vote_weight: f64_field(data, "last_vote_weight")?,
            proxied_vote_weight: f64_field(data, "proxied_vote_weight")?,
            staked: f64_field(data, "staked")? / CORE_PRECISION,
        };

        remove_fields(
            delta,
            &[
                "owner",
                "is_proxy",
                "proxy",
                "producers",
                "last_vote_weight",
                "proxied_vote_weight",
                "staked",
            ],
        );
        delta.projections.voters = Some(votes.clone());

        Ok(ctx.state.voters.then(|| {
            StateDocument::Voter(VoterState {
                voter: owner,
                primary_key: delta.primary_key.clone(),
                block_num: delta.block_num,
                votes,
            })
        }))
    }
}

/// `eosio:global`
pub struct GlobalHandler;

impl TableHandler for GlobalHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(SYSTEM_ACCOUNT, "global")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        _ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let core = |name: &str| opt_f64(data, name).map(|v| v / CORE_PRECISION);
        let global = GlobalProjection {
            last_name_close: opt_string(data, "last_name_close"),
            last_pervote_bucket_fill: opt_string(data, "last_pervote_bucket_fill"),
            last_producer_schedule_update: opt_string(data, "last_producer_schedule_update"),
            perblock_bucket: core("perblock_bucket"),
            pervote_bucket: core("pervote_bucket"),
            total_activated_stake: core("total_activated_stake"),
            total_voteshare_change_rate: opt_f64(data, "total_voteshare_change_rate"),
            total_unpaid_voteshare: opt_f64(data, "total_unpaid_voteshare"),
            total_producer_vote_weight: opt_f64(data, "total_producer_vote_weight"),
            total_ram_bytes_reserved: opt_u64(data, "total_ram_bytes_reserved"),
            total_ram_kb_reserved: opt_f64(data, "total_ram_bytes_reserved").map(|b| b / 1024.0),
            total_ram_stake: core("total_ram_stake"),
            total_unpaid_blocks: opt_u64(data, "total_unpaid_blocks"),
        };

        delta.projections.global = Some(global);
        delta.data = None;
        Ok(None)
    }
}

/// `eosio:producers`
pub struct ProducersHandler;

impl TableHandler for ProducersHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(SYSTEM_ACCOUNT, "producers")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        _ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let producer = ProducerProjection {
            total_votes: f64_field(data, "total_votes")?,
            is_active: bool_field(data, "is_active")?,
            unpaid_blocks: opt_u64(data, "unpaid_blocks")
                .ok_or_else(|| TransformError::MissingField("unpaid_blocks".to_string()))?,
        };

        delta.projections.producers = Some(producer);
        delta.data = None;
        Ok(None)
    }
}

/// `eosio:userres`
pub struct UserResourcesHandler;

impl TableHandler for UserResourcesHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(SYSTEM_ACCOUNT, "userres")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        _ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let net = asset_field(data, "net_weight")?.amount;
        let cpu = asset_field(data, "cpu_weight")?.amount;
        let resources = ResourceProjection {
            owner: string_field(data, "owner")?,
            net_weight: net,
            cpu_weight: cpu,
            total_weight: round4(net + cpu),
            ram_bytes: f64_field(data, "ram_bytes")? as i64,
        };

        delta.projections.userres = Some(resources);
        delta.data = None;
        Ok(None)
    }
}

/// `eosio:delband`
pub struct DelegatedBandwidthHandler;

impl TableHandler for DelegatedBandwidthHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(SYSTEM_ACCOUNT, "delband")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        _ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let net = asset_field(data, "net_weight")?.amount;
        let cpu = asset_field(data, "cpu_weight")?.amount;
        let delegation = DelegationProjection {
            from: string_field(data, "from")?,
            to: string_field(data, "to")?,
            net_weight: net,
            cpu_weight: cpu,
            total_weight: round4(net + cpu),
        };

        delta.projections.delband = Some(delegation);
        delta.data = None;
        Ok(None)
    }
}

/// `eosio.msig:proposal`
pub struct ProposalHandler;

impl TableHandler for ProposalHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(MSIG_ACCOUNT, "proposal")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let proposal_name = string_field(data, "proposal_name")?;
        let transaction = opt_string(data, "packed_transaction")
            .and_then(|packed| hex::decode(packed).ok())
            .and_then(|bytes| match ctx.native.decode("transaction", &bytes) {
                Ok(trx) => Some(trx),
                Err(e) => {
                    debug!("Proposal {} transaction not decoded: {}", proposal_name, e);
                    None
                }
            });

        delta.projections.proposal = Some(ProposalProjection {
            proposal_name,
            transaction,
        });
        delta.data = None;
        Ok(None)
    }
}

fn proposal_state(delta: &DeltaDocument, approvals: &ApprovalsProjection) -> StateDocument {
    StateDocument::Proposal(ProposalState {
        proposer: delta.scope.clone(),
        proposal_name: approvals.proposal_name.clone(),
        requested_approvals: approvals.requested_approvals.clone(),
        provided_approvals: approvals.provided_approvals.clone(),
        executed: !delta.present,
        primary_key: delta.primary_key.clone(),
        block_num: delta.block_num,
    })
}

/// `eosio.msig:approvals`
pub struct ApprovalsHandler;

impl TableHandler for ApprovalsHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(MSIG_ACCOUNT, "approvals")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let requested: Vec<PermissionLevel> = typed_field(data, "requested_approvals")?;
        let provided: Vec<PermissionLevel> = typed_field(data, "provided_approvals")?;
        let approvals = ApprovalsProjection {
            proposal_name: string_field(data, "proposal_name")?,
            requested_approvals: requested.into_iter().map(Approval::from).collect(),
            provided_approvals: provided.into_iter().map(Approval::from).collect(),
        };

        let state = ctx.state.proposals.then(|| proposal_state(delta, &approvals));
        delta.projections.approvals = Some(approvals);
        delta.data = None;
        Ok(state)
    }
}

#[derive(Deserialize)]
struct TimedApproval {
    level: PermissionLevel,
    time: String,
}

impl From<TimedApproval> for Approval {
    fn from(a: TimedApproval) -> Self {
        Self {
            actor: a.level.actor,
            permission: a.level.permission,
            time: Some(a.time),
        }
    }
}

/// `eosio.msig:approvals2`, approvals carrying the time they were given
pub struct ApprovalsV2Handler;

impl TableHandler for ApprovalsV2Handler {
    fn pattern(&self) -> TablePattern {
        TablePattern::exact(MSIG_ACCOUNT, "approvals2")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let data = data_object(delta)?;
        let requested: Vec<TimedApproval> = typed_field(data, "requested_approvals")?;
        let provided: Vec<TimedApproval> = typed_field(data, "provided_approvals")?;
        let approvals = ApprovalsProjection {
            proposal_name: string_field(data, "proposal_name")?,
            requested_approvals: requested.into_iter().map(Approval::from).collect(),
            provided_approvals: provided.into_iter().map(Approval::from).collect(),
        };

        let state = ctx.state.proposals.then(|| proposal_state(delta, &approvals));
        delta.projections.approvals = Some(approvals);
        delta.data = None;
        Ok(state)
    }
}

/// `*:accounts`, token balances of any contract
pub struct TokenAccountsHandler;

impl TableHandler for TokenAccountsHandler {
    fn pattern(&self) -> TablePattern {
        TablePattern::table("accounts")
    }

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>> {
        let balance = match asset_field(data_object(delta)?, "balance") {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(
                    "No @accounts for {} {} at block {}: {}",
                    delta.code, delta.scope, delta.block_num, e
                );
                None
            }
        };

        if let Some(balance) = &balance {
            remove_fields(delta, &["balance"]);
            delta.projections.accounts = Some(BalanceProjection {
                amount: balance.amount,
                symbol: balance.symbol.clone(),
            });
        }

        // the state document is kept without a balance when it is unreadable
        Ok(ctx.state.accounts.then(|| {
            StateDocument::Account(AccountState {
                code: delta.code.clone(),
                scope: delta.scope.clone(),
                present: delta.present,
                primary_key: delta.primary_key.clone(),
                block_num: delta.block_num,
                amount: balance.as_ref().map(|b| b.amount),
                symbol: balance.map(|b| b.symbol),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;
    use crate::config::StateFlags;
    use crate::schema::ContractSchema;
    use crate::types::ContractRow;
    use serde_json::json;

    fn delta(code: &str, table: &str, data: Value) -> DeltaDocument {
        let row = ContractRow {
            present: true,
            code: code.to_string(),
            scope: "alice".to_string(),
            table: table.to_string(),
            primary_key: 5,
            payer: "alice".to_string(),
            value: vec![],
        };
        let mut doc = DeltaDocument::from_row(&row, 100, None);
        doc.data = Some(data);
        doc.value = None;
        doc
    }

    fn run(
        handler: &dyn TableHandler,
        doc: &mut DeltaDocument,
        state: StateFlags,
    ) -> Result<Option<StateDocument>> {
        let native = ContractSchema::from_abi("", &abi::state_history(), None).unwrap();
        let ctx = TransformContext {
            state,
            native: &native,
        };
        handler.apply(doc, &ctx)
    }

    fn all_state() -> StateFlags {
        StateFlags {
            voters: true,
            proposals: true,
            accounts: true,
        }
    }

    #[test]
    fn test_voters_omit_empty_producers_and_proxy() {
        let mut doc = delta(
            "eosio",
            "voters",
            json!({
                "owner": "alice",
                "proxy": "",
                "producers": [],
                "staked": "125000",
                "last_vote_weight": "0.00000000000000000",
                "proxied_vote_weight": "1.5",
                "is_proxy": 0,
                "flags1": 0
            }),
        );

        let state = run(&VotersHandler, &mut doc, all_state()).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value["@voters"],
            json!({"is_proxy": false, "last_vote_weight": 0.0, "proxied_vote_weight": 1.5, "staked": 12.5})
        );
        assert_eq!(value["data"], json!({"flags1": 0}));

        match state {
            Some(StateDocument::Voter(v)) => {
                assert_eq!(v.voter, "alice");
                assert_eq!(v.primary_key, "5");
                assert_eq!(v.votes.staked, 12.5);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_voters_with_producers() {
        let mut doc = delta(
            "eosio",
            "voters",
            json!({
                "owner": "bob",
                "proxy": "proxy1",
                "producers": ["bp1", "bp2"],
                "staked": "10000",
                "last_vote_weight": "2",
                "proxied_vote_weight": "0",
                "is_proxy": 1
            }),
        );
        assert!(run(&VotersHandler, &mut doc, StateFlags::default())
            .unwrap()
            .is_none());
        let voters = doc.projections.voters.unwrap();
        assert_eq!(voters.producers, Some(vec!["bp1".to_string(), "bp2".to_string()]));
        assert_eq!(voters.proxy.as_deref(), Some("proxy1"));
        assert!(voters.is_proxy);
    }

    #[test]
    fn test_accounts_balance() {
        let mut doc = delta("eosio.token", "accounts", json!({"balance": "12.5000 EOS"}));
        let state = run(&TokenAccountsHandler, &mut doc, all_state()).unwrap();

        let accounts = doc.projections.accounts.clone().unwrap();
        assert_eq!(accounts.amount, 12.5);
        assert_eq!(accounts.symbol, "EOS");
        assert_eq!(doc.data, Some(json!({})));
        assert!(matches!(state, Some(StateDocument::Account(a)) if a.amount == Some(12.5)));
    }

    #[test]
    fn test_accounts_garbage_balance_leaves_row_untouched() {
        let mut doc = delta("eosio.token", "accounts", json!({"balance": "garbage"}));
        let before = doc.clone();
        let state = run(&TokenAccountsHandler, &mut doc, all_state()).unwrap();
        assert_eq!(doc, before);
        assert!(doc.projections.accounts.is_none());

        let Some(StateDocument::Account(account)) = state else {
            panic!("expected an account state document");
        };
        assert_eq!(account.scope, "alice");
        assert_eq!(account.primary_key, "5");
        assert_eq!(account.amount, None);
        assert_eq!(account.symbol, None);
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("amount").is_none());
        assert!(json.get("symbol").is_none());

        let mut doc = delta("eosio.token", "accounts", json!({"balance": "garbage"}));
        let state = run(&TokenAccountsHandler, &mut doc, StateFlags::default()).unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn test_global() {
        let mut doc = delta(
            "eosio",
            "global",
            json!({
                "perblock_bucket": "20000",
                "pervote_bucket": "40000",
                "total_activated_stake": "100000000",
                "total_ram_bytes_reserved": "2048",
                "total_ram_stake": "50000",
                "total_unpaid_blocks": 7,
                "last_name_close": "2019-01-01T00:00:00.000"
            }),
        );
        run(&GlobalHandler, &mut doc, StateFlags::default()).unwrap();
        let global = doc.projections.global.clone().unwrap();
        assert_eq!(global.perblock_bucket, Some(2.0));
        assert_eq!(global.pervote_bucket, Some(4.0));
        assert_eq!(global.total_activated_stake, Some(10000.0));
        assert_eq!(global.total_ram_kb_reserved, Some(2.0));
        assert_eq!(global.total_unpaid_blocks, Some(7));
        assert!(doc.data.is_none());
    }

    #[test]
    fn test_userres_and_delband() {
        let mut doc = delta(
            "eosio",
            "userres",
            json!({"owner": "alice", "net_weight": "1.0000 EOS", "cpu_weight": "0.1000 EOS", "ram_bytes": 8000}),
        );
        run(&UserResourcesHandler, &mut doc, StateFlags::default()).unwrap();
        let res = doc.projections.userres.unwrap();
        assert_eq!(res.total_weight, 1.1);
        assert_eq!(res.ram_bytes, 8000);

        let mut doc = delta(
            "eosio",
            "delband",
            json!({"from": "alice", "to": "bob", "net_weight": "2.0000 EOS", "cpu_weight": "bad"}),
        );
        assert!(run(&DelegatedBandwidthHandler, &mut doc, StateFlags::default()).is_err());
        assert!(doc.projections.delband.is_none());
        assert!(doc.data.is_some());
    }

    #[test]
    fn test_producers() {
        let mut doc = delta(
            "eosio",
            "producers",
            json!({"owner": "bp1", "total_votes": "123.5", "is_active": 1, "unpaid_blocks": 12}),
        );
        run(&ProducersHandler, &mut doc, StateFlags::default()).unwrap();
        assert_eq!(
            doc.projections.producers,
            Some(ProducerProjection {
                total_votes: 123.5,
                is_active: true,
                unpaid_blocks: 12
            })
        );
    }

    #[test]
    fn test_approvals_state() {
        let mut doc = delta(
            "eosio.msig",
            "approvals2",
            json!({
                "version": 1,
                "proposal_name": "upgrade",
                "requested_approvals": [{"level": {"actor": "bp1", "permission": "active"}, "time": "1970-01-01T00:00:00.000"}],
                "provided_approvals": []
            }),
        );
        doc.present = false;
        let state = run(&ApprovalsV2Handler, &mut doc, all_state()).unwrap();
        match state {
            Some(StateDocument::Proposal(p)) => {
                assert_eq!(p.proposer, "alice");
                assert!(p.executed);
                assert_eq!(p.requested_approvals[0].time.as_deref(), Some("1970-01-01T00:00:00.000"));
            }
            other => panic!("unexpected state {:?}", other),
        }

        let mut doc = delta(
            "eosio.msig",
            "approvals",
            json!({
                "proposal_name": "upgrade",
                "requested_approvals": [],
                "provided_approvals": [{"actor": "bp2", "permission": "active"}]
            }),
        );
        assert!(run(&ApprovalsHandler, &mut doc, StateFlags::default())
            .unwrap()
            .is_none());
        let approvals = doc.projections.approvals.unwrap();
        assert_eq!(approvals.provided_approvals[0].actor, "bp2");
        assert!(approvals.provided_approvals[0].time.is_none());
    }

    #[test]
    fn test_proposal_keeps_name_without_transaction() {
        let mut doc = delta(
            "eosio.msig",
            "proposal",
            json!({"proposal_name": "upgrade", "packed_transaction": "00"}),
        );
        run(&ProposalHandler, &mut doc, StateFlags::default()).unwrap();
        let proposal = doc.projections.proposal.unwrap();
        assert_eq!(proposal.proposal_name, "upgrade");
        assert!(proposal.transaction.is_none());
    }
}
