//! End-to-end block processing against in-memory collaborators

use async_trait::async_trait;
use block_deserializer::abi::Abi;
use block_deserializer::config::{ProcessingOptions, StateFlags};
use block_deserializer::decoder::chain_base_types;
use block_deserializer::events::{ChannelControlSink, ControlMessage};
use block_deserializer::router::{spawn_publisher, OutboundMessage};
use block_deserializer::serialize::SerialWriter;
use block_deserializer::types::{
    ActionReceiptV0, ActionTraceV0, BlockPayload, BlockPosition, DeltaRowBytes, HexBytes,
    PermissionLevel, RawAction, SignedBlock, TableDeltaV0, TransactionReceipt, TransactionTraceV0,
    Variant,
};
use block_deserializer::{
    BlockProcessor, ChainAbiSource, ContractSchema, Decoder, IndexPublisher, PipelineError,
    Router, SchemaError, SchemaStore, TransformRegistry, TypeCache,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_test::assert_ok;

fn token_abi() -> Abi {
    serde_json::from_value(json!({
        "version": "eosio::abi/1.1",
        "structs": [
            {"name": "transfer", "base": "", "fields": [
                {"name": "from", "type": "name"},
                {"name": "to", "type": "name"},
                {"name": "quantity", "type": "asset"},
                {"name": "memo", "type": "string"}
            ]},
            {"name": "account", "base": "", "fields": [{"name": "balance", "type": "asset"}]},
            {"name": "currency_stats", "base": "", "fields": [
                {"name": "supply", "type": "asset"},
                {"name": "max_supply", "type": "asset"},
                {"name": "issuer", "type": "name"}
            ]}
        ],
        "actions": [{"name": "transfer", "type": "transfer", "ricardian_contract": ""}],
        "tables": [
            {"name": "accounts", "index_type": "i64", "key_names": [], "key_types": [], "type": "account"},
            {"name": "stat", "index_type": "i64", "key_names": [], "key_types": [], "type": "currency_stats"}
        ]
    }))
    .unwrap()
}

/// Token contract that keeps balances as plain strings and declares a table
/// whose row type exists nowhere
fn fakecoin_abi() -> Abi {
    serde_json::from_value(json!({
        "version": "eosio::abi/1.1",
        "structs": [
            {"name": "account", "base": "", "fields": [{"name": "balance", "type": "string"}]}
        ],
        "tables": [
            {"name": "accounts", "index_type": "i64", "key_names": [], "key_types": [], "type": "account"},
            {"name": "ledger", "index_type": "i64", "key_names": [], "key_types": [], "type": "missing_row"}
        ]
    }))
    .unwrap()
}

fn msig_abi() -> Abi {
    serde_json::from_value(json!({
        "version": "eosio::abi/1.1",
        "structs": [
            {"name": "permission_level", "base": "", "fields": [
                {"name": "actor", "type": "name"},
                {"name": "permission", "type": "name"}
            ]},
            {"name": "approvals_info", "base": "", "fields": [
                {"name": "version", "type": "uint8"},
                {"name": "proposal_name", "type": "name"},
                {"name": "requested_approvals", "type": "permission_level[]"},
                {"name": "provided_approvals", "type": "permission_level[]"}
            ]}
        ],
        "tables": [
            {"name": "approvals", "index_type": "i64", "key_names": [], "key_types": [], "type": "approvals_info"}
        ]
    }))
    .unwrap()
}

/// Schema history with one version of each test contract from block 1
struct History {
    abis: HashMap<String, String>,
}

#[async_trait]
impl SchemaStore for History {
    async fn changed_at(&self, account: &str) -> Result<Option<Vec<u64>>, SchemaError> {
        Ok(self.abis.contains_key(account).then(|| vec![1]))
    }

    async fn abi_at(&self, account: &str, _block: u64) -> Result<Option<String>, SchemaError> {
        Ok(self.abis.get(account).cloned())
    }
}

struct Unreachable;

#[async_trait]
impl ChainAbiSource for Unreachable {
    async fn get_abi(&self, account: &str) -> Result<Abi, SchemaError> {
        Err(SchemaError::Unavailable {
            account: account.to_string(),
            reason: "node offline".to_string(),
        })
    }
}

#[derive(Default)]
struct Recording {
    messages: Mutex<Vec<OutboundMessage>>,
    fail: bool,
}

#[async_trait]
impl IndexPublisher for Recording {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PipelineError> {
        if self.fail {
            return Err(PipelineError::Publish("no responders".to_string()));
        }
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}

impl Recording {
    async fn subjects(&self) -> Vec<String> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }

    async fn documents(&self, subject: &str) -> Vec<Value> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m.subject == subject)
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }
}

struct Harness {
    processor: BlockProcessor,
    published: Arc<Recording>,
    control: mpsc::Receiver<ControlMessage>,
}

fn harness(options: ProcessingOptions, publisher: Recording) -> Harness {
    let store = History {
        abis: HashMap::from([
            ("eosio.token".to_string(), serde_json::to_string(&token_abi()).unwrap()),
            ("fakecoin".to_string(), serde_json::to_string(&fakecoin_abi()).unwrap()),
            ("eosio.msig".to_string(), serde_json::to_string(&msig_abi()).unwrap()),
        ]),
    };
    let cache = TypeCache::new(
        Arc::new(store),
        Arc::new(Unreachable),
        chain_base_types(),
        Default::default(),
    );
    let decoder = Decoder::new(Arc::new(cache)).unwrap();

    let published = Arc::new(publisher);
    let (emitter, _task) = spawn_publisher(published.clone(), 8);
    let router = Router::new("eos", 1, 1, emitter);
    let (sink, control) = ChannelControlSink::new(16);

    let processor = BlockProcessor::new(
        options,
        Arc::new(decoder),
        Arc::new(TransformRegistry::system()),
        Arc::new(router),
        Arc::new(sink),
    );
    Harness {
        processor,
        published,
        control,
    }
}

fn token_schema() -> ContractSchema {
    ContractSchema::from_abi("eosio.token", &token_abi(), None).unwrap()
}

fn transfer_data() -> Vec<u8> {
    token_schema()
        .encode(
            "transfer",
            &json!({"from": "alice", "to": "bob", "quantity": "1.0000 EOS", "memo": "rent"}),
        )
        .unwrap()
}

fn action_trace(ordinal: u32, receiver: &str, digest: &str, seq: u64) -> Variant<ActionTraceV0> {
    Variant {
        tag: "action_trace_v0".to_string(),
        value: ActionTraceV0 {
            action_ordinal: ordinal,
            creator_action_ordinal: if ordinal == 1 { 0 } else { 1 },
            receipt: Some(Variant {
                tag: "action_receipt_v0".to_string(),
                value: ActionReceiptV0 {
                    receiver: receiver.to_string(),
                    act_digest: digest.to_string(),
                    global_sequence: seq,
                    recv_sequence: seq,
                    auth_sequence: vec![],
                    code_sequence: 1,
                    abi_sequence: 1,
                },
            }),
            receiver: receiver.to_string(),
            act: RawAction {
                account: "eosio.token".to_string(),
                name: "transfer".to_string(),
                authorization: vec![PermissionLevel {
                    actor: "alice".to_string(),
                    permission: "active".to_string(),
                }],
                data: HexBytes(transfer_data()),
            },
            context_free: false,
            elapsed: 40,
            console: String::new(),
            account_ram_deltas: vec![],
            except: None,
        },
    }
}

fn transaction(id: &str, status: u8, traces: Vec<Variant<ActionTraceV0>>) -> Variant<TransactionTraceV0> {
    Variant {
        tag: "transaction_trace_v0".to_string(),
        value: TransactionTraceV0 {
            id: id.to_string(),
            status,
            cpu_usage_us: 200,
            net_usage_words: 14,
            action_traces: traces,
        },
    }
}

fn contract_row(code: &str, scope: &str, table: &str, pk: u64, value: &[u8]) -> DeltaRowBytes {
    let mut w = SerialWriter::new();
    w.push_varuint32(0);
    w.push_name(code).unwrap();
    w.push_name(scope).unwrap();
    w.push_name(table).unwrap();
    w.push_u64(pk);
    w.push_name(scope).unwrap();
    w.push_bytes(value);
    DeltaRowBytes {
        present: true,
        data: HexBytes(w.into_bytes()),
    }
}

fn balance(amount: &str) -> Vec<u8> {
    let mut w = SerialWriter::new();
    w.push_asset(amount).unwrap();
    w.into_bytes()
}

fn supply() -> Vec<u8> {
    token_schema()
        .encode(
            "currency_stats",
            &json!({"supply": "100.0000 EOS", "max_supply": "1000.0000 EOS", "issuer": "eosio"}),
        )
        .unwrap()
}

/// A block carrying only contract rows
fn rows_block(block_num: u32, rows: Vec<DeltaRowBytes>) -> BlockPayload {
    BlockPayload {
        this_block: BlockPosition {
            block_num,
            block_id: String::new(),
        },
        block: None,
        traces: vec![],
        deltas: vec![Variant {
            tag: "table_delta_v0".to_string(),
            value: TableDeltaV0 {
                name: "contract_row".to_string(),
                rows,
            },
        }],
    }
}

fn block(block_num: u32) -> BlockPayload {
    BlockPayload {
        this_block: BlockPosition {
            block_num,
            block_id: String::new(),
        },
        block: Some(SignedBlock {
            timestamp: "2021-03-01T10:00:00.500".to_string(),
            producer: "bp.one".to_string(),
            schedule_version: 2,
            new_producers: None,
            transactions: vec![
                TransactionReceipt {
                    status: 0,
                    cpu_usage_us: 200,
                    net_usage_words: 14,
                },
                TransactionReceipt {
                    status: 1,
                    cpu_usage_us: 50,
                    net_usage_words: 2,
                },
            ],
        }),
        traces: vec![
            transaction(
                "AA11",
                0,
                vec![
                    action_trace(1, "eosio.token", "D1", 100),
                    action_trace(2, "alice", "D1", 101),
                    action_trace(3, "bob", "D1", 102),
                ],
            ),
            transaction("BB22", 3, vec![action_trace(1, "eosio.token", "D2", 103)]),
        ],
        deltas: vec![Variant {
            tag: "table_delta_v0".to_string(),
            value: TableDeltaV0 {
                name: "contract_row".to_string(),
                rows: vec![
                    contract_row("eosio.token", "alice", "accounts", 5459781, &balance("12.5000 EOS")),
                    contract_row("eosio.token", "EOS", "stat", 5459781, &supply()),
                    contract_row("eosio.token", "bob", "accounts", 5459781, &[1, 2]),
                ],
            },
        }],
    }
}

#[tokio::test]
async fn test_block_is_decoded_deduplicated_and_routed() {
    let options = ProcessingOptions {
        state: StateFlags {
            accounts: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut h = harness(options, Recording::default());

    let stats = assert_ok!(h.processor.process_batch(&[block(42)]).await);
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.actions, 1);
    assert_eq!(stats.deltas, 1);
    assert_eq!(stats.states, 1);
    assert_eq!(stats.decode_errors, 1);

    let mut subjects = h.published.subjects().await;
    subjects.sort();
    assert_eq!(
        subjects,
        vec![
            "eos.index.actions.1",
            "eos.index.blocks.1",
            "eos.index.deltas.1",
            "eos.index.table_accounts.1",
        ]
    );

    let blocks = h.published.documents("eos.index.blocks.1").await;
    assert_eq!(blocks[0]["cpu_usage"], 250);
    assert_eq!(blocks[0]["net_usage"], 16);
    assert_eq!(blocks[0]["producer"], "bp.one");

    let actions = h.published.documents("eos.index.actions.1").await;
    let action = &actions[0];
    assert_eq!(action["trx_id"], "aa11");
    assert_eq!(action["notified"], json!(["eosio.token", "alice", "bob"]));
    assert_eq!(action["receipts"].as_array().unwrap().len(), 3);
    assert!(action["receipts"][0].get("act_digest").is_none());
    assert_eq!(action["act"]["data"]["quantity"], "1.0000 EOS");
    assert_eq!(action["cpu_usage_us"], 200);
    assert_eq!(action["@timestamp"], "2021-03-01T10:00:00.500");

    let deltas = h.published.documents("eos.index.deltas.1").await;
    assert_eq!(deltas[0]["scope"], "alice");
    assert_eq!(deltas[0]["@accounts"], json!({"amount": 12.5, "symbol": "EOS"}));
    assert_eq!(deltas[0]["primary_key"], "5459781");

    let states = h.published.documents("eos.index.table_accounts.1").await;
    assert_eq!(states[0]["scope"], "alice");
    assert_eq!(states[0]["amount"], 12.5);

    let error = h.control.recv().await.unwrap();
    assert_eq!(error.event, "ds_error");
    assert_eq!(error.data["type"], "delta_ds_error");
    assert_eq!(error.data["block"], 42);
    assert_eq!(error.data["table"], "accounts");
}

#[tokio::test]
async fn test_index_all_deltas_admits_unhandled_tables() {
    let options = ProcessingOptions {
        fetch_traces: false,
        fetch_block: false,
        index_all_deltas: true,
        ..Default::default()
    };
    let h = harness(options, Recording::default());

    let stats = assert_ok!(h.processor.process_batch(&[block(7)]).await);
    assert_eq!(stats.deltas, 2);

    let deltas = h.published.documents("eos.index.deltas.1").await;
    let tables: Vec<_> = deltas.iter().map(|d| d["table"].as_str().unwrap()).collect();
    assert_eq!(tables, vec!["accounts", "stat"]);
    assert_eq!(deltas[1]["data"]["issuer"], "eosio");
    assert!(deltas[1].get("@accounts").is_none());
}

#[tokio::test]
async fn test_streaming_follows_runtime_switch() {
    let options = ProcessingOptions {
        fetch_block: false,
        process_deltas: false,
        enable_indexing: false,
        stream_traces: true,
        ..Default::default()
    };
    let h = harness(options, Recording::default());

    assert_ok!(h.processor.process_batch(&[block(1)]).await);
    assert!(h.published.subjects().await.is_empty());

    h.processor.allow_streaming().store(true, Ordering::Release);
    assert_ok!(h.processor.process_batch(&[block(2)]).await);

    let messages = h.published.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].subject, "eos.stream");
    assert!(!messages[0].durable);
    let headers: HashMap<_, _> = messages[0].headers.iter().cloned().collect();
    assert_eq!(headers["event"], "trace");
    assert_eq!(headers["account"], "eosio.token");
    assert_eq!(headers["name"], "transfer");
    assert_eq!(headers["notified"], "eosio.token,alice,bob");
}

#[tokio::test]
async fn test_abi_cache_mode_only_follows_schema_updates() {
    let options = ProcessingOptions {
        fetch_block: false,
        fetch_traces: false,
        abi_cache_mode: true,
        ..Default::default()
    };
    let mut h = harness(options, Recording::default());

    let abi_def = ContractSchema::from_abi("", &block_deserializer::abi::abi_definition(), None).unwrap();
    let blob = abi_def
        .encode("abi_def", &serde_json::to_value(token_abi()).unwrap())
        .unwrap();
    let mut w = SerialWriter::new();
    w.push_varuint32(0);
    w.push_name("mytoken").unwrap();
    w.push_block_timestamp("2021-03-01T10:00:00.000").unwrap();
    w.push_bytes(&blob);

    let mut payload = block(300);
    payload.deltas.insert(
        0,
        Variant {
            tag: "table_delta_v0".to_string(),
            value: TableDeltaV0 {
                name: "account".to_string(),
                rows: vec![DeltaRowBytes {
                    present: true,
                    data: HexBytes(w.into_bytes()),
                }],
            },
        },
    );

    let stats = assert_ok!(h.processor.process_batch(&[payload]).await);
    assert_eq!(stats.abis, 1);
    assert_eq!(stats.deltas, 0);
    assert_eq!(h.published.subjects().await, vec!["eos.index.abis.1"]);

    let update = h.control.recv().await.unwrap();
    assert_eq!(update.event, "save_abi");
    assert_eq!(update.data["account"], "mytoken");
    assert_eq!(update.data["block"], 300);
    let abi: Abi = serde_json::from_str(update.data["abi"].as_str().unwrap()).unwrap();
    assert_eq!(abi.tables.len(), 2);
}

#[tokio::test]
async fn test_publish_failure_rejects_batch() {
    let h = harness(
        ProcessingOptions::default(),
        Recording {
            fail: true,
            ..Default::default()
        },
    );
    let err = h.processor.process_batch(&[block(9)]).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreadable_balance_keeps_row_and_state() {
    let options = ProcessingOptions {
        state: StateFlags {
            accounts: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut h = harness(options, Recording::default());

    let schema = ContractSchema::from_abi("fakecoin", &fakecoin_abi(), None).unwrap();
    let value = schema.encode("account", &json!({"balance": "garbage"})).unwrap();
    let payload = rows_block(50, vec![contract_row("fakecoin", "alice", "accounts", 1, &value)]);

    let stats = assert_ok!(h.processor.process_batch(&[payload]).await);
    assert_eq!(stats.deltas, 1);
    assert_eq!(stats.states, 1);
    assert_eq!(stats.decode_errors, 0);

    let deltas = h.published.documents("eos.index.deltas.1").await;
    assert_eq!(deltas[0]["data"], json!({"balance": "garbage"}));
    assert!(deltas[0].get("@accounts").is_none());

    let states = h.published.documents("eos.index.table_accounts.1").await;
    assert_eq!(states[0]["scope"], "alice");
    assert_eq!(states[0]["primary_key"], "1");
    assert!(states[0].get("amount").is_none());
    assert!(h.control.try_recv().is_err());
}

#[tokio::test]
async fn test_unresolved_row_type_passes_through_raw() {
    let options = ProcessingOptions {
        index_all_deltas: true,
        stream_deltas: true,
        ..Default::default()
    };
    let mut h = harness(options, Recording::default());
    h.processor.allow_streaming().store(true, Ordering::Release);

    let payload = rows_block(60, vec![contract_row("fakecoin", "fakecoin", "ledger", 9, &[1, 2, 3])]);
    let stats = assert_ok!(h.processor.process_batch(&[payload]).await);
    assert_eq!(stats.deltas, 0);
    assert_eq!(stats.decode_errors, 0);

    assert_eq!(h.published.subjects().await, vec!["eos.stream"]);
    let streamed = h.published.documents("eos.stream").await;
    assert_eq!(streamed[0]["table"], "ledger");
    assert_eq!(streamed[0]["value"], "010203");
    assert!(streamed[0].get("data").is_none());
    assert!(h.control.try_recv().is_err());
}

#[tokio::test]
async fn test_msig_rows_are_indexed_through_their_handler() {
    let options = ProcessingOptions {
        state: StateFlags {
            proposals: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = harness(options, Recording::default());

    let schema = ContractSchema::from_abi("eosio.msig", &msig_abi(), None).unwrap();
    let value = schema
        .encode(
            "approvals_info",
            &json!({
                "version": 1,
                "proposal_name": "upgrade",
                "requested_approvals": [{"actor": "bob", "permission": "active"}],
                "provided_approvals": []
            }),
        )
        .unwrap();
    let payload = rows_block(
        70,
        vec![contract_row("eosio.msig", "alice", "approvals", 42, &value)],
    );

    let stats = assert_ok!(h.processor.process_batch(&[payload]).await);
    assert_eq!(stats.deltas, 1);
    assert_eq!(stats.states, 1);

    let deltas = h.published.documents("eos.index.deltas.1").await;
    assert_eq!(deltas[0]["code"], "eosio.msig");
    assert_eq!(deltas[0]["@approvals"]["proposal_name"], "upgrade");
    assert_eq!(deltas[0]["@approvals"]["requested_approvals"][0]["actor"], "bob");
    assert!(deltas[0].get("data").is_none());

    let states = h.published.documents("eos.index.table_proposals.1").await;
    assert_eq!(states[0]["proposer"], "alice");
    assert_eq!(states[0]["proposal_name"], "upgrade");
    assert_eq!(states[0]["executed"], false);
}
