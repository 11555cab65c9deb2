//! Inbound block payloads and outbound index documents

use crate::transforms::Projections;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Accepts a u64 written either as a JSON number or a decimal string
pub fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Accepts an i64 written either as a JSON number or a decimal string
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(i64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Raw bytes carried as a hex string in JSON
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(v: Vec<u8>) -> Self {
        HexBytes(v)
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(HexBytes).map_err(serde::de::Error::custom)
    }
}

/// A versioned record, `["<type>_v0", {...}]` in JSON
#[derive(Debug, Clone, PartialEq)]
pub struct Variant<T> {
    pub tag: String,
    pub value: T,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Variant<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (tag, value) = <(String, T)>::deserialize(deserializer)?;
        Ok(Variant { tag, value })
    }
}

impl<T: Serialize> Serialize for Variant<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.tag, &self.value).serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One block as delivered on a worker's block queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub this_block: BlockPosition,
    #[serde(default)]
    pub block: Option<SignedBlock>,
    #[serde(default)]
    pub traces: Vec<Variant<TransactionTraceV0>>,
    #[serde(default)]
    pub deltas: Vec<Variant<TableDeltaV0>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block_num: u32,
    #[serde(default)]
    pub block_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlock {
    pub timestamp: String,
    pub producer: String,
    #[serde(default)]
    pub schedule_version: u32,
    #[serde(default)]
    pub new_producers: Option<Value>,
    #[serde(default)]
    pub transactions: Vec<TransactionReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(default)]
    pub status: u8,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTraceV0 {
    pub id: String,
    /// 0 means executed
    pub status: u8,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
    #[serde(default)]
    pub action_traces: Vec<Variant<ActionTraceV0>>,
}

impl TransactionTraceV0 {
    pub fn succeeded(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

/// Action with its payload still encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAction {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub authorization: Vec<PermissionLevel>,
    pub data: HexBytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSequence {
    pub account: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceiptV0 {
    pub receiver: String,
    pub act_digest: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub global_sequence: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub recv_sequence: u64,
    #[serde(default)]
    pub auth_sequence: Vec<AuthSequence>,
    pub code_sequence: u32,
    pub abi_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRamDelta {
    pub account: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTraceV0 {
    pub action_ordinal: u32,
    pub creator_action_ordinal: u32,
    #[serde(default)]
    pub receipt: Option<Variant<ActionReceiptV0>>,
    pub receiver: String,
    pub act: RawAction,
    #[serde(default)]
    pub context_free: bool,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub elapsed: i64,
    #[serde(default)]
    pub console: String,
    #[serde(default)]
    pub account_ram_deltas: Vec<AccountRamDelta>,
    #[serde(default)]
    pub except: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDeltaV0 {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<DeltaRowBytes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaRowBytes {
    pub present: bool,
    pub data: HexBytes,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Block header summary with resource usage summed over its transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDocument {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub block_num: u32,
    pub producer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_producers: Option<Value>,
    pub schedule_version: u32,
    pub cpu_usage: u64,
    pub net_usage: u64,
}

/// Action payload, decoded when a schema was available
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionData {
    Decoded(Value),
    Raw(HexBytes),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedAction {
    pub account: String,
    pub name: String,
    pub authorization: Vec<PermissionLevel>,
    pub data: ActionData,
}

impl DecodedAction {
    /// The action with its payload left encoded
    pub fn raw(action: &RawAction) -> Self {
        Self {
            account: action.account.clone(),
            name: action.name.clone(),
            authorization: action.authorization.clone(),
            data: ActionData::Raw(action.data.clone()),
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self.data, ActionData::Decoded(_))
    }
}

/// One receipt of a canonical action. Sequence numbers and the digest are
/// kept for grouping but never published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub receiver: String,
    pub global_sequence: u64,
    pub recv_sequence: u64,
    pub auth_sequence: Vec<AuthSequence>,
    #[serde(skip_serializing, default)]
    pub code_sequence: u32,
    #[serde(skip_serializing, default)]
    pub abi_sequence: u32,
    #[serde(skip_serializing, default)]
    pub act_digest: String,
}

impl From<ActionReceiptV0> for ActionReceipt {
    fn from(r: ActionReceiptV0) -> Self {
        Self {
            receiver: r.receiver,
            global_sequence: r.global_sequence,
            recv_sequence: r.recv_sequence,
            auth_sequence: r.auth_sequence,
            code_sequence: r.code_sequence,
            abi_sequence: r.abi_sequence,
            act_digest: r.act_digest,
        }
    }
}

/// Action document routed to the `action` index kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTrace {
    #[serde(rename = "@timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub act: DecodedAction,
    pub block_num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    pub trx_id: String,
    pub action_ordinal: u32,
    pub creator_action_ordinal: u32,
    pub global_sequence: u64,
    pub receipts: Vec<ActionReceipt>,
    pub notified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_sequence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_sequence: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub account_ram_deltas: Vec<AccountRamDelta>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub console: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
    pub elapsed: i64,
    pub context_free: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage_us: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_usage_words: Option<u32>,
}

impl ActionTrace {
    /// Digest shared by duplicate traces of the same action
    pub fn digest(&self) -> Option<&str> {
        self.receipts.first().map(|r| r.act_digest.as_str())
    }
}

/// Contract table row header with the row value still encoded
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRow {
    pub present: bool,
    pub code: String,
    pub scope: String,
    pub table: String,
    pub primary_key: u64,
    pub payer: String,
    pub value: Vec<u8>,
}

/// Generic table delta document, with specialized projections when a
/// handler recognised the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaDocument {
    #[serde(rename = "@timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub present: bool,
    pub code: String,
    pub scope: String,
    pub table: String,
    pub primary_key: String,
    pub payer: String,
    pub block_num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Row bytes when the row could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<HexBytes>,
    #[serde(flatten)]
    pub projections: Projections,
}

impl DeltaDocument {
    pub fn from_row(row: &ContractRow, block_num: u32, timestamp: Option<String>) -> Self {
        Self {
            timestamp,
            present: row.present,
            code: row.code.clone(),
            scope: row.scope.clone(),
            table: row.table.clone(),
            primary_key: row.primary_key.to_string(),
            payer: row.payer.clone(),
            block_num,
            data: None,
            value: Some(HexBytes(row.value.clone())),
            projections: Projections::default(),
        }
    }

    pub fn is_decoded(&self) -> bool {
        self.data.is_some() || self.value.is_none()
    }

    /// String field of the decoded row
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }
}

/// Schema change published to the `abi` index kind and the schema store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbiUpdate {
    pub account: String,
    pub block: u32,
    /// The decoded schema, JSON encoded
    pub abi: String,
}

/// Decode failure report for offline analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeErrorEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub block: u32,
    pub code: String,
    pub table: String,
    pub message: String,
}

impl DecodeErrorEvent {
    pub fn delta(block: u32, code: &str, table: &str, message: impl Into<String>) -> Self {
        Self {
            kind: "delta_ds_error".to_string(),
            block,
            code: code.to_string(),
            table: table.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_payload_parsing() {
        let payload: BlockPayload = serde_json::from_value(json!({
            "this_block": {"block_num": 42, "block_id": "00"},
            "block": {
                "timestamp": "2020-01-01T00:00:00.000",
                "producer": "prod1",
                "schedule_version": 3,
                "transactions": [{"status": 0, "cpu_usage_us": 100, "net_usage_words": 12}]
            },
            "traces": [["transaction_trace_v0", {
                "id": "ABCD",
                "status": 0,
                "cpu_usage_us": 100,
                "net_usage_words": 12,
                "action_traces": [["action_trace_v0", {
                    "action_ordinal": 1,
                    "creator_action_ordinal": 0,
                    "receipt": ["action_receipt_v0", {
                        "receiver": "eosio.token",
                        "act_digest": "D1",
                        "global_sequence": "99",
                        "recv_sequence": 5,
                        "auth_sequence": [{"account": "alice", "sequence": "7"}],
                        "code_sequence": 1,
                        "abi_sequence": 1
                    }],
                    "receiver": "eosio.token",
                    "act": {"account": "eosio.token", "name": "transfer", "authorization": [], "data": "0a0B"},
                    "elapsed": "12",
                    "account_ram_deltas": [{"account": "alice", "delta": "-5"}]
                }]]
            }]],
            "deltas": [["table_delta_v0", {"name": "contract_row", "rows": [{"present": true, "data": "00"}]}]]
        }))
        .unwrap();

        assert_eq!(payload.this_block.block_num, 42);
        let trace = &payload.traces[0].value;
        assert!(trace.succeeded());
        let action = &trace.action_traces[0];
        assert_eq!(action.tag, "action_trace_v0");
        assert_eq!(action.value.act.data, HexBytes(vec![0x0a, 0x0b]));
        assert_eq!(action.value.elapsed, 12);
        assert_eq!(action.value.account_ram_deltas[0].delta, -5);
        let receipt = action.value.receipt.as_ref().unwrap();
        assert_eq!(receipt.value.global_sequence, 99);
        assert_eq!(payload.deltas[0].value.rows.len(), 1);
    }

    #[test]
    fn test_receipt_hides_internal_fields() {
        let receipt = ActionReceipt {
            receiver: "bob".to_string(),
            global_sequence: 1,
            recv_sequence: 2,
            auth_sequence: vec![],
            code_sequence: 3,
            abi_sequence: 4,
            act_digest: "D".to_string(),
        };
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(
            value,
            json!({"receiver": "bob", "global_sequence": 1, "recv_sequence": 2, "auth_sequence": []})
        );
    }

    #[test]
    fn test_raw_action_data_is_hex() {
        let action = RawAction {
            account: "a".to_string(),
            name: "b".to_string(),
            authorization: vec![],
            data: HexBytes(vec![0xab, 0x01]),
        };
        let value = serde_json::to_value(DecodedAction::raw(&action)).unwrap();
        assert_eq!(value["data"], json!("AB01"));
    }

    #[test]
    fn test_delta_document_shape() {
        let row = ContractRow {
            present: true,
            code: "eosio.token".to_string(),
            scope: "alice".to_string(),
            table: "accounts".to_string(),
            primary_key: 1397703940,
            payer: "alice".to_string(),
            value: vec![1, 2],
        };
        let doc = DeltaDocument::from_row(&row, 7, None);
        assert!(!doc.is_decoded());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["primary_key"], json!("1397703940"));
        assert_eq!(value["value"], json!("0102"));
        assert!(value.get("@accounts").is_none());
        assert!(value.get("data").is_none());
    }
}
