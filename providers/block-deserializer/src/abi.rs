//! Contract ABI documents and the built-in ABIs the deserializer ships with

use crate::types::lenient_u64;
use serde::{Deserialize, Serialize};

/// Contract ABI document, as served by `get_abi` or decoded from chain state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Abi {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub ricardian_clauses: Vec<ClausePair>,
    #[serde(default)]
    pub error_messages: Vec<ErrorMessage>,
    #[serde(default)]
    pub abi_extensions: Vec<serde_json::Value>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_results: Vec<ActionResultDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClausePair {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Served as a number by the chain API and as a decimal string once decoded from binary
    #[serde(deserialize_with = "lenient_u64")]
    pub error_code: u64,
    pub error_msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResultDef {
    pub name: String,
    pub result_type: String,
}

fn structure(name: &str, base: &str, fields: &[(&str, &str)]) -> StructDef {
    StructDef {
        name: name.to_string(),
        base: base.to_string(),
        fields: fields
            .iter()
            .map(|(name, ty)| FieldDef {
                name: name.to_string(),
                type_name: ty.to_string(),
            })
            .collect(),
    }
}

fn variant(name: &str, types: &[&str]) -> VariantDef {
    VariantDef {
        name: name.to_string(),
        types: types.iter().map(|t| t.to_string()).collect(),
    }
}

fn action(name: &str, ty: &str) -> ActionDef {
    ActionDef {
        name: name.to_string(),
        type_name: ty.to_string(),
        ricardian_contract: String::new(),
    }
}

fn table(name: &str, ty: &str) -> TableDef {
    TableDef {
        name: name.to_string(),
        index_type: "i64".to_string(),
        key_names: Vec::new(),
        key_types: Vec::new(),
        type_name: ty.to_string(),
    }
}

/// Schema of serialized ABI documents themselves (`abi_def`), used to decode
/// ABI blobs found in `account` rows.
pub fn abi_definition() -> Abi {
    Abi {
        version: "eosio::abi/1.1".to_string(),
        structs: vec![
            structure("extensions_entry", "", &[("tag", "uint16"), ("value", "bytes")]),
            structure("type_def", "", &[("new_type_name", "string"), ("type", "string")]),
            structure("field_def", "", &[("name", "string"), ("type", "string")]),
            structure(
                "struct_def",
                "",
                &[("name", "string"), ("base", "string"), ("fields", "field_def[]")],
            ),
            structure(
                "action_def",
                "",
                &[("name", "name"), ("type", "string"), ("ricardian_contract", "string")],
            ),
            structure(
                "table_def",
                "",
                &[
                    ("name", "name"),
                    ("index_type", "string"),
                    ("key_names", "string[]"),
                    ("key_types", "string[]"),
                    ("type", "string"),
                ],
            ),
            structure("clause_pair", "", &[("id", "string"), ("body", "string")]),
            structure(
                "error_message",
                "",
                &[("error_code", "uint64"), ("error_msg", "string")],
            ),
            structure("variant_def", "", &[("name", "string"), ("types", "string[]")]),
            structure(
                "action_result_def",
                "",
                &[("name", "name"), ("result_type", "string")],
            ),
            structure(
                "abi_def",
                "",
                &[
                    ("version", "string"),
                    ("types", "type_def[]"),
                    ("structs", "struct_def[]"),
                    ("actions", "action_def[]"),
                    ("tables", "table_def[]"),
                    ("ricardian_clauses", "clause_pair[]"),
                    ("error_messages", "error_message[]"),
                    ("abi_extensions", "extensions_entry[]"),
                    ("variants", "variant_def[]$"),
                    ("action_results", "action_result_def[]$"),
                ],
            ),
        ],
        ..Default::default()
    }
}

/// The subset of the state-history ABI needed to read system deltas and
/// deferred transactions. These types form the chain's base type table.
pub fn state_history() -> Abi {
    Abi {
        version: "eosio::abi/1.1".to_string(),
        structs: vec![
            structure(
                "account_v0",
                "",
                &[
                    ("name", "name"),
                    ("creation_date", "block_timestamp_type"),
                    ("abi", "bytes"),
                ],
            ),
            structure(
                "contract_row_v0",
                "",
                &[
                    ("code", "name"),
                    ("scope", "name"),
                    ("table", "name"),
                    ("primary_key", "uint64"),
                    ("payer", "name"),
                    ("value", "bytes"),
                ],
            ),
            structure(
                "generated_transaction_v0",
                "",
                &[
                    ("sender", "name"),
                    ("sender_id", "uint128"),
                    ("payer", "name"),
                    ("trx_id", "checksum256"),
                    ("packed_trx", "bytes"),
                ],
            ),
            structure(
                "permission_level",
                "",
                &[("actor", "name"), ("permission", "name")],
            ),
            structure(
                "action",
                "",
                &[
                    ("account", "name"),
                    ("name", "name"),
                    ("authorization", "permission_level[]"),
                    ("data", "bytes"),
                ],
            ),
            structure("extension", "", &[("type", "uint16"), ("data", "bytes")]),
            structure(
                "transaction_header",
                "",
                &[
                    ("expiration", "time_point_sec"),
                    ("ref_block_num", "uint16"),
                    ("ref_block_prefix", "uint32"),
                    ("max_net_usage_words", "varuint32"),
                    ("max_cpu_usage_ms", "uint8"),
                    ("delay_sec", "varuint32"),
                ],
            ),
            structure(
                "transaction",
                "transaction_header",
                &[
                    ("context_free_actions", "action[]"),
                    ("actions", "action[]"),
                    ("transaction_extensions", "extension[]"),
                ],
            ),
        ],
        variants: vec![
            variant("account", &["account_v0"]),
            variant("contract_row", &["contract_row_v0"]),
            variant("generated_transaction", &["generated_transaction_v0"]),
        ],
        ..Default::default()
    }
}

/// Abridged schema for the REX system account, used when its schema cannot
/// be fetched from the chain API.
pub fn rex_fallback() -> Abi {
    Abi {
        version: "eosio::abi/1.1".to_string(),
        types: vec![],
        structs: vec![
            structure("buyresult", "", &[("rex_received", "asset")]),
            structure("sellresult", "", &[("proceeds", "asset")]),
            structure("orderresult", "", &[("owner", "name"), ("proceeds", "asset")]),
            structure("rentresult", "", &[("rented_tokens", "asset")]),
            structure(
                "rex_pool",
                "",
                &[
                    ("version", "uint8"),
                    ("total_lent", "asset"),
                    ("total_unlent", "asset"),
                    ("total_rent", "asset"),
                    ("total_lendable", "asset"),
                    ("total_rex", "asset"),
                    ("namebid_proceeds", "asset"),
                    ("loan_num", "uint64"),
                ],
            ),
            structure(
                "rex_fund",
                "",
                &[("version", "uint8"), ("owner", "name"), ("balance", "asset")],
            ),
            structure(
                "pair_time_point_sec_int64",
                "",
                &[("first", "time_point_sec"), ("second", "int64")],
            ),
            structure(
                "rex_balance",
                "",
                &[
                    ("version", "uint8"),
                    ("owner", "name"),
                    ("vote_stake", "asset"),
                    ("rex_balance", "asset"),
                    ("matured_rex", "int64"),
                    ("rex_maturities", "pair_time_point_sec_int64[]"),
                ],
            ),
            structure(
                "rex_loan",
                "",
                &[
                    ("version", "uint8"),
                    ("from", "name"),
                    ("receiver", "name"),
                    ("payment", "asset"),
                    ("balance", "asset"),
                    ("total_staked", "asset"),
                    ("loan_num", "uint64"),
                    ("expiration", "time_point"),
                ],
            ),
            structure(
                "rex_order",
                "",
                &[
                    ("version", "uint8"),
                    ("owner", "name"),
                    ("rex_requested", "asset"),
                    ("proceeds", "asset"),
                    ("stake_change", "asset"),
                    ("order_time", "time_point"),
                    ("is_open", "bool"),
                ],
            ),
        ],
        actions: vec![
            action("buyresult", "buyresult"),
            action("sellresult", "sellresult"),
            action("orderresult", "orderresult"),
            action("rentresult", "rentresult"),
        ],
        tables: vec![
            table("rexpool", "rex_pool"),
            table("rexfund", "rex_fund"),
            table("rexbal", "rex_balance"),
            table("cpuloan", "rex_loan"),
            table("netloan", "rex_loan"),
            table("rexqueue", "rex_order"),
        ],
        ..Default::default()
    }
}
