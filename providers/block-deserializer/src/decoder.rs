//! Schema-driven decoding of actions, table rows and nested records

use crate::abi::{self, Abi};
use crate::error::{DecodeError, SerializationError};
use crate::schema::{ContractSchema, TypeTable};
use crate::serialize::SerialBuffer;
use crate::type_cache::TypeCache;
use crate::types::{ActionData, ContractRow, DecodedAction, RawAction};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Action decoding slower than this per call is logged
const SLOW_ACTIONS: Duration = Duration::from_millis(100);

/// Decoded table row, or the original bytes when no row type is declared
#[derive(Debug, Clone, PartialEq)]
pub enum RowData {
    Decoded(Value),
    Raw(Vec<u8>),
}

/// `account` delta row, with the embedded schema decoded when one was set
#[derive(Debug, Clone)]
pub struct AccountDelta {
    pub name: String,
    pub abi: Option<Abi>,
}

/// Base type table shared by every contract schema
pub fn chain_base_types() -> Arc<TypeTable> {
    Arc::new(TypeTable::from_abi(&abi::state_history()))
}

fn serialization(type_name: &str) -> impl FnOnce(SerializationError) -> DecodeError + '_ {
    move |source| DecodeError::Serialization {
        type_name: type_name.to_string(),
        source,
    }
}

/// Variant payloads decode as `[tag, value]`; returns the value
fn variant_value(value: Value, type_name: &str) -> Result<Value, DecodeError> {
    match value {
        Value::Array(mut pair) if pair.len() == 2 => Ok(pair.swap_remove(1)),
        _ => Err(DecodeError::Serialization {
            type_name: type_name.to_string(),
            source: SerializationError::mismatch(type_name, "expected variant"),
        }),
    }
}

/// Decoder over the shared type cache and the built-in chain schemas
pub struct Decoder {
    cache: Arc<TypeCache>,
    native: Arc<ContractSchema>,
    abi_def: Arc<ContractSchema>,
}

impl Decoder {
    pub fn new(cache: Arc<TypeCache>) -> Result<Self, DecodeError> {
        let native = ContractSchema::from_abi("", &abi::state_history(), None)?;
        let abi_def = ContractSchema::from_abi("", &abi::abi_definition(), None)?;
        Ok(Self {
            cache,
            native: Arc::new(native),
            abi_def: Arc::new(abi_def),
        })
    }

    pub fn cache(&self) -> &Arc<TypeCache> {
        &self.cache
    }

    /// Built-in chain types, e.g. `transaction`
    pub fn native(&self) -> &ContractSchema {
        &self.native
    }

    /// Decodes one action payload with the schema in force at `block`
    pub async fn decode_action(&self, action: &RawAction, block: u32) -> Result<Value, DecodeError> {
        let resolved = self.cache.resolve(&action.account, block as u64).await?;
        let type_name = resolved
            .schema
            .action_type(&action.name)
            .ok_or_else(|| DecodeError::UnknownAction {
                account: action.account.clone(),
                name: action.name.clone(),
            })?;
        resolved
            .schema
            .decode(type_name, action.data.as_slice())
            .map_err(serialization(type_name))
    }

    /// Decodes a list of actions concurrently. Actions that cannot be decoded
    /// keep their payload encoded.
    pub async fn decode_actions(&self, actions: &[RawAction], block: u32) -> Vec<DecodedAction> {
        let started = Instant::now();
        let futures = actions.iter().map(|action| async move {
            match self.decode_action(action, block).await {
                Ok(data) => DecodedAction {
                    account: action.account.clone(),
                    name: action.name.clone(),
                    authorization: action.authorization.clone(),
                    data: ActionData::Decoded(data),
                },
                Err(e) => {
                    debug!(
                        "Action {}::{} at block {} left encoded: {}",
                        action.account, action.name, block, e
                    );
                    DecodedAction::raw(action)
                }
            }
        });
        let decoded = futures::future::join_all(futures).await;

        let elapsed = started.elapsed();
        if elapsed > SLOW_ACTIONS {
            warn!(
                "Decoding {} action(s) at block {} took {} ms",
                actions.len(),
                block,
                elapsed.as_millis()
            );
        }
        decoded
    }

    /// Decodes a contract table row. Tables the schema does not declare, or
    /// whose row type resolves nowhere, are returned as raw bytes.
    #[instrument(skip(self, bytes), level = "debug")]
    pub async fn decode_table_row(
        &self,
        code: &str,
        table: &str,
        block: u32,
        bytes: &[u8],
    ) -> Result<RowData, DecodeError> {
        let resolved = self.cache.resolve(code, block as u64).await?;
        let Some(type_name) = resolved.schema.row_type(table) else {
            debug!("No row type for {}:{}, row left encoded", code, table);
            return Ok(RowData::Raw(bytes.to_vec()));
        };
        resolved
            .schema
            .decode(type_name, bytes)
            .map(RowData::Decoded)
            .map_err(serialization(type_name))
    }

    /// Decodes a record of a named type with an explicit schema
    pub fn decode_nested(
        &self,
        type_name: &str,
        schema: &ContractSchema,
        bytes: &[u8],
    ) -> Result<Value, DecodeError> {
        schema.decode(type_name, bytes).map_err(serialization(type_name))
    }

    /// Decodes a serialized schema with the built-in `abi_def` descriptors
    pub fn decode_abi_blob(&self, bytes: &[u8]) -> Result<Abi, DecodeError> {
        let value = self.decode_nested("abi_def", &self.abi_def, bytes)?;
        serde_json::from_value(value).map_err(|e| DecodeError::InvalidAbi(e.to_string()))
    }

    /// Decodes an `account` delta row
    pub fn decode_account_row(&self, bytes: &[u8]) -> Result<AccountDelta, DecodeError> {
        let row = variant_value(self.decode_nested("account", &self.native, bytes)?, "account")?;
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let blob = row.get("abi").and_then(Value::as_str).unwrap_or_default();
        if blob.is_empty() {
            return Ok(AccountDelta { name, abi: None });
        }

        let bytes = hex::decode(blob).map_err(|e| DecodeError::InvalidAbi(e.to_string()))?;
        Ok(AccountDelta {
            name,
            abi: Some(self.decode_abi_blob(&bytes)?),
        })
    }

    /// Reads the header of a `contract_row` delta row, leaving the row value
    /// encoded
    pub fn decode_contract_row(&self, present: bool, bytes: &[u8]) -> Result<ContractRow, DecodeError> {
        parse_contract_row(present, bytes).map_err(serialization("contract_row"))
    }

    /// Decodes a `generated_transaction` row
    pub fn decode_generated_transaction(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        variant_value(
            self.decode_nested("generated_transaction", &self.native, bytes)?,
            "generated_transaction",
        )
    }

    /// Expands a deferred transaction: the packed transaction is decoded and
    /// merged into the row and its actions decoded at `block`. Returns `None`
    /// when the row carries no packed transaction.
    pub async fn process_deferred(&self, row: Value, block: u32) -> Result<Option<Value>, DecodeError> {
        let Value::Object(mut deferred) = row else {
            return Ok(None);
        };
        let Some(packed) = deferred.remove("packed_trx") else {
            return Ok(None);
        };
        let packed = packed.as_str().unwrap_or_default();
        if packed.is_empty() {
            return Ok(None);
        }

        let bytes = hex::decode(packed).map_err(|e| DecodeError::Serialization {
            type_name: "transaction".to_string(),
            source: SerializationError::mismatch("packed_trx", e.to_string()),
        })?;
        let Value::Object(trx) = self.decode_nested("transaction", &self.native, &bytes)? else {
            return Ok(None);
        };
        merge_into(&mut deferred, trx);

        if let Some(actions) = deferred.get("actions").cloned() {
            let raw: Vec<RawAction> = serde_json::from_value(actions)
                .map_err(|e| DecodeError::InvalidAbi(e.to_string()))?;
            let decoded = self.decode_actions(&raw, block).await;
            deferred.insert(
                "actions".to_string(),
                serde_json::to_value(decoded).map_err(|e| DecodeError::InvalidAbi(e.to_string()))?,
            );
        }
        if let Some(Value::String(id)) = deferred.get_mut("trx_id") {
            *id = id.to_lowercase();
        }

        Ok(Some(Value::Object(deferred)))
    }
}

fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        target.insert(key, value);
    }
}

/// `contract_row` header: variant index, code, scope, table, primary key,
/// payer, then the length-prefixed row value
pub fn parse_contract_row(present: bool, bytes: &[u8]) -> Result<ContractRow, SerializationError> {
    let mut buf = SerialBuffer::new(bytes);
    buf.get_varuint32()?;
    Ok(ContractRow {
        present,
        code: buf.get_name()?,
        scope: buf.get_name()?,
        table: buf.get_name()?,
        primary_key: buf.get_u64()?,
        payer: buf.get_name()?,
        value: buf.get_bytes()?.to_vec(),
    })
}
