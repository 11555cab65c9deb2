//! Contract schemas: type tables built from ABI documents and the
//! schema-driven binary codec.
//!
//! A type reference is a name optionally followed by modifiers: `T[]` is a
//! length-prefixed array, `T?` a presence-flagged optional and `T$` a binary
//! extension that may be absent at the end of a struct. Names are looked up
//! in the contract's own table first and then in the chain base table.

use crate::abi::{Abi, StructDef};
use crate::error::{SchemaError, SerializationError};
use crate::serialize::{SerialBuffer, SerialWriter};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

type Result<T> = std::result::Result<T, SerializationError>;

const MAX_DEPTH: usize = 64;
const MAX_ALIAS_HOPS: usize = 32;

/// Legacy type names produced by old ABI generators, and their replacements
const LEGACY_TYPE_REMAP: &[(&str, &str)] = &[("_Bool", "bool")];

/// Primitive types understood without a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Int128,
    Uint128,
    Varint32,
    Varuint32,
    Float32,
    Float64,
    Float128,
    Bytes,
    String,
    Name,
    TimePoint,
    TimePointSec,
    BlockTimestamp,
    SymbolCode,
    Symbol,
    Asset,
    Checksum160,
    Checksum256,
    Checksum512,
    PublicKey,
    PrivateKey,
    Signature,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let b = match name {
            "bool" => Builtin::Bool,
            "int8" => Builtin::Int8,
            "uint8" => Builtin::Uint8,
            "int16" => Builtin::Int16,
            "uint16" => Builtin::Uint16,
            "int32" => Builtin::Int32,
            "uint32" => Builtin::Uint32,
            "int64" => Builtin::Int64,
            "uint64" => Builtin::Uint64,
            "int128" => Builtin::Int128,
            "uint128" => Builtin::Uint128,
            "varint32" => Builtin::Varint32,
            "varuint32" => Builtin::Varuint32,
            "float32" => Builtin::Float32,
            "float64" => Builtin::Float64,
            "float128" => Builtin::Float128,
            "bytes" => Builtin::Bytes,
            "string" => Builtin::String,
            "name" => Builtin::Name,
            "time_point" => Builtin::TimePoint,
            "time_point_sec" => Builtin::TimePointSec,
            "block_timestamp_type" => Builtin::BlockTimestamp,
            "symbol_code" => Builtin::SymbolCode,
            "symbol" => Builtin::Symbol,
            "asset" => Builtin::Asset,
            "checksum160" => Builtin::Checksum160,
            "checksum256" => Builtin::Checksum256,
            "checksum512" => Builtin::Checksum512,
            "public_key" => Builtin::PublicKey,
            "private_key" => Builtin::PrivateKey,
            "signature" => Builtin::Signature,
            _ => return None,
        };
        Some(b)
    }
}

/// Strips every trailing modifier from a type reference
fn base_type_name(name: &str) -> &str {
    name.trim_end_matches(|c| c == '[' || c == ']' || c == '?' || c == '$')
}

/// Named types declared by one ABI document
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    aliases: HashMap<String, String>,
    structs: HashMap<String, StructDef>,
    variants: HashMap<String, Vec<String>>,
}

impl TypeTable {
    pub fn from_abi(abi: &Abi) -> Self {
        let mut table = TypeTable::default();
        // extended_asset is part of the built-in type set
        table.structs.insert(
            "extended_asset".to_string(),
            StructDef {
                name: "extended_asset".to_string(),
                base: String::new(),
                fields: vec![
                    crate::abi::FieldDef {
                        name: "quantity".to_string(),
                        type_name: "asset".to_string(),
                    },
                    crate::abi::FieldDef {
                        name: "contract".to_string(),
                        type_name: "name".to_string(),
                    },
                ],
            },
        );
        for t in &abi.types {
            table
                .aliases
                .insert(t.new_type_name.clone(), t.type_name.clone());
        }
        for s in &abi.structs {
            table.structs.insert(s.name.clone(), s.clone());
        }
        for v in &abi.variants {
            table.variants.insert(v.name.clone(), v.types.clone());
        }
        table
    }

    fn declares(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
            || self.structs.contains_key(name)
            || self.variants.contains_key(name)
    }

    /// Every type reference made by this table's declarations
    fn references(&self) -> impl Iterator<Item = &str> {
        let aliases = self.aliases.values().map(String::as_str);
        let structs = self.structs.values().flat_map(|s| {
            let base = (!s.base.is_empty()).then_some(s.base.as_str());
            base.into_iter()
                .chain(s.fields.iter().map(|f| f.type_name.as_str()))
        });
        let variants = self.variants.values().flatten().map(String::as_str);
        aliases.chain(structs).chain(variants)
    }
}

/// Outcome of one name lookup
enum Resolved<'a> {
    Builtin(Builtin),
    Struct(&'a StructDef),
    Variant(&'a [String]),
    /// Alias whose target carries a modifier and needs re-parsing
    Alias(&'a str),
}

/// Type table of one contract, layered over the chain base table
#[derive(Debug, Clone)]
pub struct ContractSchema {
    account: String,
    types: TypeTable,
    base: Option<Arc<TypeTable>>,
    actions: HashMap<String, String>,
    tables: HashMap<String, String>,
}

impl ContractSchema {
    /// Builds and validates a schema. Fails with [`SchemaError::UnknownType`]
    /// when a declaration references a type that exists in neither table.
    pub fn from_abi(
        account: &str,
        abi: &Abi,
        base: Option<Arc<TypeTable>>,
    ) -> std::result::Result<Self, SchemaError> {
        let schema = ContractSchema {
            account: account.to_string(),
            types: TypeTable::from_abi(abi),
            base,
            actions: abi
                .actions
                .iter()
                .map(|a| (a.name.clone(), a.type_name.clone()))
                .collect(),
            tables: abi
                .tables
                .iter()
                .map(|t| (t.name.clone(), t.type_name.clone()))
                .collect(),
        };

        for reference in schema.types.references() {
            if !schema.knows(base_type_name(reference)) {
                return Err(SchemaError::UnknownType(reference.to_string()));
            }
        }
        Ok(schema)
    }

    /// Builds a schema, retrying once with legacy type names remapped when
    /// the first attempt hits an unknown type.
    pub fn from_abi_with_remap(
        account: &str,
        abi: &Abi,
        base: Option<Arc<TypeTable>>,
    ) -> std::result::Result<Self, SchemaError> {
        match Self::from_abi(account, abi, base.clone()) {
            Ok(schema) => Ok(schema),
            Err(SchemaError::UnknownType(type_name)) => {
                let mut remapped = abi.clone();
                if !remap_legacy_types(&mut remapped) {
                    return Err(SchemaError::Malformed {
                        account: account.to_string(),
                        reason: format!("unknown type {}", type_name),
                    });
                }
                Self::from_abi(account, &remapped, base).map_err(|e| SchemaError::Malformed {
                    account: account.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Type name that encodes the payload of `action`
    pub fn action_type(&self, action: &str) -> Option<&str> {
        self.actions.get(action).map(String::as_str)
    }

    /// Row type `table` is declared with
    pub fn table_type(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Row type used to decode `table`. The declared type is looked up in
    /// the contract table, then the base table; the historical
    /// `self_delegated_bandwidth` name falls back to `delegated_bandwidth`
    /// only when neither declares it. `None` when no type resolves.
    pub fn row_type(&self, table: &str) -> Option<&str> {
        let declared = self.table_type(table)?;
        if self.has_type(declared) {
            return Some(declared);
        }
        match declared {
            "self_delegated_bandwidth" if self.has_type("delegated_bandwidth") => {
                Some("delegated_bandwidth")
            }
            _ => None,
        }
    }

    /// True when the (modifier-stripped) type name is declared or built in
    pub fn has_type(&self, type_name: &str) -> bool {
        self.knows(base_type_name(type_name))
    }

    fn knows(&self, name: &str) -> bool {
        Builtin::from_name(name).is_some()
            || self.types.declares(name)
            || self.base.as_ref().map_or(false, |b| b.declares(name))
    }

    fn lookup(&self, name: &str) -> Option<Resolved<'_>> {
        if let Some(b) = Builtin::from_name(name) {
            return Some(Resolved::Builtin(b));
        }
        let tables = std::iter::once(&self.types).chain(self.base.as_deref());
        for table in tables {
            if let Some(target) = table.aliases.get(name) {
                return Some(Resolved::Alias(target));
            }
            if let Some(def) = table.structs.get(name) {
                return Some(Resolved::Struct(def));
            }
            if let Some(types) = table.variants.get(name) {
                return Some(Resolved::Variant(types));
            }
        }
        None
    }

    /// Follows alias chains until a non-alias or a modified reference
    fn resolve<'a>(&'a self, name: &'a str) -> Result<Resolved<'a>> {
        let mut current = name;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.lookup(current) {
                Some(Resolved::Alias(target)) => {
                    if base_type_name(target) != target {
                        return Ok(Resolved::Alias(target));
                    }
                    current = target;
                }
                Some(resolved) => return Ok(resolved),
                None => return Err(SerializationError::UnknownType(current.to_string())),
            }
        }
        Err(SerializationError::mismatch(name, "alias cycle"))
    }

    /// Decodes a complete value of `type_name` from `bytes`
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value> {
        let mut buf = SerialBuffer::new(bytes);
        self.decode_from(type_name, &mut buf)
    }

    /// Decodes one value of `type_name` at the buffer's current position
    pub fn decode_from(&self, type_name: &str, buf: &mut SerialBuffer<'_>) -> Result<Value> {
        self.decode_inner(type_name, buf, 0)
    }

    fn decode_inner(&self, type_name: &str, buf: &mut SerialBuffer<'_>, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(SerializationError::mismatch(type_name, "nesting too deep"));
        }
        if let Some(inner) = type_name.strip_suffix("[]") {
            let len = buf.get_varuint32()? as usize;
            let mut items = Vec::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                items.push(self.decode_inner(inner, buf, depth + 1)?);
            }
            return Ok(Value::Array(items));
        }
        if let Some(inner) = type_name.strip_suffix('?') {
            return if buf.get_u8()? != 0 {
                self.decode_inner(inner, buf, depth + 1)
            } else {
                Ok(Value::Null)
            };
        }
        if let Some(inner) = type_name.strip_suffix('$') {
            return if buf.have_read_data() {
                self.decode_inner(inner, buf, depth + 1)
            } else {
                Ok(Value::Null)
            };
        }

        match self.resolve(type_name)? {
            Resolved::Builtin(b) => decode_builtin(b, buf),
            Resolved::Struct(def) => {
                let mut map = Map::new();
                self.decode_struct_into(def, buf, depth, &mut map)?;
                Ok(Value::Object(map))
            }
            Resolved::Variant(types) => {
                let index = buf.get_varuint32()? as usize;
                let variant = types.get(index).ok_or_else(|| {
                    SerializationError::mismatch(type_name, format!("variant index {} out of range", index))
                })?;
                let value = self.decode_inner(variant, buf, depth + 1)?;
                Ok(Value::Array(vec![Value::String(variant.clone()), value]))
            }
            Resolved::Alias(target) => self.decode_inner(target, buf, depth + 1),
        }
    }

    fn decode_struct_into(
        &self,
        def: &StructDef,
        buf: &mut SerialBuffer<'_>,
        depth: usize,
        map: &mut Map<String, Value>,
    ) -> Result<()> {
        if !def.base.is_empty() {
            match self.resolve(&def.base)? {
                Resolved::Struct(base) => self.decode_struct_into(base, buf, depth + 1, map)?,
                _ => return Err(SerializationError::mismatch(&def.name, "base is not a struct")),
            }
        }
        for field in &def.fields {
            if let Some(inner) = field.type_name.strip_suffix('$') {
                // trailing extension fields are omitted when the data ends early
                if !buf.have_read_data() {
                    break;
                }
                map.insert(field.name.clone(), self.decode_inner(inner, buf, depth + 1)?);
            } else {
                map.insert(
                    field.name.clone(),
                    self.decode_inner(&field.type_name, buf, depth + 1)?,
                );
            }
        }
        Ok(())
    }

    /// Encodes `value` as `type_name`
    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Vec<u8>> {
        let mut w = SerialWriter::new();
        self.encode_inner(type_name, value, &mut w, 0)?;
        Ok(w.into_bytes())
    }

    fn encode_inner(&self, type_name: &str, value: &Value, w: &mut SerialWriter, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(SerializationError::mismatch(type_name, "nesting too deep"));
        }
        if let Some(inner) = type_name.strip_suffix("[]") {
            let items = value
                .as_array()
                .ok_or_else(|| SerializationError::mismatch(type_name, "expected array"))?;
            w.push_varuint32(items.len() as u32);
            for item in items {
                self.encode_inner(inner, item, w, depth + 1)?;
            }
            return Ok(());
        }
        if let Some(inner) = type_name.strip_suffix('?') {
            if value.is_null() {
                w.push_u8(0);
                return Ok(());
            }
            w.push_u8(1);
            return self.encode_inner(inner, value, w, depth + 1);
        }
        if let Some(inner) = type_name.strip_suffix('$') {
            return self.encode_inner(inner, value, w, depth + 1);
        }

        match self.resolve(type_name)? {
            Resolved::Builtin(b) => encode_builtin(b, type_name, value, w),
            Resolved::Struct(def) => {
                let map = value
                    .as_object()
                    .ok_or_else(|| SerializationError::mismatch(type_name, "expected object"))?;
                self.encode_struct(def, map, w, depth)
            }
            Resolved::Variant(types) => {
                let pair = value
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| SerializationError::mismatch(type_name, "expected [type, value]"))?;
                let tag = pair[0]
                    .as_str()
                    .ok_or_else(|| SerializationError::mismatch(type_name, "variant tag must be a string"))?;
                let index = types.iter().position(|t| t == tag).ok_or_else(|| {
                    SerializationError::mismatch(type_name, format!("unknown variant {}", tag))
                })?;
                w.push_varuint32(index as u32);
                self.encode_inner(tag, &pair[1], w, depth + 1)
            }
            Resolved::Alias(target) => self.encode_inner(target, value, w, depth + 1),
        }
    }

    fn encode_struct(
        &self,
        def: &StructDef,
        map: &Map<String, Value>,
        w: &mut SerialWriter,
        depth: usize,
    ) -> Result<()> {
        if !def.base.is_empty() {
            match self.resolve(&def.base)? {
                Resolved::Struct(base) => self.encode_struct(base, map, w, depth + 1)?,
                _ => return Err(SerializationError::mismatch(&def.name, "base is not a struct")),
            }
        }
        for field in &def.fields {
            match (map.get(&field.name), field.type_name.strip_suffix('$')) {
                (Some(v), _) => self.encode_inner(&field.type_name, v, w, depth + 1)?,
                (None, Some(_)) => break,
                (None, None) => {
                    return Err(SerializationError::mismatch(
                        &def.name,
                        format!("missing field {}", field.name),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Replaces legacy type names in every declaration. Returns whether anything changed.
pub fn remap_legacy_types(abi: &mut Abi) -> bool {
    fn remap(type_name: &mut String) -> bool {
        let base = base_type_name(type_name);
        for (from, to) in LEGACY_TYPE_REMAP {
            if base == *from {
                let suffix = type_name[base.len()..].to_string();
                *type_name = format!("{}{}", to, suffix);
                return true;
            }
        }
        false
    }

    let mut changed = false;
    for t in &mut abi.types {
        changed |= remap(&mut t.type_name);
    }
    for s in &mut abi.structs {
        for f in &mut s.fields {
            changed |= remap(&mut f.type_name);
        }
    }
    for v in &mut abi.variants {
        for t in &mut v.types {
            changed |= remap(t);
        }
    }
    changed
}

fn number<T: Into<Number>>(v: T) -> Value {
    Value::Number(v.into())
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn decode_builtin(b: Builtin, buf: &mut SerialBuffer<'_>) -> Result<Value> {
    let value = match b {
        Builtin::Bool => Value::Bool(buf.get_u8()? != 0),
        Builtin::Int8 => number(buf.get_i8()?),
        Builtin::Uint8 => number(buf.get_u8()?),
        Builtin::Int16 => number(buf.get_i16()?),
        Builtin::Uint16 => number(buf.get_u16()?),
        Builtin::Int32 => number(buf.get_i32()?),
        Builtin::Uint32 => number(buf.get_u32()?),
        Builtin::Varint32 => number(buf.get_varint32()?),
        Builtin::Varuint32 => number(buf.get_varuint32()?),
        Builtin::Int64 => Value::String(buf.get_i64()?.to_string()),
        Builtin::Uint64 => Value::String(buf.get_u64()?.to_string()),
        Builtin::Int128 => Value::String(buf.get_i128()?.to_string()),
        Builtin::Uint128 => Value::String(buf.get_u128()?.to_string()),
        Builtin::Float32 => float(buf.get_f32()? as f64),
        Builtin::Float64 => float(buf.get_f64()?),
        Builtin::Float128 => Value::String(hex::encode_upper(buf.read_bytes(16)?)),
        Builtin::Bytes => Value::String(hex::encode_upper(buf.get_bytes()?)),
        Builtin::String => Value::String(buf.get_string()?),
        Builtin::Name => Value::String(buf.get_name()?),
        Builtin::TimePoint => Value::String(buf.get_time_point()?),
        Builtin::TimePointSec => Value::String(buf.get_time_point_sec()?),
        Builtin::BlockTimestamp => Value::String(buf.get_block_timestamp()?),
        Builtin::SymbolCode => Value::String(buf.get_symbol_code()?),
        Builtin::Symbol => {
            let (precision, code) = buf.get_symbol()?;
            Value::String(format!("{},{}", precision, code))
        }
        Builtin::Asset => Value::String(buf.get_asset()?),
        Builtin::Checksum160 => Value::String(hex::encode_upper(buf.read_bytes(20)?)),
        Builtin::Checksum256 => Value::String(hex::encode_upper(buf.read_bytes(32)?)),
        Builtin::Checksum512 => Value::String(hex::encode_upper(buf.read_bytes(64)?)),
        Builtin::PublicKey => Value::String(buf.get_public_key()?),
        Builtin::PrivateKey => Value::String(buf.get_private_key()?),
        Builtin::Signature => Value::String(buf.get_signature()?),
    };
    Ok(value)
}

fn as_str<'v>(type_name: &str, value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| SerializationError::mismatch(type_name, "expected string"))
}

fn as_i128(type_name: &str, value: &Value) -> Result<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .ok_or_else(|| SerializationError::mismatch(type_name, "expected integer")),
        Value::String(s) => s
            .parse::<i128>()
            .map_err(|_| SerializationError::mismatch(type_name, format!("invalid integer {}", s))),
        _ => Err(SerializationError::mismatch(type_name, "expected integer")),
    }
}

fn ranged<T: TryFrom<i128>>(type_name: &str, value: &Value) -> Result<T> {
    T::try_from(as_i128(type_name, value)?)
        .map_err(|_| SerializationError::mismatch(type_name, "integer out of range"))
}

fn as_f64(type_name: &str, value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SerializationError::mismatch(type_name, "expected number"))
}

fn fixed_hex(type_name: &str, value: &Value, len: usize) -> Result<Vec<u8>> {
    let raw = hex::decode(as_str(type_name, value)?)
        .map_err(|e| SerializationError::mismatch(type_name, e.to_string()))?;
    if raw.len() != len {
        return Err(SerializationError::mismatch(
            type_name,
            format!("expected {} bytes, got {}", len, raw.len()),
        ));
    }
    Ok(raw)
}

fn encode_builtin(b: Builtin, type_name: &str, value: &Value, w: &mut SerialWriter) -> Result<()> {
    match b {
        Builtin::Bool => {
            let flag = match value {
                Value::Bool(v) => *v,
                other => as_i128(type_name, other)? != 0,
            };
            w.push_u8(flag as u8);
        }
        Builtin::Int8 => w.push_u8(ranged::<i8>(type_name, value)? as u8),
        Builtin::Uint8 => w.push_u8(ranged::<u8>(type_name, value)?),
        Builtin::Int16 => w.push_raw(&ranged::<i16>(type_name, value)?.to_le_bytes()),
        Builtin::Uint16 => w.push_u16(ranged::<u16>(type_name, value)?),
        Builtin::Int32 => w.push_raw(&ranged::<i32>(type_name, value)?.to_le_bytes()),
        Builtin::Uint32 => w.push_u32(ranged::<u32>(type_name, value)?),
        Builtin::Varint32 => w.push_varint32(ranged::<i32>(type_name, value)?),
        Builtin::Varuint32 => w.push_varuint32(ranged::<u32>(type_name, value)?),
        Builtin::Int64 => w.push_i64(ranged::<i64>(type_name, value)?),
        Builtin::Uint64 => w.push_u64(ranged::<u64>(type_name, value)?),
        Builtin::Int128 => w.push_raw(&as_i128(type_name, value)?.to_le_bytes()),
        Builtin::Uint128 => {
            let s = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let v = s
                .parse::<u128>()
                .map_err(|_| SerializationError::mismatch(type_name, format!("invalid integer {}", s)))?;
            w.push_raw(&v.to_le_bytes());
        }
        Builtin::Float32 => w.push_raw(&(as_f64(type_name, value)? as f32).to_le_bytes()),
        Builtin::Float64 => w.push_raw(&as_f64(type_name, value)?.to_le_bytes()),
        Builtin::Float128 => w.push_raw(&fixed_hex(type_name, value, 16)?),
        Builtin::Bytes => {
            let raw = hex::decode(as_str(type_name, value)?)
                .map_err(|e| SerializationError::mismatch(type_name, e.to_string()))?;
            w.push_bytes(&raw);
        }
        Builtin::String => w.push_string(as_str(type_name, value)?),
        Builtin::Name => w.push_name(as_str(type_name, value)?)?,
        Builtin::TimePoint => w.push_time_point(as_str(type_name, value)?)?,
        Builtin::TimePointSec => w.push_time_point_sec(as_str(type_name, value)?)?,
        Builtin::BlockTimestamp => w.push_block_timestamp(as_str(type_name, value)?)?,
        Builtin::SymbolCode => w.push_symbol_code(as_str(type_name, value)?)?,
        Builtin::Symbol => {
            let s = as_str(type_name, value)?;
            let (precision, code) = s
                .split_once(',')
                .and_then(|(p, c)| p.parse::<u8>().ok().map(|p| (p, c)))
                .ok_or_else(|| SerializationError::InvalidSymbol(s.to_string()))?;
            w.push_symbol(precision, code)?;
        }
        Builtin::Asset => w.push_asset(as_str(type_name, value)?)?,
        Builtin::Checksum160 => w.push_raw(&fixed_hex(type_name, value, 20)?),
        Builtin::Checksum256 => w.push_raw(&fixed_hex(type_name, value, 32)?),
        Builtin::Checksum512 => w.push_raw(&fixed_hex(type_name, value, 64)?),
        Builtin::PublicKey => w.push_public_key(as_str(type_name, value)?)?,
        Builtin::PrivateKey => w.push_private_key(as_str(type_name, value)?)?,
        Builtin::Signature => w.push_signature(as_str(type_name, value)?)?,
    }
    Ok(())
}
