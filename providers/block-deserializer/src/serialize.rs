//! Chain binary encoding primitives
//!
//! Little-endian fixed width integers, LEB128 style `varuint32`, zig-zag
//! `varint32`, base32 account names and the string forms used in decoded
//! documents (decimal strings for 64/128-bit integers, uppercase hex for
//! bytes and checksums, `"1.0000 EOS"` assets, millisecond UTC timestamps
//! without a zone suffix).

use crate::error::SerializationError;
use chrono::{DateTime, NaiveDateTime};
use ripemd::{Digest, Ripemd160};

type Result<T> = std::result::Result<T, SerializationError>;

const NAME_CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";
const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Milliseconds between the unix epoch and the block timestamp epoch (2000-01-01)
pub const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
/// Block slot length in milliseconds
pub const BLOCK_INTERVAL_MS: i64 = 500;

/// Read cursor over an encoded byte slice
#[derive(Debug, Clone)]
pub struct SerialBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SerialBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True while unread data remains
    pub fn have_read_data(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SerializationError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Slice of everything consumed since `start`
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.pos]
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn get_u128(&mut self) -> Result<u128> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    pub fn get_i128(&mut self) -> Result<i128> {
        Ok(i128::from_le_bytes(self.read_array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    pub fn get_varuint32(&mut self) -> Result<u32> {
        let mut value: u64 = 0;
        let mut bit = 0u32;
        loop {
            let b = self.get_u8()?;
            value |= ((b & 0x7f) as u64) << bit;
            bit += 7;
            if b & 0x80 == 0 {
                break;
            }
            if bit >= 35 {
                return Err(SerializationError::InvalidVarint);
            }
        }
        Ok(value as u32)
    }

    pub fn get_varint32(&mut self) -> Result<i32> {
        let v = self.get_varuint32()?;
        if v & 1 != 0 {
            Ok(!(v >> 1) as i32)
        } else {
            Ok((v >> 1) as i32)
        }
    }

    /// Length-prefixed byte string
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_varuint32()? as usize;
        self.read_bytes(len)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| SerializationError::InvalidUtf8)
    }

    pub fn get_name(&mut self) -> Result<String> {
        Ok(name_to_string(self.get_u64()?))
    }

    pub fn get_symbol_code(&mut self) -> Result<String> {
        let raw = self.read_bytes(8)?;
        Ok(symbol_chars(raw))
    }

    /// Returns `(precision, code)`
    pub fn get_symbol(&mut self) -> Result<(u8, String)> {
        let precision = self.get_u8()?;
        let raw = self.read_bytes(7)?;
        Ok((precision, symbol_chars(raw)))
    }

    pub fn get_asset(&mut self) -> Result<String> {
        let amount = self.get_i64()?;
        let (precision, code) = self.get_symbol()?;
        Ok(format!("{} {}", format_amount(amount, precision), code))
    }

    pub fn get_time_point(&mut self) -> Result<String> {
        time_point_to_string(self.get_i64()?)
    }

    pub fn get_time_point_sec(&mut self) -> Result<String> {
        time_point_sec_to_string(self.get_u32()?)
    }

    pub fn get_block_timestamp(&mut self) -> Result<String> {
        block_timestamp_to_string(self.get_u32()?)
    }

    pub fn get_public_key(&mut self) -> Result<String> {
        let key_type = KeyType::from_byte(self.get_u8()?)?;
        let start = self.pos;
        match key_type {
            KeyType::K1 | KeyType::R1 => {
                self.read_bytes(33)?;
            }
            KeyType::Wa => {
                self.read_bytes(34)?;
                let rpid_len = self.get_varuint32()? as usize;
                self.read_bytes(rpid_len)?;
            }
        }
        Ok(key_to_string(key_type, self.consumed_since(start), "PUB_"))
    }

    pub fn get_private_key(&mut self) -> Result<String> {
        let key_type = KeyType::from_byte(self.get_u8()?)?;
        let data = self.read_bytes(32)?;
        Ok(key_to_string(key_type, data, "PVT_"))
    }

    pub fn get_signature(&mut self) -> Result<String> {
        let key_type = KeyType::from_byte(self.get_u8()?)?;
        let start = self.pos;
        self.read_bytes(65)?;
        if key_type == KeyType::Wa {
            let auth_len = self.get_varuint32()? as usize;
            self.read_bytes(auth_len)?;
            let json_len = self.get_varuint32()? as usize;
            self.read_bytes(json_len)?;
        }
        Ok(key_to_string(key_type, self.consumed_since(start), "SIG_"))
    }
}

/// Append-only encoder, the inverse of [`SerialBuffer`]
#[derive(Debug, Default, Clone)]
pub struct SerialWriter {
    buf: Vec<u8>,
}

impl SerialWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn push_raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn push_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.push_raw(&v.to_le_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.push_raw(&v.to_le_bytes());
    }

    pub fn push_u64(&mut self, v: u64) {
        self.push_raw(&v.to_le_bytes());
    }

    pub fn push_i64(&mut self, v: i64) {
        self.push_raw(&v.to_le_bytes());
    }

    pub fn push_varuint32(&mut self, mut v: u32) {
        loop {
            if v >> 7 != 0 {
                self.push_u8(0x80 | (v & 0x7f) as u8);
                v >>= 7;
            } else {
                self.push_u8(v as u8);
                break;
            }
        }
    }

    pub fn push_varint32(&mut self, v: i32) {
        self.push_varuint32(((v << 1) ^ (v >> 31)) as u32);
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        self.push_varuint32(data.len() as u32);
        self.push_raw(data);
    }

    pub fn push_string(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_name(&mut self, name: &str) -> Result<()> {
        self.push_u64(string_to_name(name)?);
        Ok(())
    }

    pub fn push_symbol_code(&mut self, code: &str) -> Result<()> {
        validate_symbol_code(code)?;
        let mut raw = [0u8; 8];
        raw[..code.len()].copy_from_slice(code.as_bytes());
        self.push_raw(&raw);
        Ok(())
    }

    pub fn push_symbol(&mut self, precision: u8, code: &str) -> Result<()> {
        validate_symbol_code(code)?;
        if code.len() > 7 {
            return Err(SerializationError::InvalidSymbol(code.to_string()));
        }
        self.push_u8(precision);
        let mut raw = [0u8; 7];
        raw[..code.len()].copy_from_slice(code.as_bytes());
        self.push_raw(&raw);
        Ok(())
    }

    pub fn push_asset(&mut self, s: &str) -> Result<()> {
        let (amount, precision, code) = parse_asset(s)?;
        self.push_i64(amount);
        self.push_symbol(precision, &code)
    }

    pub fn push_time_point(&mut self, s: &str) -> Result<()> {
        let dt = parse_timestamp(s)?;
        self.push_i64(dt.and_utc().timestamp_micros());
        Ok(())
    }

    pub fn push_time_point_sec(&mut self, s: &str) -> Result<()> {
        let dt = parse_timestamp(s)?;
        let secs = u32::try_from(dt.and_utc().timestamp())
            .map_err(|_| SerializationError::InvalidTime(s.to_string()))?;
        self.push_u32(secs);
        Ok(())
    }

    pub fn push_block_timestamp(&mut self, s: &str) -> Result<()> {
        let ms = parse_timestamp(s)?.and_utc().timestamp_millis();
        let slot = ((ms - BLOCK_TIMESTAMP_EPOCH_MS) as f64 / BLOCK_INTERVAL_MS as f64).round();
        if !(0.0..=u32::MAX as f64).contains(&slot) {
            return Err(SerializationError::InvalidTime(s.to_string()));
        }
        self.push_u32(slot as u32);
        Ok(())
    }

    pub fn push_public_key(&mut self, s: &str) -> Result<()> {
        let (key_type, data) = if let Some(legacy) = s.strip_prefix("EOS") {
            let raw = base58_decode(legacy)?;
            if raw.len() != 37 {
                return Err(SerializationError::InvalidKey(s.to_string()));
            }
            let (data, check) = raw.split_at(33);
            if ripemd160(&[data])[..4] != *check {
                return Err(SerializationError::InvalidKey(s.to_string()));
            }
            (KeyType::K1, data.to_vec())
        } else {
            key_from_string(s, "PUB_")?
        };
        self.push_u8(key_type as u8);
        self.push_raw(&data);
        Ok(())
    }

    pub fn push_private_key(&mut self, s: &str) -> Result<()> {
        let (key_type, data) = key_from_string(s, "PVT_")?;
        self.push_u8(key_type as u8);
        self.push_raw(&data);
        Ok(())
    }

    pub fn push_signature(&mut self, s: &str) -> Result<()> {
        let (key_type, data) = key_from_string(s, "SIG_")?;
        self.push_u8(key_type as u8);
        self.push_raw(&data);
        Ok(())
    }
}

/// Renders a 64-bit account name in its base32 text form, trailing dots trimmed
pub fn name_to_string(value: u64) -> String {
    let mut out = [b'.'; 13];
    let mut tmp = value;
    for i in 0..=12 {
        let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
        out[12 - i] = NAME_CHARMAP[(tmp & mask) as usize];
        tmp >>= shift;
    }
    let s = String::from_utf8_lossy(&out);
    s.trim_end_matches('.').to_string()
}

/// Parses an account name into its 64-bit form
pub fn string_to_name(s: &str) -> Result<u64> {
    let bytes = s.as_bytes();
    if bytes.len() > 13 {
        return Err(SerializationError::InvalidName(s.to_string()));
    }
    let mut value: u64 = 0;
    for (i, c) in bytes.iter().enumerate() {
        let sym = char_to_symbol(*c).ok_or_else(|| SerializationError::InvalidName(s.to_string()))?;
        if i < 12 {
            value |= (sym & 0x1f) << (64 - 5 * (i + 1));
        } else {
            if sym > 0x0f {
                return Err(SerializationError::InvalidName(s.to_string()));
            }
            value |= sym & 0x0f;
        }
    }
    Ok(value)
}

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

fn symbol_chars(raw: &[u8]) -> String {
    let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

fn validate_symbol_code(code: &str) -> Result<()> {
    if code.is_empty() || code.len() > 7 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(SerializationError::InvalidSymbol(code.to_string()));
    }
    Ok(())
}

/// Formats a raw integer amount with `precision` decimal places
pub fn format_amount(amount: i64, precision: u8) -> String {
    let digits = amount.unsigned_abs().to_string();
    let precision = precision as usize;
    let padded = format!("{:0>width$}", digits, width = precision + 1);
    let sign = if amount < 0 { "-" } else { "" };
    if precision == 0 {
        format!("{}{}", sign, padded)
    } else {
        let split = padded.len() - precision;
        format!("{}{}.{}", sign, &padded[..split], &padded[split..])
    }
}

/// Parses `"-1.0000 EOS"` into `(raw amount, precision, code)`
pub fn parse_asset(s: &str) -> Result<(i64, u8, String)> {
    let s = s.trim();
    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut amount = String::new();
    if bytes.first() == Some(&b'-') {
        amount.push('-');
        pos += 1;
    }
    let digits_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        amount.push(bytes[pos] as char);
        pos += 1;
    }
    if pos == digits_start {
        return Err(SerializationError::InvalidAsset(s.to_string()));
    }
    let mut precision: u8 = 0;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            amount.push(bytes[pos] as char);
            precision = precision
                .checked_add(1)
                .ok_or_else(|| SerializationError::InvalidAsset(s.to_string()))?;
            pos += 1;
        }
    }
    let code = s[pos..].trim().to_string();
    validate_symbol_code(&code).map_err(|_| SerializationError::InvalidAsset(s.to_string()))?;
    let raw = amount
        .parse::<i64>()
        .map_err(|_| SerializationError::InvalidAsset(s.to_string()))?;
    Ok((raw, precision, code))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| SerializationError::InvalidTime(s.to_string()))
}

pub fn time_point_to_string(micros: i64) -> Result<String> {
    DateTime::from_timestamp_millis(micros.div_euclid(1000))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .ok_or_else(|| SerializationError::InvalidTime(micros.to_string()))
}

pub fn time_point_sec_to_string(secs: u32) -> Result<String> {
    DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .ok_or_else(|| SerializationError::InvalidTime(secs.to_string()))
}

pub fn block_timestamp_to_string(slot: u32) -> Result<String> {
    let ms = slot as i64 * BLOCK_INTERVAL_MS + BLOCK_TIMESTAMP_EPOCH_MS;
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .ok_or_else(|| SerializationError::InvalidTime(slot.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum KeyType {
    K1 = 0,
    R1 = 1,
    Wa = 2,
}

impl KeyType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(KeyType::K1),
            1 => Ok(KeyType::R1),
            2 => Ok(KeyType::Wa),
            other => Err(SerializationError::InvalidKey(format!("key type {}", other))),
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            KeyType::K1 => "K1",
            KeyType::R1 => "R1",
            KeyType::Wa => "WA",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "K1" => Some(KeyType::K1),
            "R1" => Some(KeyType::R1),
            "WA" => Some(KeyType::Wa),
            _ => None,
        }
    }
}

fn ripemd160(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn key_to_string(key_type: KeyType, data: &[u8], prefix: &str) -> String {
    let suffix = key_type.suffix();
    let digest = ripemd160(&[data, suffix.as_bytes()]);
    let mut whole = data.to_vec();
    whole.extend_from_slice(&digest[..4]);
    format!("{}{}_{}", prefix, suffix, base58_encode(&whole))
}

fn key_from_string(s: &str, prefix: &str) -> Result<(KeyType, Vec<u8>)> {
    let invalid = || SerializationError::InvalidKey(s.to_string());
    let rest = s.strip_prefix(prefix).ok_or_else(invalid)?;
    let (suffix, encoded) = rest.split_once('_').ok_or_else(invalid)?;
    let key_type = KeyType::from_suffix(suffix).ok_or_else(invalid)?;
    let raw = base58_decode(encoded)?;
    if raw.len() < 4 {
        return Err(invalid());
    }
    let (data, check) = raw.split_at(raw.len() - 4);
    if ripemd160(&[data, suffix.as_bytes()])[..4] != *check {
        return Err(invalid());
    }
    Ok((key_type, data.to_vec()))
}

pub fn base58_encode(data: &[u8]) -> String {
    let zeros = data.iter().take_while(|b| **b == 0).count();
    // base-58 digits, least significant first
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for byte in &data[zeros..] {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|d| BASE58_ALPHABET[*d as usize] as char));
    out
}

pub fn base58_decode(s: &str) -> Result<Vec<u8>> {
    let zeros = s.bytes().take_while(|b| *b == b'1').count();
    // base-256 bytes, least significant first
    let mut bytes: Vec<u8> = Vec::with_capacity(s.len());
    for c in s.bytes().skip(zeros) {
        let mut carry = BASE58_ALPHABET
            .iter()
            .position(|a| *a == c)
            .ok_or_else(|| SerializationError::InvalidKey(s.to_string()))? as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}
