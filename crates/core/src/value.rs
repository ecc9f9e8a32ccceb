//! Dynamically-typed SQL values exchanged with the remote service.
//!
//! Remote rows arrive loosely typed and schema-varying; each cell is one of
//! a closed set of tags and consumers pattern-match on it instead of
//! downcasting.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;

/// One cell of a remote row, or one statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// A remote row keyed by column name.
pub type Row = HashMap<String, SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; numeric text degrades gracefully.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(v) => Some(*v as f64),
            SqlValue::Real(v) => Some(*v),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Byte view of a template payload. Text cells are decoded as base64
    /// first, then as hex; undecodable text yields `None`.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            SqlValue::Blob(bytes) => Some(bytes.clone()),
            SqlValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                if let Ok(bytes) = BASE64.decode(trimmed) {
                    return Some(bytes);
                }
                decode_hex(trimmed)
            }
            _ => None,
        }
    }

    /// Canonical string projection, used for change detection on roster rows
    /// and for mirroring arbitrary remote columns as local text.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Blob(bytes) => BASE64.encode(bytes),
        }
    }
}

/// Looks a value up by any of the candidate keys, exact first, then
/// case-insensitive. Remote deployments disagree on column casing.
pub fn get_value<'a>(row: &'a Row, keys: &[&str]) -> Option<&'a SqlValue> {
    for key in keys {
        if let Some(value) = row.get(*key) {
            return Some(value);
        }
    }
    for key in keys {
        if let Some(value) = row
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
        {
            return Some(value);
        }
    }
    None
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if s.len() % 2 != 0 || s.is_empty() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
