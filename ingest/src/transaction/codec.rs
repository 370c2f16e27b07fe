//! Transaction envelope codec.
//!
//! Turns an untrusted request body into a [`TransactionRecord`] or a typed
//! [`ValidationError`]. Pure and allocation-light: no I/O, no clocks, no
//! randomness. The same bytes always decode to the same record, including
//! the server-generated id when the caller supplied none.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use uuid::Uuid;

use super::types::{TransactionId, TransactionRecord};

/// Longest accepted caller-supplied id.
pub const MAX_ID_LEN: usize = 128;

/// Namespace for ids derived from payload bytes (UUIDv5).
const GENERATED_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b7d_4e0a_8c3f_5d2b_1a90_e7c4);

const FIELD_ID: &str = "id";
const FIELD_AMOUNT: &str = "amount";
const FIELD_CURRENCY: &str = "currency";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Machine-readable reason a payload was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationReason {
    /// Not a parseable JSON object, or a pass-through field has the wrong shape.
    Malformed,
    /// A required field is absent or null.
    MissingField,
    /// `amount` is not a number, is negative, or is out of range.
    InvalidAmount,
    /// `id` was supplied but is not a usable key.
    InvalidId,
}

impl ValidationReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::Malformed => "MALFORMED",
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidId => "INVALID_ID",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The caller sent something we will not publish. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: {detail}")]
pub struct ValidationError {
    pub reason: ValidationReason,
    pub detail: String,
}

impl ValidationError {
    fn new(reason: ValidationReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ValidationReason::Malformed, detail)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes and validates a raw transaction payload.
///
/// On success the record is `Validated` and `raw_payload` holds `raw`
/// byte-for-byte. All failures are returned as [`ValidationError`]; no
/// input makes this function panic.
pub fn decode(raw: &[u8]) -> Result<TransactionRecord, ValidationError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::malformed("empty payload"));
    }

    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| ValidationError::malformed(format!("invalid JSON: {e}")))?;

    let mut fields = match value {
        Value::Object(map) => map,
        other => {
            return Err(ValidationError::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    let amount = match fields.remove(FIELD_AMOUNT) {
        None | Some(Value::Null) => {
            return Err(ValidationError::new(
                ValidationReason::MissingField,
                "amount is required",
            ))
        }
        Some(Value::Number(n)) => parse_amount(&n)?,
        Some(other) => {
            return Err(ValidationError::new(
                ValidationReason::InvalidAmount,
                format!("amount must be a number, got {}", json_kind(&other)),
            ))
        }
    };

    let (id, id_generated) = match fields.remove(FIELD_ID) {
        None | Some(Value::Null) => (generated_id(raw), true),
        Some(supplied) => (parse_id(supplied)?, false),
    };

    let currency = match fields.remove(FIELD_CURRENCY) {
        None | Some(Value::Null) => None,
        Some(Value::String(code)) => Some(code),
        Some(other) => {
            return Err(ValidationError::malformed(format!(
                "currency must be a string, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut record = TransactionRecord::received(id, amount, Bytes::copy_from_slice(raw));
    record.id_generated = id_generated;
    record.currency = currency;
    record.attributes = fields;
    Ok(record.into_validated())
}

/// Exponents beyond this either overflow `Decimal` or round to zero.
const MAX_EXPONENT_SHIFT: u64 = 64;

fn parse_amount(n: &Number) -> Result<Decimal, ValidationError> {
    // Source text of the literal; never went through f64.
    let text = n.as_str();

    if is_negative_literal(text) {
        return Err(ValidationError::new(
            ValidationReason::InvalidAmount,
            format!("amount must be non-negative, got {text}"),
        ));
    }
    let amount = decimal_from_literal(text).ok_or_else(|| {
        ValidationError::new(
            ValidationReason::InvalidAmount,
            format!("amount {text} is out of range"),
        )
    })?;

    if amount.is_zero() {
        return Ok(Decimal::ZERO);
    }
    Ok(amount)
}

/// A leading minus with at least one non-zero mantissa digit. `-0.0` is zero.
fn is_negative_literal(text: &str) -> bool {
    let mantissa = text.split(|c: char| c == 'e' || c == 'E').next().unwrap_or(text);
    mantissa.starts_with('-') && mantissa.bytes().any(|b| (b'1'..=b'9').contains(&b))
}

/// Parses a JSON number literal. Exact whenever `Decimal` can hold the value;
/// digits past the 28th decimal place are rounded away.
fn decimal_from_literal(text: &str) -> Option<Decimal> {
    if let Ok(exact) = Decimal::from_str_exact(text) {
        return Some(exact);
    }

    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(at) => (&text[..at], text[at + 1..].parse::<i64>().ok()?),
        None => (text, 0),
    };
    let mut value = Decimal::from_str(mantissa).ok()?;
    if value.is_zero() {
        return Some(Decimal::ZERO);
    }

    let shift = exponent.unsigned_abs();
    if exponent > 0 {
        if shift > MAX_EXPONENT_SHIFT {
            return None;
        }
        for _ in 0..shift {
            value = value.checked_mul(Decimal::TEN)?;
        }
    } else {
        for _ in 0..shift.min(MAX_EXPONENT_SHIFT) {
            value = value.checked_div(Decimal::TEN)?;
        }
    }
    Some(value.normalize())
}

fn parse_id(value: Value) -> Result<TransactionId, ValidationError> {
    match value {
        Value::String(s) => {
            if s.is_empty() || s.len() > MAX_ID_LEN {
                return Err(ValidationError::new(
                    ValidationReason::InvalidId,
                    format!("id must be 1..={MAX_ID_LEN} characters"),
                ));
            }
            if !s.chars().all(is_id_char) {
                return Err(ValidationError::new(
                    ValidationReason::InvalidId,
                    "id may only contain ASCII letters, digits, '.', '_', ':' and '-'",
                ));
            }
            Ok(TransactionId::new(s))
        }
        Value::Number(n) => n.as_u64().map(|v| TransactionId::new(v.to_string())).ok_or_else(|| {
            ValidationError::new(
                ValidationReason::InvalidId,
                format!("numeric id must be a non-negative integer, got {n}"),
            )
        }),
        other => Err(ValidationError::new(
            ValidationReason::InvalidId,
            format!("id must be a string or integer, got {}", json_kind(&other)),
        )),
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')
}

/// Deterministic id for payloads without one: identical bytes, identical id.
fn generated_id(raw: &[u8]) -> TransactionId {
    TransactionId::new(Uuid::new_v5(&GENERATED_ID_NAMESPACE, raw).to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
