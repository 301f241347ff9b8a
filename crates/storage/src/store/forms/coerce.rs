#![forbid(unsafe_code)]

use crate::store::{BINARY_PREFIX, FieldValue};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use tb_core::FieldType;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

const TRUTHY: &[&str] = &["true", "yes", "y", "1", "on", "checked", "x"];
const FALSY: &[&str] = &["false", "no", "n", "0", "off", "unchecked", ""];

/// Converts a raw JSON value to the declared field type. The error string is
/// the user-facing diagnostic message.
pub fn coerce_value(field_type: FieldType, raw: &Value) -> Result<FieldValue, String> {
    match field_type {
        FieldType::String | FieldType::Markdown => coerce_text(raw).map(FieldValue::Text),
        FieldType::Number | FieldType::Double | FieldType::Float => {
            coerce_number(raw).map(FieldValue::Number)
        }
        FieldType::Integer => coerce_integer(raw).map(FieldValue::Integer),
        FieldType::Boolean => coerce_boolean(raw).map(FieldValue::Boolean),
        FieldType::Date => coerce_date(raw).map(FieldValue::Date),
        FieldType::Time => coerce_time(raw).map(FieldValue::Time),
        FieldType::Timestamp => coerce_timestamp(raw, false).map(FieldValue::Timestamp),
        FieldType::TimestampTz => coerce_timestamp(raw, true).map(FieldValue::Timestamp),
        FieldType::Uuid => coerce_uuid(raw).map(FieldValue::Uuid),
        FieldType::Binary => coerce_binary(raw).map(FieldValue::Binary),
        FieldType::List => coerce_list(raw).map(FieldValue::List),
        FieldType::ObjectList => coerce_object_list(raw).map(FieldValue::ObjectList),
        FieldType::RowReference => coerce_reference(raw).map(FieldValue::RowReference),
    }
}

fn coerce_text(raw: &Value) -> Result<String, String> {
    match raw {
        Value::String(value) => Ok(value.clone()),
        Value::Number(value) => Ok(value.to_string()),
        Value::Bool(value) => Ok(value.to_string()),
        _ => Err("expected text".to_string()),
    }
}

fn coerce_number(raw: &Value) -> Result<f64, String> {
    let value = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(value) if value.is_finite() => Ok(value),
        _ => Err("expected a finite number".to_string()),
    }
}

fn coerce_integer(raw: &Value) -> Result<i64, String> {
    let invalid = || "expected an integer".to_string();
    match raw {
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                return Ok(value);
            }
            match number.as_f64() {
                Some(value) if value.fract() == 0.0 && value.abs() < 9.0e15 => Ok(value as i64),
                _ => Err(invalid()),
            }
        }
        Value::String(text) => text.trim().parse::<i64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn coerce_boolean(raw: &Value) -> Result<bool, String> {
    let invalid = || "expected a boolean".to_string();
    match raw {
        Value::Bool(value) => Ok(*value),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid()),
        },
        Value::String(text) => {
            let lowered = text.trim().to_ascii_lowercase();
            if TRUTHY.contains(&lowered.as_str()) {
                Ok(true)
            } else if FALSY.contains(&lowered.as_str()) {
                Ok(false)
            } else {
                Err(invalid())
            }
        }
        _ => Err(invalid()),
    }
}

fn coerce_date(raw: &Value) -> Result<String, String> {
    let invalid = || "expected a date (YYYY-MM-DD)".to_string();
    let Value::String(text) = raw else {
        return Err(invalid());
    };
    let text = text.trim();
    let date = match Date::parse(text, format_description!("[year]-[month]-[day]")) {
        Ok(date) => date,
        Err(_) => OffsetDateTime::parse(text, &Rfc3339)
            .map_err(|_| invalid())?
            .to_offset(UtcOffset::UTC)
            .date(),
    };
    format_date(date).ok_or_else(invalid)
}

fn coerce_time(raw: &Value) -> Result<String, String> {
    let invalid = || "expected a time (HH:MM or HH:MM:SS)".to_string();
    let Value::String(text) = raw else {
        return Err(invalid());
    };
    let text = text.trim();
    let time = Time::parse(text, format_description!("[hour]:[minute]:[second]"))
        .or_else(|_| Time::parse(text, format_description!("[hour]:[minute]")))
        .map_err(|_| invalid())?;
    time.format(format_description!("[hour]:[minute]:[second]"))
        .map_err(|_| invalid())
}

fn coerce_timestamp(raw: &Value, require_offset: bool) -> Result<String, String> {
    let invalid = || {
        if require_offset {
            "expected an RFC3339 timestamp with an offset".to_string()
        } else {
            "expected a timestamp".to_string()
        }
    };
    let parsed = match raw {
        Value::String(text) => {
            let text = text.trim();
            match OffsetDateTime::parse(text, &Rfc3339) {
                Ok(value) => Some(value),
                Err(_) if require_offset => None,
                Err(_) => parse_naive_timestamp(text),
            }
        }
        Value::Number(number) if !require_offset => number.as_i64().and_then(|ms| {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
        }),
        _ => None,
    };
    let value = parsed.ok_or_else(invalid)?;
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|_| invalid())
}

/// Offset-less input is read as UTC.
fn parse_naive_timestamp(text: &str) -> Option<OffsetDateTime> {
    let normalized = text.replacen(' ', "T", 1);
    let normalized = normalized.trim_end_matches('Z');
    if let Ok(value) = PrimitiveDateTime::parse(
        normalized,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    ) {
        return Some(value.assume_utc());
    }
    if let Ok(value) = PrimitiveDateTime::parse(
        normalized,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(value.assume_utc());
    }
    if let Ok(value) = PrimitiveDateTime::parse(
        normalized,
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ) {
        return Some(value.assume_utc());
    }
    Date::parse(normalized, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

fn format_date(date: Date) -> Option<String> {
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

fn coerce_uuid(raw: &Value) -> Result<String, String> {
    let invalid = || "expected a UUID".to_string();
    let Value::String(text) = raw else {
        return Err(invalid());
    };
    uuid::Uuid::parse_str(text.trim())
        .map(|value| value.hyphenated().to_string())
        .map_err(|_| invalid())
}

fn coerce_binary(raw: &Value) -> Result<Vec<u8>, String> {
    let invalid = || "expected base64 or hex encoded bytes".to_string();
    match raw {
        Value::String(text) => {
            let text = text.trim();
            if let Some(body) = text.strip_prefix(BINARY_PREFIX) {
                return STANDARD.decode(body).map_err(|_| invalid());
            }
            if let Some(body) = text.strip_prefix("hex:").or_else(|| text.strip_prefix("0x")) {
                return hex::decode(body).map_err(|_| invalid());
            }
            if !text.is_empty()
                && text.len() % 2 == 0
                && text.chars().all(|c| c.is_ascii_hexdigit())
            {
                return hex::decode(text).map_err(|_| invalid());
            }
            STANDARD.decode(text).map_err(|_| invalid())
        }
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(invalid)
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn coerce_list(raw: &Value) -> Result<Vec<String>, String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(value) => Ok(value.clone()),
                Value::Number(value) => Ok(value.to_string()),
                Value::Bool(value) => Ok(value.to_string()),
                _ => Err("list items must be scalar".to_string()),
            })
            .collect(),
        Value::String(text) => Ok(parse_list_text(text)),
        _ => Err("expected a list".to_string()),
    }
}

/// Bullet (`-`, `*`, `+`) and numbered (`1.`, `1)`) lines lose their marker;
/// anything else is one item per non-empty line.
fn parse_list_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| strip_list_marker(line).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim();
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}

fn coerce_object_list(raw: &Value) -> Result<Vec<Map<String, Value>>, String> {
    let invalid = || "expected a list of objects".to_string();
    match raw {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_object().cloned().ok_or_else(invalid))
            .collect(),
        Value::Object(object) => Ok(vec![object.clone()]),
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(text.trim()).map_err(|_| invalid())?;
            match parsed {
                Value::String(_) => Err(invalid()),
                other => coerce_object_list(&other),
            }
        }
        _ => Err(invalid()),
    }
}

fn coerce_reference(raw: &Value) -> Result<String, String> {
    match raw {
        Value::String(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err("expected an entry id".to_string()),
    }
}
