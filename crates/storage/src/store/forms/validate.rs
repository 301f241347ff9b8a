#![forbid(unsafe_code)]

use super::super::*;
use super::coerce::coerce_value;
use rusqlite::{OptionalExtension, params};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tb_core::{FieldType, form_key, is_reserved_field_name};

/// Existence check for `row_reference` targets.
pub(in crate::store) trait RowLookup {
    fn live_entry_in_form(&self, entry_id: &str, form_key: &str) -> Result<bool, StoreError>;
}

impl RowLookup for Connection {
    fn live_entry_in_form(&self, entry_id: &str, form_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .query_row(
                "SELECT 1 FROM entry_heads WHERE entry_id = ?1 AND form_key = ?2 AND deleted = 0",
                params![entry_id, form_key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Coerces raw values against `definition`, collecting every failure instead
/// of stopping at the first one.
pub(in crate::store) fn validate_fields(
    definition: &FormDefinition,
    raw: &Map<String, Value>,
    lookup: &dyn RowLookup,
) -> Result<ValidatedFields, StoreError> {
    let mut out = ValidatedFields::default();
    let mut seen = BTreeSet::new();

    for (key, value) in raw {
        if is_reserved_field_name(key) {
            out.diagnostics.push(FieldDiagnostic::new(
                key.as_str(),
                "reserved_field",
                "field name is reserved for entry metadata",
            ));
            continue;
        }

        let Some(field) = definition.field(key) else {
            if definition.extra_attributes.allows_extra() {
                out.extra_attributes.insert(key.clone(), value.clone());
            } else {
                out.diagnostics.push(FieldDiagnostic::new(
                    key.as_str(),
                    "unknown_field",
                    format!("field is not declared on form {}", definition.name),
                ));
            }
            continue;
        };

        if !seen.insert(field.name.to_lowercase()) {
            out.diagnostics.push(FieldDiagnostic::new(
                field.name.as_str(),
                "duplicate_field",
                "field supplied more than once",
            ));
            continue;
        }
        if is_absent(value) {
            continue;
        }

        match coerce_value(field.field_type, value) {
            Ok(coerced) => {
                if let FieldValue::RowReference(target) = &coerced {
                    let Some(target_key) = field.target_form.as_deref().map(form_key) else {
                        out.diagnostics.push(FieldDiagnostic::new(
                            field.name.as_str(),
                            "missing_target",
                            "row_reference field declares no target form",
                        ));
                        continue;
                    };
                    if !lookup.live_entry_in_form(target, &target_key)? {
                        out.diagnostics.push(FieldDiagnostic::new(
                            field.name.as_str(),
                            "unknown_reference",
                            format!("no live entry {target} in form {target_key}"),
                        ));
                        continue;
                    }
                }
                out.fields.insert(field.name.clone(), coerced);
            }
            Err(message) => out.diagnostics.push(FieldDiagnostic::new(
                field.name.as_str(),
                "invalid_type",
                message,
            )),
        }
    }

    let diagnosed: BTreeSet<String> = out
        .diagnostics
        .iter()
        .map(|d| d.field.to_lowercase())
        .collect();
    for field in &definition.fields {
        if out.fields.contains_key(&field.name) || diagnosed.contains(&field.name.to_lowercase()) {
            continue;
        }
        if let Some(default) = default_for(definition, &field.name) {
            match coerce_value(field.field_type, default) {
                Ok(value) => {
                    out.fields.insert(field.name.clone(), value);
                }
                Err(message) => out.diagnostics.push(FieldDiagnostic::new(
                    field.name.as_str(),
                    "invalid_default",
                    message,
                )),
            }
            continue;
        }
        if field.required {
            out.diagnostics.push(FieldDiagnostic::new(
                field.name.as_str(),
                "required",
                "required field is missing",
            ));
        }
    }

    Ok(out)
}

pub(in crate::store) fn default_for<'a>(
    definition: &'a FormDefinition,
    field_name: &str,
) -> Option<&'a Value> {
    let wanted = field_name.to_lowercase();
    definition
        .defaults
        .iter()
        .find(|(name, _)| name.to_lowercase() == wanted)
        .map(|(_, value)| value)
}

/// Typed view of stored field JSON under the current definition. Values that
/// no longer fit (the field was dropped, or history predates a rule) are
/// left out.
pub(in crate::store) fn decode_fields(
    definition: &FormDefinition,
    stored: &Map<String, Value>,
) -> BTreeMap<String, FieldValue> {
    let mut out = BTreeMap::new();
    for field in &definition.fields {
        let Some(value) = stored.get(&field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        match coerce_value(field.field_type, value) {
            Ok(decoded) => {
                out.insert(field.name.clone(), decoded);
            }
            Err(message) => {
                tracing::warn!(
                    form = definition.name.as_str(),
                    field = field.name.as_str(),
                    error = message.as_str(),
                    "stored value does not match declared type"
                );
            }
        }
    }
    out
}

/// Decodes a historical revision. Fields the current definition still
/// declares go through their declared type; anything else stored with the
/// revision is kept with the type its canonical JSON shows.
pub(in crate::store) fn decode_historical_fields(
    definition: Option<&FormDefinition>,
    stored: &Map<String, Value>,
) -> BTreeMap<String, FieldValue> {
    let mut out = definition
        .map(|definition| decode_fields(definition, stored))
        .unwrap_or_default();
    for (name, value) in stored {
        if out.contains_key(name) {
            continue;
        }
        if let Some(decoded) = infer_stored_value(value) {
            out.insert(name.clone(), decoded);
        }
    }
    out
}

fn infer_stored_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(FieldValue::Boolean(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Some(FieldValue::Integer(integer)),
            None => number.as_f64().map(FieldValue::Number),
        },
        Value::String(text) if text.starts_with(BINARY_PREFIX) => {
            coerce_value(FieldType::Binary, value)
                .ok()
                .or_else(|| Some(FieldValue::Text(text.clone())))
        }
        Value::String(text) => Some(FieldValue::Text(text.clone())),
        Value::Array(items) if items.iter().all(Value::is_object) => Some(FieldValue::ObjectList(
            items.iter().filter_map(Value::as_object).cloned().collect(),
        )),
        Value::Array(_) => coerce_value(FieldType::List, value).ok(),
        Value::Object(object) => Some(FieldValue::ObjectList(vec![object.clone()])),
    }
}

pub(in crate::store) fn encode_fields(
    fields: &BTreeMap<String, FieldValue>,
) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}
