#![forbid(unsafe_code)]

use super::super::*;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tb_core::{ExtraAttributesPolicy, FieldType, PrincipalKind, PrincipalRef};

#[derive(Serialize, Deserialize)]
struct StoredFieldDef {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_form: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredDefinition {
    fields: Vec<StoredFieldDef>,
    #[serde(default)]
    defaults: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct StoredPrincipal {
    kind: String,
    id: String,
}

pub(super) const FORM_COLUMNS: &str = "form_key, name, definition_json, extra_policy, \
    read_principals_json, write_principals_json, version, system, created_at_ms, updated_at_ms";

pub(in crate::store) fn encode_definition(
    definition: &FormDefinition,
) -> Result<String, StoreError> {
    let stored = StoredDefinition {
        fields: definition
            .fields
            .iter()
            .map(|field| StoredFieldDef {
                name: field.name.clone(),
                field_type: field.field_type.as_str().to_string(),
                required: field.required,
                target_form: field.target_form.clone(),
            })
            .collect(),
        defaults: definition.defaults.clone(),
    };
    Ok(serde_json::to_string(&stored)?)
}

pub(in crate::store) fn encode_principals(
    principals: Option<&[PrincipalRef]>,
) -> Result<Option<String>, StoreError> {
    let Some(list) = principals else {
        return Ok(None);
    };
    let stored: Vec<StoredPrincipal> = list
        .iter()
        .map(|principal| StoredPrincipal {
            kind: principal.kind.as_str().to_string(),
            id: principal.id.clone(),
        })
        .collect();
    Ok(Some(serde_json::to_string(&stored)?))
}

pub(in crate::store) fn decode_principals(
    raw: Option<&str>,
) -> Result<Option<Vec<PrincipalRef>>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let stored: Vec<StoredPrincipal> = serde_json::from_str(raw)?;
    let mut out = Vec::with_capacity(stored.len());
    for principal in stored {
        let Some(kind) = PrincipalKind::parse(&principal.kind) else {
            tracing::warn!(kind = principal.kind.as_str(), "skipping unknown principal kind");
            continue;
        };
        out.push(PrincipalRef {
            kind,
            id: principal.id,
        });
    }
    Ok(Some(out))
}

fn form_from_row(row: &Row<'_>) -> Result<Form, StoreError> {
    let key: String = row.get(0)?;
    let name: String = row.get(1)?;
    let definition_json: String = row.get(2)?;
    let extra_policy: String = row.get(3)?;
    let read_json: Option<String> = row.get(4)?;
    let write_json: Option<String> = row.get(5)?;

    let stored: StoredDefinition = serde_json::from_str(&definition_json)?;
    let mut fields = Vec::with_capacity(stored.fields.len());
    for field in stored.fields {
        let Some(field_type) = FieldType::parse(&field.field_type) else {
            return Err(StoreError::InvalidInput("stored form has an unknown field type"));
        };
        fields.push(FieldDef {
            name: field.name,
            field_type,
            required: field.required,
            target_form: field.target_form,
        });
    }

    Ok(Form {
        key,
        definition: FormDefinition {
            name,
            fields,
            extra_attributes: ExtraAttributesPolicy::parse(&extra_policy).unwrap_or_default(),
            read_principals: decode_principals(read_json.as_deref())?,
            write_principals: decode_principals(write_json.as_deref())?,
            defaults: stored.defaults,
        },
        version: row.get(6)?,
        system: row.get::<_, i64>(7)? != 0,
        created_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
    })
}

pub(in crate::store) fn load_form(
    conn: &Connection,
    key: &str,
) -> Result<Option<Form>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {FORM_COLUMNS} FROM forms WHERE form_key = ?1"))?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(form_from_row(row)?)),
        None => Ok(None),
    }
}

pub(in crate::store) fn require_form(conn: &Connection, name: &str) -> Result<Form, StoreError> {
    let key = tb_core::form_key(name);
    load_form(conn, &key)?.ok_or_else(|| StoreError::unknown("form", name))
}

pub(in crate::store) fn load_all_forms(
    conn: &Connection,
    include_system: bool,
) -> Result<Vec<Form>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FORM_COLUMNS} FROM forms WHERE system = 0 OR ?1 = 1 ORDER BY form_key ASC"
    ))?;
    let mut rows = stmt.query(params![bool_to_sqlite(include_system)])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(form_from_row(row)?);
    }
    Ok(out)
}

pub(super) fn form_exists(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM forms WHERE form_key = ?1",
            params![key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}
