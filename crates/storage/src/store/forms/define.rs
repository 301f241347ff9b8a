#![forbid(unsafe_code)]

use super::super::entries::{HeadExpectation, RevisionDraft, append_revision_tx, load_head_tx};
use super::super::queries::{refresh_views_for_form_tx, views_reading_form_tx};
use super::super::*;
use super::codec::{encode_definition, encode_principals, form_exists, load_all_forms, load_form};
use super::coerce::coerce_value;
use super::validate::default_for;
use rusqlite::params;
use serde_json::Value;
use std::collections::BTreeSet;
use tb_core::{
    ExtraAttributesPolicy, FieldName, FieldType, FormName, SQL_FORM_NAME, form_key,
    is_reserved_field_name, is_reserved_form_name,
};

impl SpaceStore {
    /// Creates or redefines a Form. A redefinition bumps the version, fills
    /// defaults of newly added fields into live entries, and refreshes every
    /// view reading the Form, all in one transaction.
    pub fn define_form(&mut self, request: DefineFormRequest) -> Result<Form, StoreError> {
        let DefineFormRequest {
            definition,
            author,
            defined_at_ms,
        } = request;

        let tx = begin_write(&mut self.conn)?;

        let mut definition = definition;
        definition.name = definition.name.trim().to_string();
        let key = form_key(&definition.name);
        let previous = load_form(&tx, &key)?;
        let diagnostics = check_definition(&tx, &definition, previous.as_ref())?;
        if !diagnostics.is_empty() {
            return Err(StoreError::Validation(diagnostics));
        }
        if previous.as_ref().is_some_and(|form| form.system) {
            return Err(StoreError::InvalidInput("system forms cannot be redefined"));
        }

        let definition_json = encode_definition(&definition)?;
        let read_json = encode_principals(definition.read_principals.as_deref())?;
        let write_json = encode_principals(definition.write_principals.as_deref())?;

        let version = match &previous {
            Some(form) => {
                tx.execute(
                    r#"
                    UPDATE forms
                    SET name = ?2, definition_json = ?3, extra_policy = ?4,
                        read_principals_json = ?5, write_principals_json = ?6,
                        version = version + 1, updated_at_ms = ?7
                    WHERE form_key = ?1
                    "#,
                    params![
                        key,
                        definition.name,
                        definition_json,
                        definition.extra_attributes.as_str(),
                        read_json,
                        write_json,
                        defined_at_ms
                    ],
                )?;
                form.version + 1
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO forms(form_key, name, definition_json, extra_policy,
                      read_principals_json, write_principals_json, version, system,
                      created_at_ms, updated_at_ms)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 0, ?7, ?7)
                    "#,
                    params![
                        key,
                        definition.name,
                        definition_json,
                        definition.extra_attributes.as_str(),
                        read_json,
                        write_json,
                        defined_at_ms
                    ],
                )?;
                1
            }
        };

        let form = Form {
            key: key.clone(),
            definition,
            version,
            system: false,
            created_at_ms: previous
                .as_ref()
                .map(|form| form.created_at_ms)
                .unwrap_or(defined_at_ms),
            updated_at_ms: defined_at_ms,
        };

        let migrated = match &previous {
            Some(previous) => {
                migrate_added_fields_tx(&tx, previous, &form, &author, defined_at_ms)?
            }
            None => 0,
        };
        let refreshed = refresh_views_for_form_tx(&tx, &key, defined_at_ms)?;

        tx.commit()?;
        tracing::info!(
            space_id = self.space_id.as_str(),
            form = form.name(),
            version,
            migrated,
            refreshed,
            "form defined"
        );
        Ok(form)
    }

    /// Refused while the Form has live entries, another Form references it,
    /// or a saved query reads it.
    pub fn delete_form(&mut self, name: &str) -> Result<(), StoreError> {
        let tx = begin_write(&mut self.conn)?;
        let key = form_key(name);
        let Some(form) = load_form(&tx, &key)? else {
            return Err(StoreError::unknown("form", name));
        };
        if form.system {
            return Err(StoreError::InvalidInput("system forms cannot be deleted"));
        }

        let mut diagnostics = Vec::new();
        let live: i64 = tx.query_row(
            "SELECT COUNT(*) FROM entry_heads WHERE form_key = ?1 AND deleted = 0",
            params![key],
            |row| row.get(0),
        )?;
        if live > 0 {
            diagnostics.push(FieldDiagnostic::new(
                "form",
                "has_entries",
                format!("form still has {live} live entries"),
            ));
        }

        for other in load_all_forms(&tx, false)? {
            if other.key == key {
                continue;
            }
            let references = other.definition.fields.iter().any(|field| {
                field
                    .target_form
                    .as_deref()
                    .is_some_and(|target| form_key(target) == key)
            });
            if references {
                diagnostics.push(FieldDiagnostic::new(
                    "form",
                    "referenced",
                    format!("form {} references this form", other.name()),
                ));
            }
        }

        for sql_id in views_reading_form_tx(&tx, &key)? {
            diagnostics.push(FieldDiagnostic::new(
                "form",
                "view_dependency",
                format!("saved query {sql_id} reads this form"),
            ));
        }

        if !diagnostics.is_empty() {
            return Err(StoreError::Validation(diagnostics));
        }

        tx.execute("DELETE FROM forms WHERE form_key = ?1", params![key])?;
        tx.commit()?;
        tracing::info!(space_id = self.space_id.as_str(), form = name, "form deleted");
        Ok(())
    }
}

fn check_definition(
    conn: &Connection,
    definition: &FormDefinition,
    previous: Option<&Form>,
) -> Result<Vec<FieldDiagnostic>, StoreError> {
    let mut diagnostics = Vec::new();
    let own_key = form_key(&definition.name);

    if let Err(err) = FormName::try_new(definition.name.as_str()) {
        diagnostics.push(FieldDiagnostic::new("name", "invalid_name", err.message()));
    } else if is_reserved_form_name(&definition.name) {
        diagnostics.push(FieldDiagnostic::new(
            "name",
            "reserved_form",
            format!("form name {} is reserved", definition.name),
        ));
    }

    let mut keys = BTreeSet::new();
    for field in &definition.fields {
        let name = field.name.as_str();
        if let Err(err) = FieldName::try_new(name) {
            diagnostics.push(FieldDiagnostic::new(name, "invalid_name", err.message()));
            continue;
        }
        if is_reserved_field_name(name) {
            diagnostics.push(FieldDiagnostic::new(
                name,
                "reserved_field",
                "field name is reserved for entry metadata",
            ));
            continue;
        }
        if !keys.insert(name.to_lowercase()) {
            diagnostics.push(FieldDiagnostic::new(
                name,
                "duplicate_field",
                "field names must be unique ignoring case",
            ));
            continue;
        }

        match (&field.target_form, field.field_type.is_reference()) {
            (Some(_), false) => diagnostics.push(FieldDiagnostic::new(
                name,
                "invalid_target",
                "only row_reference fields take a target form",
            )),
            (Some(target), true) => {
                let target_key = form_key(target);
                let known = target_key == own_key
                    || (target_key != form_key(SQL_FORM_NAME) && form_exists(conn, &target_key)?);
                if !known {
                    diagnostics.push(FieldDiagnostic::new(
                        name,
                        "unknown_target",
                        format!("target form {target} does not exist"),
                    ));
                }
            }
            (None, true) => diagnostics.push(FieldDiagnostic::new(
                name,
                "missing_target",
                "row_reference fields must name a target form",
            )),
            (None, false) => {}
        }

        if let Some(prior) = previous.and_then(|form| form.definition.field(name))
            && prior.field_type != field.field_type
        {
            diagnostics.push(FieldDiagnostic::new(
                name,
                "type_change",
                format!(
                    "field type cannot change from {} to {}",
                    prior.field_type.as_str(),
                    field.field_type.as_str()
                ),
            ));
        }
    }

    for (name, value) in &definition.defaults {
        match definition.field(name) {
            None => diagnostics.push(FieldDiagnostic::new(
                name.as_str(),
                "unknown_field",
                "default names an undeclared field",
            )),
            Some(field) => {
                if let Err(message) = coerce_value(field.field_type, value) {
                    diagnostics.push(FieldDiagnostic::new(
                        name.as_str(),
                        "invalid_default",
                        message,
                    ));
                }
            }
        }
    }

    for (label, principals) in [
        ("read_principals", &definition.read_principals),
        ("write_principals", &definition.write_principals),
    ] {
        if let Some(list) = principals {
            if list.is_empty() {
                diagnostics.push(FieldDiagnostic::new(
                    label,
                    "empty_acl",
                    "principal list must name at least one principal",
                ));
            }
            if list.iter().any(|principal| principal.id.trim().is_empty()) {
                diagnostics.push(FieldDiagnostic::new(
                    label,
                    "invalid_principal",
                    "principal id must not be empty",
                ));
            }
        }
    }

    Ok(diagnostics)
}

/// Appends one revision per live entry that lacks a newly added field with a
/// default. Returns the number of entries touched.
fn migrate_added_fields_tx(
    tx: &Transaction<'_>,
    previous: &Form,
    form: &Form,
    author: &str,
    now_ms: i64,
) -> Result<usize, StoreError> {
    let mut added = Vec::new();
    for field in &form.definition.fields {
        if previous.definition.field(&field.name).is_some() {
            continue;
        }
        if let Some(default) = default_for(&form.definition, &field.name) {
            let value = coerce_value(field.field_type, default)
                .map_err(|_| StoreError::InvalidInput("default does not match field type"))?;
            added.push((field.name.clone(), value.to_json()));
        }
    }
    if added.is_empty() {
        return Ok(0);
    }

    let entry_ids = {
        let mut stmt = tx.prepare(
            "SELECT entry_id FROM entry_heads WHERE form_key = ?1 AND deleted = 0 ORDER BY entry_id",
        )?;
        let mut rows = stmt.query(params![form.key])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get::<_, String>(0)?);
        }
        ids
    };

    let mut touched = 0;
    for entry_id in entry_ids {
        let Some(head) = load_head_tx(tx, &entry_id)? else {
            continue;
        };
        let mut fields = head.fields.clone();
        let mut changed = false;
        for (name, value) in &added {
            if fields.get(name).is_none_or(Value::is_null) {
                fields.insert(name.clone(), value.clone());
                changed = true;
            }
        }
        if !changed {
            continue;
        }
        append_revision_tx(
            tx,
            RevisionDraft {
                entry_id: head.entry_id.clone(),
                form,
                expectation: HeadExpectation::Exactly(head.revision_id.clone()),
                title: head.title.clone(),
                fields,
                extra_attributes: head.extra_attributes.clone(),
                tags: head.tags.clone(),
                links: head.links.clone(),
                assets: head.assets.clone(),
                deleted: false,
                author: author.to_string(),
                restored_from: None,
                created_at_ms: now_ms,
            },
        )?;
        touched += 1;
    }
    Ok(touched)
}

/// The saved-query Form. Reserved, so never user-defined.
pub(in crate::store) fn install_system_forms_tx(
    tx: &Transaction<'_>,
    now_ms: i64,
) -> Result<(), StoreError> {
    let definition = FormDefinition::new(SQL_FORM_NAME)
        .with_field(FieldDef::new("name", FieldType::String).required())
        .with_field(FieldDef::new("sql", FieldType::String).required())
        .with_field(FieldDef::new("variables", FieldType::ObjectList))
        .with_extra_attributes(ExtraAttributesPolicy::Deny);
    tx.execute(
        r#"
        INSERT INTO forms(form_key, name, definition_json, extra_policy,
          read_principals_json, write_principals_json, version, system,
          created_at_ms, updated_at_ms)
        VALUES (?1, ?2, ?3, ?4, NULL, NULL, 1, 1, ?5, ?5)
        "#,
        params![
            form_key(SQL_FORM_NAME),
            SQL_FORM_NAME,
            encode_definition(&definition)?,
            definition.extra_attributes.as_str(),
            now_ms
        ],
    )?;
    Ok(())
}
