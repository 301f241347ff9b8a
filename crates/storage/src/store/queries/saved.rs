#![forbid(unsafe_code)]

use super::super::entries::{
    HEAD_COLUMNS, HEAD_FROM, HeadExpectation, HeadRow, RevisionDraft, append_revision_tx,
    head_from_row, load_head_tx,
};
use super::super::forms::require_form;
use super::super::sql::{parse_query, resolve_sources};
use super::super::*;
use super::views::{delete_view_meta_tx, upsert_view_meta_tx};
use rusqlite::params;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tb_core::{EntryId, SQL_FORM_NAME, form_key, is_pseudo_table, is_reserved_form_name};

fn check_saved_query(
    conn: &Connection,
    id: &str,
    name: &str,
    sql: &str,
    variables: &[SqlVariable],
) -> Result<Vec<FieldDiagnostic>, StoreError> {
    let mut diagnostics = Vec::new();
    if let Err(err) = EntryId::try_new(id) {
        diagnostics.push(FieldDiagnostic::new("id", "invalid_id", err.message()));
    }

    let name = name.trim();
    if name.is_empty() {
        diagnostics.push(FieldDiagnostic::new("name", "required", "saved query needs a name"));
    } else if is_reserved_form_name(name) || is_pseudo_table(name) {
        diagnostics.push(FieldDiagnostic::new(
            "name",
            "reserved_name",
            format!("{name} is a reserved name"),
        ));
    }

    let mut declared = BTreeSet::new();
    for variable in variables {
        if variable.name.trim().is_empty() {
            diagnostics.push(FieldDiagnostic::new(
                "variables",
                "invalid_variable",
                "variables need a name",
            ));
            continue;
        }
        if !declared.insert(variable.name.as_str()) {
            diagnostics.push(FieldDiagnostic::new(
                "variables",
                "duplicate_variable",
                format!("variable {} is declared twice", variable.name),
            ));
        }
        if !VARIABLE_TYPES.contains(&variable.var_type.as_str()) {
            diagnostics.push(FieldDiagnostic::new(
                "variables",
                "invalid_variable_type",
                format!("variable {} has unknown type {}", variable.name, variable.var_type),
            ));
        }
    }

    match parse_query(sql) {
        Err(err) => diagnostics.push(FieldDiagnostic::new("sql", "invalid_sql", err.to_string())),
        Ok(parsed) => {
            for placeholder in &parsed.variables {
                if !declared.contains(placeholder.as_str()) {
                    diagnostics.push(FieldDiagnostic::new(
                        "sql",
                        "undeclared_variable",
                        format!(":{placeholder} is not a declared variable"),
                    ));
                }
            }
            match resolve_sources(conn, &parsed) {
                Ok(_) => {}
                Err(StoreError::Query(err)) => {
                    diagnostics.push(FieldDiagnostic::new("sql", "invalid_sql", err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(diagnostics)
}

fn stored_fields(
    name: &str,
    sql: &str,
    variables: &[SqlVariable],
) -> Result<Map<String, Value>, StoreError> {
    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(name.to_string()));
    fields.insert("sql".to_string(), Value::String(sql.to_string()));
    fields.insert("variables".to_string(), serde_json::to_value(variables)?);
    Ok(fields)
}

fn saved_query_from_head(head: HeadRow) -> Result<SavedQuery, StoreError> {
    let name = head
        .fields
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(&head.title)
        .to_string();
    let sql = head
        .fields
        .get("sql")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let variables = match head.fields.get("variables") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())?,
        _ => Vec::new(),
    };
    Ok(SavedQuery {
        id: head.entry_id,
        name,
        sql,
        variables,
        revision_id: head.revision_id,
        created_at_ms: head.created_at_ms,
        updated_at_ms: head.updated_at_ms,
        author: head.author,
        updated_by: head.updated_by,
    })
}

/// Live head of a saved query; entries of other Forms read as unknown.
fn live_saved_head(conn: &Connection, id: &str) -> Result<HeadRow, StoreError> {
    let sql_key = form_key(SQL_FORM_NAME);
    load_head_tx(conn, id)?
        .filter(|head| head.form_key == sql_key && !head.deleted)
        .ok_or_else(|| StoreError::unknown("saved_query", id))
}

impl SpaceStore {
    pub fn create_saved_query(
        &mut self,
        request: SavedQueryRequest,
    ) -> Result<SavedQuery, StoreError> {
        if request.parent_revision_id.is_some() {
            return Err(StoreError::InvalidInput(
                "a new saved query has no parent revision",
            ));
        }
        self.write_saved_query(request, true)
    }

    /// CAS against `parent_revision_id` when given, else against the head
    /// current inside the transaction.
    pub fn update_saved_query(
        &mut self,
        request: SavedQueryRequest,
    ) -> Result<SavedQuery, StoreError> {
        self.write_saved_query(request, false)
    }

    fn write_saved_query(
        &mut self,
        request: SavedQueryRequest,
        create: bool,
    ) -> Result<SavedQuery, StoreError> {
        let SavedQueryRequest {
            id,
            parent_revision_id,
            name,
            sql,
            variables,
            author,
            written_at_ms,
        } = request;

        let tx = begin_write(&mut self.conn)?;
        let diagnostics = check_saved_query(&tx, &id, &name, &sql, &variables)?;
        if !diagnostics.is_empty() {
            return Err(StoreError::Validation(diagnostics));
        }

        let form = require_form(&tx, SQL_FORM_NAME)?;
        let expectation = if create {
            HeadExpectation::Absent
        } else {
            let head = live_saved_head(&tx, &id)?;
            HeadExpectation::Exactly(parent_revision_id.unwrap_or(head.revision_id))
        };

        let name = name.trim().to_string();
        let sql = sql.trim().to_string();
        let revision = append_revision_tx(
            &tx,
            RevisionDraft {
                entry_id: id.clone(),
                form: &form,
                expectation,
                title: name.clone(),
                fields: stored_fields(&name, &sql, &variables)?,
                extra_attributes: Map::new(),
                tags: Vec::new(),
                links: Vec::new(),
                assets: Vec::new(),
                deleted: false,
                author,
                restored_from: None,
                created_at_ms: written_at_ms,
            },
        )?;
        let meta = upsert_view_meta_tx(&tx, &id, &revision.revision_id, &sql, written_at_ms)?;
        let saved = saved_query_from_head(live_saved_head(&tx, &id)?)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            sql_id = id.as_str(),
            revision_id = revision.revision_id.as_str(),
            sources = meta.source_forms.len(),
            "saved query written"
        );
        Ok(saved)
    }

    /// Tombstones the saved query and drops its view record in the same
    /// transaction.
    pub fn delete_saved_query(
        &mut self,
        request: DeleteSavedQueryRequest,
    ) -> Result<Revision, StoreError> {
        let DeleteSavedQueryRequest {
            id,
            parent_revision_id,
            author,
            deleted_at_ms,
        } = request;

        let tx = begin_write(&mut self.conn)?;
        let head = live_saved_head(&tx, &id)?;
        let form = require_form(&tx, SQL_FORM_NAME)?;
        let expectation = HeadExpectation::Exactly(
            parent_revision_id.unwrap_or_else(|| head.revision_id.clone()),
        );
        let revision = append_revision_tx(
            &tx,
            RevisionDraft {
                entry_id: head.entry_id,
                form: &form,
                expectation,
                title: head.title,
                fields: head.fields,
                extra_attributes: head.extra_attributes,
                tags: head.tags,
                links: head.links,
                assets: head.assets,
                deleted: true,
                author,
                restored_from: None,
                created_at_ms: deleted_at_ms,
            },
        )?;
        delete_view_meta_tx(&tx, &id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            sql_id = id.as_str(),
            revision_id = revision.revision_id.as_str(),
            "saved query deleted"
        );
        Ok(revision)
    }

    pub fn get_saved_query(&self, id: &str) -> Result<SavedQuery, StoreError> {
        self.read(|conn| saved_query_from_head(live_saved_head(conn, id)?))
    }

    pub fn list_saved_queries(&self) -> Result<Vec<SavedQuery>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {HEAD_COLUMNS} FROM {HEAD_FROM} WHERE h.form_key = ?1 AND h.deleted = 0 ORDER BY h.entry_id ASC"
            ))?;
            let mut rows = stmt.query(params![form_key(SQL_FORM_NAME)])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(saved_query_from_head(head_from_row(row)?)?);
            }
            Ok(out)
        })
    }

    /// Revision chain of a saved query, tombstone included.
    pub fn saved_query_history(&self, id: &str) -> Result<Vec<Revision>, StoreError> {
        let sql_key = form_key(SQL_FORM_NAME);
        let known = self.read(|conn| {
            Ok(load_head_tx(conn, id)?.is_some_and(|head| head.form_key == sql_key))
        })?;
        if !known {
            return Err(StoreError::unknown("saved_query", id));
        }
        self.entry_history(id)
    }
}
