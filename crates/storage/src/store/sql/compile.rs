#![forbid(unsafe_code)]

use super::super::forms::load_form;
use super::super::*;
use super::parse::{ParsedQuery, quote_ident};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use std::collections::{BTreeMap, BTreeSet};
use tb_core::{
    ExtraAttributesPolicy, SQL_FORM_NAME, form_key, is_pseudo_table, is_reserved_field_name,
};

/// Which Forms the pseudo-tables may expose rows from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadScope {
    All,
    /// Readable Form keys.
    Forms(BTreeSet<String>),
}

/// A table named by a query: a Form, or a pseudo-table when `form` is `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySource {
    pub table: String,
    pub form: Option<Form>,
}

/// Executable SQL: a CTE per referenced table followed by the user body,
/// plus the internal parameters the CTEs bind.
pub(in crate::store) struct CompiledQuery {
    pub(in crate::store) prefix: String,
    pub(in crate::store) params: Vec<(String, SqlValue)>,
}

struct ParamSink {
    params: Vec<(String, SqlValue)>,
}

impl ParamSink {
    fn push(&mut self, value: SqlValue) -> String {
        let name = format!(":__p{}", self.params.len() + 1);
        self.params.push((name.clone(), value));
        name
    }
}

const META_COLUMNS: &[(&str, &str)] = &[
    ("id", "h.entry_id"),
    ("title", "h.title"),
    ("form", "h.form_name"),
    ("tags", "h.tags_json"),
    ("created_at", "strftime('%Y-%m-%dT%H:%M:%fZ', h.created_at_ms / 1000.0, 'unixepoch')"),
    ("updated_at", "strftime('%Y-%m-%dT%H:%M:%fZ', h.updated_at_ms / 1000.0, 'unixepoch')"),
    ("revision_id", "h.revision_id"),
    ("author", "h.author"),
    ("updated_by", "h.updated_by"),
    ("checksum", "h.checksum"),
];

pub(in crate::store) fn resolve_sources(
    conn: &Connection,
    parsed: &ParsedQuery,
) -> Result<Vec<QuerySource>, StoreError> {
    let mut out: Vec<QuerySource> = Vec::new();
    let mut seen = BTreeSet::new();
    for relation in &parsed.relations {
        let key = relation.table.to_lowercase();
        if !seen.insert(key.clone()) {
            continue;
        }
        if is_pseudo_table(&relation.table) {
            out.push(QuerySource {
                table: relation.table.clone(),
                form: None,
            });
            continue;
        }
        match load_form(conn, &form_key(&relation.table))? {
            Some(form) if !form.system => out.push(QuerySource {
                table: relation.table.clone(),
                form: Some(form),
            }),
            _ => return Err(QueryError::UnknownTable(relation.table.clone()).into()),
        }
    }
    Ok(out)
}

pub(in crate::store) fn compile(
    conn: &Connection,
    sources: &[QuerySource],
    scope: &ReadScope,
) -> Result<CompiledQuery, StoreError> {
    let mut sink = ParamSink { params: Vec::new() };
    let mut ctes = Vec::with_capacity(sources.len());
    for source in sources {
        let body = match &source.form {
            Some(form) => form_table_sql(conn, form, &mut sink)?,
            None => pseudo_table_sql(&source.table, scope, &mut sink)?,
        };
        ctes.push(format!("{} AS ({body})", quote_ident(&source.table)));
    }
    let prefix = if ctes.is_empty() {
        String::new()
    } else {
        format!("WITH {} ", ctes.join(", "))
    };
    Ok(CompiledQuery {
        prefix,
        params: sink.params,
    })
}

fn json_path(name: &str) -> SqlValue {
    SqlValue::Text(format!("$.\"{name}\""))
}

fn form_table_sql(
    conn: &Connection,
    form: &Form,
    sink: &mut ParamSink,
) -> Result<String, StoreError> {
    let mut columns: Vec<String> = META_COLUMNS
        .iter()
        .map(|(name, expr)| format!("{expr} AS {}", quote_ident(name)))
        .collect();
    let mut taken: BTreeSet<String> = META_COLUMNS
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();

    for field in &form.definition.fields {
        let path = sink.push(json_path(&field.name));
        columns.push(format!(
            "json_extract(h.fields_json, {path}) AS {}",
            quote_ident(&field.name)
        ));
        taken.insert(field.name.to_lowercase());
    }
    columns.push(format!("h.extra_json AS {}", quote_ident("extra_attributes")));
    taken.insert("extra_attributes".to_string());

    if form.definition.extra_attributes == ExtraAttributesPolicy::AllowColumns {
        for key in extra_keys(conn, &form.key)? {
            let usable = !key.contains('"')
                && !key.contains('\\')
                && !key.chars().any(char::is_control)
                && !is_reserved_field_name(&key)
                && taken.insert(key.to_lowercase());
            if !usable {
                continue;
            }
            let path = sink.push(json_path(&key));
            columns.push(format!(
                "json_extract(h.extra_json, {path}) AS {}",
                quote_ident(&key)
            ));
        }
    }

    let form_param = sink.push(SqlValue::Text(form.key.clone()));
    Ok(format!(
        "SELECT {} FROM main.entry_heads h WHERE h.form_key = {form_param} AND h.deleted = 0",
        columns.join(", ")
    ))
}

fn extra_keys(conn: &Connection, form_key: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT DISTINCT j.key
        FROM entry_heads h, json_each(h.extra_json) j
        WHERE h.form_key = ?1 AND h.deleted = 0
        ORDER BY j.key
        "#,
    )?;
    let mut rows = stmt.query(params![form_key])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get::<_, String>(0)?);
    }
    Ok(out)
}

/// `AND <column> IN (...)` restricting rows to readable Forms.
fn scope_filter(column: &str, scope: &ReadScope, sink: &mut ParamSink) -> String {
    match scope {
        ReadScope::All => String::new(),
        ReadScope::Forms(keys) if keys.is_empty() => " AND 0".to_string(),
        ReadScope::Forms(keys) => {
            let names: Vec<String> = keys
                .iter()
                .map(|key| sink.push(SqlValue::Text(key.clone())))
                .collect();
            format!(" AND {column} IN ({})", names.join(", "))
        }
    }
}

fn pseudo_table_sql(
    table: &str,
    scope: &ReadScope,
    sink: &mut ParamSink,
) -> Result<String, StoreError> {
    let system_key = sink.push(SqlValue::Text(form_key(SQL_FORM_NAME)));
    let sql = match table.to_lowercase().as_str() {
        "entries" => format!(
            r#"SELECT h.entry_id AS "id", h.entry_id AS "entry_id", h.form_name AS "form",
                 h.title AS "title", h.tags_json AS "tags", h.fields_json AS "fields",
                 h.extra_json AS "extra_attributes",
                 strftime('%Y-%m-%dT%H:%M:%fZ', h.created_at_ms / 1000.0, 'unixepoch') AS "created_at",
                 strftime('%Y-%m-%dT%H:%M:%fZ', h.updated_at_ms / 1000.0, 'unixepoch') AS "updated_at",
                 h.revision_id AS "revision_id", h.author AS "author", h.updated_by AS "updated_by"
               FROM main.entry_heads h
               WHERE h.deleted = 0 AND h.form_key <> {system_key}{}"#,
            scope_filter("h.form_key", scope, sink)
        ),
        "links" => format!(
            r#"SELECT l.link_id AS "id", l.source_entry_id AS "source", hs.form_name AS "source_form",
                 l.target_entry_id AS "target", ht.form_name AS "target_form", l.kind AS "kind"
               FROM main.entry_links l
               JOIN main.entry_heads hs ON hs.entry_id = l.source_entry_id
               LEFT JOIN main.entry_heads ht ON ht.entry_id = l.target_entry_id AND ht.deleted = 0
               WHERE hs.deleted = 0 AND l.source_form_key <> {system_key}{}"#,
            scope_filter("l.source_form_key", scope, sink)
        ),
        "assets" => format!(
            r#"SELECT a.entry_id || ':' || a.asset_id AS "id", a.entry_id AS "entry_id",
                 h.form_name AS "form", a.asset_id AS "asset_id", a.name AS "name", a.path AS "path"
               FROM main.entry_assets a
               JOIN main.entry_heads h ON h.entry_id = a.entry_id
               WHERE h.deleted = 0 AND h.form_key <> {system_key}{}"#,
            scope_filter("h.form_key", scope, sink)
        ),
        _ => return Err(QueryError::UnknownTable(table.to_string()).into()),
    };
    Ok(sql)
}

/// Column names made unique: a repeated `id` becomes `id_2`, `id_3`, ...
pub(in crate::store) fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    names
        .into_iter()
        .map(|name| {
            let count = counts.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name}_{count}")
            }
        })
        .collect()
}
