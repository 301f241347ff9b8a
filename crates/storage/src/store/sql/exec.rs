#![forbid(unsafe_code)]

use super::super::forms::coerce_value;
use super::super::*;
use super::compile::{
    CompiledQuery, QuerySource, ReadScope, compile, resolve_sources, unique_column_names,
};
use super::parse::ParsedQuery;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rusqlite::Statement;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};
use tb_core::FieldType;

/// Validated bindings for a query's `:name` placeholders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundVariables {
    values: Vec<(String, SqlValue)>,
}

/// Every placeholder must be bound and no extra name is accepted. When the
/// query is a saved one, `declared` drives the coercion of each value.
pub fn bind_variables(
    parsed: &ParsedQuery,
    declared: &[SqlVariable],
    supplied: &Map<String, Value>,
) -> Result<BoundVariables, QueryError> {
    for name in supplied.keys() {
        if !parsed.variables.contains(name) {
            return Err(QueryError::InvalidVariable {
                name: name.clone(),
                message: "query has no such placeholder".to_string(),
            });
        }
    }

    let mut values = Vec::with_capacity(parsed.variables.len());
    for name in &parsed.variables {
        let Some(raw) = supplied.get(name) else {
            return Err(QueryError::InvalidVariable {
                name: name.clone(),
                message: "no value bound".to_string(),
            });
        };
        let value = match declared.iter().find(|var| &var.name == name) {
            Some(var) => coerce_variable(var, raw)?,
            None => json_to_sql(raw),
        };
        values.push((format!(":{name}"), value));
    }
    Ok(BoundVariables { values })
}

fn coerce_variable(var: &SqlVariable, raw: &Value) -> Result<SqlValue, QueryError> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let field_type = match var.var_type.as_str() {
        "string" => FieldType::String,
        "number" => FieldType::Number,
        "integer" => FieldType::Integer,
        "boolean" => FieldType::Boolean,
        "date" => FieldType::Date,
        "timestamp" => FieldType::Timestamp,
        other => {
            return Err(QueryError::InvalidVariable {
                name: var.name.clone(),
                message: format!("unknown variable type {other}"),
            });
        }
    };
    let coerced = coerce_value(field_type, raw).map_err(|message| QueryError::InvalidVariable {
        name: var.name.clone(),
        message,
    })?;
    Ok(json_to_sql(&coerced.to_json()))
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => number.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(format!("{BINARY_PREFIX}{}", STANDARD.encode(bytes)))
        }
    }
}

/// Binds by name, skipping names the statement does not use.
fn bind_all(
    stmt: &mut Statement<'_>,
    groups: &[&[(String, SqlValue)]],
) -> Result<(), StoreError> {
    for group in groups {
        for (name, value) in *group {
            if let Some(index) = stmt.parameter_index(name)? {
                stmt.raw_bind_parameter(index, value)?;
            }
        }
    }
    Ok(())
}

fn prepare_read_only<'c>(conn: &'c Connection, sql: &str) -> Result<Statement<'c>, StoreError> {
    tracing::debug!(sql, "compiled query");
    let stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(QueryError::Unsupported("statement is not read-only".to_string()).into());
    }
    Ok(stmt)
}

fn count_rows(
    conn: &Connection,
    parsed: &ParsedQuery,
    compiled: &CompiledQuery,
    variables: &BoundVariables,
) -> Result<usize, StoreError> {
    let sql = format!(
        "{}SELECT COUNT(*) FROM ({})",
        compiled.prefix, parsed.body_sql
    );
    let mut stmt = prepare_read_only(conn, &sql)?;
    bind_all(&mut stmt, &[compiled.params.as_slice(), variables.values.as_slice()])?;
    let mut rows = stmt.raw_query();
    let total = match rows.next()? {
        Some(row) => from_sqlite_usize(row.get::<_, i64>(0)?),
        None => 0,
    };

    let offset = usize::try_from(parsed.offset).unwrap_or(usize::MAX);
    let total = total.saturating_sub(offset);
    Ok(match parsed.limit {
        Some(limit) => total.min(usize::try_from(limit).unwrap_or(usize::MAX)),
        None => total,
    })
}

/// Folds the page window into the query's own LIMIT/OFFSET.
fn page_window(parsed: &ParsedQuery, offset: usize, limit: usize) -> Option<(usize, usize)> {
    let base = usize::try_from(parsed.offset).unwrap_or(usize::MAX);
    let effective_limit = match parsed.limit {
        Some(own) => limit.min(usize::try_from(own).unwrap_or(usize::MAX).saturating_sub(offset)),
        None => limit,
    };
    if effective_limit == 0 {
        return None;
    }
    Some((base.saturating_add(offset), effective_limit))
}

fn fetch_rows(
    conn: &Connection,
    parsed: &ParsedQuery,
    compiled: &CompiledQuery,
    variables: &BoundVariables,
    offset: usize,
    limit: usize,
) -> Result<Vec<Row>, StoreError> {
    let Some((offset, limit)) = page_window(parsed, offset, limit) else {
        return Ok(Vec::new());
    };
    let sql = format!(
        "{}{} LIMIT :__limit OFFSET :__offset",
        compiled.prefix, parsed.body_sql
    );
    let window = [
        (":__limit".to_string(), SqlValue::Integer(to_sqlite_i64(limit)?)),
        (":__offset".to_string(), SqlValue::Integer(to_sqlite_i64(offset)?)),
    ];
    let mut stmt = prepare_read_only(conn, &sql)?;
    bind_all(
        &mut stmt,
        &[
            compiled.params.as_slice(),
            variables.values.as_slice(),
            window.as_slice(),
        ],
    )?;
    let names = unique_column_names(
        stmt.column_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    );

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::new();
        for (index, name) in names.iter().enumerate() {
            record.insert(name.clone(), sql_to_json(row.get_ref(index)?));
        }
        out.push(record);
    }
    Ok(out)
}

impl SpaceStore {
    /// Tables a query reads, resolved against the current Forms.
    pub fn resolve_query_sources(
        &self,
        parsed: &ParsedQuery,
    ) -> Result<Vec<QuerySource>, StoreError> {
        self.read(|conn| resolve_sources(conn, parsed))
    }

    /// Rows the query yields in total, after its own LIMIT/OFFSET.
    pub fn count_query(
        &self,
        parsed: &ParsedQuery,
        variables: &BoundVariables,
        scope: &ReadScope,
    ) -> Result<usize, StoreError> {
        self.read(|conn| {
            let sources = resolve_sources(conn, parsed)?;
            let compiled = compile(conn, &sources, scope)?;
            count_rows(conn, parsed, &compiled, variables)
        })
    }

    /// One page, re-executed against the live tables.
    pub fn fetch_query_rows(
        &self,
        parsed: &ParsedQuery,
        variables: &BoundVariables,
        scope: &ReadScope,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        self.read(|conn| {
            let sources = resolve_sources(conn, parsed)?;
            let compiled = compile(conn, &sources, scope)?;
            fetch_rows(conn, parsed, &compiled, variables, offset, limit)
        })
    }

    /// Page plus total count, read under one transaction so both agree.
    pub fn fetch_query_page(
        &self,
        parsed: &ParsedQuery,
        variables: &BoundVariables,
        scope: &ReadScope,
        offset: usize,
        limit: usize,
    ) -> Result<RowPage, StoreError> {
        self.read(|conn| {
            let tx = conn.unchecked_transaction()?;
            let sources = resolve_sources(&tx, parsed)?;
            let compiled = compile(&tx, &sources, scope)?;
            let total_count = count_rows(&tx, parsed, &compiled, variables)?;
            let rows = fetch_rows(&tx, parsed, &compiled, variables, offset, limit)?;
            tx.finish()?;
            Ok(RowPage {
                rows,
                offset,
                limit,
                total_count,
            })
        })
    }
}
