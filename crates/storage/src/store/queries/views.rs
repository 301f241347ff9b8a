#![forbid(unsafe_code)]

use super::super::forms::{decode_principals, encode_definition, encode_principals};
use super::super::sql::{parse_query, resolve_sources};
use super::super::*;
use rusqlite::{Row as SqlRow, params};
use tb_core::intersect_acls;

const VIEW_COLUMNS: &str = "sql_id, sql_revision_id, sql_text, source_forms_json, \
    read_principals_json, fingerprint, snapshot_seq, created_at_ms, updated_at_ms";

fn view_meta_from_row(row: &SqlRow<'_>) -> Result<ViewMeta, StoreError> {
    let read_json: Option<String> = row.get(4)?;
    Ok(ViewMeta {
        sql_id: row.get(0)?,
        sql_revision_id: row.get(1)?,
        sql_text: row.get(2)?,
        source_forms: serde_json::from_str(&row.get::<_, String>(3)?)?,
        read_principals: decode_principals(read_json.as_deref())?,
        fingerprint: row.get(5)?,
        snapshot_seq: row.get(6)?,
        created_at_ms: row.get(7)?,
        updated_at_ms: row.get(8)?,
    })
}

/// Creates or refreshes the view record of one saved query revision.
pub(super) fn upsert_view_meta_tx(
    tx: &Transaction<'_>,
    sql_id: &str,
    sql_revision_id: &str,
    sql_text: &str,
    now_ms: i64,
) -> Result<ViewMeta, StoreError> {
    let parsed = parse_query(sql_text)?;
    let mut forms: Vec<Form> = resolve_sources(tx, &parsed)?
        .into_iter()
        .filter_map(|source| source.form)
        .collect();
    forms.sort_by(|left, right| left.key.cmp(&right.key));
    forms.dedup_by(|left, right| left.key == right.key);

    let source_forms: Vec<String> = forms.iter().map(|form| form.key.clone()).collect();
    let read_principals = intersect_acls(forms.iter().map(Form::read_principals));

    let mut material = sql_text.to_string();
    for form in &forms {
        material.push('\n');
        material.push_str(&format!(
            "{}:{}:{}",
            form.key,
            form.version,
            encode_definition(&form.definition)?
        ));
    }
    let fingerprint = sha256_hex(material.as_bytes());
    let snapshot_seq = snapshot_seq_of(tx)?;

    tx.execute(
        r#"
        INSERT INTO materialized_views(sql_id, sql_revision_id, sql_text, source_forms_json,
          read_principals_json, fingerprint, snapshot_seq, created_at_ms, updated_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        ON CONFLICT(sql_id) DO UPDATE SET
          sql_revision_id = excluded.sql_revision_id,
          sql_text = excluded.sql_text,
          source_forms_json = excluded.source_forms_json,
          read_principals_json = excluded.read_principals_json,
          fingerprint = excluded.fingerprint,
          snapshot_seq = excluded.snapshot_seq,
          updated_at_ms = excluded.updated_at_ms
        "#,
        params![
            sql_id,
            sql_revision_id,
            sql_text,
            serde_json::to_string(&source_forms)?,
            encode_principals(read_principals.as_deref())?,
            fingerprint,
            snapshot_seq,
            now_ms
        ],
    )?;

    load_view_meta(tx, sql_id)?.ok_or_else(|| StoreError::unknown("view", sql_id))
}

pub(super) fn delete_view_meta_tx(tx: &Transaction<'_>, sql_id: &str) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM materialized_views WHERE sql_id = ?1",
        params![sql_id],
    )?;
    Ok(())
}

fn load_view_meta(conn: &Connection, sql_id: &str) -> Result<Option<ViewMeta>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VIEW_COLUMNS} FROM materialized_views WHERE sql_id = ?1"
    ))?;
    let mut rows = stmt.query(params![sql_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(view_meta_from_row(row)?)),
        None => Ok(None),
    }
}

/// Saved query ids whose views read the Form.
pub(in crate::store) fn views_reading_form_tx(
    conn: &Connection,
    form_key: &str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT m.sql_id FROM materialized_views m
        WHERE EXISTS (SELECT 1 FROM json_each(m.source_forms_json) j WHERE j.value = ?1)
        ORDER BY m.sql_id ASC
        "#,
    )?;
    let mut rows = stmt.query(params![form_key])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get::<_, String>(0)?);
    }
    Ok(out)
}

/// Recomputes ACL and fingerprint of every view reading the Form. Runs inside
/// the Form redefinition's transaction.
pub(in crate::store) fn refresh_views_for_form_tx(
    tx: &Transaction<'_>,
    form_key: &str,
    now_ms: i64,
) -> Result<usize, StoreError> {
    let mut refreshed = 0;
    for sql_id in views_reading_form_tx(tx, form_key)? {
        let Some(meta) = load_view_meta(tx, &sql_id)? else {
            continue;
        };
        upsert_view_meta_tx(tx, &meta.sql_id, &meta.sql_revision_id, &meta.sql_text, now_ms)?;
        refreshed += 1;
    }
    Ok(refreshed)
}

impl SpaceStore {
    pub fn view_meta(&self, sql_id: &str) -> Result<ViewMeta, StoreError> {
        self.read(|conn| {
            load_view_meta(conn, sql_id)?.ok_or_else(|| StoreError::unknown("view", sql_id))
        })
    }

    pub fn list_view_metas(&self) -> Result<Vec<ViewMeta>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VIEW_COLUMNS} FROM materialized_views ORDER BY sql_id ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(view_meta_from_row(row)?);
            }
            Ok(out)
        })
    }
}
