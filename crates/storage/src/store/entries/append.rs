#![forbid(unsafe_code)]

use super::super::*;
use rusqlite::{OptionalExtension, Row, params};
use serde_json::{Map, Value, json};

/// What the caller believes the head to be at append time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(in crate::store) enum HeadExpectation {
    /// The entry must not exist yet.
    Absent,
    /// The head must be exactly this revision.
    Exactly(String),
}

pub(in crate::store) struct RevisionDraft<'a> {
    pub(in crate::store) entry_id: String,
    pub(in crate::store) form: &'a Form,
    pub(in crate::store) expectation: HeadExpectation,
    pub(in crate::store) title: String,
    /// Stored (already coerced) field JSON.
    pub(in crate::store) fields: Map<String, Value>,
    pub(in crate::store) extra_attributes: Map<String, Value>,
    pub(in crate::store) tags: Vec<String>,
    pub(in crate::store) links: Vec<LinkRef>,
    pub(in crate::store) assets: Vec<AssetRef>,
    pub(in crate::store) deleted: bool,
    pub(in crate::store) author: String,
    pub(in crate::store) restored_from: Option<String>,
    pub(in crate::store) created_at_ms: i64,
}

/// Current-state projection row joined with its head revision's parent.
#[derive(Clone, Debug)]
pub(in crate::store) struct HeadRow {
    pub(in crate::store) entry_id: String,
    pub(in crate::store) form_key: String,
    pub(in crate::store) form_name: String,
    pub(in crate::store) revision_id: String,
    pub(in crate::store) parent_revision_id: Option<String>,
    pub(in crate::store) head_seq: i64,
    pub(in crate::store) title: String,
    pub(in crate::store) fields: Map<String, Value>,
    pub(in crate::store) extra_attributes: Map<String, Value>,
    pub(in crate::store) tags: Vec<String>,
    pub(in crate::store) links: Vec<LinkRef>,
    pub(in crate::store) assets: Vec<AssetRef>,
    pub(in crate::store) deleted: bool,
    pub(in crate::store) deleted_at_ms: Option<i64>,
    pub(in crate::store) author: String,
    pub(in crate::store) updated_by: String,
    pub(in crate::store) checksum: String,
    pub(in crate::store) created_at_ms: i64,
    pub(in crate::store) updated_at_ms: i64,
}

pub(in crate::store) const HEAD_COLUMNS: &str = "h.entry_id, h.form_key, h.form_name, \
    h.revision_id, r.parent_revision_id, h.head_seq, h.title, h.fields_json, h.extra_json, \
    h.tags_json, h.links_json, h.assets_json, h.deleted, h.deleted_at_ms, h.author, h.updated_by, \
    h.checksum, h.created_at_ms, h.updated_at_ms";

pub(in crate::store) const HEAD_FROM: &str =
    "entry_heads h JOIN entry_revisions r ON r.revision_id = h.revision_id";

pub(in crate::store) fn head_from_row(row: &Row<'_>) -> Result<HeadRow, StoreError> {
    Ok(HeadRow {
        entry_id: row.get(0)?,
        form_key: row.get(1)?,
        form_name: row.get(2)?,
        revision_id: row.get(3)?,
        parent_revision_id: row.get(4)?,
        head_seq: row.get(5)?,
        title: row.get(6)?,
        fields: serde_json::from_str(&row.get::<_, String>(7)?)?,
        extra_attributes: serde_json::from_str(&row.get::<_, String>(8)?)?,
        tags: serde_json::from_str(&row.get::<_, String>(9)?)?,
        links: serde_json::from_str(&row.get::<_, String>(10)?)?,
        assets: serde_json::from_str(&row.get::<_, String>(11)?)?,
        deleted: row.get::<_, i64>(12)? != 0,
        deleted_at_ms: row.get(13)?,
        author: row.get(14)?,
        updated_by: row.get(15)?,
        checksum: row.get(16)?,
        created_at_ms: row.get(17)?,
        updated_at_ms: row.get(18)?,
    })
}

pub(in crate::store) fn load_head_tx(
    conn: &Connection,
    entry_id: &str,
) -> Result<Option<HeadRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HEAD_COLUMNS} FROM {HEAD_FROM} WHERE h.entry_id = ?1"
    ))?;
    let mut rows = stmt.query(params![entry_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(head_from_row(row)?)),
        None => Ok(None),
    }
}

pub(in crate::store) const REVISION_COLUMNS: &str = "revision_id, seq, entry_id, form_key, \
    parent_revision_id, title, fields_json, extra_json, tags_json, links_json, assets_json, \
    deleted, author, checksum, restored_from, created_at_ms";

pub(in crate::store) fn revision_from_row(row: &Row<'_>) -> Result<Revision, StoreError> {
    Ok(Revision {
        revision_id: row.get(0)?,
        seq: row.get(1)?,
        entry_id: row.get(2)?,
        form_key: row.get(3)?,
        parent_revision_id: row.get(4)?,
        title: row.get(5)?,
        fields: serde_json::from_str(&row.get::<_, String>(6)?)?,
        extra_attributes: serde_json::from_str(&row.get::<_, String>(7)?)?,
        tags: serde_json::from_str(&row.get::<_, String>(8)?)?,
        links: serde_json::from_str(&row.get::<_, String>(9)?)?,
        assets: serde_json::from_str(&row.get::<_, String>(10)?)?,
        deleted: row.get::<_, i64>(11)? != 0,
        author: row.get(12)?,
        checksum: row.get(13)?,
        restored_from: row.get(14)?,
        created_at_ms: row.get(15)?,
    })
}

fn content_checksum(draft: &RevisionDraft<'_>) -> Result<String, StoreError> {
    let content = json!({
        "entry_id": draft.entry_id,
        "form": draft.form.key,
        "title": draft.title,
        "fields": draft.fields,
        "extra_attributes": draft.extra_attributes,
        "tags": draft.tags,
        "links": serde_json::to_value(&draft.links)?,
        "assets": serde_json::to_value(&draft.assets)?,
        "deleted": draft.deleted,
    });
    Ok(sha256_hex(canonical_json(&content).as_bytes()))
}

/// Atomic compare-and-append. Must run inside a write transaction: the head
/// comparison and the head move happen under the same lock.
pub(in crate::store) fn append_revision_tx(
    tx: &Transaction<'_>,
    draft: RevisionDraft<'_>,
) -> Result<Revision, StoreError> {
    let current = tx
        .query_row(
            "SELECT revision_id, form_key FROM entry_heads WHERE entry_id = ?1",
            params![draft.entry_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    match (&draft.expectation, &current) {
        (HeadExpectation::Absent, Some((head, _))) => {
            return Err(StoreError::RevisionMismatch {
                entry_id: draft.entry_id,
                expected: None,
                current: Some(head.clone()),
            });
        }
        (HeadExpectation::Exactly(_), None) => {
            return Err(StoreError::unknown("entry", draft.entry_id));
        }
        (HeadExpectation::Exactly(expected), Some((head, _))) if expected != head => {
            return Err(StoreError::RevisionMismatch {
                entry_id: draft.entry_id,
                expected: Some(expected.clone()),
                current: Some(head.clone()),
            });
        }
        _ => {}
    }
    if let Some((_, head_form)) = &current
        && head_form != &draft.form.key
    {
        return Err(StoreError::InvalidInput("entry belongs to a different form"));
    }

    let revision_id = uuid::Uuid::new_v4().simple().to_string();
    let parent_revision_id = current.map(|(head, _)| head);
    let checksum = content_checksum(&draft)?;
    let fields_json = serde_json::to_string(&draft.fields)?;
    let extra_json = serde_json::to_string(&draft.extra_attributes)?;
    let tags_json = serde_json::to_string(&draft.tags)?;
    let links_json = serde_json::to_string(&draft.links)?;
    let assets_json = serde_json::to_string(&draft.assets)?;
    let deleted = bool_to_sqlite(draft.deleted);

    tx.execute(
        r#"
        INSERT INTO entry_revisions(revision_id, entry_id, form_key, parent_revision_id,
          title, fields_json, extra_json, tags_json, links_json, assets_json,
          deleted, author, checksum, restored_from, created_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            revision_id,
            draft.entry_id,
            draft.form.key,
            parent_revision_id,
            draft.title,
            fields_json,
            extra_json,
            tags_json,
            links_json,
            assets_json,
            deleted,
            draft.author,
            checksum,
            draft.restored_from,
            draft.created_at_ms
        ],
    )?;
    let seq = tx.last_insert_rowid();

    tx.execute(
        r#"
        INSERT INTO entry_heads(entry_id, form_key, form_name, revision_id, head_seq,
          title, fields_json, extra_json, tags_json, links_json, assets_json,
          deleted, deleted_at_ms, author, updated_by, checksum, created_at_ms, updated_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
          CASE WHEN ?12 = 1 THEN ?15 ELSE NULL END, ?13, ?13, ?14, ?15, ?15)
        ON CONFLICT(entry_id) DO UPDATE SET
          form_name = excluded.form_name,
          revision_id = excluded.revision_id,
          head_seq = excluded.head_seq,
          title = excluded.title,
          fields_json = excluded.fields_json,
          extra_json = excluded.extra_json,
          tags_json = excluded.tags_json,
          links_json = excluded.links_json,
          assets_json = excluded.assets_json,
          deleted = excluded.deleted,
          deleted_at_ms = excluded.deleted_at_ms,
          updated_by = excluded.updated_by,
          checksum = excluded.checksum,
          updated_at_ms = excluded.updated_at_ms
        "#,
        params![
            draft.entry_id,
            draft.form.key,
            draft.form.name(),
            revision_id,
            seq,
            draft.title,
            fields_json,
            extra_json,
            tags_json,
            links_json,
            assets_json,
            deleted,
            draft.author,
            checksum,
            draft.created_at_ms
        ],
    )?;

    replace_projections_tx(tx, &draft)?;

    Ok(Revision {
        revision_id,
        seq,
        entry_id: draft.entry_id,
        form_key: draft.form.key.clone(),
        parent_revision_id,
        title: draft.title,
        fields: draft.fields,
        extra_attributes: draft.extra_attributes,
        tags: draft.tags,
        links: draft.links,
        assets: draft.assets,
        deleted: draft.deleted,
        author: draft.author,
        checksum,
        restored_from: draft.restored_from,
        created_at_ms: draft.created_at_ms,
    })
}

/// Rebuilds the link and asset projections of one entry. Tombstoned entries
/// project nothing.
fn replace_projections_tx(
    tx: &Transaction<'_>,
    draft: &RevisionDraft<'_>,
) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM entry_links WHERE source_entry_id = ?1",
        params![draft.entry_id],
    )?;
    tx.execute(
        "DELETE FROM entry_assets WHERE entry_id = ?1",
        params![draft.entry_id],
    )?;
    if draft.deleted {
        return Ok(());
    }

    let mut links: Vec<LinkRef> = draft.links.clone();
    for field in &draft.form.definition.fields {
        if !field.field_type.is_reference() {
            continue;
        }
        if let Some(Value::String(target)) = draft.fields.get(&field.name) {
            links.push(LinkRef::new(target.clone(), field.name.clone()));
        }
    }
    for link in links {
        tx.execute(
            r#"
            INSERT OR IGNORE INTO entry_links(link_id, source_entry_id, source_form_key, target_entry_id, kind)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                format!("{}:{}:{}", draft.entry_id, link.kind, link.target),
                draft.entry_id,
                draft.form.key,
                link.target,
                link.kind
            ],
        )?;
    }
    for asset in &draft.assets {
        tx.execute(
            "INSERT OR REPLACE INTO entry_assets(entry_id, asset_id, name, path) VALUES (?1, ?2, ?3, ?4)",
            params![draft.entry_id, asset.id, asset.name, asset.path],
        )?;
    }
    Ok(())
}
