#![forbid(unsafe_code)]

use super::super::forms::{decode_fields, decode_historical_fields, load_form, require_form};
use super::super::*;
use super::append::{HeadRow, REVISION_COLUMNS, load_head_tx, revision_from_row};
use rusqlite::{OptionalExtension, params};

pub(in crate::store) fn entry_from_head(head: HeadRow, form: Option<&Form>) -> Entry {
    let fields = form
        .map(|form| decode_fields(&form.definition, &head.fields))
        .unwrap_or_default();
    Entry {
        id: head.entry_id,
        form: head.form_name,
        title: head.title,
        fields,
        extra_attributes: head.extra_attributes,
        tags: head.tags,
        links: head.links,
        assets: head.assets,
        revision_id: head.revision_id,
        parent_revision_id: head.parent_revision_id,
        snapshot_seq: head.head_seq,
        created_at_ms: head.created_at_ms,
        updated_at_ms: head.updated_at_ms,
        author: head.author,
        updated_by: head.updated_by,
        checksum: head.checksum,
        deleted: head.deleted,
        deleted_at_ms: head.deleted_at_ms,
    }
}

pub(in crate::store) fn load_revision(
    conn: &Connection,
    entry_id: &str,
    revision_id: &str,
) -> Result<Option<Revision>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REVISION_COLUMNS} FROM entry_revisions WHERE revision_id = ?1 AND entry_id = ?2"
    ))?;
    let mut rows = stmt.query(params![revision_id, entry_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(revision_from_row(row)?)),
        None => Ok(None),
    }
}

fn history_of(
    conn: &Connection,
    entry_id: &str,
    upto_seq: i64,
) -> Result<Vec<Revision>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REVISION_COLUMNS} FROM entry_revisions \
         WHERE entry_id = ?1 AND seq <= ?2 ORDER BY seq ASC"
    ))?;
    let mut rows = stmt.query(params![entry_id, upto_seq])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(revision_from_row(row)?);
    }
    Ok(out)
}

/// Rebuilds the entry as it stood at `upto_seq` from its revision stream.
fn reconstruct(
    conn: &Connection,
    entry_id: &str,
    upto_seq: i64,
) -> Result<Option<Entry>, StoreError> {
    let history = history_of(conn, entry_id, upto_seq)?;
    let (Some(first), Some(last)) = (history.first(), history.last()) else {
        return Ok(None);
    };
    if last.deleted {
        return Ok(None);
    }
    let form = load_form(conn, &last.form_key)?;
    let fields =
        decode_historical_fields(form.as_ref().map(|form| &form.definition), &last.fields);
    Ok(Some(Entry {
        id: last.entry_id.clone(),
        form: form
            .as_ref()
            .map(|form| form.name().to_string())
            .unwrap_or_else(|| last.form_key.clone()),
        title: last.title.clone(),
        fields,
        extra_attributes: last.extra_attributes.clone(),
        tags: last.tags.clone(),
        links: last.links.clone(),
        assets: last.assets.clone(),
        revision_id: last.revision_id.clone(),
        parent_revision_id: last.parent_revision_id.clone(),
        snapshot_seq: last.seq,
        created_at_ms: first.created_at_ms,
        updated_at_ms: last.created_at_ms,
        author: first.author.clone(),
        updated_by: last.author.clone(),
        checksum: last.checksum.clone(),
        deleted: false,
        deleted_at_ms: None,
    }))
}

impl SpaceStore {
    /// Live head of an entry. Tombstoned entries read as unknown.
    pub fn read_current(&self, entry_id: &str) -> Result<Entry, StoreError> {
        self.read(|conn| {
            let head = load_head_tx(conn, entry_id)?
                .filter(|head| !head.deleted)
                .ok_or_else(|| StoreError::unknown("entry", entry_id))?;
            let form = load_form(conn, &head.form_key)?;
            Ok(entry_from_head(head, form.as_ref()))
        })
    }

    /// Form of the entry's head, tombstones included. Used by callers that
    /// must authorize before reading.
    pub fn entry_form_name(&self, entry_id: &str) -> Result<String, StoreError> {
        self.read(|conn| {
            load_head_tx(conn, entry_id)?
                .map(|head| head.form_name)
                .ok_or_else(|| StoreError::unknown("entry", entry_id))
        })
    }

    pub fn read_at(&self, entry_id: &str, revision_id: &str) -> Result<Revision, StoreError> {
        self.read(|conn| {
            load_revision(conn, entry_id, revision_id)?
                .ok_or_else(|| StoreError::unknown("revision", revision_id))
        })
    }

    /// The entry as of a snapshot marker, rebuilt from history.
    pub fn read_as_of(&self, entry_id: &str, snapshot_seq: i64) -> Result<Entry, StoreError> {
        self.read(|conn| {
            reconstruct(conn, entry_id, snapshot_seq)?
                .ok_or_else(|| StoreError::unknown("entry", entry_id))
        })
    }

    /// Every live entry of a Form as of a snapshot marker, by entry id.
    pub fn table_as_of(&self, form: &str, snapshot_seq: i64) -> Result<Vec<Entry>, StoreError> {
        self.read(|conn| {
            let form = require_form(conn, form)?;
            let mut stmt = conn.prepare(
                "SELECT DISTINCT entry_id FROM entry_revisions WHERE form_key = ?1 AND seq <= ?2 ORDER BY entry_id ASC",
            )?;
            let mut rows = stmt.query(params![form.key, snapshot_seq])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(row.get::<_, String>(0)?);
            }
            let mut out = Vec::with_capacity(ids.len());
            for entry_id in ids {
                if let Some(entry) = reconstruct(conn, &entry_id, snapshot_seq)? {
                    out.push(entry);
                }
            }
            Ok(out)
        })
    }

    /// Full revision chain, oldest first.
    pub fn entry_history(&self, entry_id: &str) -> Result<Vec<Revision>, StoreError> {
        self.read(|conn| {
            let history = history_of(conn, entry_id, i64::MAX)?;
            if history.is_empty() {
                return Err(StoreError::unknown("entry", entry_id));
            }
            Ok(history)
        })
    }

    pub fn current_head(&self, entry_id: &str) -> Result<Option<String>, StoreError> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT revision_id FROM entry_heads WHERE entry_id = ?1",
                    params![entry_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        })
    }
}
