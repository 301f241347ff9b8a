#![forbid(unsafe_code)]

use super::*;
use rusqlite::{OptionalExtension, Row as SqlRow, params};
use serde_json::json;
use std::collections::BTreeMap;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_MARKERS: &[&str] = &[
    "token",
    "secret",
    "password",
    "authorization",
    "api_key",
    "cookie",
];

const EVENT_COLUMNS: &str = "event_id, timestamp, actor, action, target_type, target_id, outcome, \
    metadata_json, prev_hash, event_hash";

fn redact_metadata(metadata: BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .into_iter()
        .map(|(key, value)| {
            let lowered = key.to_ascii_lowercase();
            if SENSITIVE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                (key, REDACTED.to_string())
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Sorted-key JSON of every field except `event_hash`.
fn canonical_event(event: &AuditEvent) -> String {
    canonical_json(&json!({
        "id": event.id,
        "timestamp": event.timestamp,
        "space_id": event.space_id,
        "actor": event.actor,
        "action": event.action,
        "target_type": event.target_type,
        "target_id": event.target_id,
        "outcome": event.outcome,
        "metadata": event.metadata,
        "prev_hash": event.prev_hash,
    }))
}

fn event_hash(event: &AuditEvent) -> String {
    let material = format!("{}{}", canonical_event(event), event.prev_hash);
    sha256_hex(material.as_bytes())
}

fn event_from_row(row: &SqlRow<'_>, space_id: &str) -> Result<AuditEvent, StoreError> {
    Ok(AuditEvent {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        space_id: space_id.to_string(),
        actor: row.get(2)?,
        action: row.get(3)?,
        target_type: row.get(4)?,
        target_id: row.get(5)?,
        outcome: row.get(6)?,
        metadata: serde_json::from_str(&row.get::<_, String>(7)?)?,
        prev_hash: row.get(8)?,
        event_hash: row.get(9)?,
    })
}

fn audit_anchor(conn: &Connection) -> Result<String, StoreError> {
    Ok(conn.query_row(
        "SELECT audit_anchor_hash FROM space_state WHERE singleton=1",
        [],
        |row| row.get::<_, String>(0),
    )?)
}

/// Recomputes the chain from the retention anchor.
fn verify_chain_of(conn: &Connection, space_id: &str) -> Result<ChainVerification, StoreError> {
    let mut prev_hash = audit_anchor(conn)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM audit_events ORDER BY seq ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut index = 0usize;
    while let Some(row) = rows.next()? {
        // A row whose metadata no longer decodes counts as tampered.
        let intact = match event_from_row(row, space_id) {
            Ok(event) => event.prev_hash == prev_hash && event_hash(&event) == event.event_hash,
            Err(StoreError::Json(_)) => false,
            Err(err) => return Err(err),
        };
        if !intact {
            return Ok(ChainVerification::Broken {
                first_broken_index: index,
            });
        }
        prev_hash = row.get::<_, String>(9)?;
        index += 1;
    }
    Ok(ChainVerification::Valid { events: index })
}

/// Chains and stores one event inside the caller's transaction. A broken chain
/// refuses the append.
pub(in crate::store) fn append_audit_tx(
    tx: &Transaction<'_>,
    space_id: &str,
    draft: AuditDraft,
    retention: usize,
) -> Result<AuditEvent, StoreError> {
    if let ChainVerification::Broken { first_broken_index } = verify_chain_of(tx, space_id)? {
        tracing::error!(space_id, first_broken_index, "audit chain verification failed");
        return Err(StoreError::IntegrityViolation { first_broken_index });
    }

    let prev_hash = tx
        .query_row(
            "SELECT event_hash FROM audit_events ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let prev_hash = match prev_hash {
        Some(hash) => hash,
        None => audit_anchor(tx)?,
    };

    let AuditDraft {
        actor,
        action,
        target_type,
        target_id,
        outcome,
        metadata,
        timestamp_ms,
    } = draft;
    let actor = if actor.trim().is_empty() {
        "anonymous".to_string()
    } else {
        actor
    };

    let mut event = AuditEvent {
        id: format!("audit-{}", uuid::Uuid::new_v4().simple()),
        timestamp: ts_ms_to_rfc3339(timestamp_ms),
        space_id: space_id.to_string(),
        actor,
        action,
        target_type,
        target_id,
        outcome: outcome.as_str().to_string(),
        metadata: redact_metadata(metadata),
        prev_hash,
        event_hash: String::new(),
    };
    event.event_hash = event_hash(&event);

    tx.execute(
        r#"
        INSERT INTO audit_events(event_id, timestamp, actor, action, target_type, target_id,
          outcome, metadata_json, prev_hash, event_hash)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            event.id,
            event.timestamp,
            event.actor,
            event.action,
            event.target_type,
            event.target_id,
            event.outcome,
            serde_json::to_string(&event.metadata)?,
            event.prev_hash,
            event.event_hash
        ],
    )?;

    trim_to_retention_tx(tx, retention)?;
    Ok(event)
}

/// Drops the oldest events beyond `retention` and re-anchors the chain on the
/// new first event.
fn trim_to_retention_tx(tx: &Transaction<'_>, retention: usize) -> Result<(), StoreError> {
    let retention = to_sqlite_i64(retention.max(1))?;
    let total: i64 = tx.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
    if total <= retention {
        return Ok(());
    }

    tx.execute(
        r#"
        DELETE FROM audit_events
        WHERE seq IN (SELECT seq FROM audit_events ORDER BY seq ASC LIMIT ?1)
        "#,
        params![total - retention],
    )?;
    let anchor: String = tx.query_row(
        "SELECT prev_hash FROM audit_events ORDER BY seq ASC LIMIT 1",
        [],
        |row| row.get(0),
    )?;
    tx.execute(
        "UPDATE space_state SET audit_anchor_hash = ?1 WHERE singleton=1",
        params![anchor],
    )?;
    tracing::debug!(trimmed = total - retention, "audit events trimmed to retention");
    Ok(())
}

impl SpaceStore {
    pub fn append_audit(&mut self, draft: AuditDraft) -> Result<AuditEvent, StoreError> {
        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        let event = append_audit_tx(&tx, &space_id, draft, retention)?;
        tx.commit()?;
        Ok(event)
    }

    pub fn verify_chain(&self) -> Result<ChainVerification, StoreError> {
        let verification = self.read(|conn| verify_chain_of(conn, &self.space_id))?;
        if let ChainVerification::Broken { first_broken_index } = verification {
            tracing::error!(
                space_id = self.space_id.as_str(),
                first_broken_index,
                "audit chain verification failed"
            );
        }
        Ok(verification)
    }

    /// Filtered page in append order, with the filtered total.
    pub fn list_audit_events(&self, filter: AuditFilter) -> Result<AuditPage, StoreError> {
        let AuditFilter {
            action,
            actor,
            outcome,
            offset,
            limit,
        } = filter;
        let limit = limit
            .unwrap_or(DEFAULT_AUDIT_LIST_LIMIT)
            .clamp(1, MAX_AUDIT_LIST_LIMIT);
        let action = action.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        let actor = actor.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        let outcome = outcome.map(|value| value.as_str());
        let sql_limit = to_sqlite_i64(limit)?;
        let sql_offset = to_sqlite_i64(offset)?;

        self.read(|conn| {
            let total: i64 = conn.query_row(
                r#"
                SELECT COUNT(*) FROM audit_events
                WHERE (?1 IS NULL OR action = ?1)
                  AND (?2 IS NULL OR actor = ?2)
                  AND (?3 IS NULL OR outcome = ?3)
                "#,
                params![action, actor, outcome],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {EVENT_COLUMNS} FROM audit_events
                WHERE (?1 IS NULL OR action = ?1)
                  AND (?2 IS NULL OR actor = ?2)
                  AND (?3 IS NULL OR outcome = ?3)
                ORDER BY seq ASC
                LIMIT ?4 OFFSET ?5
                "#
            ))?;
            let mut rows = stmt.query(params![action, actor, outcome, sql_limit, sql_offset])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(event_from_row(row, &self.space_id)?);
            }
            Ok(AuditPage {
                items,
                total: from_sqlite_usize(total),
                offset,
                limit,
            })
        })
    }
}
