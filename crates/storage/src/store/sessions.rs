#![forbid(unsafe_code)]

use super::*;
use rusqlite::{Row as SqlRow, params};
use tb_core::SessionStatus;

const SESSION_COLUMNS: &str = "session_id, sql_id, sql_revision_id, sql_text, variables_json, \
    status, error, created_by, snapshot_seq, order_by_json, default_page_size, max_page_size, \
    created_at_ms, expires_at_ms";

fn session_from_row(row: &SqlRow<'_>) -> Result<QuerySession, StoreError> {
    let status: String = row.get(5)?;
    Ok(QuerySession {
        id: row.get(0)?,
        sql_id: row.get(1)?,
        sql_revision_id: row.get(2)?,
        sql_text: row.get(3)?,
        variables: serde_json::from_str(&row.get::<_, String>(4)?)?,
        status: SessionStatus::parse(&status)
            .ok_or(StoreError::InvalidInput("stored session has an unknown status"))?,
        error: row.get(6)?,
        created_by: row.get(7)?,
        snapshot_seq: row.get(8)?,
        order_by: serde_json::from_str(&row.get::<_, String>(9)?)?,
        default_page_size: from_sqlite_usize(row.get(10)?),
        max_page_size: from_sqlite_usize(row.get(11)?),
        created_at_ms: row.get(12)?,
        expires_at_ms: row.get(13)?,
    })
}

fn load_session(conn: &Connection, session_id: &str) -> Result<Option<QuerySession>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM query_sessions WHERE session_id = ?1"
    ))?;
    let mut rows = stmt.query(params![session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(session_from_row(row)?)),
        None => Ok(None),
    }
}

impl SpaceStore {
    /// Records the session metadata. Nothing is executed here.
    pub fn create_session(
        &mut self,
        request: CreateSessionRequest,
    ) -> Result<QuerySession, StoreError> {
        let CreateSessionRequest {
            session_id,
            sql_id,
            sql_revision_id,
            sql_text,
            variables,
            order_by,
            created_by,
            created_at_ms,
            ttl_ms,
            default_page_size,
            max_page_size,
        } = request;

        if session_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("session id must not be empty"));
        }
        if ttl_ms <= 0 {
            return Err(StoreError::InvalidInput("session ttl must be positive"));
        }
        if default_page_size == 0 || max_page_size < default_page_size {
            return Err(StoreError::InvalidInput("page sizes must satisfy 0 < default <= max"));
        }

        let expires_at_ms = created_at_ms.saturating_add(ttl_ms);
        let tx = begin_write(&mut self.conn)?;
        let snapshot_seq = snapshot_seq_of(&tx)?;
        let inserted = tx.execute(
            r#"
            INSERT INTO query_sessions(session_id, sql_id, sql_revision_id, sql_text, variables_json,
              status, error, created_by, snapshot_seq, order_by_json, default_page_size, max_page_size,
              created_at_ms, expires_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?12)
            "#,
            params![
                session_id,
                sql_id,
                sql_revision_id,
                sql_text,
                serde_json::to_string(&variables)?,
                SessionStatus::Ready.as_str(),
                created_by,
                snapshot_seq,
                serde_json::to_string(&order_by)?,
                to_sqlite_i64(default_page_size)?,
                to_sqlite_i64(max_page_size)?,
                created_at_ms,
                expires_at_ms
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(StoreError::AlreadyExists {
                    kind: "session",
                    id: session_id,
                });
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            session_id = session_id.as_str(),
            snapshot_seq,
            "query session created"
        );
        Ok(QuerySession {
            id: session_id,
            sql_id,
            sql_revision_id,
            sql_text,
            variables,
            status: SessionStatus::Ready,
            error: None,
            created_by,
            snapshot_seq,
            order_by,
            default_page_size,
            max_page_size,
            created_at_ms,
            expires_at_ms,
        })
    }

    /// A session past its TTL is flipped to `expired` and reported as such.
    pub fn get_session(&self, session_id: &str, now_ms: i64) -> Result<QuerySession, StoreError> {
        let session = self
            .read(|conn| load_session(conn, session_id))?
            .ok_or_else(|| StoreError::unknown("session", session_id))?;

        if session.status == SessionStatus::Expired || session.is_expired_at(now_ms) {
            if session.status != SessionStatus::Expired {
                self.conn.execute(
                    "UPDATE query_sessions SET status = ?2, updated_at_ms = ?3 WHERE session_id = ?1",
                    params![session_id, SessionStatus::Expired.as_str(), now_ms],
                )?;
            }
            tracing::warn!(
                space_id = self.space_id.as_str(),
                session_id,
                "query session expired"
            );
            return Err(StoreError::SessionExpired(session_id.to_string()));
        }
        Ok(session)
    }

    pub fn set_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE query_sessions SET status = ?2, error = ?3, updated_at_ms = ?4 WHERE session_id = ?1",
            params![session_id, status.as_str(), error, now_ms],
        )?;
        if changed == 0 {
            return Err(StoreError::unknown("session", session_id));
        }
        Ok(())
    }

    /// Removes every session whose TTL has passed. Returns how many went.
    pub fn purge_expired_sessions(&mut self, now_ms: i64) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM query_sessions WHERE expires_at_ms <= ?1 OR status = ?2",
            params![now_ms, SessionStatus::Expired.as_str()],
        )?;
        if removed > 0 {
            tracing::info!(
                space_id = self.space_id.as_str(),
                removed,
                "expired query sessions purged"
            );
        }
        Ok(removed)
    }
}
