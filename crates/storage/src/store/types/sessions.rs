#![forbid(unsafe_code)]

use serde::Serialize;
use serde_json::{Map, Value};
use tb_core::SessionStatus;

pub type Row = Map<String, Value>;

/// Metadata-only session record. Holds no result rows.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySession {
    pub id: String,
    pub sql_id: Option<String>,
    pub sql_revision_id: Option<String>,
    pub sql_text: String,
    pub variables: Map<String, Value>,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub created_by: String,
    pub snapshot_seq: i64,
    /// Ordering columns of the paging contract; always ends in the tie-breaker.
    pub order_by: Vec<String>,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl QuerySession {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowPage {
    pub rows: Vec<Row>,
    pub offset: usize,
    pub limit: usize,
    pub total_count: usize,
}

impl RowPage {
    pub fn has_more(&self) -> bool {
        self.offset + self.rows.len() < self.total_count
    }
}
