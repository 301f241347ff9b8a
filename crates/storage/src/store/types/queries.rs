#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tb_core::PrincipalRef;

pub const VARIABLE_TYPES: &[&str] = &[
    "string",
    "number",
    "integer",
    "boolean",
    "date",
    "timestamp",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(default)]
    pub description: String,
}

impl SqlVariable {
    pub fn new(name: impl Into<String>, var_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            var_type: var_type.into(),
            description: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SavedQuery {
    pub id: String,
    pub name: String,
    pub sql: String,
    pub variables: Vec<SqlVariable>,
    pub revision_id: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub author: String,
    pub updated_by: String,
}

/// Derived-view metadata, 1:1 with a live saved query.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewMeta {
    pub sql_id: String,
    pub sql_revision_id: String,
    pub sql_text: String,
    pub source_forms: Vec<String>,
    /// `None` defers to the space-level policy.
    pub read_principals: Option<Vec<PrincipalRef>>,
    pub fingerprint: String,
    pub snapshot_seq: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
