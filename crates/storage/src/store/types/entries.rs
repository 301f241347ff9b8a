#![forbid(unsafe_code)]

use super::FieldValue;
use crate::store::FieldDiagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn default_link_kind() -> String {
    "link".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    pub target: String,
    #[serde(default = "default_link_kind")]
    pub kind: String,
}

impl LinkRef {
    pub fn new(target: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
        }
    }
}

/// Asset metadata only; blobs live with an external collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

/// Caller-supplied content of one write. `fields` are raw, pre-coercion values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryContent {
    pub title: String,
    pub fields: Map<String, Value>,
    pub tags: Vec<String>,
    pub links: Vec<LinkRef>,
    pub assets: Vec<AssetRef>,
}

impl EntryContent {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entry {
    pub id: String,
    pub form: String,
    pub title: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub extra_attributes: Map<String, Value>,
    pub tags: Vec<String>,
    pub links: Vec<LinkRef>,
    pub assets: Vec<AssetRef>,
    pub revision_id: String,
    pub parent_revision_id: Option<String>,
    pub snapshot_seq: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub author: String,
    pub updated_by: String,
    pub checksum: String,
    pub deleted: bool,
    pub deleted_at_ms: Option<i64>,
}

/// Immutable history record. Field values keep their stored JSON so history
/// stays readable after the Form changes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Revision {
    pub revision_id: String,
    pub seq: i64,
    pub entry_id: String,
    pub form_key: String,
    pub parent_revision_id: Option<String>,
    pub title: String,
    pub fields: Map<String, Value>,
    pub extra_attributes: Map<String, Value>,
    pub tags: Vec<String>,
    pub links: Vec<LinkRef>,
    pub assets: Vec<AssetRef>,
    pub deleted: bool,
    pub author: String,
    pub checksum: String,
    pub restored_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidatedFields {
    pub fields: BTreeMap<String, FieldValue>,
    pub extra_attributes: Map<String, Value>,
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl ValidatedFields {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanOrder {
    #[default]
    EntryId,
    CreatedAt,
    UpdatedAtDesc,
}
