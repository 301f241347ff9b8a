#![forbid(unsafe_code)]

use crate::store::{EntryContent, FormDefinition, SqlVariable};
use serde_json::{Map, Value};
use tb_core::{Action, Role};

#[derive(Clone, Debug, PartialEq)]
pub struct DefineFormRequest {
    pub definition: FormDefinition,
    pub author: String,
    pub defined_at_ms: i64,
}

/// `parent_revision_id = None` creates the entry; otherwise it must equal the
/// current head.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendRevisionRequest {
    pub form: String,
    pub entry_id: String,
    pub parent_revision_id: Option<String>,
    pub content: EntryContent,
    pub author: String,
    pub created_at_ms: i64,
}

/// Without a parent the tombstone lands on whatever head is current.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteEntryRequest {
    pub entry_id: String,
    pub parent_revision_id: Option<String>,
    pub author: String,
    pub deleted_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreRevisionRequest {
    pub entry_id: String,
    pub revision_id: String,
    pub parent_revision_id: Option<String>,
    pub author: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedQueryRequest {
    pub id: String,
    pub parent_revision_id: Option<String>,
    pub name: String,
    pub sql: String,
    pub variables: Vec<SqlVariable>,
    pub author: String,
    pub written_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteSavedQueryRequest {
    pub id: String,
    pub parent_revision_id: Option<String>,
    pub author: String,
    pub deleted_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateSessionRequest {
    pub session_id: String,
    pub sql_id: Option<String>,
    pub sql_revision_id: Option<String>,
    pub sql_text: String,
    pub variables: Map<String, Value>,
    pub order_by: Vec<String>,
    pub created_by: String,
    pub created_at_ms: i64,
    pub ttl_ms: i64,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InviteMemberRequest {
    pub user_id: String,
    pub role: Role,
    pub email: Option<String>,
    pub invited_by: String,
    pub invited_at_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub user_id: String,
    pub accepted_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateRoleRequest {
    pub user_id: String,
    pub role: Role,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokeMemberRequest {
    pub user_id: String,
    pub revoked_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterServiceAccountRequest {
    pub user_id: String,
    pub scopes: Vec<Action>,
    pub registered_by: String,
    pub registered_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetMemberGroupsRequest {
    pub user_id: String,
    pub groups: Vec<String>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateServiceKeyRequest {
    pub user_id: String,
    pub name: String,
    pub created_by: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotateServiceKeyRequest {
    pub key_id: String,
    /// Defaults to the name of the key being replaced.
    pub name: Option<String>,
    pub rotated_by: String,
    pub rotated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokeServiceKeyRequest {
    pub key_id: String,
    pub revoked_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveServiceKeyRequest {
    pub secret: String,
    pub used_at_ms: i64,
}
