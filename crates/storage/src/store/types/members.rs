#![forbid(unsafe_code)]

use tb_core::{Action, InvitationState, MemberState, Role};

#[derive(Clone, Debug, PartialEq)]
pub struct MemberRecord {
    pub user_id: String,
    pub role: Role,
    pub state: MemberState,
    /// Explicit grants of a service principal. Empty for every other role.
    pub scopes: Vec<Action>,
    pub groups: Vec<String>,
    pub invited_by: Option<String>,
    pub invited_at_ms: Option<i64>,
    pub activated_at_ms: Option<i64>,
    pub revoked_at_ms: Option<i64>,
    pub updated_at_ms: i64,
    pub audit_event_id: Option<String>,
}

impl MemberRecord {
    pub fn is_active(&self) -> bool {
        self.state == MemberState::Active
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Invitation {
    pub invitation_id: String,
    pub user_id: String,
    pub role: Role,
    pub email: Option<String>,
    pub state: InvitationState,
    pub invited_by: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub consumed_at_ms: Option<i64>,
}

/// Returned once at invite time. Only the token hash is persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub member: MemberRecord,
    pub token: String,
}

/// An API key of a service member. The secret itself is never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceAccountKey {
    pub key_id: String,
    pub user_id: String,
    pub name: String,
    /// Leading characters of the secret, kept to narrow lookups.
    pub key_prefix: String,
    pub created_by: String,
    pub created_at_ms: i64,
    pub revoked_at_ms: Option<i64>,
    pub rotated_from: Option<String>,
    pub last_used_at_ms: Option<i64>,
    pub usage_count: i64,
    pub audit_event_id: String,
}

impl ServiceAccountKey {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at_ms.is_some()
    }
}

/// Returned once at create or rotate time.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuedServiceAccountKey {
    pub key: ServiceAccountKey,
    pub secret: String,
}

/// A secret that matched a live key of an active service member.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedServiceAccountKey {
    pub key: ServiceAccountKey,
    pub member: MemberRecord,
}
