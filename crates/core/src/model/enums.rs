#![forbid(unsafe_code)]

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
    Service,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
            Self::Service => "service",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "editor" => Some(Self::Editor),
            "viewer" => Some(Self::Viewer),
            "service" => Some(Self::Service),
            _ => None,
        }
    }

    /// Roles an admin may hand out through invitations or role changes.
    pub fn is_assignable(self) -> bool {
        matches!(self, Self::Admin | Self::Editor | Self::Viewer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberState {
    Invited,
    Active,
    Revoked,
}

impl MemberState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invited" => Some(Self::Invited),
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvitationState {
    Pending,
    Accepted,
    Expired,
    Revoked,
}

impl InvitationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    Running,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Deny,
    Error,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Deny => "deny",
            Self::Error => "error",
        }
    }

    /// Unknown or empty outcomes normalize to `success`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "deny" => Self::Deny,
            "error" => Self::Error,
            _ => Self::Success,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtraAttributesPolicy {
    #[default]
    Deny,
    AllowJson,
    AllowColumns,
}

impl ExtraAttributesPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::AllowJson => "allow_json",
            Self::AllowColumns => "allow_columns",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "deny" => Some(Self::Deny),
            "allow_json" => Some(Self::AllowJson),
            "allow_columns" => Some(Self::AllowColumns),
            _ => None,
        }
    }

    pub fn allows_extra(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Markdown,
    Number,
    Integer,
    Double,
    Float,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Binary,
    List,
    ObjectList,
    RowReference,
}

impl FieldType {
    pub const ALL: &'static [FieldType] = &[
        Self::String,
        Self::Markdown,
        Self::Number,
        Self::Integer,
        Self::Double,
        Self::Float,
        Self::Boolean,
        Self::Date,
        Self::Time,
        Self::Timestamp,
        Self::TimestampTz,
        Self::Uuid,
        Self::Binary,
        Self::List,
        Self::ObjectList,
        Self::RowReference,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Markdown => "markdown",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamp_tz",
            Self::Uuid => "uuid",
            Self::Binary => "binary",
            Self::List => "list",
            Self::ObjectList => "object_list",
            Self::RowReference => "row_reference",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|ty| ty.as_str() == value)
    }

    pub fn is_reference(self) -> bool {
        matches!(self, Self::RowReference)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    SpaceList,
    SpaceRead,
    SpaceAdmin,
    EntryRead,
    EntryWrite,
    FormRead,
    FormWrite,
    AssetRead,
    AssetWrite,
    SqlRead,
    SqlWrite,
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Self::SpaceList,
        Self::SpaceRead,
        Self::SpaceAdmin,
        Self::EntryRead,
        Self::EntryWrite,
        Self::FormRead,
        Self::FormWrite,
        Self::AssetRead,
        Self::AssetWrite,
        Self::SqlRead,
        Self::SqlWrite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpaceList => "space_list",
            Self::SpaceRead => "space_read",
            Self::SpaceAdmin => "space_admin",
            Self::EntryRead => "entry_read",
            Self::EntryWrite => "entry_write",
            Self::FormRead => "form_read",
            Self::FormWrite => "form_write",
            Self::AssetRead => "asset_read",
            Self::AssetWrite => "asset_write",
            Self::SqlRead => "sql_read",
            Self::SqlWrite => "sql_write",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.iter().copied().find(|action| action.as_str() == value)
    }
}

/// Kind of principal named in a Form ACL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrincipalKind {
    User,
    UserGroup,
}

impl PrincipalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::UserGroup => "user_group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "user" => Some(Self::User),
            "user_group" => Some(Self::UserGroup),
            _ => None,
        }
    }
}

/// How the identity resolver authenticated the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    User,
    Service,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Service => "service",
        }
    }
}
