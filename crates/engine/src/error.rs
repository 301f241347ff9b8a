#![forbid(unsafe_code)]

use tb_core::Action;
use tb_storage::{FieldDiagnostic, QueryError, StoreError};

/// Which authorization check refused the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeniedCheck {
    SpaceRole,
    FormAcl,
    Scope,
}

impl DeniedCheck {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpaceRole => "space_role",
            Self::FormAcl => "form_acl",
            Self::Scope => "scope",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        diagnostics: Vec<FieldDiagnostic>,
    },
    #[error("conflict on entry {entry_id}: current head is {current_revision_id:?}")]
    Conflict {
        entry_id: String,
        current_revision_id: Option<String>,
    },
    #[error("unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("forbidden by {} check for {}: {detail}", .check.as_str(), .action.as_str())]
    Forbidden {
        check: DeniedCheck,
        action: Action,
        detail: String,
    },
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("session expired: {session_id}")]
    Expired { session_id: String },
    #[error("audit chain broken at index {first_broken_index}")]
    Integrity { first_broken_index: usize },
    #[error("storage: {0}")]
    Storage(StoreError),
}

impl EngineError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        let diagnostic = FieldDiagnostic::new(field, code, message);
        Self::Validation {
            message: format!("{}: {}", diagnostic.field, diagnostic.message),
            diagnostics: vec![diagnostic],
        }
    }

    pub(crate) fn forbidden(check: DeniedCheck, action: Action, detail: impl Into<String>) -> Self {
        Self::Forbidden {
            check,
            action,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Forbidden { .. } => "forbidden",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidToken(_) => "invalid_token",
            Self::Expired { .. } => "expired",
            Self::Integrity { .. } => "integrity",
            Self::Storage(_) => "storage",
        }
    }

    /// Policy refusals, as opposed to failures of an authorized call.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Forbidden { .. } | Self::Unauthenticated)
    }
}

fn query_code(err: &QueryError) -> &'static str {
    match err {
        QueryError::MissingTieBreaker(_) => "missing_tie_breaker",
        QueryError::UnknownTable(_) => "unknown_table",
        QueryError::UndeclaredVariable(_) => "undeclared_variable",
        QueryError::InvalidVariable { .. } => "invalid_variable",
        QueryError::Unsupported(_) => "unsupported",
        QueryError::EmptyQuery
        | QueryError::Syntax(_)
        | QueryError::MultipleStatements => "invalid_sql",
    }
}

impl From<QueryError> for EngineError {
    fn from(err: QueryError) -> Self {
        Self::invalid("sql", query_code(&err), err.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(diagnostics) => Self::Validation {
                message: diagnostics
                    .iter()
                    .map(|d| format!("{}: {}", d.field, d.message))
                    .collect::<Vec<_>>()
                    .join("; "),
                diagnostics,
            },
            StoreError::InvalidInput(message) => Self::Validation {
                message: message.to_string(),
                diagnostics: Vec::new(),
            },
            StoreError::RevisionMismatch {
                entry_id, current, ..
            } => Self::Conflict {
                entry_id,
                current_revision_id: current,
            },
            StoreError::UnknownId { kind, id } => Self::NotFound { kind, id },
            StoreError::AlreadyExists { kind, id } => Self::AlreadyExists { kind, id },
            StoreError::Query(err) => err.into(),
            StoreError::InvalidToken(message) => Self::InvalidToken(message.to_string()),
            StoreError::SessionExpired(session_id) => Self::Expired { session_id },
            StoreError::IntegrityViolation { first_broken_index } => {
                Self::Integrity { first_broken_index }
            }
            other => Self::Storage(other),
        }
    }
}
