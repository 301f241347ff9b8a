#![forbid(unsafe_code)]

use rusqlite::ErrorCode;
use serde::Serialize;

/// One failing field. Validation collects every failure before reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldDiagnostic {
    pub field: String,
    pub code: &'static str,
    pub message: String,
}

impl FieldDiagnostic {
    pub fn new(field: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldDiagnostic>),
    #[error("revision mismatch (entry={entry_id}, expected={expected:?}, current={current:?})")]
    RevisionMismatch {
        entry_id: String,
        expected: Option<String>,
        current: Option<String>,
    },
    #[error("unknown {kind}: {id}")]
    UnknownId { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("query: {0}")]
    Query(#[from] QueryError),
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),
    #[error("credential hashing: {0}")]
    Credential(String),
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("audit chain broken at index {first_broken_index}")]
    IntegrityViolation { first_broken_index: usize },
    #[error("RESET_REQUIRED: {0}")]
    ResetRequired(&'static str),
}

impl StoreError {
    pub fn invalid_field(
        field: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation(vec![FieldDiagnostic::new(field, code, message)])
    }

    pub(crate) fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        Self::UnknownId {
            kind,
            id: id.into(),
        }
    }

    /// Busy or locked database. The only failure a read may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sql(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

fn summarize(diagnostics: &[FieldDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("{}: {}", d.field, d.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Rejections from the restricted query dialect.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("only a single SELECT statement is allowed")]
    MultipleStatements,
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("order by must include the unique tie-breaker {0}")]
    MissingTieBreaker(String),
    #[error("variable is not declared: {0}")]
    UndeclaredVariable(String),
    #[error("invalid variable {name}: {message}")]
    InvalidVariable { name: String, message: String },
}

impl From<sqlparser::parser::ParserError> for QueryError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::Syntax(err.to_string())
    }
}
