#![forbid(unsafe_code)]

use crate::EngineError;
use std::collections::BTreeMap;
use tb_core::CredentialKind;
use time::OffsetDateTime;

pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// An identity vouched for by the identity resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub credential: CredentialKind,
}

impl Principal {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            credential: CredentialKind::User,
        }
    }

    pub fn service(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            credential: CredentialKind::Service,
        }
    }
}

/// Per-call context: who is calling, the clock reading every timestamp of
/// the call uses, and request metadata copied (redacted) into audit events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    principal: Option<Principal>,
    now_ms: i64,
    metadata: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            now_ms: now_ms(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            principal: None,
            now_ms: now_ms(),
            metadata: BTreeMap::new(),
        }
    }

    /// Pins the call's clock.
    pub fn at(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn principal(&self) -> Result<&Principal, EngineError> {
        self.principal.as_ref().ok_or(EngineError::Unauthenticated)
    }

    pub fn actor(&self) -> &str {
        self.principal
            .as_ref()
            .map_or(ANONYMOUS_ACTOR, |principal| principal.user_id.as_str())
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

pub fn now_ms() -> i64 {
    let ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(ms.max(0)).unwrap_or(i64::MAX)
}
