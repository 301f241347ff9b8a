#![forbid(unsafe_code)]

use serde::Serialize;
use std::collections::BTreeMap;
use tb_core::AuditOutcome;

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
pub const DEFAULT_AUDIT_LIST_LIMIT: usize = 100;
pub const MAX_AUDIT_LIST_LIMIT: usize = 500;

/// An event before it is chained.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditDraft {
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub timestamp_ms: i64,
}

impl AuditDraft {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        outcome: AuditOutcome,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            outcome,
            metadata: BTreeMap::new(),
            timestamp_ms,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: String,
    pub space_id: String,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub outcome: String,
    pub metadata: BTreeMap<String, String>,
    pub prev_hash: String,
    pub event_hash: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub actor: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditEvent>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainVerification {
    Valid { events: usize },
    Broken { first_broken_index: usize },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}
