#![forbid(unsafe_code)]

use crate::{EngineConfig, EngineError, RequestContext};
use std::collections::BTreeMap;
use tb_core::{AuditOutcome, SpaceId};
use tb_storage::{AuditDraft, ChainVerification, SpaceRoot, SpaceStore};

/// The operation surface. Holds configuration only: every call opens the
/// space store it needs and drops it before returning.
#[derive(Clone, Debug)]
pub struct Engine {
    config: EngineConfig,
    spaces: SpaceRoot,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let spaces = SpaceRoot::new(&config.storage_root, config.store_options());
        Self { config, spaces }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn spaces(&self) -> &SpaceRoot {
        &self.spaces
    }

    pub(crate) fn open(&self, space_id: &str) -> Result<SpaceStore, EngineError> {
        let space_id = parse_space_id(space_id)?;
        Ok(self.spaces.open_space(&space_id)?)
    }
}

pub(crate) fn parse_space_id(space_id: &str) -> Result<SpaceId, EngineError> {
    SpaceId::try_new(space_id)
        .map_err(|err| EngineError::invalid("space_id", "invalid_id", err.message()))
}

/// How a call lands in the audit ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Recording {
    /// Success and every failure are recorded by the engine.
    Mutation,
    /// The store chains the success event inside its own transaction; the
    /// engine records failures.
    Chained,
    /// Only denials are recorded.
    Read,
}

/// The audit identity of one call: what was attempted on which target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Op {
    action: &'static str,
    target_type: &'static str,
    target_id: String,
    metadata: BTreeMap<String, String>,
}

impl Op {
    pub(crate) fn new(
        action: &'static str,
        target_type: &'static str,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            target_type,
            target_id: target_id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub(crate) fn note(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub(crate) fn draft(&self, ctx: &RequestContext, outcome: AuditOutcome) -> AuditDraft {
        let mut draft = AuditDraft::new(
            ctx.actor(),
            self.action,
            self.target_type,
            self.target_id.as_str(),
            outcome,
            ctx.now_ms(),
        );
        for (key, value) in ctx.metadata().iter().chain(self.metadata.iter()) {
            draft = draft.with_metadata(key.as_str(), value.as_str());
        }
        draft
    }
}

/// Runs one call against an open store and records it per `recording`.
pub(crate) fn run<T>(
    store: &mut SpaceStore,
    ctx: &RequestContext,
    mut op: Op,
    recording: Recording,
    call: impl FnOnce(&mut SpaceStore, &mut Op) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    if recording == Recording::Mutation
        && let ChainVerification::Broken { first_broken_index } = store.verify_chain()?
    {
        tracing::error!(
            space_id = store.space_id(),
            first_broken_index,
            action = op.action,
            "audit chain broken; mutation refused"
        );
        return Err(EngineError::Integrity { first_broken_index });
    }

    match call(store, &mut op) {
        Ok(value) => {
            if recording == Recording::Mutation {
                store.append_audit(op.draft(ctx, AuditOutcome::Success))?;
            }
            Ok(value)
        }
        Err(err) => {
            let record = err.is_denial() || recording != Recording::Read;
            if record {
                record_failure(store, ctx, op, &err);
            }
            Err(err)
        }
    }
}

/// Best effort: the caller's error is what gets returned, whether or not the
/// failure event could be chained.
fn record_failure(store: &mut SpaceStore, ctx: &RequestContext, mut op: Op, err: &EngineError) {
    let outcome = if err.is_denial() {
        tracing::warn!(
            space_id = store.space_id(),
            actor = ctx.actor(),
            action = op.action,
            target_id = op.target_id.as_str(),
            error = %err,
            "request denied"
        );
        AuditOutcome::Deny
    } else {
        AuditOutcome::Error
    };
    if let EngineError::Integrity { first_broken_index } = err {
        tracing::error!(
            space_id = store.space_id(),
            first_broken_index,
            "audit chain broken; failure not recorded"
        );
        return;
    }

    op.note("error", err.code());
    if let EngineError::Forbidden { check, .. } = err {
        op.note("denied_check", check.as_str());
    }
    if let Err(append_err) = store.append_audit(op.draft(ctx, outcome)) {
        tracing::error!(
            space_id = store.space_id(),
            action = op.action,
            error = %append_err,
            "failed to record audit event"
        );
    }
}
