#![forbid(unsafe_code)]

use super::*;
use crate::authz::authorize;
use tb_core::Action;
use tb_storage::{AuditFilter, AuditPage, ChainVerification};

impl Engine {
    /// Events in append order, filtered by action, actor and outcome.
    pub fn list_audit_events(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        filter: AuditFilter,
    ) -> Result<AuditPage, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("audit.list", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.list_audit_events(filter)?)
        })
    }

    /// Recomputes the chain from its retention anchor. A break is a hard
    /// failure carrying the first tampered index; it is never repaired.
    pub fn verify_audit_chain(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<usize, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("audit.verify", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            match store.verify_chain()? {
                ChainVerification::Valid { events } => Ok(events),
                ChainVerification::Broken { first_broken_index } => {
                    tracing::error!(
                        space_id = store.space_id(),
                        first_broken_index,
                        "audit chain verification failed"
                    );
                    Err(EngineError::Integrity { first_broken_index })
                }
            }
        })
    }
}
