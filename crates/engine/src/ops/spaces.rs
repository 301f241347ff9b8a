#![forbid(unsafe_code)]

use super::*;
use crate::authz::authorize;
use crate::engine::parse_space_id;
use tb_core::{Action, AuditOutcome};
use tb_storage::SpaceInfo;

impl Engine {
    /// Provisions a space whose single owner is the caller.
    pub fn create_space(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<SpaceInfo, EngineError> {
        let principal = ctx.principal()?;
        let space_id = parse_space_id(space_id)?;
        let genesis = Op::new("space.create", "space", space_id.as_str())
            .draft(ctx, AuditOutcome::Success);
        let store = self.spaces().create_space(
            &space_id,
            &principal.user_id,
            ctx.now_ms(),
            genesis,
        )?;
        Ok(store.space_info()?)
    }

    /// Spaces where the caller is an active member.
    pub fn list_spaces(&self, ctx: &RequestContext) -> Result<Vec<SpaceInfo>, EngineError> {
        ctx.principal()?;
        let mut out = Vec::new();
        for space_id in self.spaces().list_space_ids()? {
            let store = self.spaces().open_space(&space_id)?;
            match authorize(&store, ctx, Action::SpaceList) {
                Ok(_) => out.push(store.space_info()?),
                Err(err) if err.is_denial() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    pub fn get_space(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<SpaceInfo, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("space.read", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SpaceRead)?;
            Ok(store.space_info()?)
        })
    }

    /// Owner only. Removes the whole storage tree, audit ledger included.
    pub fn delete_space(&self, ctx: &RequestContext, space_id: &str) -> Result<(), EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("space.delete", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SpaceAdmin)?;
            grant.require_owner(Action::SpaceAdmin)
        })?;
        drop(store);

        let space_id = parse_space_id(space_id)?;
        self.spaces().delete_space(&space_id)?;
        tracing::info!(space_id = space_id.as_str(), actor = ctx.actor(), "space removed");
        Ok(())
    }
}
