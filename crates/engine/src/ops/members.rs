#![forbid(unsafe_code)]

use super::*;
use crate::authz::authorize;
use crate::Principal;
use crate::config::secs_to_ms;
use tb_core::{Action, AuditOutcome, Role};
use tb_storage::{
    AcceptInvitationRequest, CreateServiceKeyRequest, Invitation, InviteMemberRequest,
    IssuedInvitation, IssuedServiceAccountKey, MemberRecord, RegisterServiceAccountRequest,
    ResolveServiceKeyRequest, RevokeMemberRequest, RevokeServiceKeyRequest,
    RotateServiceKeyRequest, ServiceAccountKey, SetMemberGroupsRequest, UpdateRoleRequest,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InviteRequest {
    pub user_id: String,
    pub role: Role,
    pub email: Option<String>,
    /// Overrides the configured invitation lifetime. Never below a minute.
    pub expires_in_secs: Option<u64>,
}

impl InviteRequest {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            email: None,
            expires_in_secs: None,
        }
    }
}

const MIN_INVITATION_TTL_MS: i64 = 60_000;

impl Engine {
    /// Issues a single-use token. The plain token is only ever returned here.
    pub fn invite_member(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        request: InviteRequest,
    ) -> Result<IssuedInvitation, EngineError> {
        let InviteRequest {
            user_id,
            role,
            email,
            expires_in_secs,
        } = request;
        let ttl_ms = expires_in_secs
            .map_or(self.config().invitation_ttl_ms(), secs_to_ms)
            .max(MIN_INVITATION_TTL_MS);

        let mut store = self.open(space_id)?;
        let mut op = Op::new("member.invite", "member", user_id.trim());
        op.note("role", role.as_str());
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            let grant = authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.invite_member(
                InviteMemberRequest {
                    user_id,
                    role,
                    email,
                    invited_by: grant.user_id,
                    invited_at_ms: ctx.now_ms(),
                    expires_at_ms: ctx.now_ms().saturating_add(ttl_ms),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    /// `invited -> active` for the calling principal. Membership is not
    /// required up front: the token is the credential.
    pub fn accept_invitation(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        token: &str,
    ) -> Result<MemberRecord, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("member.accept", "member", ctx.actor());
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            let principal = ctx.principal()?;
            Ok(store.accept_invitation(
                AcceptInvitationRequest {
                    token: token.to_string(),
                    user_id: principal.user_id.clone(),
                    accepted_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    pub fn list_members(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<Vec<MemberRecord>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("member.list", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SpaceRead)?;
            Ok(store.list_members()?)
        })
    }

    /// Admin view of invitations, optionally for one user.
    pub fn list_invitations(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<Invitation>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("member.invitations", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.list_invitations(user_id)?)
        })
    }

    pub fn update_member_role(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<MemberRecord, EngineError> {
        let mut store = self.open(space_id)?;
        let mut op = Op::new("member.update_role", "member", user_id);
        op.note("role", role.as_str());
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.update_member_role(
                UpdateRoleRequest {
                    user_id: user_id.to_string(),
                    role,
                    updated_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    /// Final for the membership: only a new invitation brings the user back.
    pub fn revoke_member(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: &str,
    ) -> Result<MemberRecord, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("member.revoke", "member", user_id);
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.revoke_member(
                RevokeMemberRequest {
                    user_id: user_id.to_string(),
                    revoked_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    /// Active service member whose grants are exactly `scopes`.
    pub fn register_service_account(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: &str,
        scopes: Vec<Action>,
    ) -> Result<MemberRecord, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("member.register_service", "member", user_id);
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            let grant = authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.register_service_account(
                RegisterServiceAccountRequest {
                    user_id: user_id.to_string(),
                    scopes,
                    registered_by: grant.user_id,
                    registered_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    /// Replaces the user-group list that Form ACL group principals match.
    pub fn set_member_groups(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: &str,
        groups: Vec<String>,
    ) -> Result<MemberRecord, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("member.set_groups", "member", user_id);
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.set_member_groups(
                SetMemberGroupsRequest {
                    user_id: user_id.to_string(),
                    groups,
                    updated_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    /// Issues an API key for an active service member. The plain secret is
    /// only ever returned here.
    pub fn create_service_account_key(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<IssuedServiceAccountKey, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("service_key.create", "member", user_id);
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            let grant = authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.create_service_account_key(
                CreateServiceKeyRequest {
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                    created_by: grant.user_id,
                    created_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    /// Revokes `key_id` and issues its replacement atomically.
    pub fn rotate_service_account_key(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        key_id: &str,
        name: Option<String>,
    ) -> Result<IssuedServiceAccountKey, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("service_key.rotate", "service_key", key_id);
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            let grant = authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.rotate_service_account_key(
                RotateServiceKeyRequest {
                    key_id: key_id.to_string(),
                    name,
                    rotated_by: grant.user_id,
                    rotated_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    pub fn revoke_service_account_key(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        key_id: &str,
    ) -> Result<ServiceAccountKey, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("service_key.revoke", "service_key", key_id);
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.revoke_service_account_key(
                RevokeServiceKeyRequest {
                    key_id: key_id.to_string(),
                    revoked_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?)
        })
    }

    pub fn list_service_account_keys(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<ServiceAccountKey>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("service_key.list", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            Ok(store.list_service_account_keys(user_id)?)
        })
    }

    /// Turns a presented API key into the service principal that owns it.
    /// No caller identity is needed: the secret is the credential.
    pub fn authenticate_service_key(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        secret: &str,
    ) -> Result<Principal, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("service_key.use", "service_key", ctx.actor());
        run(&mut store, ctx, op, Recording::Chained, |store, op| {
            let resolved = store.resolve_service_account_key(
                ResolveServiceKeyRequest {
                    secret: secret.to_string(),
                    used_at_ms: ctx.now_ms(),
                },
                op.draft(ctx, AuditOutcome::Success),
            )?;
            Ok(Principal::service(resolved.member.user_id))
        })
    }
}
