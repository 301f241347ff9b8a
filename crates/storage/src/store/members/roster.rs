#![forbid(unsafe_code)]

use super::super::audit::append_audit_tx;
use super::super::spaces::bump_membership_version_tx;
use super::super::*;
use super::keys::revoke_live_keys_tx;
use super::records::{load_member, require_member, revoke_pending_invitations_tx, scopes_json};
use rusqlite::params;
use std::collections::BTreeSet;
use tb_core::{MemberState, Role, UserId};

impl SpaceStore {
    /// Role change in place. Owner and service members are out of reach, and a
    /// revoked member needs a new invitation first.
    pub fn update_member_role(
        &mut self,
        request: UpdateRoleRequest,
        audit: AuditDraft,
    ) -> Result<MemberRecord, StoreError> {
        let UpdateRoleRequest {
            user_id,
            role,
            updated_at_ms,
        } = request;
        if !role.is_assignable() {
            return Err(StoreError::invalid_field(
                "role",
                "invalid_role",
                format!("role {} cannot be assigned", role.as_str()),
            ));
        }

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        let member = require_member(&tx, &user_id)?;
        match (member.role, member.state) {
            (Role::Owner, _) => {
                return Err(StoreError::InvalidInput("the owner role cannot change"));
            }
            (Role::Service, _) => {
                return Err(StoreError::InvalidInput("service members are governed by scopes"));
            }
            (_, MemberState::Revoked) => {
                return Err(StoreError::InvalidInput(
                    "revoked members need a new invitation",
                ));
            }
            _ => {}
        }

        let event = append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("previous_role", member.role.as_str()),
            retention,
        )?;
        tx.execute(
            "UPDATE members SET role = ?2, updated_at_ms = ?3, audit_event_id = ?4 WHERE user_id = ?1",
            params![user_id, role.as_str(), updated_at_ms, event.id],
        )?;
        let membership_version = bump_membership_version_tx(&tx, updated_at_ms)?;
        let member = require_member(&tx, &user_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            role = role.as_str(),
            membership_version,
            "member role updated"
        );
        Ok(member)
    }

    /// `active|invited -> revoked`. Pending invitations of the member are
    /// revoked with it.
    pub fn revoke_member(
        &mut self,
        request: RevokeMemberRequest,
        audit: AuditDraft,
    ) -> Result<MemberRecord, StoreError> {
        let RevokeMemberRequest {
            user_id,
            revoked_at_ms,
        } = request;

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        let member = require_member(&tx, &user_id)?;
        if member.role == Role::Owner {
            return Err(StoreError::InvalidInput("the owner cannot be revoked"));
        }
        if member.state == MemberState::Revoked {
            return Err(StoreError::InvalidInput("member is already revoked"));
        }

        let invitations = revoke_pending_invitations_tx(&tx, &user_id, revoked_at_ms)?;
        let keys = revoke_live_keys_tx(&tx, &user_id, revoked_at_ms)?;
        let event = append_audit_tx(
            &tx,
            &space_id,
            audit
                .with_metadata("revoked_invitations", invitations.to_string())
                .with_metadata("revoked_keys", keys.to_string()),
            retention,
        )?;
        tx.execute(
            r#"
            UPDATE members
            SET state = ?2, revoked_at_ms = ?3, updated_at_ms = ?3, audit_event_id = ?4
            WHERE user_id = ?1
            "#,
            params![user_id, MemberState::Revoked.as_str(), revoked_at_ms, event.id],
        )?;
        let membership_version = bump_membership_version_tx(&tx, revoked_at_ms)?;
        let member = require_member(&tx, &user_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            invitations,
            keys,
            membership_version,
            "member revoked"
        );
        Ok(member)
    }

    /// Creates (or re-scopes) an active service member. Human members cannot
    /// be turned into service accounts.
    pub fn register_service_account(
        &mut self,
        request: RegisterServiceAccountRequest,
        audit: AuditDraft,
    ) -> Result<MemberRecord, StoreError> {
        let RegisterServiceAccountRequest {
            user_id,
            scopes,
            registered_by,
            registered_at_ms,
        } = request;
        let user_id = UserId::try_new(user_id)
            .map_err(|err| StoreError::invalid_field("user_id", "invalid_id", err.message()))?
            .into_string();
        let scopes: Vec<_> = scopes
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        if let Some(existing) = load_member(&tx, &user_id)?
            && existing.role != Role::Service
            && existing.state != MemberState::Revoked
        {
            return Err(StoreError::AlreadyExists {
                kind: "member",
                id: user_id,
            });
        }

        let scope_names: Vec<&str> = scopes.iter().map(|scope| scope.as_str()).collect();
        let event = append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("scopes", scope_names.join(",")),
            retention,
        )?;
        tx.execute(
            r#"
            INSERT INTO members(user_id, role, state, scopes_json, invited_by, invited_at_ms,
              activated_at_ms, updated_at_ms, audit_event_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
              role = excluded.role,
              state = excluded.state,
              scopes_json = excluded.scopes_json,
              activated_at_ms = excluded.activated_at_ms,
              revoked_at_ms = NULL,
              updated_at_ms = excluded.updated_at_ms,
              audit_event_id = excluded.audit_event_id
            "#,
            params![
                user_id,
                Role::Service.as_str(),
                MemberState::Active.as_str(),
                scopes_json(&scopes)?,
                registered_by,
                registered_at_ms,
                event.id
            ],
        )?;
        let membership_version = bump_membership_version_tx(&tx, registered_at_ms)?;
        let member = require_member(&tx, &user_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            scopes = scope_names.len(),
            membership_version,
            "service account registered"
        );
        Ok(member)
    }

    /// Replaces the member's user-group list. Groups are trimmed, deduplicated
    /// and sorted.
    pub fn set_member_groups(
        &mut self,
        request: SetMemberGroupsRequest,
        audit: AuditDraft,
    ) -> Result<MemberRecord, StoreError> {
        let SetMemberGroupsRequest {
            user_id,
            groups,
            updated_at_ms,
        } = request;
        let groups: Vec<String> = groups
            .iter()
            .map(|group| group.trim())
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        require_member(&tx, &user_id)?;

        let event = append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("groups", groups.join(",")),
            retention,
        )?;
        tx.execute(
            "UPDATE members SET groups_json = ?2, updated_at_ms = ?3, audit_event_id = ?4 WHERE user_id = ?1",
            params![user_id, serde_json::to_string(&groups)?, updated_at_ms, event.id],
        )?;
        let membership_version = bump_membership_version_tx(&tx, updated_at_ms)?;
        let member = require_member(&tx, &user_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            groups = groups.len(),
            membership_version,
            "member groups updated"
        );
        Ok(member)
    }
}
