#![forbid(unsafe_code)]

use super::super::audit::append_audit_tx;
use super::super::spaces::bump_membership_version_tx;
use super::super::*;
use super::records::{
    load_invitation, load_invitation_by_hash, load_member, require_member,
    revoke_pending_invitations_tx,
};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rusqlite::params;
use tb_core::{InvitationState, MemberState, UserId};

const TOKEN_BYTES: usize = 24;

fn issue_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl SpaceStore {
    /// Puts the user in `invited` state and issues a single-use token. Any
    /// earlier pending invitation of the same user is revoked.
    pub fn invite_member(
        &mut self,
        request: InviteMemberRequest,
        audit: AuditDraft,
    ) -> Result<IssuedInvitation, StoreError> {
        let InviteMemberRequest {
            user_id,
            role,
            email,
            invited_by,
            invited_at_ms,
            expires_at_ms,
        } = request;

        let user_id = UserId::try_new(user_id)
            .map_err(|err| StoreError::invalid_field("user_id", "invalid_id", err.message()))?
            .into_string();
        if !role.is_assignable() {
            return Err(StoreError::invalid_field(
                "role",
                "invalid_role",
                format!("role {} cannot be granted by invitation", role.as_str()),
            ));
        }
        if expires_at_ms <= invited_at_ms {
            return Err(StoreError::InvalidInput("invitation must expire after it is issued"));
        }

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;

        if let Some(existing) = load_member(&tx, &user_id)?
            && existing.state == MemberState::Active
        {
            return Err(StoreError::AlreadyExists {
                kind: "member",
                id: user_id,
            });
        }

        revoke_pending_invitations_tx(&tx, &user_id, invited_at_ms)?;

        let token = issue_token();
        let invitation_id = format!("inv-{}", uuid::Uuid::new_v4().simple());
        tx.execute(
            r#"
            INSERT INTO invitations(invitation_id, token_hash, user_id, role, email, state,
              invited_by, created_at_ms, expires_at_ms, consumed_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)
            "#,
            params![
                invitation_id,
                sha256_hex(token.as_bytes()),
                user_id,
                role.as_str(),
                email,
                InvitationState::Pending.as_str(),
                invited_by,
                invited_at_ms,
                expires_at_ms
            ],
        )?;

        let event = append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("invitation_id", invitation_id.as_str()),
            retention,
        )?;
        tx.execute(
            r#"
            INSERT INTO members(user_id, role, state, invited_by, invited_at_ms, updated_at_ms, audit_event_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
              role = excluded.role,
              state = excluded.state,
              scopes_json = '[]',
              invited_by = excluded.invited_by,
              invited_at_ms = excluded.invited_at_ms,
              activated_at_ms = NULL,
              revoked_at_ms = NULL,
              updated_at_ms = excluded.updated_at_ms,
              audit_event_id = excluded.audit_event_id
            "#,
            params![
                user_id,
                role.as_str(),
                MemberState::Invited.as_str(),
                invited_by,
                invited_at_ms,
                event.id
            ],
        )?;
        let membership_version = bump_membership_version_tx(&tx, invited_at_ms)?;

        let member = require_member(&tx, &user_id)?;
        let invitation = load_invitation(&tx, &invitation_id)?
            .ok_or_else(|| StoreError::unknown("invitation", invitation_id.as_str()))?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            role = role.as_str(),
            membership_version,
            "member invited"
        );
        Ok(IssuedInvitation {
            invitation,
            member,
            token,
        })
    }

    /// Consumes the token. An expired token is marked expired before the
    /// refusal is returned; a member who is already active is left untouched.
    pub fn accept_invitation(
        &mut self,
        request: AcceptInvitationRequest,
        audit: AuditDraft,
    ) -> Result<MemberRecord, StoreError> {
        let AcceptInvitationRequest {
            token,
            user_id,
            accepted_at_ms,
        } = request;

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;

        let token_hash = sha256_hex(token.trim().as_bytes());
        let Some(invitation) = load_invitation_by_hash(&tx, &token_hash)? else {
            return Err(StoreError::InvalidToken("unknown invitation token"));
        };
        if invitation.user_id != user_id {
            return Err(StoreError::InvalidToken("invitation was issued for another user"));
        }
        if invitation.state != InvitationState::Pending {
            return Err(StoreError::InvalidToken("invitation is no longer valid"));
        }
        if accepted_at_ms >= invitation.expires_at_ms {
            tx.execute(
                "UPDATE invitations SET state = ?2 WHERE invitation_id = ?1",
                params![invitation.invitation_id, InvitationState::Expired.as_str()],
            )?;
            tx.commit()?;
            tracing::warn!(
                space_id = self.space_id.as_str(),
                user_id = user_id.as_str(),
                "invitation expired"
            );
            return Err(StoreError::InvalidToken("invitation expired"));
        }

        let Some(member) = load_member(&tx, &user_id)? else {
            return Err(StoreError::InvalidToken("invitation has no pending member"));
        };

        if member.state == MemberState::Revoked {
            return Err(StoreError::InvalidToken("membership was revoked"));
        }

        tx.execute(
            "UPDATE invitations SET state = ?2, consumed_at_ms = ?3 WHERE invitation_id = ?1",
            params![
                invitation.invitation_id,
                InvitationState::Accepted.as_str(),
                accepted_at_ms
            ],
        )?;
        let event = append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("invitation_id", invitation.invitation_id.as_str()),
            retention,
        )?;

        if member.state == MemberState::Active {
            tx.commit()?;
            tracing::info!(
                space_id = self.space_id.as_str(),
                user_id = user_id.as_str(),
                "invitation accepted by an active member"
            );
            return Ok(member);
        }

        tx.execute(
            r#"
            UPDATE members
            SET state = ?2, role = ?3, activated_at_ms = ?4, updated_at_ms = ?4, audit_event_id = ?5
            WHERE user_id = ?1
            "#,
            params![
                user_id,
                MemberState::Active.as_str(),
                invitation.role.as_str(),
                accepted_at_ms,
                event.id
            ],
        )?;
        let membership_version = bump_membership_version_tx(&tx, accepted_at_ms)?;
        let member = require_member(&tx, &user_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            role = member.role.as_str(),
            membership_version,
            "invitation accepted"
        );
        Ok(member)
    }
}
