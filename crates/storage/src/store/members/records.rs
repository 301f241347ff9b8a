#![forbid(unsafe_code)]

use super::super::*;
use rusqlite::{Row as SqlRow, params};
use tb_core::{Action, InvitationState, MemberState, Role};

const MEMBER_COLUMNS: &str = "user_id, role, state, scopes_json, groups_json, invited_by, \
    invited_at_ms, activated_at_ms, revoked_at_ms, updated_at_ms, audit_event_id";

const INVITATION_COLUMNS: &str = "invitation_id, user_id, role, email, state, invited_by, \
    created_at_ms, expires_at_ms, consumed_at_ms";

fn member_from_row(row: &SqlRow<'_>) -> Result<MemberRecord, StoreError> {
    let role: String = row.get(1)?;
    let state: String = row.get(2)?;
    let scopes: Vec<String> = serde_json::from_str(&row.get::<_, String>(3)?)?;
    Ok(MemberRecord {
        user_id: row.get(0)?,
        role: Role::parse(&role)
            .ok_or(StoreError::InvalidInput("stored member has an unknown role"))?,
        state: MemberState::parse(&state)
            .ok_or(StoreError::InvalidInput("stored member has an unknown state"))?,
        scopes: scopes.iter().filter_map(|scope| Action::parse(scope)).collect(),
        groups: serde_json::from_str(&row.get::<_, String>(4)?)?,
        invited_by: row.get(5)?,
        invited_at_ms: row.get(6)?,
        activated_at_ms: row.get(7)?,
        revoked_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
        audit_event_id: row.get(10)?,
    })
}

fn invitation_from_row(row: &SqlRow<'_>) -> Result<Invitation, StoreError> {
    let role: String = row.get(2)?;
    let state: String = row.get(4)?;
    Ok(Invitation {
        invitation_id: row.get(0)?,
        user_id: row.get(1)?,
        role: Role::parse(&role)
            .ok_or(StoreError::InvalidInput("stored invitation has an unknown role"))?,
        email: row.get(3)?,
        state: InvitationState::parse(&state)
            .ok_or(StoreError::InvalidInput("stored invitation has an unknown state"))?,
        invited_by: row.get(5)?,
        created_at_ms: row.get(6)?,
        expires_at_ms: row.get(7)?,
        consumed_at_ms: row.get(8)?,
    })
}

pub(super) fn load_member(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<MemberRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLUMNS} FROM members WHERE user_id = ?1"
    ))?;
    let mut rows = stmt.query(params![user_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(member_from_row(row)?)),
        None => Ok(None),
    }
}

pub(super) fn require_member(conn: &Connection, user_id: &str) -> Result<MemberRecord, StoreError> {
    load_member(conn, user_id)?.ok_or_else(|| StoreError::unknown("member", user_id))
}

pub(super) fn load_invitation_by_hash(
    conn: &Connection,
    token_hash: &str,
) -> Result<Option<Invitation>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = ?1"
    ))?;
    let mut rows = stmt.query(params![token_hash])?;
    match rows.next()? {
        Some(row) => Ok(Some(invitation_from_row(row)?)),
        None => Ok(None),
    }
}

pub(super) fn load_invitation(
    conn: &Connection,
    invitation_id: &str,
) -> Result<Option<Invitation>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitation_id = ?1"
    ))?;
    let mut rows = stmt.query(params![invitation_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(invitation_from_row(row)?)),
        None => Ok(None),
    }
}

pub(super) fn list_members_of(conn: &Connection) -> Result<Vec<MemberRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLUMNS} FROM members ORDER BY user_id ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(member_from_row(row)?);
    }
    Ok(out)
}

pub(super) fn list_invitations_of(
    conn: &Connection,
    user_id: Option<&str>,
) -> Result<Vec<Invitation>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVITATION_COLUMNS} FROM invitations WHERE ?1 IS NULL OR user_id = ?1 ORDER BY created_at_ms ASC, invitation_id ASC"
    ))?;
    let mut rows = stmt.query(params![user_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(invitation_from_row(row)?);
    }
    Ok(out)
}

/// Revokes every pending invitation of the user. Returns how many changed.
pub(super) fn revoke_pending_invitations_tx(
    tx: &Transaction<'_>,
    user_id: &str,
    now_ms: i64,
) -> Result<usize, StoreError> {
    Ok(tx.execute(
        "UPDATE invitations SET state = ?2, consumed_at_ms = ?3 WHERE user_id = ?1 AND state = ?4",
        params![
            user_id,
            InvitationState::Revoked.as_str(),
            now_ms,
            InvitationState::Pending.as_str()
        ],
    )?)
}

pub(super) fn scopes_json(scopes: &[Action]) -> Result<String, StoreError> {
    let names: Vec<&str> = scopes.iter().map(|scope| scope.as_str()).collect();
    Ok(serde_json::to_string(&names)?)
}

impl SpaceStore {
    pub fn get_member(&self, user_id: &str) -> Result<MemberRecord, StoreError> {
        self.read(|conn| require_member(conn, user_id))
    }

    /// `None` for identities that never joined the space.
    pub fn find_member(&self, user_id: &str) -> Result<Option<MemberRecord>, StoreError> {
        self.read(|conn| load_member(conn, user_id))
    }

    pub fn list_members(&self) -> Result<Vec<MemberRecord>, StoreError> {
        self.read(list_members_of)
    }

    pub fn list_invitations(&self, user_id: Option<&str>) -> Result<Vec<Invitation>, StoreError> {
        self.read(|conn| list_invitations_of(conn, user_id))
    }

    pub fn membership_version(&self) -> Result<i64, StoreError> {
        Ok(self.space_info()?.membership_version)
    }
}
