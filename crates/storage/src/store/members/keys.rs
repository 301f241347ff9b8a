#![forbid(unsafe_code)]

use super::super::audit::append_audit_tx;
use super::super::spaces::bump_membership_version_tx;
use super::super::*;
use super::records::load_member;
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rusqlite::{Row as SqlRow, params};
use tb_core::{MemberState, Role};

const SECRET_BYTES: usize = 32;
const SECRET_PREFIX: &str = "tbsk_";
const LOOKUP_PREFIX_CHARS: usize = 12;
const MAX_KEY_NAME_CHARS: usize = 64;

const KEY_COLUMNS: &str = "key_id, user_id, name, key_prefix, created_by, created_at_ms, \
    revoked_at_ms, rotated_from, last_used_at_ms, usage_count, audit_event_id";

fn issue_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn lookup_prefix(secret: &str) -> String {
    secret.chars().take(LOOKUP_PREFIX_CHARS).collect()
}

/// PHC string: algorithm, parameters and salt travel with the hash.
fn hash_secret(secret: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| StoreError::Credential(err.to_string()))
}

fn secret_matches(secret: &str, stored_hash: &str) -> Result<bool, StoreError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|err| StoreError::Credential(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

fn key_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_KEY_NAME_CHARS {
        return Err(StoreError::invalid_field(
            "name",
            "invalid_name",
            format!("key name must be 1..={MAX_KEY_NAME_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

fn key_from_row(row: &SqlRow<'_>) -> Result<ServiceAccountKey, StoreError> {
    Ok(ServiceAccountKey {
        key_id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        key_prefix: row.get(3)?,
        created_by: row.get(4)?,
        created_at_ms: row.get(5)?,
        revoked_at_ms: row.get(6)?,
        rotated_from: row.get(7)?,
        last_used_at_ms: row.get(8)?,
        usage_count: row.get(9)?,
        audit_event_id: row.get(10)?,
    })
}

fn load_key(conn: &Connection, key_id: &str) -> Result<Option<ServiceAccountKey>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {KEY_COLUMNS} FROM service_account_keys WHERE key_id = ?1"
    ))?;
    let mut rows = stmt.query(params![key_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(key_from_row(row)?)),
        None => Ok(None),
    }
}

fn require_key(conn: &Connection, key_id: &str) -> Result<ServiceAccountKey, StoreError> {
    load_key(conn, key_id)?.ok_or_else(|| StoreError::unknown("service_account_key", key_id))
}

fn list_keys_of(
    conn: &Connection,
    user_id: Option<&str>,
) -> Result<Vec<ServiceAccountKey>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {KEY_COLUMNS} FROM service_account_keys
        WHERE ?1 IS NULL OR user_id = ?1
        ORDER BY created_at_ms ASC, key_id ASC
        "#
    ))?;
    let mut rows = stmt.query(params![user_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(key_from_row(row)?);
    }
    Ok(out)
}

/// Keys can only be held by an active service member.
fn require_service_member(conn: &Connection, user_id: &str) -> Result<MemberRecord, StoreError> {
    let Some(member) = load_member(conn, user_id)? else {
        return Err(StoreError::unknown("member", user_id));
    };
    if member.role != Role::Service || member.state != MemberState::Active {
        return Err(StoreError::InvalidInput(
            "api keys belong to active service accounts only",
        ));
    }
    Ok(member)
}

/// Inserts a fresh key. The caller owns the transaction and its audit event.
fn insert_key_tx(
    tx: &Transaction<'_>,
    user_id: &str,
    name: &str,
    created_by: &str,
    created_at_ms: i64,
    rotated_from: Option<&str>,
    audit_event_id: &str,
) -> Result<(String, String), StoreError> {
    let secret = issue_secret();
    let key_id = format!("sak-{}", uuid::Uuid::new_v4().simple());
    tx.execute(
        r#"
        INSERT INTO service_account_keys(key_id, user_id, name, key_prefix, secret_hash,
          created_by, created_at_ms, rotated_from, audit_event_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            key_id,
            user_id,
            name,
            lookup_prefix(&secret),
            hash_secret(&secret)?,
            created_by,
            created_at_ms,
            rotated_from,
            audit_event_id
        ],
    )?;
    Ok((key_id, secret))
}

/// Revokes every live key of the user. Returns how many changed.
pub(super) fn revoke_live_keys_tx(
    tx: &Transaction<'_>,
    user_id: &str,
    now_ms: i64,
) -> Result<usize, StoreError> {
    Ok(tx.execute(
        "UPDATE service_account_keys SET revoked_at_ms = ?2 WHERE user_id = ?1 AND revoked_at_ms IS NULL",
        params![user_id, now_ms],
    )?)
}

impl SpaceStore {
    /// Issues a key for an active service member. The plain secret is only
    /// ever returned here.
    pub fn create_service_account_key(
        &mut self,
        request: CreateServiceKeyRequest,
        audit: AuditDraft,
    ) -> Result<IssuedServiceAccountKey, StoreError> {
        let CreateServiceKeyRequest {
            user_id,
            name,
            created_by,
            created_at_ms,
        } = request;
        let name = key_name(&name)?;

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        require_service_member(&tx, &user_id)?;

        let event = append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("key_name", name.as_str()),
            retention,
        )?;
        let (key_id, secret) =
            insert_key_tx(&tx, &user_id, &name, &created_by, created_at_ms, None, &event.id)?;
        let membership_version = bump_membership_version_tx(&tx, created_at_ms)?;
        let key = require_key(&tx, &key_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = user_id.as_str(),
            key_id = key_id.as_str(),
            membership_version,
            "service account key created"
        );
        Ok(IssuedServiceAccountKey { key, secret })
    }

    /// Revokes the key and issues its replacement in one transaction. The new
    /// key records which key it replaced.
    pub fn rotate_service_account_key(
        &mut self,
        request: RotateServiceKeyRequest,
        audit: AuditDraft,
    ) -> Result<IssuedServiceAccountKey, StoreError> {
        let RotateServiceKeyRequest {
            key_id,
            name,
            rotated_by,
            rotated_at_ms,
        } = request;

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        let previous = require_key(&tx, &key_id)?;
        if previous.is_revoked() {
            return Err(StoreError::InvalidInput("a revoked key cannot be rotated"));
        }
        require_service_member(&tx, &previous.user_id)?;
        let name = match name {
            Some(name) => key_name(&name)?,
            None => previous.name.clone(),
        };

        let event = append_audit_tx(
            &tx,
            &space_id,
            audit
                .with_metadata("user_id", previous.user_id.as_str())
                .with_metadata("key_name", name.as_str()),
            retention,
        )?;
        tx.execute(
            "UPDATE service_account_keys SET revoked_at_ms = ?2 WHERE key_id = ?1",
            params![key_id, rotated_at_ms],
        )?;
        let (new_key_id, secret) = insert_key_tx(
            &tx,
            &previous.user_id,
            &name,
            &rotated_by,
            rotated_at_ms,
            Some(&key_id),
            &event.id,
        )?;
        let membership_version = bump_membership_version_tx(&tx, rotated_at_ms)?;
        let key = require_key(&tx, &new_key_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = previous.user_id.as_str(),
            rotated_from = key_id.as_str(),
            key_id = new_key_id.as_str(),
            membership_version,
            "service account key rotated"
        );
        Ok(IssuedServiceAccountKey { key, secret })
    }

    pub fn revoke_service_account_key(
        &mut self,
        request: RevokeServiceKeyRequest,
        audit: AuditDraft,
    ) -> Result<ServiceAccountKey, StoreError> {
        let RevokeServiceKeyRequest {
            key_id,
            revoked_at_ms,
        } = request;

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;
        let key = require_key(&tx, &key_id)?;
        if key.is_revoked() {
            return Err(StoreError::InvalidInput("key is already revoked"));
        }

        append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("user_id", key.user_id.as_str()),
            retention,
        )?;
        tx.execute(
            "UPDATE service_account_keys SET revoked_at_ms = ?2 WHERE key_id = ?1",
            params![key_id, revoked_at_ms],
        )?;
        let membership_version = bump_membership_version_tx(&tx, revoked_at_ms)?;
        let key = require_key(&tx, &key_id)?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            user_id = key.user_id.as_str(),
            key_id = key_id.as_str(),
            membership_version,
            "service account key revoked"
        );
        Ok(key)
    }

    /// Matches a presented secret to a live key and records the use. The
    /// audit event is attributed to the service member that owns the key.
    pub fn resolve_service_account_key(
        &mut self,
        request: ResolveServiceKeyRequest,
        audit: AuditDraft,
    ) -> Result<ResolvedServiceAccountKey, StoreError> {
        let ResolveServiceKeyRequest { secret, used_at_ms } = request;
        let secret = secret.trim();
        if !secret.starts_with(SECRET_PREFIX) {
            return Err(StoreError::InvalidToken("malformed api key"));
        }

        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;

        let candidates: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT key_id, secret_hash FROM service_account_keys WHERE key_prefix = ?1",
            )?;
            let mut rows = stmt.query(params![lookup_prefix(secret)])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((row.get(0)?, row.get(1)?));
            }
            out
        };
        let mut matched = None;
        for (key_id, stored_hash) in candidates {
            if secret_matches(secret, &stored_hash)? {
                matched = Some(key_id);
                break;
            }
        }
        let Some(key_id) = matched else {
            return Err(StoreError::InvalidToken("unknown api key"));
        };
        let key = require_key(&tx, &key_id)?;
        if key.is_revoked() {
            return Err(StoreError::InvalidToken("api key has been revoked"));
        }
        let member = match load_member(&tx, &key.user_id)? {
            Some(member) if member.role == Role::Service && member.is_active() => member,
            _ => return Err(StoreError::InvalidToken("service account is not active")),
        };

        let audit = AuditDraft {
            actor: key.user_id.clone(),
            target_id: key_id.clone(),
            ..audit
        };
        append_audit_tx(
            &tx,
            &space_id,
            audit.with_metadata("usage_count", (key.usage_count + 1).to_string()),
            retention,
        )?;
        tx.execute(
            r#"
            UPDATE service_account_keys
            SET usage_count = usage_count + 1, last_used_at_ms = ?2
            WHERE key_id = ?1
            "#,
            params![key_id, used_at_ms],
        )?;
        let key = require_key(&tx, &key_id)?;
        tx.commit()?;

        tracing::debug!(
            space_id = self.space_id.as_str(),
            user_id = key.user_id.as_str(),
            key_id = key_id.as_str(),
            usage_count = key.usage_count,
            "service account key used"
        );
        Ok(ResolvedServiceAccountKey { key, member })
    }

    pub fn get_service_account_key(&self, key_id: &str) -> Result<ServiceAccountKey, StoreError> {
        self.read(|conn| require_key(conn, key_id))
    }

    /// Every key, live or revoked, optionally for one service member.
    pub fn list_service_account_keys(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<ServiceAccountKey>, StoreError> {
        self.read(|conn| list_keys_of(conn, user_id))
    }
}
