#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS members (
          user_id TEXT PRIMARY KEY,
          role TEXT NOT NULL,
          state TEXT NOT NULL,
          scopes_json TEXT NOT NULL DEFAULT '[]',
          groups_json TEXT NOT NULL DEFAULT '[]',
          invited_by TEXT,
          invited_at_ms INTEGER,
          activated_at_ms INTEGER,
          revoked_at_ms INTEGER,
          updated_at_ms INTEGER NOT NULL,
          audit_event_id TEXT
        );

        CREATE TABLE IF NOT EXISTS invitations (
          invitation_id TEXT PRIMARY KEY,
          token_hash TEXT NOT NULL UNIQUE,
          user_id TEXT NOT NULL,
          role TEXT NOT NULL,
          email TEXT,
          state TEXT NOT NULL,
          invited_by TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER NOT NULL,
          consumed_at_ms INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_invitations_user_state
          ON invitations(user_id, state);

        CREATE TABLE IF NOT EXISTS service_account_keys (
          key_id TEXT PRIMARY KEY,
          user_id TEXT NOT NULL,
          name TEXT NOT NULL,
          key_prefix TEXT NOT NULL,
          secret_hash TEXT NOT NULL,
          created_by TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          revoked_at_ms INTEGER,
          rotated_from TEXT,
          last_used_at_ms INTEGER,
          usage_count INTEGER NOT NULL DEFAULT 0,
          audit_event_id TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_service_account_keys_prefix
          ON service_account_keys(key_prefix);
        CREATE INDEX IF NOT EXISTS idx_service_account_keys_user
          ON service_account_keys(user_id, created_at_ms);
"#;
