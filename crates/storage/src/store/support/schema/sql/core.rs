#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS space_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          space_id TEXT NOT NULL,
          owner_user_id TEXT NOT NULL,
          membership_version INTEGER NOT NULL DEFAULT 0,
          audit_anchor_hash TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS forms (
          form_key TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          definition_json TEXT NOT NULL,
          extra_policy TEXT NOT NULL,
          read_principals_json TEXT,
          write_principals_json TEXT,
          version INTEGER NOT NULL,
          system INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );
"#;
