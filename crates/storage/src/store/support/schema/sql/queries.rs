#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS materialized_views (
          sql_id TEXT PRIMARY KEY,
          sql_revision_id TEXT NOT NULL,
          sql_text TEXT NOT NULL,
          source_forms_json TEXT NOT NULL,
          read_principals_json TEXT,
          fingerprint TEXT NOT NULL,
          snapshot_seq INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS query_sessions (
          session_id TEXT PRIMARY KEY,
          sql_id TEXT,
          sql_revision_id TEXT,
          sql_text TEXT NOT NULL,
          variables_json TEXT NOT NULL,
          status TEXT NOT NULL,
          error TEXT,
          created_by TEXT NOT NULL,
          snapshot_seq INTEGER NOT NULL,
          order_by_json TEXT NOT NULL,
          default_page_size INTEGER NOT NULL,
          max_page_size INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_query_sessions_expiry
          ON query_sessions(expires_at_ms);
"#;
