#![forbid(unsafe_code)]

// `entry_revisions.seq` doubles as the space-wide snapshot marker.
pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS entry_revisions (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          revision_id TEXT NOT NULL UNIQUE,
          entry_id TEXT NOT NULL,
          form_key TEXT NOT NULL,
          parent_revision_id TEXT,
          title TEXT NOT NULL,
          fields_json TEXT NOT NULL,
          extra_json TEXT NOT NULL,
          tags_json TEXT NOT NULL,
          links_json TEXT NOT NULL,
          assets_json TEXT NOT NULL,
          deleted INTEGER NOT NULL DEFAULT 0,
          author TEXT NOT NULL,
          checksum TEXT NOT NULL,
          restored_from TEXT,
          created_at_ms INTEGER NOT NULL,
          CHECK(parent_revision_id IS NULL OR parent_revision_id <> revision_id)
        );

        CREATE INDEX IF NOT EXISTS idx_entry_revisions_entry_seq
          ON entry_revisions(entry_id, seq);

        CREATE INDEX IF NOT EXISTS idx_entry_revisions_form_seq
          ON entry_revisions(form_key, seq);

        CREATE TABLE IF NOT EXISTS entry_heads (
          entry_id TEXT PRIMARY KEY,
          form_key TEXT NOT NULL,
          form_name TEXT NOT NULL,
          revision_id TEXT NOT NULL,
          head_seq INTEGER NOT NULL,
          title TEXT NOT NULL,
          fields_json TEXT NOT NULL,
          extra_json TEXT NOT NULL,
          tags_json TEXT NOT NULL,
          links_json TEXT NOT NULL,
          assets_json TEXT NOT NULL,
          deleted INTEGER NOT NULL DEFAULT 0,
          deleted_at_ms INTEGER,
          author TEXT NOT NULL,
          updated_by TEXT NOT NULL,
          checksum TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          FOREIGN KEY(revision_id) REFERENCES entry_revisions(revision_id)
        );

        CREATE INDEX IF NOT EXISTS idx_entry_heads_form
          ON entry_heads(form_key, deleted, entry_id);

        CREATE TABLE IF NOT EXISTS entry_links (
          link_id TEXT PRIMARY KEY,
          source_entry_id TEXT NOT NULL,
          source_form_key TEXT NOT NULL,
          target_entry_id TEXT NOT NULL,
          kind TEXT NOT NULL,
          FOREIGN KEY(source_entry_id) REFERENCES entry_heads(entry_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_entry_links_source
          ON entry_links(source_entry_id);

        CREATE TABLE IF NOT EXISTS entry_assets (
          entry_id TEXT NOT NULL,
          asset_id TEXT NOT NULL,
          name TEXT NOT NULL,
          path TEXT NOT NULL,
          PRIMARY KEY(entry_id, asset_id),
          FOREIGN KEY(entry_id) REFERENCES entry_heads(entry_id) ON DELETE CASCADE
        );
"#;
