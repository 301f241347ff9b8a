#![forbid(unsafe_code)]

use super::audit::append_audit_tx;
use super::forms::install_system_forms_tx;
use super::*;
use rusqlite::{OptionalExtension, params};
use tb_core::{MemberState, Role, SpaceId};

const SPACES_DIR: &str = "spaces";

/// Filesystem root holding one directory per space.
#[derive(Clone, Debug)]
pub struct SpaceRoot {
    root: PathBuf,
    options: StoreOptions,
}

impl SpaceRoot {
    pub fn new(root: impl AsRef<Path>, options: StoreOptions) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn space_dir(&self, space_id: &SpaceId) -> PathBuf {
        self.root.join(SPACES_DIR).join(space_id.as_str())
    }

    pub fn exists(&self, space_id: &SpaceId) -> bool {
        self.space_dir(space_id).join(DB_FILE_NAME).is_file()
    }

    /// Provisions the storage tree, the owner membership and the system Forms.
    pub fn create_space(
        &self,
        space_id: &SpaceId,
        owner_user_id: &str,
        created_at_ms: i64,
        audit: AuditDraft,
    ) -> Result<SpaceStore, StoreError> {
        std::fs::create_dir_all(self.root.join(SPACES_DIR))?;
        let space_dir = self.space_dir(space_id);
        if let Err(err) = std::fs::create_dir(&space_dir) {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(StoreError::AlreadyExists {
                    kind: "space",
                    id: space_id.as_str().to_string(),
                });
            }
            return Err(err.into());
        }

        let provisioned = SpaceStore::open(&space_dir, space_id.as_str(), self.options)
            .and_then(|mut store| {
                store.initialize(owner_user_id, created_at_ms, audit)?;
                Ok(store)
            });

        match provisioned {
            Ok(store) => {
                tracing::info!(
                    space_id = space_id.as_str(),
                    owner = owner_user_id,
                    "space created"
                );
                Ok(store)
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&space_dir);
                Err(err)
            }
        }
    }

    pub fn open_space(&self, space_id: &SpaceId) -> Result<SpaceStore, StoreError> {
        if !self.exists(space_id) {
            return Err(StoreError::unknown("space", space_id.as_str()));
        }
        SpaceStore::open(self.space_dir(space_id), space_id.as_str(), self.options)
    }

    pub fn list_space_ids(&self) -> Result<Vec<SpaceId>, StoreError> {
        let dir = self.root.join(SPACES_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for item in std::fs::read_dir(dir)? {
            let item = item?;
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(space_id) = SpaceId::try_new(name) else {
                continue;
            };
            if self.exists(&space_id) {
                out.push(space_id);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Full deletion of the space's storage tree.
    pub fn delete_space(&self, space_id: &SpaceId) -> Result<(), StoreError> {
        if !self.exists(space_id) {
            return Err(StoreError::unknown("space", space_id.as_str()));
        }
        std::fs::remove_dir_all(self.space_dir(space_id))?;
        tracing::info!(space_id = space_id.as_str(), "space deleted");
        Ok(())
    }
}

impl SpaceStore {
    fn initialize(
        &mut self,
        owner_user_id: &str,
        now_ms: i64,
        audit: AuditDraft,
    ) -> Result<SpaceInfo, StoreError> {
        let retention = self.options.audit_retention;
        let space_id = self.space_id.clone();
        let tx = begin_write(&mut self.conn)?;

        let existing = tx
            .query_row("SELECT 1 FROM space_state WHERE singleton=1", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: "space",
                id: space_id,
            });
        }

        tx.execute(
            "INSERT INTO space_state(singleton, schema_version, space_id, owner_user_id, membership_version, audit_anchor_hash, created_at_ms, updated_at_ms) \
             VALUES (1, ?1, ?2, ?3, 1, ?4, ?5, ?5)",
            params![SCHEMA_VERSION, space_id, owner_user_id, GENESIS_HASH, now_ms],
        )?;

        let event = append_audit_tx(&tx, &space_id, audit, retention)?;
        tx.execute(
            "INSERT INTO members(user_id, role, state, invited_at_ms, activated_at_ms, updated_at_ms, audit_event_id) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?4, ?5)",
            params![
                owner_user_id,
                Role::Owner.as_str(),
                MemberState::Active.as_str(),
                now_ms,
                event.id
            ],
        )?;

        install_system_forms_tx(&tx, now_ms)?;

        let info = space_info_of(&tx)?;
        tx.commit()?;
        Ok(info)
    }

    pub fn space_info(&self) -> Result<SpaceInfo, StoreError> {
        self.read(space_info_of)
    }
}

pub(in crate::store) fn space_info_of(conn: &Connection) -> Result<SpaceInfo, StoreError> {
    let row = conn
        .query_row(
            "SELECT space_id, owner_user_id, membership_version, created_at_ms, updated_at_ms \
             FROM space_state WHERE singleton=1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;
    let Some((space_id, owner_user_id, membership_version, created_at_ms, updated_at_ms)) = row
    else {
        return Err(StoreError::ResetRequired("space state row is missing"));
    };
    Ok(SpaceInfo {
        space_id,
        owner_user_id,
        membership_version,
        snapshot_seq: snapshot_seq_of(conn)?,
        created_at_ms,
        updated_at_ms,
    })
}

pub(in crate::store) fn bump_membership_version_tx(
    tx: &Transaction<'_>,
    now_ms: i64,
) -> Result<i64, StoreError> {
    tx.execute(
        "UPDATE space_state SET membership_version = membership_version + 1, updated_at_ms = ?1 WHERE singleton=1",
        params![now_ms],
    )?;
    Ok(tx.query_row(
        "SELECT membership_version FROM space_state WHERE singleton=1",
        [],
        |row| row.get::<_, i64>(0),
    )?)
}
