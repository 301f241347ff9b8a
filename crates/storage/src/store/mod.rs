#![forbid(unsafe_code)]

mod audit;
mod entries;
mod error;
mod forms;
mod members;
mod queries;
mod requests;
mod sessions;
mod spaces;
mod sql;
mod support;
mod types;

pub use entries::EntryScan;
pub use error::{FieldDiagnostic, QueryError, StoreError};
pub use forms::coerce_value;
pub use requests::*;
pub use spaces::SpaceRoot;
pub use sql::{
    BoundVariables, ParsedQuery, QuerySource, ReadScope, RelationRef, bind_variables, parse_query,
};
pub use types::*;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use support::*;

const DB_FILE_NAME: &str = "space.db";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    pub read_retry_attempts: u32,
    pub audit_retention: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            read_retry_attempts: 3,
            audit_retention: 5000,
        }
    }
}

/// One space's durable state. Holds a single connection and nothing else:
/// every read goes to the database.
#[derive(Debug)]
pub struct SpaceStore {
    conn: Connection,
    space_dir: PathBuf,
    space_id: String,
    options: StoreOptions,
}

impl SpaceStore {
    pub(crate) fn open(
        space_dir: impl AsRef<Path>,
        space_id: &str,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let space_dir = space_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&space_dir)?;

        let conn = Connection::open(space_dir.join(DB_FILE_NAME))?;
        conn.busy_timeout(options.busy_timeout)?;
        install_schema(&conn)?;

        Ok(Self {
            conn,
            space_dir,
            space_id: space_id.to_string(),
            options,
        })
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn space_dir(&self) -> &Path {
        &self.space_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.space_dir.join(DB_FILE_NAME)
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Highest appended revision sequence: the current logical snapshot.
    pub fn snapshot_seq(&self) -> Result<i64, StoreError> {
        self.read(snapshot_seq_of)
    }

    fn read<T>(
        &self,
        mut read: impl FnMut(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        with_read_retry(self.options.read_retry_attempts, || read(&self.conn))
    }
}

/// Takes the database write lock up front so read-modify-write sequences
/// never interleave with another writer.
fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn snapshot_seq_of(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM entry_revisions",
        [],
        |row| row.get::<_, i64>(0),
    )?)
}
