#![forbid(unsafe_code)]

mod canonical;
mod retry;
mod schema;
mod sqlite;
mod time;

pub(super) use canonical::*;
pub(super) use retry::*;
pub(super) use schema::{SCHEMA_VERSION, install_schema};
pub(super) use sqlite::*;
pub(super) use time::*;
