#![forbid(unsafe_code)]

mod audit;
mod core;
mod entries;
mod members;
mod pragmas;
mod queries;

pub(super) const REQUIRED_TABLES: &[&str] = &[
    "space_state",
    "forms",
    "entry_revisions",
    "entry_heads",
    "entry_links",
    "entry_assets",
    "materialized_views",
    "query_sessions",
    "members",
    "invitations",
    "service_account_keys",
    "audit_events",
];

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(pragmas::SQL);
    sql.push_str(core::SQL);
    sql.push_str(entries::SQL);
    sql.push_str(queries::SQL);
    sql.push_str(members::SQL);
    sql.push_str(audit::SQL);
    sql
}
