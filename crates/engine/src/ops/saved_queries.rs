#![forbid(unsafe_code)]

use super::*;
use crate::authz::{Grant, authorize};
use tb_core::Action;
use tb_storage::{
    DeleteSavedQueryRequest, Revision, SavedQuery, SavedQueryRequest, SpaceStore, SqlVariable,
    StoreError, ViewMeta, parse_query,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedQueryInput {
    pub name: String,
    pub sql: String,
    pub variables: Vec<SqlVariable>,
}

impl SavedQueryInput {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, variable: SqlVariable) -> Self {
        self.variables.push(variable);
        self
    }
}

/// A saved query may only read Forms its author can read. SQL that does not
/// parse or resolve is left for the store to report field by field.
fn check_query_sources(store: &SpaceStore, grant: &Grant, sql: &str) -> Result<(), EngineError> {
    let Ok(parsed) = parse_query(sql) else {
        return Ok(());
    };
    let sources = match store.resolve_query_sources(&parsed) {
        Ok(sources) => sources,
        Err(StoreError::Query(_)) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    grant.check_sources(
        sources.iter().filter_map(|source| source.form.as_ref()),
        Action::SqlRead,
    )
}

/// Read access to a saved query is read access to its view.
pub(super) fn readable_saved_query(
    store: &SpaceStore,
    grant: &Grant,
    sql_id: &str,
) -> Result<(SavedQuery, ViewMeta), EngineError> {
    let saved = store.get_saved_query(sql_id)?;
    let view = store.view_meta(sql_id)?;
    grant.check_view(&view, Action::SqlRead)?;
    Ok((saved, view))
}

impl Engine {
    /// `sql_id = None` mints a fresh id. The view record is created with it.
    pub fn create_saved_query(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        sql_id: Option<String>,
        input: SavedQueryInput,
    ) -> Result<SavedQuery, EngineError> {
        let sql_id = sql_id.unwrap_or_else(|| fresh_id("q"));
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.create", "saved_query", sql_id.as_str());
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let grant = authorize(store, ctx, Action::SqlWrite)?;
            check_query_sources(store, &grant, &input.sql)?;
            let saved = store.create_saved_query(SavedQueryRequest {
                id: sql_id,
                parent_revision_id: None,
                name: input.name,
                sql: input.sql,
                variables: input.variables,
                author: grant.user_id,
                written_at_ms: ctx.now_ms(),
            })?;
            op.note("revision_id", saved.revision_id.as_str());
            Ok(saved)
        })
    }

    /// CAS against `parent_revision_id` when given. Refreshes the view.
    pub fn update_saved_query(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        sql_id: &str,
        parent_revision_id: Option<&str>,
        input: SavedQueryInput,
    ) -> Result<SavedQuery, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.update", "saved_query", sql_id);
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let grant = authorize(store, ctx, Action::SqlWrite)?;
            readable_saved_query(store, &grant, sql_id)?;
            check_query_sources(store, &grant, &input.sql)?;
            let saved = store.update_saved_query(SavedQueryRequest {
                id: sql_id.to_string(),
                parent_revision_id: parent_revision_id.map(str::to_string),
                name: input.name,
                sql: input.sql,
                variables: input.variables,
                author: grant.user_id,
                written_at_ms: ctx.now_ms(),
            })?;
            op.note("revision_id", saved.revision_id.as_str());
            Ok(saved)
        })
    }

    /// Tombstones the saved query and drops its view record.
    pub fn delete_saved_query(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        sql_id: &str,
        parent_revision_id: Option<&str>,
    ) -> Result<Revision, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.delete", "saved_query", sql_id);
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let grant = authorize(store, ctx, Action::SqlWrite)?;
            readable_saved_query(store, &grant, sql_id)?;
            let revision = store.delete_saved_query(DeleteSavedQueryRequest {
                id: sql_id.to_string(),
                parent_revision_id: parent_revision_id.map(str::to_string),
                author: grant.user_id,
                deleted_at_ms: ctx.now_ms(),
            })?;
            op.note("revision_id", revision.revision_id.as_str());
            Ok(revision)
        })
    }

    pub fn get_saved_query(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        sql_id: &str,
    ) -> Result<SavedQuery, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.read", "saved_query", sql_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            Ok(readable_saved_query(store, &grant, sql_id)?.0)
        })
    }

    /// Saved queries whose view the caller may read.
    pub fn list_saved_queries(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<Vec<SavedQuery>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.list", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            let views = store.list_view_metas()?;
            Ok(store
                .list_saved_queries()?
                .into_iter()
                .filter(|saved| {
                    views
                        .iter()
                        .find(|view| view.sql_id == saved.id)
                        .is_some_and(|view| grant.check_view(view, Action::SqlRead).is_ok())
                })
                .collect())
        })
    }

    pub fn saved_query_history(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        sql_id: &str,
    ) -> Result<Vec<Revision>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.history", "saved_query", sql_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            if let Ok(view) = store.view_meta(sql_id) {
                grant.check_view(&view, Action::SqlRead)?;
            }
            Ok(store.saved_query_history(sql_id)?)
        })
    }

    /// The materialized-view record kept in step with a saved query.
    pub fn view_meta(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        sql_id: &str,
    ) -> Result<ViewMeta, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("sql.view", "saved_query", sql_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            Ok(readable_saved_query(store, &grant, sql_id)?.1)
        })
    }
}
