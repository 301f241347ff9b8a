#![forbid(unsafe_code)]

use super::saved_queries::readable_saved_query;
use super::*;
use crate::authz::{Grant, authorize};
use crate::context::now_ms;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Instant;
use tb_core::{Action, SessionStatus};
use tb_storage::{
    BoundVariables, CreateSessionRequest, ParsedQuery, QuerySession, ReadScope, Row, RowPage,
    SpaceStore, SqlVariable, bind_variables, parse_query,
};

/// What a session runs: ad-hoc SQL or a saved query by id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryTarget {
    Sql(String),
    Saved(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionRequest {
    pub target: QueryTarget,
    pub variables: Map<String, Value>,
    /// Overrides the configured default page size, clamped to the maximum.
    pub page_size: Option<usize>,
}

impl SessionRequest {
    pub fn sql(sql: impl Into<String>) -> Self {
        Self::new(QueryTarget::Sql(sql.into()))
    }

    pub fn saved(sql_id: impl Into<String>) -> Self {
        Self::new(QueryTarget::Saved(sql_id.into()))
    }

    fn new(target: QueryTarget) -> Self {
        Self {
            target,
            variables: Map::new(),
            page_size: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// A query compiled for one caller: parsed, bound, authorized against every
/// source Form, with the pseudo-table scope that caller gets.
struct Prepared {
    parsed: ParsedQuery,
    variables: BoundVariables,
    scope: ReadScope,
}

fn prepare(
    store: &SpaceStore,
    grant: &Grant,
    sql_text: &str,
    declared: &[SqlVariable],
    supplied: &Map<String, Value>,
) -> Result<Prepared, EngineError> {
    let parsed = parse_query(sql_text)?;
    let variables = bind_variables(&parsed, declared, supplied)?;
    let sources = store.resolve_query_sources(&parsed)?;
    grant.check_sources(
        sources.iter().filter_map(|source| source.form.as_ref()),
        Action::SqlRead,
    )?;
    let scope = grant.read_scope(&store.list_forms()?);
    Ok(Prepared {
        parsed,
        variables,
        scope,
    })
}

/// Variable declarations of the exact saved-query revision the session was
/// created from.
fn declared_variables(
    store: &SpaceStore,
    session: &QuerySession,
) -> Result<Vec<SqlVariable>, EngineError> {
    let (Some(sql_id), Some(revision_id)) = (&session.sql_id, &session.sql_revision_id) else {
        return Ok(Vec::new());
    };
    let revision = store.read_at(sql_id, revision_id)?;
    match revision.fields.get("variables") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())
            .map_err(|err| EngineError::Storage(err.into())),
        _ => Ok(Vec::new()),
    }
}

fn prepare_session(
    store: &SpaceStore,
    grant: &Grant,
    session: &QuerySession,
) -> Result<Prepared, EngineError> {
    let declared = declared_variables(store, session)?;
    prepare(store, grant, &session.sql_text, &declared, &session.variables)
}

/// Runs one re-execution and keeps the session status in step with it:
/// a failure marks the session failed, a later success makes it ready again.
fn reexecute<T>(
    store: &SpaceStore,
    session: &QuerySession,
    now_ms: i64,
    execute: impl FnOnce(&SpaceStore) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let result = execute(store);
    let update = match &result {
        Err(err) if !err.is_denial() => Some((SessionStatus::Failed, Some(err.to_string()))),
        Ok(_) if session.status == SessionStatus::Failed => Some((SessionStatus::Ready, None)),
        _ => None,
    };
    if let Some((status, error)) = update {
        if let Err(update_err) =
            store.set_session_status(&session.id, status, error.as_deref(), now_ms)
        {
            tracing::warn!(
                space_id = store.space_id(),
                session_id = session.id.as_str(),
                error = %update_err,
                "failed to update session status"
            );
        }
    }
    result
}

fn page_limit(session: &QuerySession, limit: Option<usize>) -> Result<usize, EngineError> {
    match limit {
        None => Ok(session.default_page_size),
        Some(0) => Err(EngineError::invalid("limit", "invalid_limit", "limit must be positive")),
        Some(limit) => Ok(limit.min(session.max_page_size)),
    }
}

impl Engine {
    /// Validates and records the query intent. Nothing is executed: the
    /// session holds metadata and a paging contract only.
    pub fn create_session(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        request: SessionRequest,
    ) -> Result<QuerySession, EngineError> {
        let SessionRequest {
            target,
            variables,
            page_size,
        } = request;
        let session_id = fresh_id("qs");
        let max_page_size = self.config().session_max_page_size;
        let default_page_size = match page_size {
            None => self.config().session_default_page_size,
            Some(0) => {
                return Err(EngineError::invalid(
                    "page_size",
                    "invalid_limit",
                    "page size must be positive",
                ));
            }
            Some(size) => size.min(max_page_size),
        };

        let mut store = self.open(space_id)?;
        let op = Op::new("session.create", "session", session_id.as_str());
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            let (sql_id, sql_revision_id, sql_text, declared) = match target {
                QueryTarget::Sql(sql) => (None, None, sql, Vec::new()),
                QueryTarget::Saved(sql_id) => {
                    let (saved, _) = readable_saved_query(store, &grant, &sql_id)?;
                    op.note("sql_id", saved.id.as_str());
                    (
                        Some(saved.id),
                        Some(saved.revision_id),
                        saved.sql,
                        saved.variables,
                    )
                }
            };
            let prepared = prepare(store, &grant, &sql_text, &declared, &variables)?;

            Ok(store.create_session(CreateSessionRequest {
                session_id,
                sql_id,
                sql_revision_id,
                sql_text: sql_text.trim().to_string(),
                variables,
                order_by: prepared.parsed.order_by,
                created_by: grant.user_id,
                created_at_ms: ctx.now_ms(),
                ttl_ms: self.config().session_ttl_ms(),
                default_page_size,
                max_page_size,
            })?)
        })
    }

    /// Current metadata. Past its TTL the session reports `Expired`.
    pub fn session_status(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        session_id: &str,
    ) -> Result<QuerySession, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("session.status", "session", session_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            authorize(store, ctx, Action::SqlRead)?;
            Ok(store.get_session(session_id, ctx.now_ms())?)
        })
    }

    /// Re-executes the stored query and counts its rows.
    pub fn session_count(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        session_id: &str,
    ) -> Result<usize, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("session.count", "session", session_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            let session = store.get_session(session_id, ctx.now_ms())?;
            reexecute(store, &session, ctx.now_ms(), |store| {
                let prepared = prepare_session(store, &grant, &session)?;
                Ok(store.count_query(&prepared.parsed, &prepared.variables, &prepared.scope)?)
            })
        })
    }

    /// Re-executes the stored query for one page. `limit = None` uses the
    /// session's default page size.
    pub fn session_rows(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        session_id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<RowPage, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("session.rows", "session", session_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            let session = store.get_session(session_id, ctx.now_ms())?;
            let limit = page_limit(&session, limit)?;
            reexecute(store, &session, ctx.now_ms(), |store| {
                let prepared = prepare_session(store, &grant, &session)?;
                Ok(store.fetch_query_page(
                    &prepared.parsed,
                    &prepared.variables,
                    &prepared.scope,
                    offset,
                    limit,
                )?)
            })
        })
    }

    /// Every row of the session, fetched lazily page by page. Single pass.
    /// The session reads `running` until the stream ends or is dropped.
    /// Every page re-checks the caller and the session TTL.
    pub fn stream_session_rows(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        session_id: &str,
    ) -> Result<SessionRowStream, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("session.stream", "session", session_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::SqlRead)?;
            let session = store.get_session(session_id, ctx.now_ms())?;
            reexecute(store, &session, ctx.now_ms(), |store| {
                prepare_session(store, &grant, &session)
            })?;
            store.set_session_status(session_id, SessionStatus::Running, None, ctx.now_ms())?;
            Ok(())
        })?;

        Ok(SessionRowStream {
            store,
            ctx: ctx.clone(),
            opened: Instant::now(),
            session_id: session_id.to_string(),
            page_size: self.config().stream_page_size,
            offset: 0,
            buffer: VecDeque::new(),
            finished: false,
            settled: false,
        })
    }

    /// Deletes every session past its TTL. Returns how many went.
    pub fn purge_expired_sessions(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<usize, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("session.purge", "space", space_id);
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            authorize(store, ctx, Action::SpaceAdmin)?;
            let removed = store.purge_expired_sessions(ctx.now_ms())?;
            op.note("removed", removed.to_string());
            Ok(removed)
        })
    }
}

/// Owns its store. Each page is a call of its own: the caller is
/// re-authorized, the session TTL re-checked and the query recompiled before
/// it re-executes against the live tables. The full result is never held in
/// memory.
pub struct SessionRowStream {
    store: SpaceStore,
    ctx: RequestContext,
    opened: Instant,
    session_id: String,
    page_size: usize,
    offset: usize,
    buffer: VecDeque<Row>,
    finished: bool,
    settled: bool,
}

impl SessionRowStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The opening context with its clock moved forward by the stream's age.
    fn page_context(&self) -> RequestContext {
        let elapsed = i64::try_from(self.opened.elapsed().as_millis()).unwrap_or(i64::MAX);
        let now = self.ctx.now_ms().saturating_add(elapsed);
        self.ctx.clone().at(now)
    }

    fn fetch_page(&mut self) -> Result<Vec<Row>, EngineError> {
        let ctx = self.page_context();
        let session_id = self.session_id.clone();
        let (offset, page_size) = (self.offset, self.page_size);
        let op = Op::new("session.stream", "session", session_id.as_str());
        run(&mut self.store, &ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, &ctx, Action::SqlRead)?;
            let session = store.get_session(&session_id, ctx.now_ms())?;
            let prepared = prepare_session(store, &grant, &session)?;
            Ok(store.fetch_query_rows(
                &prepared.parsed,
                &prepared.variables,
                &prepared.scope,
                offset,
                page_size,
            )?)
        })
    }

    fn settle(&mut self, status: SessionStatus, error: Option<&str>) {
        if self.settled {
            return;
        }
        self.settled = true;
        if let Err(err) = self
            .store
            .set_session_status(&self.session_id, status, error, now_ms())
        {
            tracing::warn!(
                space_id = self.store.space_id(),
                session_id = self.session_id.as_str(),
                error = %err,
                "failed to settle session status"
            );
        }
    }
}

impl Iterator for SessionRowStream {
    type Item = Result<Row, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            if self.finished {
                self.settle(SessionStatus::Ready, None);
                return None;
            }
            match self.fetch_page() {
                Ok(rows) => {
                    self.finished = rows.len() < self.page_size;
                    self.offset += rows.len();
                    self.buffer.extend(rows);
                }
                Err(err) => {
                    self.finished = true;
                    match &err {
                        // The session is gone or already marked expired.
                        EngineError::Expired { .. } | EngineError::NotFound { .. } => {
                            self.settled = true;
                        }
                        err if err.is_denial() => self.settle(SessionStatus::Ready, None),
                        err => self.settle(SessionStatus::Failed, Some(&err.to_string())),
                    }
                    return Some(Err(err));
                }
            }
        }
    }
}

impl Drop for SessionRowStream {
    fn drop(&mut self) {
        self.settle(SessionStatus::Ready, None);
    }
}
