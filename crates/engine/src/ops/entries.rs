#![forbid(unsafe_code)]

use super::*;
use crate::authz::{Grant, authorize};
use tb_core::Action;
use tb_storage::{
    AppendRevisionRequest, DeleteEntryRequest, Entry, EntryContent, Form, RestoreRevisionRequest,
    Revision, ScanOrder, SpaceStore,
};

/// Narrows `list_entries`. Empty filter keeps every live entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub tag: Option<String>,
    pub title_contains: Option<String>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    fn matches(&self, entry: &Entry) -> bool {
        let tag_ok = self.tag.as_deref().is_none_or(|tag| {
            let tag = tag.trim().to_lowercase();
            entry.tags.iter().any(|candidate| *candidate == tag)
        });
        let title_ok = self.title_contains.as_deref().is_none_or(|needle| {
            entry.title.to_lowercase().contains(&needle.to_lowercase())
        });
        tag_ok && title_ok
    }
}

/// Resolves a Form entries may be read or written through. System Forms
/// are only reachable through their own operations.
fn user_form(store: &SpaceStore, form: &str) -> Result<Form, EngineError> {
    let target = store.get_form(form)?;
    if target.system {
        return Err(EngineError::NotFound {
            kind: "form",
            id: form.to_string(),
        });
    }
    Ok(target)
}

/// Authorizes `action` on the Form the entry belongs to. Saved queries are
/// entries of the system SQL Form and stay behind their view ACL.
fn entry_grant(
    store: &SpaceStore,
    ctx: &RequestContext,
    entry_id: &str,
    action: Action,
) -> Result<(Grant, Form), EngineError> {
    let grant = authorize(store, ctx, action)?;
    let form = store.get_form(&store.entry_form_name(entry_id)?)?;
    if form.system {
        return Err(EngineError::NotFound {
            kind: "entry",
            id: entry_id.to_string(),
        });
    }
    grant.check_form(&form, action)?;
    Ok((grant, form))
}

impl Engine {
    /// `entry_id = None` mints a fresh id. An id that already has a head is a
    /// conflict carrying that head.
    pub fn create_entry(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        form: &str,
        entry_id: Option<String>,
        content: EntryContent,
    ) -> Result<Entry, EngineError> {
        let entry_id = entry_id.unwrap_or_else(|| fresh_id("e"));
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.create", "entry", entry_id.as_str());
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let grant = authorize(store, ctx, Action::EntryWrite)?;
            let target = user_form(store, form)?;
            grant.check_form(&target, Action::EntryWrite)?;
            let entry = store.append_revision(AppendRevisionRequest {
                form: target.name().to_string(),
                entry_id,
                parent_revision_id: None,
                content,
                author: grant.user_id,
                created_at_ms: ctx.now_ms(),
            })?;
            op.note("form", target.name());
            op.note("revision_id", entry.revision_id.as_str());
            Ok(entry)
        })
    }

    /// Compare-and-append on top of `parent_revision_id`.
    pub fn update_entry(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
        parent_revision_id: &str,
        content: EntryContent,
    ) -> Result<Entry, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.update", "entry", entry_id);
        let result = run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let (grant, form) = entry_grant(store, ctx, entry_id, Action::EntryWrite)?;
            op.note("parent_revision_id", parent_revision_id);
            let entry = store.append_revision(AppendRevisionRequest {
                form: form.name().to_string(),
                entry_id: entry_id.to_string(),
                parent_revision_id: Some(parent_revision_id.to_string()),
                content,
                author: grant.user_id,
                created_at_ms: ctx.now_ms(),
            })?;
            op.note("revision_id", entry.revision_id.as_str());
            Ok(entry)
        });
        if let Err(EngineError::Conflict {
            current_revision_id,
            ..
        }) = &result
        {
            tracing::warn!(
                space_id,
                entry_id,
                parent_revision_id,
                current_revision_id = current_revision_id.as_deref().unwrap_or(""),
                "stale parent revision"
            );
        }
        result
    }

    pub fn get_entry(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
    ) -> Result<Entry, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.read", "entry", entry_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            entry_grant(store, ctx, entry_id, Action::EntryRead)?;
            Ok(store.read_current(entry_id)?)
        })
    }

    /// Tombstones the entry. Without a parent the tombstone lands on the
    /// current head.
    pub fn delete_entry(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
        parent_revision_id: Option<&str>,
    ) -> Result<Revision, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.delete", "entry", entry_id);
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let (grant, _) = entry_grant(store, ctx, entry_id, Action::EntryWrite)?;
            let revision = store.delete_entry(DeleteEntryRequest {
                entry_id: entry_id.to_string(),
                parent_revision_id: parent_revision_id.map(str::to_string),
                author: grant.user_id,
                deleted_at_ms: ctx.now_ms(),
            })?;
            op.note("revision_id", revision.revision_id.as_str());
            Ok(revision)
        })
    }

    /// Appends a copy of `revision_id` as the new head; revives a tombstone.
    pub fn restore_revision(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
        revision_id: &str,
        parent_revision_id: Option<&str>,
    ) -> Result<Entry, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.restore", "entry", entry_id);
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let (grant, _) = entry_grant(store, ctx, entry_id, Action::EntryWrite)?;
            op.note("restored_from", revision_id);
            let entry = store.restore_revision(RestoreRevisionRequest {
                entry_id: entry_id.to_string(),
                revision_id: revision_id.to_string(),
                parent_revision_id: parent_revision_id.map(str::to_string),
                author: grant.user_id,
                created_at_ms: ctx.now_ms(),
            })?;
            op.note("revision_id", entry.revision_id.as_str());
            Ok(entry)
        })
    }

    /// Revision chain, oldest first, tombstones included.
    pub fn entry_history(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
    ) -> Result<Vec<Revision>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.history", "entry", entry_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            entry_grant(store, ctx, entry_id, Action::EntryRead)?;
            Ok(store.entry_history(entry_id)?)
        })
    }

    pub fn get_revision(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
        revision_id: &str,
    ) -> Result<Revision, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.revision", "entry", entry_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            entry_grant(store, ctx, entry_id, Action::EntryRead)?;
            Ok(store.read_at(entry_id, revision_id)?)
        })
    }

    /// The entry as it stood at `snapshot_seq`.
    pub fn get_entry_as_of(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        entry_id: &str,
        snapshot_seq: i64,
    ) -> Result<Entry, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.read_as_of", "entry", entry_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            entry_grant(store, ctx, entry_id, Action::EntryRead)?;
            Ok(store.read_as_of(entry_id, snapshot_seq)?)
        })
    }

    /// Live entries of one Form through the lazy scan, collected up to
    /// `filter.limit`.
    pub fn list_entries(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        form: &str,
        filter: EntryFilter,
        order: ScanOrder,
    ) -> Result<Vec<Entry>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.list", "form", form);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::EntryRead)?;
            let target = user_form(store, form)?;
            grant.check_form(&target, Action::EntryRead)?;

            let limit = filter.limit.unwrap_or(usize::MAX);
            let mut out = Vec::new();
            if limit == 0 {
                return Ok(out);
            }
            let scan = store
                .scan(form, order)?
                .with_predicate(|entry| filter.matches(entry));
            for entry in scan {
                out.push(entry?);
                if out.len() >= limit {
                    break;
                }
            }
            Ok(out)
        })
    }
}
