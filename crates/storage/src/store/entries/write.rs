#![forbid(unsafe_code)]

use super::super::forms::{encode_fields, load_form, require_form, validate_fields};
use super::super::*;
use super::append::{HeadExpectation, RevisionDraft, append_revision_tx, load_head_tx};
use super::read::{entry_from_head, load_revision};
use serde_json::Map;
use tb_core::{EntryId, normalize_tags};

impl SpaceStore {
    /// Creates an entry (`parent_revision_id = None`) or appends a revision
    /// on top of the given head.
    pub fn append_revision(&mut self, request: AppendRevisionRequest) -> Result<Entry, StoreError> {
        let AppendRevisionRequest {
            form,
            entry_id,
            parent_revision_id,
            content,
            author,
            created_at_ms,
        } = request;

        let tx = begin_write(&mut self.conn)?;
        let form = require_form(&tx, &form)?;
        if form.system {
            return Err(StoreError::InvalidInput(
                "entries of system forms are written through their own operations",
            ));
        }

        let mut diagnostics = Vec::new();
        if let Err(err) = EntryId::try_new(entry_id.as_str()) {
            diagnostics.push(FieldDiagnostic::new("id", "invalid_id", err.message()));
        }
        let validated = validate_fields(&form.definition, &content.fields, &*tx)?;
        diagnostics.extend(validated.diagnostics.iter().cloned());
        let tags = match normalize_tags(&content.tags) {
            Ok(tags) => tags,
            Err(err) => {
                diagnostics.push(FieldDiagnostic::new("tags", "invalid_tag", err.message()));
                Vec::new()
            }
        };
        for link in &content.links {
            if link.target.trim().is_empty() || link.kind.trim().is_empty() {
                diagnostics.push(FieldDiagnostic::new(
                    "links",
                    "invalid_link",
                    "links need a target and a kind",
                ));
            }
        }
        for asset in &content.assets {
            if asset.id.trim().is_empty() {
                diagnostics.push(FieldDiagnostic::new(
                    "assets",
                    "invalid_asset",
                    "assets need an id",
                ));
            }
        }
        if !diagnostics.is_empty() {
            return Err(StoreError::Validation(diagnostics));
        }

        let expectation = match parent_revision_id {
            None => HeadExpectation::Absent,
            Some(parent) => {
                if let Some(head) = load_head_tx(&tx, &entry_id)?
                    && head.deleted
                {
                    return Err(StoreError::unknown("entry", entry_id));
                }
                HeadExpectation::Exactly(parent)
            }
        };

        let title = match content.title.trim() {
            "" => entry_id.clone(),
            title => title.to_string(),
        };

        let revision = append_revision_tx(
            &tx,
            RevisionDraft {
                entry_id: entry_id.clone(),
                form: &form,
                expectation,
                title,
                fields: encode_fields(&validated.fields),
                extra_attributes: validated.extra_attributes,
                tags,
                links: content.links,
                assets: content.assets,
                deleted: false,
                author,
                restored_from: None,
                created_at_ms,
            },
        )?;

        let head = load_head_tx(&tx, &entry_id)?
            .ok_or_else(|| StoreError::unknown("entry", entry_id.as_str()))?;
        let entry = entry_from_head(head, Some(&form));
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            entry_id = entry.id.as_str(),
            revision_id = revision.revision_id.as_str(),
            seq = revision.seq,
            "revision appended"
        );
        Ok(entry)
    }

    /// Tombstoning write. Without a parent the tombstone lands on the current
    /// head inside the same transaction.
    pub fn delete_entry(&mut self, request: DeleteEntryRequest) -> Result<Revision, StoreError> {
        let DeleteEntryRequest {
            entry_id,
            parent_revision_id,
            author,
            deleted_at_ms,
        } = request;

        let tx = begin_write(&mut self.conn)?;
        let Some(head) = load_head_tx(&tx, &entry_id)? else {
            return Err(StoreError::unknown("entry", entry_id));
        };
        if head.deleted {
            return Err(StoreError::unknown("entry", entry_id));
        }
        let form = load_form(&tx, &head.form_key)?
            .ok_or_else(|| StoreError::unknown("form", head.form_name.as_str()))?;
        if form.system {
            return Err(StoreError::InvalidInput(
                "entries of system forms are written through their own operations",
            ));
        }

        let expectation = HeadExpectation::Exactly(
            parent_revision_id.unwrap_or_else(|| head.revision_id.clone()),
        );
        let revision = append_revision_tx(
            &tx,
            RevisionDraft {
                entry_id: head.entry_id,
                form: &form,
                expectation,
                title: head.title,
                fields: head.fields,
                extra_attributes: head.extra_attributes,
                tags: head.tags,
                links: head.links,
                assets: head.assets,
                deleted: true,
                author,
                restored_from: None,
                created_at_ms: deleted_at_ms,
            },
        )?;
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            entry_id = revision.entry_id.as_str(),
            revision_id = revision.revision_id.as_str(),
            "entry tombstoned"
        );
        Ok(revision)
    }

    /// Appends a copy of an earlier revision. Fields the Form no longer
    /// declares are dropped; a tombstoned entry comes back to life.
    pub fn restore_revision(
        &mut self,
        request: RestoreRevisionRequest,
    ) -> Result<Entry, StoreError> {
        let RestoreRevisionRequest {
            entry_id,
            revision_id,
            parent_revision_id,
            author,
            created_at_ms,
        } = request;

        let tx = begin_write(&mut self.conn)?;
        let Some(head) = load_head_tx(&tx, &entry_id)? else {
            return Err(StoreError::unknown("entry", entry_id));
        };
        let source = load_revision(&tx, &entry_id, &revision_id)?
            .ok_or_else(|| StoreError::unknown("revision", revision_id.as_str()))?;

        let form = load_form(&tx, &head.form_key)?
            .ok_or_else(|| StoreError::unknown("form", head.form_name.as_str()))?;
        if form.system {
            return Err(StoreError::InvalidInput(
                "entries of system forms are written through their own operations",
            ));
        }

        let fields: Map<_, _> = source
            .fields
            .into_iter()
            .filter(|(name, _)| form.definition.field(name).is_some())
            .collect();
        let extra_attributes = if form.definition.extra_attributes.allows_extra() {
            source.extra_attributes
        } else {
            Map::new()
        };

        let expectation = HeadExpectation::Exactly(
            parent_revision_id.unwrap_or_else(|| head.revision_id.clone()),
        );
        append_revision_tx(
            &tx,
            RevisionDraft {
                entry_id: entry_id.clone(),
                form: &form,
                expectation,
                title: source.title,
                fields,
                extra_attributes,
                tags: source.tags,
                links: source.links,
                assets: source.assets,
                deleted: false,
                author,
                restored_from: Some(revision_id.clone()),
                created_at_ms,
            },
        )?;

        let head = load_head_tx(&tx, &entry_id)?
            .ok_or_else(|| StoreError::unknown("entry", entry_id.as_str()))?;
        let entry = entry_from_head(head, Some(&form));
        tx.commit()?;

        tracing::info!(
            space_id = self.space_id.as_str(),
            entry_id = entry.id.as_str(),
            restored_from = revision_id.as_str(),
            "revision restored"
        );
        Ok(entry)
    }
}
