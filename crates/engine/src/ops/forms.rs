#![forbid(unsafe_code)]

use super::*;
use crate::authz::authorize;
use serde_json::{Map, Value};
use tb_core::{Action, FieldType};
use tb_storage::{DefineFormRequest, Form, FormDefinition, ValidatedFields};

fn acl_changed(previous: Option<&Form>, definition: &FormDefinition) -> bool {
    match previous {
        None => definition.read_principals.is_some() || definition.write_principals.is_some(),
        Some(form) => {
            form.definition.read_principals != definition.read_principals
                || form.definition.write_principals != definition.write_principals
        }
    }
}

impl Engine {
    pub fn field_types() -> &'static [FieldType] {
        FieldType::ALL
    }

    /// Creates or redefines a Form. Touching its read/write principals takes
    /// `space_admin` on top of `form_write`.
    pub fn define_form(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        definition: FormDefinition,
    ) -> Result<Form, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("form.define", "form", definition.name.trim());
        run(&mut store, ctx, op, Recording::Mutation, |store, op| {
            let grant = authorize(store, ctx, Action::FormWrite)?;
            let previous = match store.get_form(&definition.name) {
                Ok(form) => Some(form),
                Err(tb_storage::StoreError::UnknownId { .. }) => None,
                Err(err) => return Err(err.into()),
            };
            if let Some(form) = &previous {
                grant.check_form(form, Action::FormWrite)?;
            }
            if acl_changed(previous.as_ref(), &definition) {
                grant.require(Action::SpaceAdmin)?;
            }

            let form = store.define_form(DefineFormRequest {
                definition,
                author: grant.user_id.clone(),
                defined_at_ms: ctx.now_ms(),
            })?;
            op.note("version", form.version.to_string());
            Ok(form)
        })
    }

    pub fn get_form(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        name: &str,
    ) -> Result<Form, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("form.read", "form", name);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::FormRead)?;
            let form = store.get_form(name)?;
            grant.check_form(&form, Action::FormRead)?;
            Ok(form)
        })
    }

    /// Forms the caller may read, by key.
    pub fn list_forms(
        &self,
        ctx: &RequestContext,
        space_id: &str,
    ) -> Result<Vec<Form>, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("form.list", "space", space_id);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::FormRead)?;
            Ok(store
                .list_forms()?
                .into_iter()
                .filter(|form| grant.can_read_form(form))
                .collect())
        })
    }

    pub fn delete_form(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        name: &str,
    ) -> Result<(), EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("form.delete", "form", name);
        run(&mut store, ctx, op, Recording::Mutation, |store, _| {
            let grant = authorize(store, ctx, Action::FormWrite)?;
            let form = store.get_form(name)?;
            grant.check_form(&form, Action::FormWrite)?;
            Ok(store.delete_form(name)?)
        })
    }

    /// Dry run of the write path's coercion. Reports every failing field.
    pub fn validate_entry(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        form: &str,
        fields: &Map<String, Value>,
    ) -> Result<ValidatedFields, EngineError> {
        let mut store = self.open(space_id)?;
        let op = Op::new("entry.validate", "form", form);
        run(&mut store, ctx, op, Recording::Read, |store, _| {
            let grant = authorize(store, ctx, Action::EntryWrite)?;
            let target = store.get_form(form)?;
            grant.check_form(&target, Action::EntryWrite)?;
            Ok(store.validate_entry(form, fields)?)
        })
    }
}
