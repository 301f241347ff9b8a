#![forbid(unsafe_code)]

use crate::{DeniedCheck, EngineError, RequestContext};
use std::collections::BTreeSet;
use tb_core::{
    Action, CredentialKind, Role, acl_allows, bypasses_form_acl, role_allows, scopes_allow,
};
use tb_storage::{Form, ReadScope, SpaceStore, ViewMeta};

/// What an authorized caller holds inside one space for the rest of the call.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Grant {
    pub(crate) user_id: String,
    pub(crate) role: Role,
    scopes: Vec<Action>,
    groups: Vec<String>,
}

/// Space check first, then role or scope. Form ACLs come after, per Form.
pub(crate) fn authorize(
    store: &SpaceStore,
    ctx: &RequestContext,
    action: Action,
) -> Result<Grant, EngineError> {
    let principal = ctx.principal()?;
    let member = store
        .find_member(&principal.user_id)?
        .filter(|member| member.is_active())
        .ok_or_else(|| {
            EngineError::forbidden(
                DeniedCheck::SpaceRole,
                action,
                format!("{} is not an active member of the space", principal.user_id),
            )
        })?;

    let service_member = member.role == Role::Service;
    let service_credential = principal.credential == CredentialKind::Service;
    if service_member != service_credential {
        return Err(EngineError::forbidden(
            DeniedCheck::SpaceRole,
            action,
            format!(
                "{} credential does not match a {} membership",
                principal.credential.as_str(),
                member.role.as_str()
            ),
        ));
    }

    let grant = Grant {
        user_id: member.user_id,
        role: member.role,
        scopes: member.scopes,
        groups: member.groups,
    };
    grant.require(action)?;
    Ok(grant)
}

impl Grant {
    pub(crate) fn allows(&self, action: Action) -> bool {
        match self.role {
            Role::Service => scopes_allow(&self.scopes, action),
            role => role_allows(role, action),
        }
    }

    pub(crate) fn require(&self, action: Action) -> Result<(), EngineError> {
        if self.allows(action) {
            return Ok(());
        }
        let check = match self.role {
            Role::Service => DeniedCheck::Scope,
            _ => DeniedCheck::SpaceRole,
        };
        Err(EngineError::forbidden(
            check,
            action,
            format!("{} {} may not {}", self.role.as_str(), self.user_id, action.as_str()),
        ))
    }

    pub(crate) fn require_owner(&self, action: Action) -> Result<(), EngineError> {
        if self.role == Role::Owner {
            return Ok(());
        }
        Err(EngineError::forbidden(
            DeniedCheck::SpaceRole,
            action,
            "only the space owner may do this",
        ))
    }

    fn acl_passes(&self, principals: Option<&[tb_core::PrincipalRef]>) -> bool {
        bypasses_form_acl(self.role) || acl_allows(principals, &self.user_id, &self.groups)
    }

    pub(crate) fn can_read_form(&self, form: &Form) -> bool {
        self.acl_passes(form.read_principals())
    }

    /// Form-level check for `action`. Write actions consult the write list,
    /// everything else the read list.
    pub(crate) fn check_form(&self, form: &Form, action: Action) -> Result<(), EngineError> {
        let principals = match action {
            Action::EntryWrite | Action::FormWrite | Action::AssetWrite | Action::SqlWrite => {
                form.write_principals()
            }
            _ => form.read_principals(),
        };
        if self.acl_passes(principals) {
            return Ok(());
        }
        Err(EngineError::forbidden(
            DeniedCheck::FormAcl,
            action,
            format!("{} is not listed on form {}", self.user_id, form.name()),
        ))
    }

    /// Every source Form must admit the caller; one refusal refuses the query.
    pub(crate) fn check_sources<'f>(
        &self,
        forms: impl IntoIterator<Item = &'f Form>,
        action: Action,
    ) -> Result<(), EngineError> {
        for form in forms {
            self.check_form(form, action)?;
        }
        Ok(())
    }

    pub(crate) fn check_view(&self, view: &ViewMeta, action: Action) -> Result<(), EngineError> {
        if self.acl_passes(view.read_principals.as_deref()) {
            return Ok(());
        }
        Err(EngineError::forbidden(
            DeniedCheck::FormAcl,
            action,
            format!("{} is not a reader of saved query {}", self.user_id, view.sql_id),
        ))
    }

    /// Forms whose rows the pseudo-tables may expose to this caller.
    pub(crate) fn read_scope(&self, forms: &[Form]) -> ReadScope {
        if bypasses_form_acl(self.role) {
            return ReadScope::All;
        }
        let readable: BTreeSet<String> = forms
            .iter()
            .filter(|form| self.can_read_form(form))
            .map(|form| form.key.clone())
            .collect();
        ReadScope::Forms(readable)
    }
}
