#![forbid(unsafe_code)]

use super::{Action, PrincipalKind, Role};
use std::collections::BTreeSet;

const EDITOR_ACTIONS: &[Action] = &[
    Action::SpaceList,
    Action::SpaceRead,
    Action::EntryRead,
    Action::EntryWrite,
    Action::FormRead,
    Action::FormWrite,
    Action::AssetRead,
    Action::AssetWrite,
    Action::SqlRead,
    Action::SqlWrite,
];

const VIEWER_ACTIONS: &[Action] = &[
    Action::SpaceList,
    Action::SpaceRead,
    Action::EntryRead,
    Action::FormRead,
    Action::AssetRead,
    Action::SqlRead,
];

/// Actions granted by a role. Service principals get nothing from their role;
/// their scope list is evaluated instead.
pub fn role_actions(role: Role) -> &'static [Action] {
    match role {
        Role::Owner | Role::Admin => Action::ALL,
        Role::Editor => EDITOR_ACTIONS,
        Role::Viewer => VIEWER_ACTIONS,
        Role::Service => &[],
    }
}

pub fn role_allows(role: Role, action: Action) -> bool {
    role_actions(role).contains(&action)
}

pub fn scopes_allow(scopes: &[Action], action: Action) -> bool {
    scopes.contains(&action)
}

pub fn bypasses_form_acl(role: Role) -> bool {
    matches!(role, Role::Owner | Role::Admin)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalRef {
    pub kind: PrincipalKind,
    pub id: String,
}

impl PrincipalRef {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::User,
            id: id.into(),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::UserGroup,
            id: id.into(),
        }
    }

    pub fn matches(&self, user_id: &str, groups: &[String]) -> bool {
        match self.kind {
            PrincipalKind::User => self.id == user_id,
            PrincipalKind::UserGroup => groups.iter().any(|group| *group == self.id),
        }
    }
}

/// `None` means the Form defines no list and the space-level policy applies.
pub fn acl_allows(principals: Option<&[PrincipalRef]>, user_id: &str, groups: &[String]) -> bool {
    match principals {
        None => true,
        Some(list) => list.iter().any(|principal| principal.matches(user_id, groups)),
    }
}

/// Effective readers of a view over several Forms: the intersection of every
/// explicit list, or `None` when no source Form defines one.
pub fn intersect_acls<'a, I>(acls: I) -> Option<Vec<PrincipalRef>>
where
    I: IntoIterator<Item = Option<&'a [PrincipalRef]>>,
{
    let mut effective: Option<BTreeSet<PrincipalRef>> = None;
    for list in acls.into_iter().flatten() {
        let current: BTreeSet<PrincipalRef> = list.iter().cloned().collect();
        effective = Some(match effective {
            None => current,
            Some(previous) => previous.intersection(&current).cloned().collect(),
        });
    }
    effective.map(|set| set.into_iter().collect())
}
