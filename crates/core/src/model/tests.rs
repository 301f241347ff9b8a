use super::*;

#[test]
fn space_id_validation() {
    assert_eq!(SpaceId::try_new("").unwrap_err(), IdError::Empty);
    assert_eq!(
        SpaceId::try_new("-space").unwrap_err(),
        IdError::InvalidFirstChar
    );
    assert_eq!(
        SpaceId::try_new("team/space").unwrap_err(),
        IdError::InvalidChar { ch: '/', index: 4 }
    );
    assert_eq!(
        SpaceId::try_new("x".repeat(129)).unwrap_err(),
        IdError::TooLong
    );
    assert!(SpaceId::try_new("research.notes_2024-q1").is_ok());
}

#[test]
fn form_names_fold_case() {
    let meeting = FormName::try_new(" Meeting ").unwrap();
    assert_eq!(meeting.as_str(), "Meeting");
    assert_eq!(meeting.key(), "meeting");

    assert_eq!(FormName::try_new("  ").unwrap_err(), FormNameError::Empty);
    assert_eq!(
        FormName::try_new("1meeting").unwrap_err(),
        FormNameError::InvalidFirstChar
    );
    assert_eq!(
        FormName::try_new("Meeting Notes").unwrap_err(),
        FormNameError::InvalidChar
    );
}

#[test]
fn field_name_validation() {
    assert!(FieldName::try_new("Due Date").is_ok());
    assert_eq!(FieldName::try_new("").unwrap_err(), FieldNameError::Empty);
    assert_eq!(
        FieldName::try_new(" padded").unwrap_err(),
        FieldNameError::SurroundingWhitespace
    );
    assert_eq!(
        FieldName::try_new("say \"hi\"").unwrap_err(),
        FieldNameError::ContainsQuote
    );
    assert_eq!(
        FieldName::try_new("bad\u{0007}name").unwrap_err(),
        FieldNameError::ContainsControl
    );
}

#[test]
fn reserved_names_are_case_insensitive() {
    assert!(is_reserved_field_name("entry_id"));
    assert!(is_reserved_field_name("Entry_ID"));
    assert!(is_reserved_field_name("EXTRA_ATTRIBUTES"));
    assert!(!is_reserved_field_name("owner"));

    assert!(is_reserved_form_name("sql"));
    assert!(is_reserved_form_name("USERGROUP"));
    assert!(is_reserved_form_name("Entries"));
    assert!(!is_reserved_form_name("Meeting"));

    assert!(is_pseudo_table("LINKS"));
    assert!(!is_pseudo_table("sql"));
}

#[test]
fn normalize_tags_is_deterministic() {
    let out = normalize_tags(&[
        " Foo ".to_string(),
        "foo".to_string(),
        "BAR".to_string(),
        "".to_string(),
    ])
    .unwrap();
    assert_eq!(out, vec!["bar".to_string(), "foo".to_string()]);
    assert_eq!(
        normalize_tags(&["bad\u{0000}tag".to_string()]).unwrap_err(),
        TagError::ContainsControl
    );
}

#[test]
fn role_matrix_matches_policy() {
    for action in Action::ALL {
        assert!(role_allows(Role::Owner, *action));
        assert!(role_allows(Role::Admin, *action));
        assert!(!role_allows(Role::Service, *action));
    }
    assert!(!role_allows(Role::Editor, Action::SpaceAdmin));
    assert!(role_allows(Role::Editor, Action::EntryWrite));
    assert!(role_allows(Role::Viewer, Action::EntryRead));
    assert!(!role_allows(Role::Viewer, Action::EntryWrite));
    assert!(!role_allows(Role::Viewer, Action::SqlWrite));

    assert!(scopes_allow(&[Action::SqlRead], Action::SqlRead));
    assert!(!scopes_allow(&[Action::SqlRead], Action::EntryWrite));
}

#[test]
fn enum_text_forms_parse_back() {
    for ty in FieldType::ALL {
        assert_eq!(FieldType::parse(ty.as_str()), Some(*ty));
    }
    for action in Action::ALL {
        assert_eq!(Action::parse(action.as_str()), Some(*action));
    }
    assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
    assert!(Role::Viewer.is_assignable());
    assert!(!Role::Owner.is_assignable());
    assert!(!Role::Service.is_assignable());
    assert_eq!(AuditOutcome::normalize("DENY"), AuditOutcome::Deny);
    assert_eq!(AuditOutcome::normalize("weird"), AuditOutcome::Success);
    assert_eq!(
        ExtraAttributesPolicy::parse("allow_columns"),
        Some(ExtraAttributesPolicy::AllowColumns)
    );
    assert_eq!(ExtraAttributesPolicy::parse("allow"), None);
}

#[test]
fn acl_evaluation_and_intersection() {
    let groups = vec!["research".to_string()];
    let list = vec![PrincipalRef::user("alice"), PrincipalRef::group("research")];

    assert!(acl_allows(None, "anyone", &[]));
    assert!(acl_allows(Some(list.as_slice()), "alice", &[]));
    assert!(acl_allows(Some(list.as_slice()), "bob", &groups));
    assert!(!acl_allows(Some(list.as_slice()), "bob", &[]));
    let empty: Vec<PrincipalRef> = Vec::new();
    assert!(!acl_allows(Some(empty.as_slice()), "alice", &[]));

    let other = vec![PrincipalRef::user("alice"), PrincipalRef::user("carol")];
    assert_eq!(intersect_acls([None::<&[PrincipalRef]>, None]), None);
    assert_eq!(
        intersect_acls([Some(list.as_slice()), None]),
        Some(list.clone())
    );
    assert_eq!(
        intersect_acls([Some(list.as_slice()), Some(other.as_slice())]),
        Some(vec![PrincipalRef::user("alice")])
    );
}
