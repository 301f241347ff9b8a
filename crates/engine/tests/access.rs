#![forbid(unsafe_code)]

use serde_json::json;
use std::path::PathBuf;
use tb_core::{Action, AuditOutcome, FieldType, MemberState, PrincipalRef, Role};
use tb_engine::{
    DeniedCheck, Engine, EngineConfig, EngineError, EntryFilter, InviteRequest, Principal,
    RequestContext, SavedQueryInput,
};
use tb_storage::{AuditFilter, EntryContent, FieldDef, FormDefinition, ScanOrder};

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tb_engine_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn engine(test_name: &str) -> Engine {
    Engine::new(EngineConfig::with_storage_root(temp_dir(test_name)))
}

fn user(user_id: &str) -> RequestContext {
    RequestContext::new(Principal::user(user_id))
}

/// `alice` owns space `s1`, which holds a Budget Form only alice is listed
/// as a writer of.
fn provisioned(test_name: &str) -> Engine {
    let engine = engine(test_name);
    engine.create_space(&user("alice"), "s1").expect("create space");

    let mut budget = FormDefinition::new("Budget")
        .with_field(FieldDef::new("amount", FieldType::Number).required());
    budget.write_principals = Some(vec![PrincipalRef::user("alice")]);
    engine
        .define_form(&user("alice"), "s1", budget)
        .expect("define budget");
    engine
}

fn join(engine: &Engine, user_id: &str, role: Role) {
    let issued = engine
        .invite_member(&user("alice"), "s1", InviteRequest::new(user_id, role))
        .expect("invite");
    engine
        .accept_invitation(&user(user_id), "s1", &issued.token)
        .expect("accept");
}

fn budget_line(title: &str, amount: i64) -> EntryContent {
    EntryContent::titled(title).with_field("amount", json!(amount))
}

fn denied(err: EngineError) -> (DeniedCheck, Action) {
    match err {
        EngineError::Forbidden { check, action, .. } => (check, action),
        other => panic!("expected Forbidden, got {other:?}"),
    }
}

#[test]
fn invitation_role_change_and_revocation_drive_access() {
    let engine = provisioned("invitation_role_change_and_revocation_drive_access");
    let alice = user("alice");
    let bob = user("bob");

    let issued = engine
        .invite_member(&alice, "s1", InviteRequest::new("bob", Role::Viewer))
        .expect("invite bob");
    assert_eq!(issued.member.state, MemberState::Invited);

    let member = engine
        .accept_invitation(&bob, "s1", &issued.token)
        .expect("first accept");
    assert_eq!(member.state, MemberState::Active);
    assert_eq!(member.role, Role::Viewer);

    let err = engine
        .accept_invitation(&bob, "s1", &issued.token)
        .expect_err("token is single use");
    assert!(matches!(err, EngineError::InvalidToken(_)), "got {err:?}");

    let err = engine
        .create_entry(&bob, "s1", "Budget", Some("b-1".to_string()), budget_line("Q1", 1200))
        .expect_err("viewers cannot write");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::EntryWrite));

    engine
        .update_member_role(&alice, "s1", "bob", Role::Admin)
        .expect("promote bob");
    let entry = engine
        .create_entry(&bob, "s1", "Budget", Some("b-1".to_string()), budget_line("Q1", 1200))
        .expect("admins bypass the form acl");
    assert_eq!(entry.author, "bob");

    engine.revoke_member(&alice, "s1", "bob").expect("revoke bob");
    let err = engine
        .get_entry(&bob, "s1", "b-1")
        .expect_err("revoked members are refused");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::EntryRead));

    let err = engine
        .update_member_role(&alice, "s1", "bob", Role::Editor)
        .expect_err("revoked members need a new invitation");
    assert!(matches!(err, EngineError::Validation { .. }), "got {err:?}");

    let denials = engine
        .list_audit_events(&alice, "s1", AuditFilter::default().with_outcome(AuditOutcome::Deny))
        .expect("list denials");
    let seen: Vec<(&str, &str)> = denials
        .items
        .iter()
        .map(|event| (event.actor.as_str(), event.action.as_str()))
        .collect();
    assert_eq!(seen, vec![("bob", "entry.create"), ("bob", "entry.read")]);
    assert_eq!(
        denials.items[0].metadata.get("denied_check").map(String::as_str),
        Some("space_role")
    );

    let errors = engine
        .list_audit_events(&alice, "s1", AuditFilter::default().with_outcome(AuditOutcome::Error))
        .expect("list errors");
    let actions: Vec<&str> = errors.items.iter().map(|event| event.action.as_str()).collect();
    assert_eq!(actions, vec!["member.accept", "member.update_role"]);
    let successes = engine
        .list_audit_events(&alice, "s1", AuditFilter::default().with_outcome(AuditOutcome::Success))
        .expect("list successes");
    assert_eq!(successes.total, 7);
    assert_eq!(engine.verify_audit_chain(&alice, "s1").expect("verify"), 11);
}

#[test]
fn form_acls_apply_below_admin() {
    let engine = provisioned("form_acls_apply_below_admin");
    let alice = user("alice");
    join(&engine, "carol", Role::Editor);
    let carol = user("carol");

    let err = engine
        .create_entry(&carol, "s1", "Budget", None, budget_line("Q2", 10))
        .expect_err("carol is not a listed writer");
    assert_eq!(denied(err), (DeniedCheck::FormAcl, Action::EntryWrite));

    let mut notes =
        FormDefinition::new("Notes").with_field(FieldDef::new("body", FieldType::Markdown));
    engine
        .define_form(&carol, "s1", notes.clone())
        .expect("editors define forms without acls");
    notes.read_principals = Some(vec![PrincipalRef::user("carol")]);
    let err = engine
        .define_form(&carol, "s1", notes)
        .expect_err("acl changes need space_admin");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::SpaceAdmin));

    let mut payroll =
        FormDefinition::new("Payroll").with_field(FieldDef::new("gross", FieldType::Number));
    payroll.read_principals = Some(vec![PrincipalRef::group("finance")]);
    engine.define_form(&alice, "s1", payroll).expect("define payroll");
    engine
        .create_entry(
            &alice,
            "s1",
            "Payroll",
            Some("p-1".to_string()),
            EntryContent::titled("March").with_field("gross", json!(5000)),
        )
        .expect("alice writes payroll");

    let names = |ctx: &RequestContext| -> Vec<String> {
        engine
            .list_forms(ctx, "s1")
            .expect("list forms")
            .iter()
            .map(|form| form.name().to_string())
            .collect()
    };
    assert_eq!(names(&carol), vec!["Budget", "Notes"]);
    let err = engine.get_entry(&carol, "s1", "p-1").expect_err("not in finance");
    assert_eq!(denied(err), (DeniedCheck::FormAcl, Action::EntryRead));

    engine
        .set_member_groups(&alice, "s1", "carol", vec!["finance".to_string()])
        .expect("join finance");
    assert_eq!(names(&carol), vec!["Budget", "Notes", "Payroll"]);
    let entry = engine.get_entry(&carol, "s1", "p-1").expect("finance reads payroll");
    assert_eq!(entry.title, "March");
}

#[test]
fn service_principals_are_bound_by_their_scopes() {
    let engine = provisioned("service_principals_are_bound_by_their_scopes");
    let alice = user("alice");
    engine
        .create_entry(&alice, "s1", "Budget", Some("b-1".to_string()), budget_line("Q1", 100))
        .expect("seed entry");
    engine
        .register_service_account(
            &alice,
            "s1",
            "svc-report",
            vec![Action::SpaceRead, Action::FormRead, Action::EntryRead],
        )
        .expect("register service");

    let service = RequestContext::new(Principal::service("svc-report"));
    let entry = engine.get_entry(&service, "s1", "b-1").expect("scoped read");
    assert_eq!(entry.id, "b-1");

    let err = engine
        .create_entry(&service, "s1", "Budget", None, budget_line("Q9", 1))
        .expect_err("no entry_write scope");
    assert_eq!(denied(err), (DeniedCheck::Scope, Action::EntryWrite));

    let err = engine
        .get_space(&user("svc-report"), "s1")
        .expect_err("a user credential cannot act as a service member");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::SpaceRead));
}

#[test]
fn service_api_keys_authenticate_until_revoked() {
    let engine = provisioned("service_api_keys_authenticate_until_revoked");
    let alice = user("alice");
    engine
        .create_entry(&alice, "s1", "Budget", Some("b-1".to_string()), budget_line("Q1", 100))
        .expect("seed entry");
    engine
        .register_service_account(
            &alice,
            "s1",
            "svc-report",
            vec![Action::SpaceRead, Action::FormRead, Action::EntryRead],
        )
        .expect("register service");
    join(&engine, "bob", Role::Editor);

    let err = engine
        .create_service_account_key(&user("bob"), "s1", "svc-report", "report")
        .expect_err("editors cannot issue keys");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::SpaceAdmin));

    let issued = engine
        .create_service_account_key(&alice, "s1", "svc-report", "report")
        .expect("issue key");
    let principal = engine
        .authenticate_service_key(&RequestContext::anonymous(), "s1", &issued.secret)
        .expect("authenticate");
    assert_eq!(principal, Principal::service("svc-report"));
    let entry = engine
        .get_entry(&RequestContext::new(principal), "s1", "b-1")
        .expect("read with key");
    assert_eq!(entry.id, "b-1");

    let rotated = engine
        .rotate_service_account_key(&alice, "s1", &issued.key.key_id, Some("report-2".to_string()))
        .expect("rotate");
    assert_eq!(rotated.key.rotated_from.as_deref(), Some(issued.key.key_id.as_str()));
    let err = engine
        .authenticate_service_key(&RequestContext::anonymous(), "s1", &issued.secret)
        .expect_err("replaced key");
    assert!(matches!(err, EngineError::InvalidToken(_)), "got {err:?}");

    engine
        .revoke_service_account_key(&alice, "s1", &rotated.key.key_id)
        .expect("revoke");
    let err = engine
        .authenticate_service_key(&RequestContext::anonymous(), "s1", &rotated.secret)
        .expect_err("revoked key");
    assert!(matches!(err, EngineError::InvalidToken(_)), "got {err:?}");

    let keys = engine
        .list_service_account_keys(&alice, "s1", Some("svc-report"))
        .expect("list keys");
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|key| key.is_revoked()));
    assert_eq!(keys.iter().map(|key| key.usage_count).sum::<i64>(), 1);

    let events = engine
        .list_audit_events(&alice, "s1", AuditFilter::default())
        .expect("audit");
    let trail: Vec<(&str, &str, &str)> = events
        .items
        .iter()
        .filter(|event| event.action.starts_with("service_key."))
        .map(|event| (event.actor.as_str(), event.action.as_str(), event.outcome.as_str()))
        .collect();
    assert_eq!(
        trail,
        vec![
            ("bob", "service_key.create", "deny"),
            ("alice", "service_key.create", "success"),
            ("svc-report", "service_key.use", "success"),
            ("alice", "service_key.rotate", "success"),
            ("anonymous", "service_key.use", "error"),
            ("alice", "service_key.revoke", "success"),
            ("anonymous", "service_key.use", "error"),
        ]
    );
}

#[test]
fn anonymous_and_outside_callers_are_refused_before_any_form_check() {
    let engine = provisioned("anonymous_and_outside_callers_are_refused_before_any_form_check");

    let err = engine
        .get_space(&RequestContext::anonymous(), "s1")
        .expect_err("anonymous");
    assert!(matches!(err, EngineError::Unauthenticated), "got {err:?}");

    let err = engine
        .get_form(&user("mallory"), "s1", "Budget")
        .expect_err("not a member");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::FormRead));

    let denials = engine
        .list_audit_events(
            &user("alice"),
            "s1",
            AuditFilter::default().with_outcome(AuditOutcome::Deny),
        )
        .expect("list denials");
    let actors: Vec<&str> = denials.items.iter().map(|event| event.actor.as_str()).collect();
    assert_eq!(actors, vec!["anonymous", "mallory"]);
}

#[test]
fn spaces_are_listed_per_member_and_deleted_by_their_owner() {
    let engine = provisioned("spaces_are_listed_per_member_and_deleted_by_their_owner");
    let alice = user("alice");
    engine.create_space(&user("dan"), "s2").expect("dan's space");
    join(&engine, "bob", Role::Admin);

    let listed = |ctx: &RequestContext| -> Vec<String> {
        engine
            .list_spaces(ctx)
            .expect("list spaces")
            .into_iter()
            .map(|info| info.space_id)
            .collect()
    };
    assert_eq!(listed(&alice), vec!["s1"]);
    assert_eq!(listed(&user("bob")), vec!["s1"]);
    assert_eq!(listed(&user("dan")), vec!["s2"]);

    let err = engine
        .create_space(&user("dan"), "s1")
        .expect_err("space ids are unique");
    assert!(matches!(err, EngineError::AlreadyExists { kind: "space", .. }), "got {err:?}");

    let err = engine.delete_space(&user("bob"), "s1").expect_err("admins are not owners");
    assert_eq!(denied(err), (DeniedCheck::SpaceRole, Action::SpaceAdmin));

    engine.delete_space(&alice, "s1").expect("owner deletes");
    let err = engine.get_space(&alice, "s1").expect_err("gone");
    assert!(matches!(err, EngineError::NotFound { kind: "space", .. }), "got {err:?}");
    assert!(listed(&alice).is_empty());
}

#[test]
fn saved_queries_are_not_readable_as_plain_entries() {
    let engine = provisioned("saved_queries_are_not_readable_as_plain_entries");
    let alice = user("alice");
    let bob = user("bob");
    let mut secret =
        FormDefinition::new("Secret").with_field(FieldDef::new("code", FieldType::String));
    secret.read_principals = Some(vec![PrincipalRef::user("alice")]);
    engine.define_form(&alice, "s1", secret).expect("define secret");
    let saved = engine
        .create_saved_query(
            &alice,
            "s1",
            Some("q1".to_string()),
            SavedQueryInput::new("Codes", "SELECT id, code FROM Secret ORDER BY id"),
        )
        .expect("save query");
    join(&engine, "bob", Role::Viewer);

    let err = engine
        .get_saved_query(&bob, "s1", "q1")
        .expect_err("bob cannot read Secret");
    assert_eq!(denied(err), (DeniedCheck::FormAcl, Action::SqlRead));

    for ctx in [&bob, &alice] {
        let err = engine.get_entry(ctx, "s1", "q1").expect_err("not an entry");
        assert!(matches!(err, EngineError::NotFound { kind: "entry", .. }), "got {err:?}");
        let err = engine
            .entry_history(ctx, "s1", "q1")
            .expect_err("no entry history");
        assert!(matches!(err, EngineError::NotFound { kind: "entry", .. }), "got {err:?}");
        let err = engine
            .get_revision(ctx, "s1", "q1", &saved.revision_id)
            .expect_err("no entry revision");
        assert!(matches!(err, EngineError::NotFound { kind: "entry", .. }), "got {err:?}");
        let err = engine
            .get_entry_as_of(ctx, "s1", "q1", i64::MAX)
            .expect_err("no entry snapshot");
        assert!(matches!(err, EngineError::NotFound { kind: "entry", .. }), "got {err:?}");
    }

    let err = engine
        .list_entries(&bob, "s1", "SQL", EntryFilter::default(), ScanOrder::EntryId)
        .expect_err("system form is not listable");
    assert!(matches!(err, EngineError::NotFound { kind: "form", .. }), "got {err:?}");
    let err = engine
        .create_entry(&alice, "s1", "SQL", Some("q2".to_string()), EntryContent::titled("q2"))
        .expect_err("saved queries are written through their own operations");
    assert!(matches!(err, EngineError::NotFound { kind: "form", .. }), "got {err:?}");

    let own = engine.get_saved_query(&alice, "s1", "q1").expect("owner reads q1");
    assert_eq!(own.revision_id, saved.revision_id);
}
