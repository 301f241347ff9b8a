#![forbid(unsafe_code)]

use rusqlite::{Connection, params};
use serde_json::json;
use std::path::{Path, PathBuf};
use tb_core::{AuditOutcome, FieldType, Role};
use tb_engine::{Engine, EngineConfig, EngineError, InviteRequest, Principal, RequestContext};
use tb_storage::{AuditFilter, EntryContent, FieldDef, FormDefinition};

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

fn alice() -> RequestContext {
    RequestContext::new(Principal::user("alice"))
}

fn task_space(root: &Path) -> Engine {
    let engine = Engine::new(EngineConfig::with_storage_root(root));
    engine.create_space(&alice(), "s1").expect("create space");
    engine
        .define_form(
            &alice(),
            "s1",
            FormDefinition::new("Task").with_field(FieldDef::new("name", FieldType::String)),
        )
        .expect("define task");
    engine
}

fn task(name: &str) -> EntryContent {
    EntryContent::titled(name).with_field("name", json!(name))
}

fn raw_event_count(root: &Path) -> i64 {
    let conn = Connection::open(root.join("spaces").join("s1").join("space.db")).expect("open raw");
    conn.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))
        .expect("count events")
}

#[test]
fn every_mutation_lands_in_the_chain_with_redacted_metadata() {
    let root = temp_dir("every_mutation_lands_in_the_chain_with_redacted_metadata");
    let engine = task_space(&root);
    let ctx = alice()
        .with_metadata("request_id", "req-7")
        .with_metadata("session_token", "s3cr3t");

    let entry = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), task("One"))
        .expect("create");
    engine
        .update_entry(&ctx, "s1", "t1", &entry.revision_id, task("One v2"))
        .expect("update");
    engine.get_entry(&ctx, "s1", "t1").expect("reads are not recorded");

    let page = engine
        .list_audit_events(&alice(), "s1", AuditFilter::default())
        .expect("list");
    let actions: Vec<&str> = page.items.iter().map(|event| event.action.as_str()).collect();
    assert_eq!(actions, vec!["space.create", "form.define", "entry.create", "entry.update"]);
    assert!(page.items.iter().all(|event| event.outcome == "success"));
    for pair in page.items.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].event_hash);
    }

    let update = &page.items[3];
    assert_eq!(update.target_type, "entry");
    assert_eq!(update.target_id, "t1");
    assert_eq!(update.metadata.get("request_id").map(String::as_str), Some("req-7"));
    assert_eq!(
        update.metadata.get("session_token").map(String::as_str),
        Some("[REDACTED]")
    );
    assert_eq!(
        update.metadata.get("parent_revision_id"),
        Some(&entry.revision_id)
    );

    let filtered = engine
        .list_audit_events(
            &alice(),
            "s1",
            AuditFilter::default().with_action("entry.create").with_actor("alice"),
        )
        .expect("filtered");
    assert_eq!(filtered.total, 1);
    let paged = engine
        .list_audit_events(&alice(), "s1", AuditFilter::default().with_page(1, 2))
        .expect("paged");
    assert_eq!(paged.total, 4);
    assert_eq!(paged.items.len(), 2);
    assert_eq!(paged.items[0].action, "form.define");

    assert_eq!(engine.verify_audit_chain(&alice(), "s1").expect("verify"), 4);
}

#[test]
fn failed_mutations_are_chained_as_errors() {
    let root = temp_dir("failed_mutations_are_chained_as_errors");
    let engine = task_space(&root);
    let ctx = alice();
    let entry = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), task("One"))
        .expect("create");
    engine
        .update_entry(&ctx, "s1", "t1", &entry.revision_id, task("Two"))
        .expect("update");
    engine
        .update_entry(&ctx, "s1", "t1", &entry.revision_id, task("Stale"))
        .expect_err("stale parent");

    let errors = engine
        .list_audit_events(&ctx, "s1", AuditFilter::default().with_outcome(AuditOutcome::Error))
        .expect("errors");
    assert_eq!(errors.total, 1);
    assert_eq!(errors.items[0].action, "entry.update");
    assert_eq!(
        errors.items[0].metadata.get("error").map(String::as_str),
        Some("conflict")
    );
}

#[test]
fn audit_access_is_reserved_to_admins() {
    let root = temp_dir("audit_access_is_reserved_to_admins");
    let engine = task_space(&root);
    let issued = engine
        .invite_member(&alice(), "s1", InviteRequest::new("bob", Role::Editor))
        .expect("invite");
    let bob = RequestContext::new(Principal::user("bob"));
    engine.accept_invitation(&bob, "s1", &issued.token).expect("accept");

    let err = engine
        .list_audit_events(&bob, "s1", AuditFilter::default())
        .expect_err("editors cannot read the ledger");
    assert!(matches!(err, EngineError::Forbidden { .. }), "got {err:?}");
    let err = engine
        .verify_audit_chain(&bob, "s1")
        .expect_err("editors cannot verify the ledger");
    assert!(matches!(err, EngineError::Forbidden { .. }), "got {err:?}");

    let invite = engine
        .list_audit_events(&alice(), "s1", AuditFilter::default().with_action("member.invite"))
        .expect("invite event");
    assert_eq!(invite.items[0].metadata.get("role").map(String::as_str), Some("editor"));
}

#[test]
fn a_tampered_chain_refuses_every_mutation() {
    let root = temp_dir("a_tampered_chain_refuses_every_mutation");
    let engine = task_space(&root);
    let ctx = alice();
    let entry = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), task("One"))
        .expect("create");
    assert_eq!(engine.verify_audit_chain(&ctx, "s1").expect("verify"), 3);

    let conn = Connection::open(root.join("spaces").join("s1").join("space.db")).expect("open raw");
    conn.execute(
        "UPDATE audit_events SET actor = ?1 WHERE seq = (SELECT seq FROM audit_events ORDER BY seq LIMIT 1 OFFSET 1)",
        params!["mallory"],
    )
    .expect("tamper");
    drop(conn);

    let err = engine.verify_audit_chain(&ctx, "s1").expect_err("broken");
    assert!(
        matches!(err, EngineError::Integrity { first_broken_index: 1 }),
        "got {err:?}"
    );

    let err = engine
        .update_entry(&ctx, "s1", "t1", &entry.revision_id, task("Two"))
        .expect_err("mutations are refused");
    assert!(matches!(err, EngineError::Integrity { .. }), "got {err:?}");
    let err = engine
        .invite_member(&ctx, "s1", InviteRequest::new("bob", Role::Viewer))
        .expect_err("membership changes are refused");
    assert!(matches!(err, EngineError::Integrity { .. }), "got {err:?}");

    assert_eq!(raw_event_count(&root), 3);
    let current = engine.get_entry(&ctx, "s1", "t1").expect("reads still work");
    assert_eq!(current.revision_id, entry.revision_id);
}
