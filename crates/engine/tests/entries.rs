#![forbid(unsafe_code)]

use serde_json::json;
use std::path::PathBuf;
use tb_core::FieldType;
use tb_engine::{Engine, EngineConfig, EngineError, EntryFilter, Principal, RequestContext};
use tb_storage::{EntryContent, FieldDef, FieldValue, FormDefinition, ScanOrder};

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

fn task_space(test_name: &str) -> Engine {
    let engine = Engine::new(EngineConfig::with_storage_root(temp_dir(test_name)));
    engine.create_space(&alice(), "s1").expect("create space");
    engine
        .define_form(
            &alice(),
            "s1",
            FormDefinition::new("Task")
                .with_field(FieldDef::new("name", FieldType::String).required())
                .with_field(FieldDef::new("points", FieldType::Integer)),
        )
        .expect("define task");
    engine
}

fn task(name: &str, points: i64) -> EntryContent {
    EntryContent::titled(name)
        .with_field("name", json!(name))
        .with_field("points", json!(points))
}

fn diagnostics(err: EngineError) -> Vec<(String, &'static str)> {
    match err {
        EngineError::Validation { diagnostics, .. } => {
            let mut out: Vec<(String, &'static str)> = diagnostics
                .into_iter()
                .map(|diagnostic| (diagnostic.field, diagnostic.code))
                .collect();
            out.sort();
            out
        }
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[test]
fn updates_are_compare_and_append_on_the_head() {
    let engine = task_space("updates_are_compare_and_append_on_the_head");
    let ctx = alice();

    let first = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), task("Draft", 1))
        .expect("create");
    assert_eq!(first.parent_revision_id, None);
    assert_eq!(first.fields.get("points"), Some(&FieldValue::Integer(1)));

    let second = engine
        .update_entry(&ctx, "s1", "t1", &first.revision_id, task("Draft", 2))
        .expect("update on head");
    assert_eq!(second.parent_revision_id.as_deref(), Some(first.revision_id.as_str()));

    let err = engine
        .update_entry(&ctx, "s1", "t1", &first.revision_id, task("Lost", 3))
        .expect_err("stale parent");
    match err {
        EngineError::Conflict {
            entry_id,
            current_revision_id,
        } => {
            assert_eq!(entry_id, "t1");
            assert_eq!(current_revision_id, Some(second.revision_id.clone()));
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    let err = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), task("Again", 1))
        .expect_err("id already has a head");
    assert!(matches!(err, EngineError::Conflict { .. }), "got {err:?}");

    let current = engine.get_entry(&ctx, "s1", "t1").expect("read");
    assert_eq!(current.revision_id, second.revision_id);
    assert_eq!(engine.entry_history(&ctx, "s1", "t1").expect("history").len(), 2);

    let minted = engine
        .create_entry(&ctx, "s1", "Task", None, task("Fresh", 0))
        .expect("minted id");
    assert!(minted.id.starts_with("e-"), "{}", minted.id);
}

#[test]
fn concurrent_writers_on_one_parent_have_a_single_winner() {
    let engine = task_space("concurrent_writers_on_one_parent_have_a_single_winner");
    let base = engine
        .create_entry(&alice(), "s1", "Task", Some("t1".to_string()), task("Base", 0))
        .expect("create");

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let engine = engine.clone();
            let parent = base.revision_id.clone();
            std::thread::spawn(move || {
                engine.update_entry(&alice(), "s1", "t1", &parent, task("Racer", worker))
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("writer thread"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "{results:?}");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, EngineError::Conflict { .. }), "got {err:?}");
        }
    }

    let history = engine.entry_history(&alice(), "s1", "t1").expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].revision_id, winners[0].revision_id);
}

#[test]
fn tombstones_restores_and_snapshots() {
    let engine = task_space("tombstones_restores_and_snapshots");
    let ctx = alice();
    let first = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), task("Plan", 5))
        .expect("create");
    let second = engine
        .update_entry(&ctx, "s1", "t1", &first.revision_id, task("Plan v2", 8))
        .expect("update");

    let tombstone = engine
        .delete_entry(&ctx, "s1", "t1", Some(&second.revision_id))
        .expect("delete");
    assert!(tombstone.deleted);
    let err = engine.get_entry(&ctx, "s1", "t1").expect_err("tombstoned");
    assert!(matches!(err, EngineError::NotFound { kind: "entry", .. }), "got {err:?}");
    let err = engine
        .delete_entry(&ctx, "s1", "t1", None)
        .expect_err("already deleted");
    assert!(matches!(err, EngineError::NotFound { .. }), "got {err:?}");

    let as_of = engine
        .get_entry_as_of(&ctx, "s1", "t1", first.snapshot_seq)
        .expect("as of first");
    assert_eq!(as_of.title, "Plan");
    let old = engine
        .get_revision(&ctx, "s1", "t1", &first.revision_id)
        .expect("revision");
    assert_eq!(old.fields.get("points"), Some(&json!(5)));

    let restored = engine
        .restore_revision(&ctx, "s1", "t1", &first.revision_id, None)
        .expect("restore");
    assert_eq!(restored.title, "Plan");
    assert!(!restored.deleted);

    let history = engine.entry_history(&ctx, "s1", "t1").expect("history");
    let shape: Vec<(bool, Option<&str>)> = history
        .iter()
        .map(|revision| (revision.deleted, revision.restored_from.as_deref()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (false, None),
            (false, None),
            (true, None),
            (false, Some(first.revision_id.as_str())),
        ]
    );
}

#[test]
fn invalid_content_reports_every_field() {
    let engine = task_space("invalid_content_reports_every_field");
    let ctx = alice();

    let content = EntryContent::titled("Broken")
        .with_field("points", json!("many"))
        .with_field("colour", json!("red"));
    let dry_run = engine
        .validate_entry(&ctx, "s1", "Task", &content.fields)
        .expect("validate");
    assert!(!dry_run.is_valid());

    let err = engine
        .create_entry(&ctx, "s1", "Task", Some("t1".to_string()), content)
        .expect_err("invalid");
    assert_eq!(
        diagnostics(err),
        vec![
            ("colour".to_string(), "unknown_field"),
            ("name".to_string(), "required"),
            ("points".to_string(), "invalid_type"),
        ]
    );

    let err = engine
        .define_form(
            &ctx,
            "s1",
            FormDefinition::new("Note").with_field(FieldDef::new("title", FieldType::String)),
        )
        .expect_err("reserved field");
    assert_eq!(diagnostics(err), vec![("title".to_string(), "reserved_field")]);

    let err = engine
        .create_entry(&ctx, "s1", "Missing", None, task("x", 1))
        .expect_err("unknown form");
    assert!(matches!(err, EngineError::NotFound { kind: "form", .. }), "got {err:?}");
}

#[test]
fn listing_filters_by_tag_and_title_up_to_a_limit() {
    let engine = task_space("listing_filters_by_tag_and_title_up_to_a_limit");
    let ctx = alice();
    for (id, name, tags) in [
        ("t1", "Fix login", vec!["Bug"]),
        ("t2", "Write docs", vec![]),
        ("t3", "Fix logout", vec!["bug", "urgent"]),
        ("t4", "Fix typo", vec!["bug"]),
    ] {
        let content = EntryContent {
            tags: tags.into_iter().map(str::to_string).collect(),
            ..task(name, 1)
        };
        engine
            .create_entry(&ctx, "s1", "Task", Some(id.to_string()), content)
            .expect("create");
    }

    let ids = |filter: EntryFilter| -> Vec<String> {
        engine
            .list_entries(&ctx, "s1", "Task", filter, ScanOrder::EntryId)
            .expect("list")
            .into_iter()
            .map(|entry| entry.id)
            .collect()
    };
    assert_eq!(ids(EntryFilter::default()), vec!["t1", "t2", "t3", "t4"]);
    assert_eq!(
        ids(EntryFilter {
            tag: Some("BUG".to_string()),
            ..EntryFilter::default()
        }),
        vec!["t1", "t3", "t4"]
    );
    assert_eq!(
        ids(EntryFilter {
            title_contains: Some("fix lo".to_string()),
            ..EntryFilter::default()
        }),
        vec!["t1", "t3"]
    );
    assert_eq!(
        ids(EntryFilter {
            tag: Some("bug".to_string()),
            limit: Some(2),
            ..EntryFilter::default()
        }),
        vec!["t1", "t3"]
    );
}
