#![forbid(unsafe_code)]

use rusqlite::{Connection, params};
use std::path::PathBuf;
use tb_core::{Action, AuditOutcome, InvitationState, MemberState, Role, SpaceId};
use tb_storage::{
    AcceptInvitationRequest, AuditDraft, AuditFilter, ChainVerification, CreateServiceKeyRequest,
    InviteMemberRequest, RegisterServiceAccountRequest, ResolveServiceKeyRequest,
    RevokeMemberRequest, RevokeServiceKeyRequest, RotateServiceKeyRequest, SetMemberGroupsRequest,
    SpaceRoot, SpaceStore, StoreError, StoreOptions, UpdateRoleRequest,
};

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tb_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn open_space_with(test_name: &str, options: StoreOptions) -> SpaceStore {
    let root = SpaceRoot::new(temp_dir(test_name), options);
    let space_id = SpaceId::try_new("s1").expect("space id");
    root.create_space(&space_id, "alice", 1_000, audit("alice", "space.create", 1_000))
        .expect("create space")
}

fn open_space(test_name: &str) -> SpaceStore {
    open_space_with(test_name, StoreOptions::default())
}

fn audit(actor: &str, action: &str, at_ms: i64) -> AuditDraft {
    AuditDraft::new(actor, action, "member", "-", AuditOutcome::Success, at_ms)
}

fn invite(store: &mut SpaceStore, user_id: &str, role: Role, at_ms: i64) -> String {
    store
        .invite_member(
            InviteMemberRequest {
                user_id: user_id.to_string(),
                role,
                email: Some(format!("{user_id}@example.com")),
                invited_by: "alice".to_string(),
                invited_at_ms: at_ms,
                expires_at_ms: at_ms + 10_000,
            },
            audit("alice", "member.invite", at_ms),
        )
        .expect("invite member")
        .token
}

fn accept(
    store: &mut SpaceStore,
    token: &str,
    user_id: &str,
    at_ms: i64,
) -> Result<MemberState, StoreError> {
    store
        .accept_invitation(
            AcceptInvitationRequest {
                token: token.to_string(),
                user_id: user_id.to_string(),
                accepted_at_ms: at_ms,
            },
            audit(user_id, "member.accept", at_ms),
        )
        .map(|member| member.state)
}

#[test]
fn new_space_has_an_active_owner_and_a_genesis_event() {
    let store = open_space("new_space_has_an_active_owner_and_a_genesis_event");

    let owner = store.get_member("alice").expect("owner");
    assert_eq!(owner.role, Role::Owner);
    assert!(owner.is_active());
    assert!(owner.audit_event_id.is_some());

    let info = store.space_info().expect("space info");
    assert_eq!(info.owner_user_id, "alice");
    assert_eq!(info.membership_version, 1);
    assert_eq!(info.snapshot_seq, 0);

    assert_eq!(
        store.verify_chain().expect("verify"),
        ChainVerification::Valid { events: 1 }
    );
    assert!(store.find_member("bob").expect("find").is_none());
}

#[test]
fn invitation_tokens_are_single_use() {
    let mut store = open_space("invitation_tokens_are_single_use");
    let token = invite(&mut store, "bob", Role::Editor, 2_000);

    let invited = store.get_member("bob").expect("invited member");
    assert_eq!(invited.state, MemberState::Invited);
    assert_eq!(store.membership_version().expect("version"), 2);

    assert!(matches!(
        accept(&mut store, &token, "mallory", 2_500),
        Err(StoreError::InvalidToken(_))
    ));
    assert!(matches!(
        accept(&mut store, "not-a-token", "bob", 2_500),
        Err(StoreError::InvalidToken(_))
    ));

    assert_eq!(accept(&mut store, &token, "bob", 3_000).expect("accept"), MemberState::Active);
    let member = store.get_member("bob").expect("member");
    assert_eq!(member.role, Role::Editor);
    assert_eq!(member.activated_at_ms, Some(3_000));
    assert_eq!(store.membership_version().expect("version"), 3);

    assert!(matches!(
        accept(&mut store, &token, "bob", 3_500),
        Err(StoreError::InvalidToken(_))
    ));
    let invitations = store.list_invitations(Some("bob")).expect("invitations");
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].state, InvitationState::Accepted);
    assert_eq!(invitations[0].consumed_at_ms, Some(3_000));

    assert!(matches!(
        store.invite_member(
            InviteMemberRequest {
                user_id: "bob".to_string(),
                role: Role::Viewer,
                email: None,
                invited_by: "alice".to_string(),
                invited_at_ms: 4_000,
                expires_at_ms: 5_000,
            },
            audit("alice", "member.invite", 4_000),
        ),
        Err(StoreError::AlreadyExists { kind: "member", .. })
    ));
}

#[test]
fn expired_and_superseded_invitations_are_refused() {
    let mut store = open_space("expired_and_superseded_invitations_are_refused");

    let stale = invite(&mut store, "carol", Role::Viewer, 2_000);
    assert!(matches!(
        accept(&mut store, &stale, "carol", 20_000),
        Err(StoreError::InvalidToken("invitation expired"))
    ));
    let invitations = store.list_invitations(Some("carol")).expect("invitations");
    assert_eq!(invitations[0].state, InvitationState::Expired);

    let first = invite(&mut store, "dave", Role::Viewer, 3_000);
    let second = invite(&mut store, "dave", Role::Admin, 3_100);
    assert!(matches!(
        accept(&mut store, &first, "dave", 3_200),
        Err(StoreError::InvalidToken(_))
    ));
    accept(&mut store, &second, "dave", 3_300).expect("accept newest invitation");
    assert_eq!(store.get_member("dave").expect("dave").role, Role::Admin);

    let states: Vec<InvitationState> = store
        .list_invitations(Some("dave"))
        .expect("invitations")
        .into_iter()
        .map(|invitation| invitation.state)
        .collect();
    assert_eq!(states, vec![InvitationState::Revoked, InvitationState::Accepted]);

    assert!(matches!(
        store.invite_member(
            InviteMemberRequest {
                user_id: "erin".to_string(),
                role: Role::Owner,
                email: None,
                invited_by: "alice".to_string(),
                invited_at_ms: 4_000,
                expires_at_ms: 5_000,
            },
            audit("alice", "member.invite", 4_000),
        ),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn roles_change_and_revocation_is_final() {
    let mut store = open_space("roles_change_and_revocation_is_final");
    let token = invite(&mut store, "bob", Role::Editor, 2_000);
    accept(&mut store, &token, "bob", 2_100).expect("accept");

    let updated = store
        .update_member_role(
            UpdateRoleRequest {
                user_id: "bob".to_string(),
                role: Role::Viewer,
                updated_at_ms: 3_000,
            },
            audit("alice", "member.role", 3_000),
        )
        .expect("update role");
    assert_eq!(updated.role, Role::Viewer);

    assert!(matches!(
        store.update_member_role(
            UpdateRoleRequest {
                user_id: "alice".to_string(),
                role: Role::Viewer,
                updated_at_ms: 3_000,
            },
            audit("alice", "member.role", 3_000),
        ),
        Err(StoreError::InvalidInput(_))
    ));
    assert!(matches!(
        store.revoke_member(
            RevokeMemberRequest {
                user_id: "alice".to_string(),
                revoked_at_ms: 3_000,
            },
            audit("alice", "member.revoke", 3_000),
        ),
        Err(StoreError::InvalidInput(_))
    ));

    let revoked = store
        .revoke_member(
            RevokeMemberRequest {
                user_id: "bob".to_string(),
                revoked_at_ms: 4_000,
            },
            audit("alice", "member.revoke", 4_000),
        )
        .expect("revoke");
    assert_eq!(revoked.state, MemberState::Revoked);
    assert_eq!(revoked.revoked_at_ms, Some(4_000));

    assert!(matches!(
        store.revoke_member(
            RevokeMemberRequest {
                user_id: "bob".to_string(),
                revoked_at_ms: 4_100,
            },
            audit("alice", "member.revoke", 4_100),
        ),
        Err(StoreError::InvalidInput(_))
    ));
    assert!(matches!(
        store.update_member_role(
            UpdateRoleRequest {
                user_id: "bob".to_string(),
                role: Role::Editor,
                updated_at_ms: 4_200,
            },
            audit("alice", "member.role", 4_200),
        ),
        Err(StoreError::InvalidInput(_))
    ));

    let version_before = store.membership_version().expect("version");
    let reinvite = invite(&mut store, "bob", Role::Editor, 5_000);
    accept(&mut store, &reinvite, "bob", 5_100).expect("accept re-invite");
    assert!(store.get_member("bob").expect("bob").is_active());
    assert_eq!(store.membership_version().expect("version"), version_before + 2);
}

#[test]
fn service_accounts_and_groups() {
    let mut store = open_space("service_accounts_and_groups");

    let service = store
        .register_service_account(
            RegisterServiceAccountRequest {
                user_id: "svc-ingest".to_string(),
                scopes: vec![Action::SqlRead, Action::EntryWrite, Action::SqlRead],
                registered_by: "alice".to_string(),
                registered_at_ms: 2_000,
            },
            audit("alice", "member.service", 2_000),
        )
        .expect("register service account");
    assert_eq!(service.role, Role::Service);
    assert!(service.is_active());
    assert_eq!(service.scopes, vec![Action::EntryWrite, Action::SqlRead]);

    assert!(matches!(
        store.register_service_account(
            RegisterServiceAccountRequest {
                user_id: "alice".to_string(),
                scopes: vec![Action::SqlRead],
                registered_by: "alice".to_string(),
                registered_at_ms: 2_100,
            },
            audit("alice", "member.service", 2_100),
        ),
        Err(StoreError::AlreadyExists { kind: "member", .. })
    ));

    let grouped = store
        .set_member_groups(
            SetMemberGroupsRequest {
                user_id: "alice".to_string(),
                groups: vec![
                    " ops ".to_string(),
                    "eng".to_string(),
                    "ops".to_string(),
                    String::new(),
                ],
                updated_at_ms: 3_000,
            },
            audit("alice", "member.groups", 3_000),
        )
        .expect("set groups");
    assert_eq!(grouped.groups, vec!["eng".to_string(), "ops".to_string()]);

    assert!(matches!(
        store.set_member_groups(
            SetMemberGroupsRequest {
                user_id: "nobody".to_string(),
                groups: Vec::new(),
                updated_at_ms: 3_000,
            },
            audit("alice", "member.groups", 3_000),
        ),
        Err(StoreError::UnknownId { kind: "member", .. })
    ));

    let members: Vec<String> = store
        .list_members()
        .expect("members")
        .into_iter()
        .map(|member| member.user_id)
        .collect();
    assert_eq!(members, vec!["alice".to_string(), "svc-ingest".to_string()]);
}

#[test]
fn service_account_keys_rotate_revoke_and_resolve() {
    let mut store = open_space("service_account_keys_rotate_revoke_and_resolve");
    store
        .register_service_account(
            RegisterServiceAccountRequest {
                user_id: "svc-ingest".to_string(),
                scopes: vec![Action::SqlRead],
                registered_by: "alice".to_string(),
                registered_at_ms: 2_000,
            },
            audit("alice", "member.service", 2_000),
        )
        .expect("register service account");
    let create = |user_id: &str, at_ms: i64| CreateServiceKeyRequest {
        user_id: user_id.to_string(),
        name: "ingest".to_string(),
        created_by: "alice".to_string(),
        created_at_ms: at_ms,
    };
    let resolve = |secret: &str, at_ms: i64| ResolveServiceKeyRequest {
        secret: secret.to_string(),
        used_at_ms: at_ms,
    };

    assert!(matches!(
        store.create_service_account_key(
            create("alice", 2_100),
            audit("alice", "key.create", 2_100)
        ),
        Err(StoreError::InvalidInput(_))
    ));

    let version_before = store.membership_version().expect("version");
    let issued = store
        .create_service_account_key(
            create("svc-ingest", 2_200),
            audit("alice", "key.create", 2_200),
        )
        .expect("create key");
    assert!(issued.secret.starts_with("tbsk_"));
    assert!(issued.secret.starts_with(&issued.key.key_prefix));
    assert_eq!(issued.key.user_id, "svc-ingest");
    assert_eq!(issued.key.usage_count, 0);
    assert!(store.membership_version().expect("version") > version_before);

    let stored_hash: String = Connection::open(store.db_path())
        .expect("open raw")
        .query_row(
            "SELECT secret_hash FROM service_account_keys WHERE key_id = ?1",
            params![issued.key.key_id],
            |row| row.get(0),
        )
        .expect("stored hash");
    assert!(stored_hash.starts_with("$argon2"));
    assert!(!stored_hash.contains(&issued.secret));

    let resolved = store
        .resolve_service_account_key(
            resolve(&format!("  {}  ", issued.secret), 3_000),
            audit("", "key.use", 3_000),
        )
        .expect("resolve");
    assert_eq!(resolved.member.user_id, "svc-ingest");
    assert_eq!(resolved.key.usage_count, 1);
    assert_eq!(resolved.key.last_used_at_ms, Some(3_000));

    let tampered = format!("{}x", issued.secret);
    assert!(matches!(
        store.resolve_service_account_key(resolve(&tampered, 3_100), audit("", "key.use", 3_100)),
        Err(StoreError::InvalidToken("unknown api key"))
    ));
    assert!(matches!(
        store.resolve_service_account_key(resolve("not-a-key", 3_100), audit("", "key.use", 3_100)),
        Err(StoreError::InvalidToken(_))
    ));

    let rotated = store
        .rotate_service_account_key(
            RotateServiceKeyRequest {
                key_id: issued.key.key_id.clone(),
                name: None,
                rotated_by: "alice".to_string(),
                rotated_at_ms: 4_000,
            },
            audit("alice", "key.rotate", 4_000),
        )
        .expect("rotate");
    assert_eq!(rotated.key.rotated_from.as_deref(), Some(issued.key.key_id.as_str()));
    assert_eq!(rotated.key.name, "ingest");
    assert_ne!(rotated.secret, issued.secret);
    let previous = store
        .get_service_account_key(&issued.key.key_id)
        .expect("previous key");
    assert_eq!(previous.revoked_at_ms, Some(4_000));
    assert_eq!(previous.usage_count, 1);
    assert!(matches!(
        store.resolve_service_account_key(
            resolve(&issued.secret, 4_100),
            audit("", "key.use", 4_100)
        ),
        Err(StoreError::InvalidToken("api key has been revoked"))
    ));
    store
        .resolve_service_account_key(resolve(&rotated.secret, 4_200), audit("", "key.use", 4_200))
        .expect("rotated key resolves");
    assert!(matches!(
        store.rotate_service_account_key(
            RotateServiceKeyRequest {
                key_id: issued.key.key_id.clone(),
                name: None,
                rotated_by: "alice".to_string(),
                rotated_at_ms: 4_300,
            },
            audit("alice", "key.rotate", 4_300),
        ),
        Err(StoreError::InvalidInput(_))
    ));

    let spare = store
        .create_service_account_key(
            create("svc-ingest", 5_000),
            audit("alice", "key.create", 5_000),
        )
        .expect("second key");
    let revoked = store
        .revoke_service_account_key(
            RevokeServiceKeyRequest {
                key_id: spare.key.key_id.clone(),
                revoked_at_ms: 5_100,
            },
            audit("alice", "key.revoke", 5_100),
        )
        .expect("revoke key");
    assert!(revoked.is_revoked());
    assert!(matches!(
        store.revoke_service_account_key(
            RevokeServiceKeyRequest {
                key_id: spare.key.key_id.clone(),
                revoked_at_ms: 5_200,
            },
            audit("alice", "key.revoke", 5_200),
        ),
        Err(StoreError::InvalidInput(_))
    ));

    store
        .revoke_member(
            RevokeMemberRequest {
                user_id: "svc-ingest".to_string(),
                revoked_at_ms: 6_000,
            },
            audit("alice", "member.revoke", 6_000),
        )
        .expect("revoke member");
    let keys = store
        .list_service_account_keys(Some("svc-ingest"))
        .expect("list keys");
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|key| key.is_revoked()));
    assert!(matches!(
        store.resolve_service_account_key(
            resolve(&rotated.secret, 6_100),
            audit("", "key.use", 6_100)
        ),
        Err(StoreError::InvalidToken(_))
    ));

    let uses = store
        .list_audit_events(AuditFilter::default().with_action("key.use"))
        .expect("use events");
    assert_eq!(uses.total, 2);
    assert!(uses.items.iter().all(|event| event.actor == "svc-ingest"));
    assert_eq!(uses.items[0].target_id, issued.key.key_id);
    assert_eq!(uses.items[1].target_id, rotated.key.key_id);
    let rotations = store
        .list_audit_events(AuditFilter::default().with_action("key.rotate"))
        .expect("rotate events");
    assert_eq!(rotations.total, 1);
    assert_eq!(rotations.items[0].id, rotated.key.audit_event_id);
    assert!(matches!(
        store.verify_chain().expect("verify"),
        ChainVerification::Valid { .. }
    ));
}

#[test]
fn audit_events_chain_filter_and_redact() {
    let mut store = open_space("audit_events_chain_filter_and_redact");
    let token = invite(&mut store, "bob", Role::Editor, 2_000);
    accept(&mut store, &token, "bob", 2_100).expect("accept");
    store
        .append_audit(
            AuditDraft::new("bob", "entry.write", "entry", "t1", AuditOutcome::Deny, 3_000)
                .with_metadata("api_token", "s3cr3t")
                .with_metadata("form", "Task"),
        )
        .expect("append deny");
    store
        .append_audit(AuditDraft::new(
            "",
            "entry.read",
            "entry",
            "t1",
            AuditOutcome::Success,
            3_100,
        ))
        .expect("append anonymous");

    assert_eq!(
        store.verify_chain().expect("verify"),
        ChainVerification::Valid { events: 5 }
    );

    let all = store.list_audit_events(AuditFilter::default()).expect("list");
    assert_eq!(all.total, 5);
    assert_eq!(all.items[0].prev_hash, tb_storage::GENESIS_HASH);
    assert!(all
        .items
        .windows(2)
        .all(|pair| pair[1].prev_hash == pair[0].event_hash));
    assert_eq!(all.items[4].actor, "anonymous");
    assert_eq!(all.items[0].space_id, "s1");

    let denied = store
        .list_audit_events(AuditFilter::default().with_outcome(AuditOutcome::Deny))
        .expect("deny filter");
    assert_eq!(denied.total, 1);
    let event = &denied.items[0];
    assert_eq!(event.metadata.get("api_token").map(String::as_str), Some("[REDACTED]"));
    assert_eq!(event.metadata.get("form").map(String::as_str), Some("Task"));

    let page = store
        .list_audit_events(AuditFilter::default().with_actor("alice").with_page(1, 1))
        .expect("actor page");
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].action, "member.invite");

    let invites = store
        .list_audit_events(AuditFilter::default().with_action("member.invite"))
        .expect("action filter");
    assert_eq!(invites.total, 1);
    assert!(invites.items[0].metadata.contains_key("invitation_id"));
}

#[test]
fn tampering_breaks_the_chain_and_blocks_appends() {
    let mut store = open_space("tampering_breaks_the_chain_and_blocks_appends");
    for at_ms in [2_000, 2_100, 2_200] {
        store
            .append_audit(AuditDraft::new(
                "alice",
                "entry.write",
                "entry",
                "t1",
                AuditOutcome::Success,
                at_ms,
            ))
            .expect("append");
    }

    let conn = Connection::open(store.db_path()).expect("open raw connection");
    conn.execute(
        "UPDATE audit_events SET actor = ?1 WHERE seq = (SELECT seq FROM audit_events ORDER BY seq LIMIT 1 OFFSET 2)",
        params!["mallory"],
    )
    .expect("tamper");
    drop(conn);

    assert_eq!(
        store.verify_chain().expect("verify"),
        ChainVerification::Broken {
            first_broken_index: 2
        }
    );
    assert!(matches!(
        store.append_audit(AuditDraft::new(
            "alice",
            "entry.write",
            "entry",
            "t2",
            AuditOutcome::Success,
            3_000,
        )),
        Err(StoreError::IntegrityViolation {
            first_broken_index: 2
        })
    ));
    assert_eq!(
        store.list_audit_events(AuditFilter::default()).expect("list").total,
        4
    );
}

#[test]
fn retention_trims_the_oldest_events_and_keeps_the_chain_verifiable() {
    let options = StoreOptions {
        audit_retention: 3,
        ..StoreOptions::default()
    };
    let mut store = open_space_with(
        "retention_trims_the_oldest_events_and_keeps_the_chain_verifiable",
        options,
    );
    for at_ms in [2_000, 2_100, 2_200, 2_300, 2_400] {
        store
            .append_audit(AuditDraft::new(
                "alice",
                "entry.write",
                "entry",
                format!("t{at_ms}"),
                AuditOutcome::Success,
                at_ms,
            ))
            .expect("append");
    }

    let page = store.list_audit_events(AuditFilter::default()).expect("list");
    assert_eq!(page.total, 3);
    let targets: Vec<&str> = page.items.iter().map(|event| event.target_id.as_str()).collect();
    assert_eq!(targets, vec!["t2200", "t2300", "t2400"]);
    assert_ne!(page.items[0].prev_hash, tb_storage::GENESIS_HASH);
    assert_eq!(
        store.verify_chain().expect("verify"),
        ChainVerification::Valid { events: 3 }
    );
}
