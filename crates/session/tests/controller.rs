use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use concierge_auth::allowlist::KeyedLookup;
use concierge_auth::{Collections, Principal, StoreError, READ_FAILURE_MESSAGE};
use concierge_core::{PrincipalId, TenantId};
use concierge_infra::{InMemoryDirectory, InMemoryIdentityProvider};
use concierge_session::{
    GateDecision, GateRoutes, RequireRole, RequireSession, RequiredRole, SessionController,
    SessionPhase, SessionReader, SessionSnapshot,
};

struct Harness {
    dir: Arc<InMemoryDirectory>,
    provider: Arc<InMemoryIdentityProvider>,
    controller: SessionController,
    reader: SessionReader,
}

impl Harness {
    async fn start() -> Self {
        let dir = Arc::new(InMemoryDirectory::new());
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let controller =
            SessionController::new(provider.clone(), dir.clone(), Collections::default());
        let mut reader = controller.reader();
        controller.init();

        let initial = reader.wait_ready().await.unwrap();
        assert_eq!(initial.phase, SessionPhase::Idle);

        Self {
            dir,
            provider,
            controller,
            reader,
        }
    }

    /// Sign in through the provider and wait until that principal has settled.
    async fn sign_in(&mut self, principal: Principal) -> SessionSnapshot {
        let id = principal.id.clone();
        self.provider.sign_in(principal);
        self.reader
            .wait_until(|s| s.ready && s.principal.as_ref().is_some_and(|p| p.id == id))
            .await
            .unwrap()
    }
}

fn principal(uid: &str, email: &str) -> Principal {
    Principal::new(PrincipalId::new(uid).unwrap(), email)
        .unwrap()
        .with_display_name(uid.trim_start_matches("uid-"))
}

fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn legacy_allowlist_record_resolves_and_backfills_profile() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "legacy-42",
        json!({ "email": "jane@gmail.com", "companyId": "acme", "role": "agent" }),
    );
    h.dir.seed(
        "users",
        "uid-jane",
        json!({ "email": "jane@gmail.com", "display_name": "jane" }),
    );

    let snapshot = h.sign_in(principal("uid-jane", "Jane@Gmail.com")).await;

    assert_eq!(snapshot.phase, SessionPhase::AuthorizedWithTenant);
    assert_eq!(snapshot.tenant_id, Some(tenant("acme")));
    assert_eq!(snapshot.role.as_ref().map(|r| r.as_str()), Some("agent"));
    assert!(snapshot.error.is_none());

    let profile = h.dir.document("users", "uid-jane").unwrap();
    assert_eq!(profile["tenant_id"], "acme");
    assert_eq!(profile["role"], "agent");
    assert!(!profile.contains_key("created_at"));
}

#[tokio::test]
async fn legacy_field_profile_survives_repeated_sign_in() {
    let h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "bob@gmail.com",
        json!({ "tenant_id": "acme", "role": "admin" }),
    );
    h.dir.seed(
        "users",
        "uid-bob",
        json!({ "email": "bob@gmail.com", "displayName": "Bob", "companyId": "old-co" }),
    );
    let bob = principal("uid-bob", "bob@gmail.com");

    h.controller.handle(Some(bob.clone())).await;
    let first = h.controller.snapshot();
    assert_eq!(first.phase, SessionPhase::AuthorizedWithTenant);
    assert_eq!(first.tenant_id, Some(tenant("acme")));

    // Merge leaves the camelCase keys next to the new snake_case ones.
    let stored = h.dir.document("users", "uid-bob").unwrap();
    assert_eq!(stored["displayName"], "Bob");
    assert_eq!(stored["display_name"], "bob");
    assert_eq!(stored["tenant_id"], "acme");

    h.controller.handle(None).await;
    let writes = h.dir.write_count();
    h.controller.handle(Some(bob)).await;

    let second = h.controller.snapshot();
    assert_eq!(second.phase, SessionPhase::AuthorizedWithTenant);
    assert_eq!(second.tenant_id, Some(tenant("acme")));
    assert!(second.is_admin());
    assert!(second.error.is_none());
    assert_eq!(h.dir.write_count(), writes);
}

#[tokio::test]
async fn promotion_is_picked_up_on_next_sign_in() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "admin" }),
    );
    h.dir.seed(
        "users",
        "uid-jane",
        json!({
            "email": "jane@gmail.com",
            "display_name": "jane",
            "tenant_id": "acme",
            "role": "agent",
            "phone": "+30 210 000"
        }),
    );

    let snapshot = h.sign_in(principal("uid-jane", "jane@gmail.com")).await;

    assert!(snapshot.is_admin());
    assert_eq!(h.dir.write_count(), 1);
    let profile = h.dir.document("users", "uid-jane").unwrap();
    assert_eq!(profile["role"], "admin");
    assert_eq!(profile["phone"], "+30 210 000");
}

#[tokio::test]
async fn repeated_sign_in_does_not_rewrite_the_profile() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "agent" }),
    );

    h.sign_in(principal("uid-jane", "jane@gmail.com")).await;
    assert_eq!(h.dir.write_count(), 1);

    h.provider.expire();
    h.reader
        .wait_until(|s| s.phase == SessionPhase::Idle)
        .await
        .unwrap();
    h.sign_in(principal("uid-jane", "jane@gmail.com")).await;

    assert_eq!(h.dir.write_count(), 1);
}

#[tokio::test]
async fn unknown_email_is_denied_and_signed_out() {
    let h = Harness::start().await;
    let mut reader = h.controller.reader();

    h.controller
        .handle(Some(principal("uid-eve", "eve@gmail.com")))
        .await;

    let denied = h.controller.snapshot();
    assert_eq!(denied.phase, SessionPhase::Denied);
    assert!(denied.ready);
    assert!(denied.principal.is_none());
    assert!(denied.tenant_id.is_none());
    assert!(denied.error.as_deref().unwrap().contains("eve@gmail.com"));
    assert_eq!(h.provider.sign_out_count(), 1);

    // The forced sign-out comes back as a "no principal" event.
    let idle = reader
        .wait_until(|s| s.phase == SessionPhase::Idle && s.error.is_some())
        .await
        .unwrap();
    assert!(idle.ready);
    assert!(idle.principal.is_none());
    assert_eq!(h.provider.sign_out_count(), 1);
}

#[tokio::test]
async fn controller_uses_the_configured_strategy_chain() {
    let dir = Arc::new(InMemoryDirectory::new());
    let provider = Arc::new(InMemoryIdentityProvider::new());
    // Only reachable through the email scan.
    dir.seed(
        "allowed_users",
        "legacy-42",
        json!({ "email": "jane@gmail.com", "tenant_id": "acme", "role": "agent" }),
    );
    let controller = SessionController::with_strategies(
        provider.clone(),
        dir.clone(),
        Collections::default(),
        vec![Box::new(KeyedLookup)],
    );
    let mut reader = controller.reader();
    controller.init();
    reader.wait_ready().await.unwrap();

    controller
        .handle(Some(principal("uid-jane", "jane@gmail.com")))
        .await;

    assert_eq!(controller.snapshot().phase, SessionPhase::Denied);
    assert_eq!(provider.sign_out_count(), 1);
    assert!(dir.document("users", "uid-jane").is_none());
}

#[tokio::test]
async fn failed_profile_write_does_not_block_the_session() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "agent" }),
    );
    h.dir.fail_writes(Some(StoreError::Unavailable("offline".into())));

    let snapshot = h.sign_in(principal("uid-jane", "jane@gmail.com")).await;

    assert!(snapshot.ready);
    assert_eq!(snapshot.phase, SessionPhase::AuthorizedWithTenant);
    assert_eq!(snapshot.tenant_id, Some(tenant("acme")));
    assert_eq!(snapshot.role.as_ref().map(|r| r.as_str()), Some("agent"));
    assert!(snapshot.error.is_none());
    assert!(h.dir.document("users", "uid-jane").is_none());
}

#[tokio::test]
async fn directory_read_failure_surfaces_without_sign_out() {
    let mut h = Harness::start().await;
    h.dir.fail_reads(Some(StoreError::Unavailable("offline".into())));

    let snapshot = h.sign_in(principal("uid-jane", "jane@gmail.com")).await;

    assert_eq!(snapshot.phase, SessionPhase::Resolving);
    assert_eq!(snapshot.error.as_deref(), Some(READ_FAILURE_MESSAGE));
    assert!(snapshot.tenant_id.is_none());
    assert!(snapshot.role.is_none());
    assert_eq!(h.provider.sign_out_count(), 0);
}

#[tokio::test]
async fn allowlisted_without_tenant_lands_on_tenant_selection() {
    let mut h = Harness::start().await;
    h.dir.seed("allowed_users", "bob@gmail.com", json!({ "role": "member" }));

    let snapshot = h.sign_in(principal("uid-bob", "bob@gmail.com")).await;

    assert_eq!(snapshot.phase, SessionPhase::AuthorizedNoTenant);
    let routes = GateRoutes::default();
    assert_eq!(
        RequireSession::new(&routes).evaluate(&snapshot, "/villas"),
        GateDecision::Redirect {
            to: "/select-company".into(),
            return_to: None,
        }
    );
}

#[tokio::test]
async fn sign_out_wipes_identity_and_stays_ready() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "owner", "permissions": ["finance.read"] }),
    );
    let signed_in = h.sign_in(principal("uid-jane", "jane@gmail.com")).await;
    assert_eq!(signed_in.permissions.len(), 1);

    h.provider.expire();
    let idle = h
        .reader
        .wait_until(|s| s.phase == SessionPhase::Idle)
        .await
        .unwrap();

    assert!(idle.ready);
    assert!(idle.principal.is_none());
    assert!(idle.tenant_id.is_none());
    assert!(idle.role.is_none());
    assert!(idle.permissions.is_empty());
}

#[tokio::test]
async fn latest_identity_wins_over_slow_attempt() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "agent" }),
    );
    h.dir.seed(
        "allowed_users",
        "bob@gmail.com",
        json!({ "tenant_id": "villa-co", "role": "admin" }),
    );
    let hold = h.dir.hold("allowed_users", "jane@gmail.com");

    h.provider.sign_in(principal("uid-jane", "jane@gmail.com"));
    let bob = h.sign_in(principal("uid-bob", "bob@gmail.com")).await;
    assert_eq!(bob.tenant_id, Some(tenant("villa-co")));

    hold.release();
    let dir = h.dir.clone();
    eventually(|| dir.document("users", "uid-jane").is_some()).await;
    tokio::task::yield_now().await;

    let current = h.controller.snapshot();
    assert_eq!(current.principal.unwrap().id.as_str(), "uid-bob");
    assert_eq!(current.tenant_id, Some(tenant("villa-co")));
}

#[tokio::test]
async fn teardown_discards_in_flight_resolution() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "agent" }),
    );
    let hold = h.dir.hold("allowed_users", "jane@gmail.com");

    h.provider.sign_in(principal("uid-jane", "jane@gmail.com"));
    h.reader
        .wait_until(|s| s.phase == SessionPhase::Resolving)
        .await
        .unwrap();

    h.controller.teardown();
    hold.release();
    let dir = h.dir.clone();
    eventually(|| dir.document("users", "uid-jane").is_some()).await;
    tokio::task::yield_now().await;

    let current = h.controller.snapshot();
    assert_eq!(current.phase, SessionPhase::Resolving);
    assert!(!current.ready);
    assert!(current.tenant_id.is_none());
}

#[tokio::test]
async fn ready_is_never_published_with_partial_state() {
    let mut h = Harness::start().await;
    h.dir.seed(
        "allowed_users",
        "jane@gmail.com",
        json!({ "tenant_id": "acme", "role": "agent" }),
    );
    h.dir.seed("allowed_users", "bob@gmail.com", json!({ "role": "member" }));

    let mut observer_reader = h.controller.reader();
    let observer = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Ok(s) = observer_reader.changed().await {
            seen += 1;
            if !s.ready {
                assert_eq!(s.phase, SessionPhase::Resolving, "{s:?}");
                assert!(s.tenant_id.is_none() && s.role.is_none() && s.error.is_none());
                continue;
            }
            match s.phase {
                SessionPhase::Idle => assert!(s.principal.is_none()),
                SessionPhase::Resolving => assert!(s.error.is_some()),
                SessionPhase::Denied => {
                    assert!(s.principal.is_none() && s.error.is_some());
                }
                SessionPhase::AuthorizedNoTenant => {
                    assert!(s.principal.is_some() && s.tenant_id.is_none() && s.role.is_some());
                }
                SessionPhase::AuthorizedWithTenant => {
                    assert!(s.principal.is_some() && s.tenant_id.is_some() && s.role.is_some());
                    assert!(s.error.is_none());
                }
            }
            if s.phase == SessionPhase::Idle && s.error.is_some() {
                break;
            }
        }
        seen
    });

    h.sign_in(principal("uid-jane", "jane@gmail.com")).await;
    h.sign_in(principal("uid-bob", "bob@gmail.com")).await;
    h.provider.sign_in(principal("uid-eve", "eve@gmail.com"));

    let seen = observer.await.unwrap();
    assert!(seen >= 2);
    assert_eq!(h.provider.sign_out_count(), 1);
}

#[tokio::test]
async fn tenant_can_be_assigned_manually() {
    let mut h = Harness::start().await;
    h.dir.seed("allowed_users", "bob@gmail.com", json!({ "role": "member" }));
    h.dir.seed("companies", "villa-co", json!({ "name": "Villa Co" }));
    h.sign_in(principal("uid-bob", "bob@gmail.com")).await;

    h.controller.assign_tenant(tenant("villa-co")).await.unwrap();

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::AuthorizedWithTenant);
    assert_eq!(snapshot.tenant_id, Some(tenant("villa-co")));
    assert_eq!(snapshot.tenant_name.as_deref(), Some("Villa Co"));
    let profile = h.dir.document("users", "uid-bob").unwrap();
    assert_eq!(profile["tenant_id"], "villa-co");
    assert_eq!(profile["tenant_name"], "Villa Co");

    let routes = GateRoutes::default();
    assert_eq!(
        RequireSession::new(&routes).evaluate(&snapshot, "/villas"),
        GateDecision::Render
    );
    assert_eq!(
        RequireRole::with_routes(RequiredRole::Member, &routes).evaluate(&snapshot),
        GateDecision::Render
    );
    assert!(matches!(
        RequireRole::with_routes(RequiredRole::Admin, &routes).evaluate(&snapshot),
        GateDecision::Redirect { .. }
    ));
}

#[tokio::test]
async fn failed_tenant_assignment_leaves_session_unchanged() {
    let mut h = Harness::start().await;
    h.dir.seed("allowed_users", "bob@gmail.com", json!({ "role": "member" }));
    h.dir.seed("companies", "villa-co", json!({ "name": "Villa Co" }));
    let before = h.sign_in(principal("uid-bob", "bob@gmail.com")).await;

    assert!(h.controller.assign_tenant(tenant("no-such-co")).await.is_err());
    assert_eq!(h.controller.snapshot(), before);

    h.dir.fail_writes(Some(StoreError::PermissionDenied("rules".into())));
    let err = h.controller.assign_tenant(tenant("villa-co")).await.unwrap_err();
    assert!(err.to_string().contains("tenant assignment failed"));
    assert_eq!(h.controller.snapshot(), before);
}

#[tokio::test]
async fn tenant_assignment_does_not_touch_a_session_being_re_resolved() {
    let mut h = Harness::start().await;
    h.dir.seed("allowed_users", "bob@gmail.com", json!({ "role": "member" }));
    h.dir.seed("companies", "villa-co", json!({ "name": "Villa Co" }));
    h.sign_in(principal("uid-bob", "bob@gmail.com")).await;

    let tenant_read = h.dir.hold("companies", "villa-co");
    let allowlist_read = h.dir.hold("allowed_users", "bob@gmail.com");
    let provider = h.provider.clone();
    let mut reader = h.controller.reader();

    let resign = async move {
        provider.sign_in(principal("uid-bob", "bob@gmail.com"));
        reader
            .wait_until(|s| s.phase == SessionPhase::Resolving)
            .await
            .unwrap();
        tenant_read.release();
    };
    let (result, ()) = tokio::join!(h.controller.assign_tenant(tenant("villa-co")), resign);

    assert!(result.is_err());
    let pending = h.controller.snapshot();
    assert_eq!(pending.phase, SessionPhase::Resolving);
    assert!(!pending.ready);
    assert!(pending.tenant_id.is_none());

    // The tenant was persisted, so the re-resolution picks it up.
    allowlist_read.release();
    let settled = h
        .reader
        .wait_until(|s| s.ready && s.phase == SessionPhase::AuthorizedWithTenant)
        .await
        .unwrap();
    assert_eq!(settled.tenant_id, Some(tenant("villa-co")));
    assert_eq!(settled.tenant_name.as_deref(), Some("Villa Co"));
}

#[tokio::test]
async fn tenant_assignment_requires_an_authorized_session() {
    let h = Harness::start().await;
    h.dir.seed("companies", "villa-co", json!({ "name": "Villa Co" }));

    assert!(h.controller.assign_tenant(tenant("villa-co")).await.is_err());
    assert!(h.dir.document("users", "uid-bob").is_none());
}
