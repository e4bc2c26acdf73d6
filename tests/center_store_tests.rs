use applicant_portal::{
    centers::{
        CenterQuery, CenterSourceState, CenterState, CenterStore, CenterStores, MockCenterSource,
        SnapshotEvent, SuperadminRule, UNKNOWN_CENTER_NAME,
    },
    error::BackendError,
    models::{Center, CenterSelection, Claims, Role, SessionUser},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Map, json};
use std::{sync::Arc, time::Duration};

// --- Helpers ---

fn center(id: &str, name: &str) -> Center {
    let mut details = Map::new();
    details.insert("prefecture".to_string(), json!("Tokyo"));
    Center {
        id: id.to_string(),
        name: name.to_string(),
        details,
    }
}

fn user(role: &str, center_ids: &[&str]) -> SessionUser {
    SessionUser {
        uid: format!("{}-uid", role),
        email: Some(format!("{}@example.com", role)),
        token: format!("{}-token", role),
        claims: Some(Claims {
            role: Some(Role::from(role)),
            center_ids: center_ids.iter().map(|id| id.to_string()).collect(),
        }),
        expires_at: None,
    }
}

fn store_with(source: &Arc<MockCenterSource>) -> CenterStore {
    CenterStore::new(Arc::clone(source) as CenterSourceState)
}

fn claims_store_with(source: &Arc<MockCenterSource>) -> CenterStore {
    CenterStore::with_superadmin_rule(
        Arc::clone(source) as CenterSourceState,
        SuperadminRule::ViewerClaims,
    )
}

/// A center document tagged with a role, as the superadmin's own entry is.
fn role_center(id: &str, name: &str, role: &str) -> Center {
    let mut center = center(id, name);
    center.details.insert("role".to_string(), json!(role));
    center
}

/// Waits until the store publishes a state matching `ready`.
async fn settled(store: &CenterStore, ready: impl FnMut(&CenterState) -> bool) -> CenterState {
    let mut rx = store.watch();
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(ready))
        .await
        .expect("store did not settle in time")
        .expect("store dropped");
    state.clone()
}

fn assert_empty(state: &CenterState) {
    assert!(state.user_accessible_centers.is_empty());
    assert!(state.all_centers_map.is_empty());
    assert_eq!(state.selected_center_id, CenterSelection::All);
}

// --- Tests ---

#[tokio::test]
async fn test_superadmin_sees_all_centers_ordered_and_selects_all() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c3", "Sendai"),
        center("c1", "Akita"),
        center("c2", "Osaka"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    let state = settled(&store, |s| s.user_accessible_centers.len() == 3).await;

    assert_eq!(source.queries(), vec![CenterQuery::AllOrderedByName]);
    assert_eq!(state.selected_center_id, CenterSelection::All);
    assert_eq!(state.all_centers_map.len(), 3);
    let names: Vec<&str> = state
        .user_accessible_centers
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["Akita", "Osaka", "Sendai"]);
    assert!(state.show_center_filter());
    assert!(!state.is_specific_center_selected());
}

#[tokio::test]
async fn test_is_superadmin_reads_first_accessible_center() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        role_center("c1", "Akita", "superadmin"),
        center("c2", "Osaka"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    let state = settled(&store, |s| s.user_accessible_centers.len() == 2).await;
    assert!(state.is_superadmin());

    // The same viewer whose first center carries no role is not recognized.
    source
        .emit(SnapshotEvent::Snapshot(vec![
            center("c2", "Osaka"),
            role_center("c1", "Akita", "superadmin"),
        ]))
        .await;
    let state = settled(&store, |s| {
        s.user_accessible_centers
            .first()
            .is_some_and(|first| first.id == "c2")
    }).await;
    assert!(!state.is_superadmin());
    assert!(state.view().show_center_filter);
}

#[tokio::test]
async fn test_single_center_admin_is_auto_selected() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("center_admin", &["c1"])));
    let state = settled(&store, |s| s.user_accessible_centers.len() == 1).await;

    assert_eq!(source.queries(), vec![CenterQuery::ByIds(vec!["c1".into()])]);
    assert_eq!(state.selected_center_id, CenterSelection::Center("c1".into()));
    assert!(state.is_specific_center_selected());
    assert!(!state.show_center_filter());
    assert_eq!(state.center_name("c1"), "Akita");
    assert_eq!(state.all_centers_map["c1"].details["prefecture"], json!("Tokyo"));
}

#[tokio::test]
async fn test_superadmin_with_single_center_is_forced_into_it() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![center("only", "Nara")]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    let state = settled(&store, |s| !s.user_accessible_centers.is_empty()).await;

    assert_eq!(state.selected_center_id, CenterSelection::Center("only".into()));
    // The only center carries no role, so nothing marks the viewer as superadmin.
    assert!(!state.is_superadmin());
    assert!(!state.show_center_filter());
}

#[tokio::test]
async fn test_claims_rule_keeps_filter_for_single_center_superadmin() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![center("only", "Nara")]));
    let store = claims_store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    let state = settled(&store, |s| !s.user_accessible_centers.is_empty()).await;

    assert_eq!(state.selected_center_id, CenterSelection::Center("only".into()));
    assert!(state.is_superadmin());
    assert!(state.show_center_filter());

    // The rule survives a teardown.
    store.clear_center_listener();
    assert_eq!(store.state().superadmin_rule, SuperadminRule::ViewerClaims);
}

#[tokio::test]
async fn test_multi_center_admin_selects_all() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
        center("c3", "Sendai"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("center_admin", &["c1", "c3"])));
    let state = settled(&store, |s| s.user_accessible_centers.len() == 2).await;

    assert_eq!(state.selected_center_id, CenterSelection::All);
    assert!(state.show_center_filter());
    assert!(!state.is_superadmin());
    assert_eq!(state.center_name("c2"), UNKNOWN_CENTER_NAME);
}

#[tokio::test]
async fn test_users_without_scope_get_empty_state_and_no_subscription() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![center("c1", "Akita")]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(None);
    assert_empty(&store.state());

    let mut no_claims = user("center_admin", &["c1"]);
    no_claims.claims = None;
    store.initialize_user_accessible_centers(Some(&no_claims));
    assert_empty(&store.state());

    store.initialize_user_accessible_centers(Some(&user("center_admin", &[])));
    assert_empty(&store.state());

    assert!(source.queries().is_empty());
    assert!(!store.is_subscribed());
}

#[tokio::test]
async fn test_live_snapshot_replaces_state() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![center("c1", "Akita")]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("center_admin", &["c1", "c2"])));
    settled(&store, |s| s.user_accessible_centers.len() == 1).await;

    assert!(
        source
            .emit(SnapshotEvent::Snapshot(vec![
                center("c1", "Akita"),
                center("c2", "Osaka"),
            ]))
            .await
    );
    let state = settled(&store, |s| s.user_accessible_centers.len() == 2).await;

    assert_eq!(state.selected_center_id, CenterSelection::All);
    assert_eq!(state.all_centers_map.len(), 2);

    // The map never keeps entries that left the list.
    source
        .emit(SnapshotEvent::Snapshot(vec![center("c2", "Osaka")]))
        .await;
    let state = settled(&store, |s| s.user_accessible_centers.len() == 1).await;
    assert_eq!(state.all_centers_map.len(), 1);
    assert!(!state.all_centers_map.contains_key("c1"));
    assert_eq!(state.selected_center_id, CenterSelection::Center("c2".into()));
}

#[tokio::test]
async fn test_subscription_error_resets_to_empty_state() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    settled(&store, |s| s.user_accessible_centers.len() == 2).await;

    source
        .emit(SnapshotEvent::Error(BackendError::Query(
            "permission denied".into(),
        )))
        .await;
    let state = settled(&store, |s| s.user_accessible_centers.is_empty()).await;

    assert_empty(&state);
    // The subscription is over; nothing is retried.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!store.is_subscribed());
    assert_eq!(source.queries().len(), 1);
}

#[tokio::test]
async fn test_reinitialize_releases_previous_subscription() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
        center("c3", "Sendai"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    settled(&store, |s| s.user_accessible_centers.len() == 3).await;

    store.initialize_user_accessible_centers(Some(&user("center_admin", &["c2"])));
    settled(&store, |s| s.user_accessible_centers.len() == 1).await;

    // A late delivery on the first subscription must not land.
    source
        .emit_to(
            0,
            SnapshotEvent::Snapshot(vec![center("c1", "Akita"), center("c3", "Sendai")]),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = store.state();
    assert_eq!(source.queries().len(), 2);
    assert_eq!(state.selected_center_id, CenterSelection::Center("c2".into()));
    assert_eq!(state.viewer_role, Some(Role::CenterAdmin));
}

#[tokio::test]
async fn test_set_selected_center_id_is_plain_assignment() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
    ]));
    let store = store_with(&source);

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    settled(&store, |s| s.user_accessible_centers.len() == 2).await;

    store.set_selected_center_id(CenterSelection::from("c2"));
    assert_eq!(store.state().selected_center_id, CenterSelection::Center("c2".into()));
    assert!(store.state().is_specific_center_selected());

    // Unknown ids are accepted as-is; callers are trusted.
    store.set_selected_center_id(CenterSelection::from("nowhere"));
    assert_eq!(store.state().center_name("nowhere"), UNKNOWN_CENTER_NAME);

    store.set_selected_center_id(CenterSelection::from("all"));
    assert!(!store.state().is_specific_center_selected());
}

#[tokio::test]
async fn test_clear_center_listener_is_idempotent() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
    ]));
    let store = store_with(&source);

    store.clear_center_listener();
    assert_empty(&store.state());

    store.initialize_user_accessible_centers(Some(&user("superadmin", &[])));
    settled(&store, |s| s.user_accessible_centers.len() == 2).await;

    store.clear_center_listener();
    assert_empty(&store.state());
    store.clear_center_listener();
    let state = store.state();
    assert_empty(&state);
    assert_eq!(state.viewer_role, None);
    assert!(!store.is_subscribed());

    // A snapshot already in flight after teardown is dropped.
    source
        .emit(SnapshotEvent::Snapshot(vec![center("c1", "Akita")]))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_empty(&store.state());
}

// --- Registry ---

fn registry_with(source: &Arc<MockCenterSource>) -> Arc<CenterStores> {
    Arc::new(CenterStores::new(Arc::clone(source) as CenterSourceState))
}

fn expiring_user(role: &str, center_ids: &[&str], in_minutes: i64) -> SessionUser {
    let mut user = user(role, center_ids);
    user.expires_at = Some(Utc::now() + ChronoDuration::minutes(in_minutes));
    user
}

#[tokio::test]
async fn test_lapsed_sessions_are_disposed() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![
        center("c1", "Akita"),
        center("c2", "Osaka"),
    ]));
    let registry = registry_with(&source);

    let lapsed = expiring_user("superadmin", &[], -5);
    let live = expiring_user("center_admin", &["c1"], 30);
    let mut unknown_expiry = user("center_admin", &["c2"]);
    unknown_expiry.uid = "no-expiry-uid".to_string();

    let lapsed_store = registry.sign_in(&lapsed);
    settled(&lapsed_store, |s| s.user_accessible_centers.len() == 2).await;
    registry.sign_in(&live);
    registry.sign_in(&unknown_expiry);

    // A lapsed store is no longer handed out, even before the sweep.
    assert!(registry.get(&lapsed.uid).is_none());

    assert_eq!(registry.expire_lapsed(Utc::now()), 1);
    assert_empty(&lapsed_store.state());
    assert!(!lapsed_store.is_subscribed());
    assert!(!registry.sign_out(&lapsed.uid));

    assert!(registry.get(&live.uid).is_some());
    assert!(registry.get(&unknown_expiry.uid).is_some());
    assert_eq!(registry.expire_lapsed(Utc::now()), 0);
}

#[tokio::test]
async fn test_newer_token_extends_store_lifetime() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![center("c1", "Akita")]));
    let registry = registry_with(&source);

    let first_token = expiring_user("center_admin", &["c1"], 10);
    registry.sign_in(&first_token);

    let refreshed_token = expiring_user("center_admin", &["c1"], 120);
    assert!(registry.session_store(&refreshed_token).is_some());

    // An older token never shortens it again.
    assert!(registry.session_store(&first_token).is_some());

    assert_eq!(
        registry.expire_lapsed(Utc::now() + ChronoDuration::minutes(60)),
        0
    );
    assert_eq!(
        registry.expire_lapsed(Utc::now() + ChronoDuration::minutes(180)),
        1
    );
}

#[tokio::test]
async fn test_expiry_sweep_runs_in_background() {
    let source = Arc::new(MockCenterSource::with_catalog(vec![center("c1", "Akita")]));
    let registry = registry_with(&source);

    let lapsed = expiring_user("center_admin", &["c1"], -1);
    let store = registry.sign_in(&lapsed);

    let sweep = registry.spawn_expiry_sweep(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!registry.sign_out(&lapsed.uid));
    assert!(!store.is_subscribed());

    // The sweep stops once the registry is gone.
    drop(registry);
    tokio::time::timeout(Duration::from_secs(2), sweep)
        .await
        .expect("sweep did not stop")
        .unwrap();
}
