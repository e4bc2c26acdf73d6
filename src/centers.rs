use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sqlx::{PgPool, postgres::PgListener, types::Json};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, watch,
    },
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    error::BackendError,
    models::{Center, CenterSelection, CenterStoreView, Role, SessionUser},
};

/// Display name used when a center id is not in the accessible set.
pub const UNKNOWN_CENTER_NAME: &str = "不明なセンター";

/// Postgres notification channel raised by the `centers` table trigger.
pub const CENTERS_CHANNEL: &str = "centers_changed";

const SNAPSHOT_BUFFER: usize = 16;
const CHANGE_BUFFER: usize = 64;
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How often the registry drops stores whose session has lapsed.
pub const EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(60);

// --- Subscription Port ---

/// CenterQuery
///
/// The two query shapes a store subscribes with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CenterQuery {
    /// Every center, ordered by name.
    AllOrderedByName,
    /// Exactly the centers whose id is listed, in backend order.
    ByIds(Vec<String>),
}

/// SnapshotEvent
///
/// One delivery of a live subscription. A snapshot always carries the complete result
/// set; an error terminates the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Snapshot(Vec<Center>),
    Error(BackendError),
}

/// CenterSource
///
/// Contract with the document store. `subscribe` returns the lazy sequence of snapshot
/// events for `query`; dropping the receiver ends the subscription.
pub trait CenterSource: Send + Sync {
    fn subscribe(&self, query: CenterQuery) -> mpsc::Receiver<SnapshotEvent>;
}

/// CenterSourceState
///
/// The concrete type used to share the center source across the application state.
pub type CenterSourceState = Arc<dyn CenterSource>;

// --- State & Reducer ---

/// SuperadminRule
///
/// How a store answers "is the viewer a superadmin".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuperadminRule {
    /// The first accessible center document carries `role: "superadmin"`. False when
    /// there is no accessible center.
    #[default]
    FirstCenterRole,
    /// The role in the refreshed claims the store was initialized with.
    ViewerClaims,
}

impl SuperadminRule {
    /// Parses the `SUPERADMIN_RULE` setting. Only `claims` selects
    /// [`SuperadminRule::ViewerClaims`].
    pub fn from_setting(value: &str) -> Self {
        match value.trim() {
            "claims" => SuperadminRule::ViewerClaims,
            _ => SuperadminRule::FirstCenterRole,
        }
    }
}

/// CenterState
///
/// Everything the views need to scope data by center. `all_centers_map` is rebuilt
/// from `user_accessible_centers` on every snapshot and never patched in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CenterState {
    pub selected_center_id: CenterSelection,
    pub user_accessible_centers: Vec<Center>,
    pub all_centers_map: HashMap<String, Center>,
    /// Role from the refreshed claims the store was initialized with.
    pub viewer_role: Option<Role>,
    pub superadmin_rule: SuperadminRule,
}

impl CenterState {
    /// The empty state of a store using `rule`.
    pub fn empty(rule: SuperadminRule) -> Self {
        Self {
            superadmin_rule: rule,
            ..Self::default()
        }
    }

    fn reset(&self) -> Self {
        Self {
            viewer_role: self.viewer_role.clone(),
            ..Self::empty(self.superadmin_rule)
        }
    }

    /// apply
    ///
    /// Pure transition for one subscription event. A snapshot replaces the center list,
    /// rebuilds the map and re-runs auto-selection: a single accessible center is
    /// always selected, anything else starts from `all`. An error resets to the
    /// empty state.
    pub fn apply(&self, event: SnapshotEvent) -> CenterState {
        match event {
            SnapshotEvent::Snapshot(centers) => {
                let all_centers_map = centers
                    .iter()
                    .map(|center| (center.id.clone(), center.clone()))
                    .collect();

                let selected_center_id = match centers.as_slice() {
                    [only] => CenterSelection::Center(only.id.clone()),
                    _ => CenterSelection::All,
                };

                CenterState {
                    selected_center_id,
                    user_accessible_centers: centers,
                    all_centers_map,
                    viewer_role: self.viewer_role.clone(),
                    superadmin_rule: self.superadmin_rule,
                }
            }
            SnapshotEvent::Error(_) => self.reset(),
        }
    }

    pub fn is_superadmin(&self) -> bool {
        match self.superadmin_rule {
            SuperadminRule::FirstCenterRole => self
                .user_accessible_centers
                .first()
                .and_then(|center| center.details.get("role"))
                .and_then(Value::as_str)
                .is_some_and(|role| role == Role::Superadmin.as_str()),
            SuperadminRule::ViewerClaims => self.viewer_role == Some(Role::Superadmin),
        }
    }

    /// Whether the views should offer a center filter at all.
    pub fn show_center_filter(&self) -> bool {
        let count = self.user_accessible_centers.len();
        count > 1 || (self.is_superadmin() && count > 0)
    }

    pub fn center_name(&self, center_id: &str) -> &str {
        self.all_centers_map
            .get(center_id)
            .map(|center| center.name.as_str())
            .unwrap_or(UNKNOWN_CENTER_NAME)
    }

    pub fn is_specific_center_selected(&self) -> bool {
        matches!(&self.selected_center_id, CenterSelection::Center(id) if !id.is_empty())
    }

    pub fn view(&self) -> CenterStoreView {
        CenterStoreView {
            selected_center_id: self.selected_center_id.clone().into(),
            centers: self.user_accessible_centers.clone(),
            show_center_filter: self.show_center_filter(),
            is_specific_center_selected: self.is_specific_center_selected(),
            is_superadmin: self.is_superadmin(),
        }
    }
}

// --- Store ---

#[derive(Default)]
struct SubscriptionSlot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionSlot {
    /// Invalidates whatever is in flight for the current subscription.
    fn release(&mut self) {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct StoreInner {
    state: watch::Sender<CenterState>,
    subscription: Mutex<SubscriptionSlot>,
    superadmin_rule: SuperadminRule,
}

/// CenterStore
///
/// Center scoping for one signed-in user. Holds at most one live subscription; the
/// subscription's consumer task applies events through [`CenterState::apply`] and
/// publishes each new state whole.
///
/// `initialize_user_accessible_centers` spawns onto the current tokio runtime.
pub struct CenterStore {
    source: CenterSourceState,
    inner: Arc<StoreInner>,
}

impl CenterStore {
    pub fn new(source: CenterSourceState) -> Self {
        Self::with_superadmin_rule(source, SuperadminRule::default())
    }

    pub fn with_superadmin_rule(source: CenterSourceState, rule: SuperadminRule) -> Self {
        let (state, _) = watch::channel(CenterState::empty(rule));
        Self {
            source,
            inner: Arc::new(StoreInner {
                state,
                subscription: Mutex::new(SubscriptionSlot::default()),
                superadmin_rule: rule,
            }),
        }
    }

    fn empty_state(&self) -> CenterState {
        CenterState::empty(self.inner.superadmin_rule)
    }

    /// A copy of the current state.
    pub fn state(&self) -> CenterState {
        self.inner.state.borrow().clone()
    }

    /// Observes every published state.
    pub fn watch(&self) -> watch::Receiver<CenterState> {
        self.inner.state.subscribe()
    }

    /// Callers pass `all` or an id they got from this store; nothing is checked.
    pub fn set_selected_center_id(&self, selection: CenterSelection) {
        self.inner
            .state
            .send_modify(|state| state.selected_center_id = selection);
    }

    /// initialize_user_accessible_centers
    ///
    /// Releases the previous subscription, then subscribes according to the user's
    /// claims: superadmins see every center, other users see the centers listed in
    /// their claims. Users without claims, or without any listed center, get the empty
    /// state and no subscription.
    pub fn initialize_user_accessible_centers(&self, user: Option<&SessionUser>) {
        let mut slot = self.inner.subscription.lock();
        slot.release();

        let Some(claims) = user.and_then(|user| user.claims.as_ref()) else {
            self.inner.state.send_replace(self.empty_state());
            return;
        };

        let query = if claims.is_superadmin() {
            CenterQuery::AllOrderedByName
        } else if !claims.center_ids.is_empty() {
            CenterQuery::ByIds(claims.center_ids.clone())
        } else {
            self.inner.state.send_replace(CenterState {
                viewer_role: claims.role.clone(),
                ..self.empty_state()
            });
            return;
        };

        let viewer_role = claims.role.clone();
        self.inner
            .state
            .send_modify(|state| state.viewer_role = viewer_role);

        tracing::debug!(?query, "subscribing to accessible centers");
        let events = self.source.subscribe(query);
        let generation = slot.generation;
        let task = tokio::spawn(consume_snapshots(events, Arc::clone(&self.inner), generation));
        slot.task = Some(task);
    }

    /// clear_center_listener
    ///
    /// Releases the live subscription, if any, and resets to the empty state.
    /// Safe to call any number of times.
    pub fn clear_center_listener(&self) {
        let mut slot = self.inner.subscription.lock();
        slot.release();
        self.inner.state.send_replace(self.empty_state());
    }

    /// Whether a subscription consumer is currently attached.
    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for CenterStore {
    fn drop(&mut self) {
        self.inner.subscription.lock().release();
    }
}

async fn consume_snapshots(
    mut events: mpsc::Receiver<SnapshotEvent>,
    inner: Arc<StoreInner>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        let terminal = matches!(event, SnapshotEvent::Error(_));

        {
            let slot = inner.subscription.lock();
            if slot.generation != generation {
                // Released while this event was in flight.
                return;
            }

            match &event {
                SnapshotEvent::Snapshot(centers) => {
                    tracing::debug!(count = centers.len(), "applying centers snapshot");
                }
                SnapshotEvent::Error(e) => {
                    tracing::error!("Error initializing accessible centers: {}", e);
                }
            }

            inner.state.send_modify(|state| {
                let next = state.apply(event);
                *state = next;
            });
        }

        if terminal {
            return;
        }
    }
}

// --- Registry ---

struct SessionEntry {
    store: Arc<CenterStore>,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// CenterStores
///
/// One [`CenterStore`] per signed-in user, created on sign-in and disposed on sign-out
/// or once the session token it was created for has lapsed.
pub struct CenterStores {
    source: CenterSourceState,
    superadmin_rule: SuperadminRule,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl CenterStores {
    pub fn new(source: CenterSourceState) -> Self {
        Self::with_superadmin_rule(source, SuperadminRule::default())
    }

    pub fn with_superadmin_rule(source: CenterSourceState, rule: SuperadminRule) -> Self {
        Self {
            source,
            superadmin_rule: rule,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the user's store, initialized for `user`'s claims. Signing in again
    /// re-initializes the existing store.
    pub fn sign_in(&self, user: &SessionUser) -> Arc<CenterStore> {
        let store = {
            let mut sessions = self.sessions.lock();
            let entry = sessions
                .entry(user.uid.clone())
                .or_insert_with(|| SessionEntry {
                    store: Arc::new(CenterStore::with_superadmin_rule(
                        Arc::clone(&self.source),
                        self.superadmin_rule,
                    )),
                    expires_at: user.expires_at,
                });
            entry.expires_at = user.expires_at;
            Arc::clone(&entry.store)
        };
        store.initialize_user_accessible_centers(Some(user));
        store
    }

    /// The user's store, unless it was never created or its session has lapsed.
    pub fn get(&self, uid: &str) -> Option<Arc<CenterStore>> {
        let now = Utc::now();
        self.sessions
            .lock()
            .get(uid)
            .filter(|entry| !entry.is_lapsed(now))
            .map(|entry| Arc::clone(&entry.store))
    }

    /// The store for the session presenting `user`. A token that outlives the one the
    /// store was created with keeps the store alive until the newer expiry.
    pub fn session_store(&self, user: &SessionUser) -> Option<Arc<CenterStore>> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(&user.uid)
            .filter(|entry| !entry.is_lapsed(now))?;
        entry.expires_at = match (entry.expires_at, user.expires_at) {
            (Some(current), Some(presented)) => Some(current.max(presented)),
            (current, _) => current,
        };
        Some(Arc::clone(&entry.store))
    }

    /// Tears the user's store down. Returns whether the user had one.
    pub fn sign_out(&self, uid: &str) -> bool {
        let removed = self.sessions.lock().remove(uid);
        match removed {
            Some(entry) => {
                entry.store.clear_center_listener();
                true
            }
            None => false,
        }
    }

    /// expire_lapsed
    ///
    /// Disposes every store whose session expired at or before `now` and returns how
    /// many were dropped. Stores without a known expiry are kept.
    pub fn expire_lapsed(&self, now: DateTime<Utc>) -> usize {
        let lapsed: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock();
            let uids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.is_lapsed(now))
                .map(|(uid, _)| uid.clone())
                .collect();
            uids.iter()
                .filter_map(|uid| sessions.remove(uid))
                .collect()
        };

        for entry in &lapsed {
            entry.store.clear_center_listener();
        }
        lapsed.len()
    }

    /// spawn_expiry_sweep
    ///
    /// Runs [`Self::expire_lapsed`] every `period` until the registry is dropped.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                let expired = registry.expire_lapsed(Utc::now());
                if expired > 0 {
                    tracing::info!(expired, "disposed center stores of lapsed sessions");
                }
            }
        })
    }
}

// --- Postgres Source ---

#[derive(sqlx::FromRow)]
struct CenterRow {
    id: String,
    name: String,
    details: Option<Json<Map<String, Value>>>,
}

impl From<CenterRow> for Center {
    fn from(row: CenterRow) -> Self {
        Center {
            id: row.id,
            name: row.name,
            details: row.details.map(|Json(details)| details).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
enum ChangeSignal {
    Changed,
    Failed(BackendError),
}

/// PgCenterSource
///
/// Live subscriptions over the `centers` table. One shared listener on
/// `centers_changed` fans notifications out to every subscription; each subscription
/// runs its query once on subscribe and again after every notification, and delivers
/// each run as a full snapshot. Only the listener holds a connection for its whole
/// life; queries borrow one from the pool.
#[derive(Clone)]
pub struct PgCenterSource {
    pool: PgPool,
    changes: broadcast::Sender<ChangeSignal>,
}

impl PgCenterSource {
    /// connect
    ///
    /// Starts listening on `centers_changed` and returns the source. Fails when the
    /// listener connection cannot be opened.
    pub async fn connect(pool: PgPool) -> Result<Self, BackendError> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CENTERS_CHANNEL).await?;

        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        tokio::spawn(relay_changes(listener, changes.clone()));

        Ok(Self { pool, changes })
    }
}

impl CenterSource for PgCenterSource {
    fn subscribe(&self, query: CenterQuery) -> mpsc::Receiver<SnapshotEvent> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        // Subscribed before the first query runs, so no change is missed in between.
        let changes = self.changes.subscribe();
        tokio::spawn(watch_centers(self.pool.clone(), query, changes, tx));
        rx
    }
}

async fn relay_changes(mut listener: PgListener, changes: broadcast::Sender<ChangeSignal>) {
    loop {
        let signal = match listener.recv().await {
            Ok(_) => ChangeSignal::Changed,
            Err(e) => {
                tracing::error!("centers listener failed: {}", e);
                ChangeSignal::Failed(e.into())
            }
        };
        let failed = matches!(signal, ChangeSignal::Failed(_));

        // Having no subscriptions right now is fine.
        let _ = changes.send(signal);

        if failed {
            // The listener reconnects on the next `recv`.
            tokio::time::sleep(LISTENER_RETRY_DELAY).await;
        }
    }
}

async fn fetch_centers(pool: &PgPool, query: &CenterQuery) -> Result<Vec<Center>, BackendError> {
    let rows = match query {
        CenterQuery::AllOrderedByName => {
            sqlx::query_as::<_, CenterRow>("SELECT id, name, details FROM centers ORDER BY name")
                .fetch_all(pool)
                .await?
        }
        CenterQuery::ByIds(ids) => {
            sqlx::query_as::<_, CenterRow>(
                "SELECT id, name, details FROM centers WHERE id = ANY($1)",
            )
            .bind(ids.clone())
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(Center::from).collect())
}

async fn watch_centers(
    pool: PgPool,
    query: CenterQuery,
    mut changes: broadcast::Receiver<ChangeSignal>,
    tx: mpsc::Sender<SnapshotEvent>,
) {
    loop {
        let event = match fetch_centers(&pool, &query).await {
            Ok(centers) => SnapshotEvent::Snapshot(centers),
            Err(e) => SnapshotEvent::Error(e),
        };
        let terminal = matches!(event, SnapshotEvent::Error(_));
        if tx.send(event).await.is_err() || terminal {
            return;
        }

        let failure = tokio::select! {
            signal = changes.recv() => match signal {
                // Every run is a full snapshot, so missed signals collapse into one.
                Ok(ChangeSignal::Changed) | Err(RecvError::Lagged(_)) => None,
                Ok(ChangeSignal::Failed(e)) => Some(e),
                Err(RecvError::Closed) => {
                    Some(BackendError::Query("centers listener closed".to_string()))
                }
            },
            _ = tx.closed() => return,
        };

        if let Some(e) = failure {
            let _ = tx.send(SnapshotEvent::Error(e)).await;
            return;
        }
    }
}

// --- Mock Source ---

/// MockCenterSource
///
/// In-memory center source for tests. With a catalog, every subscription immediately
/// receives the matching snapshot; further events are pushed with [`Self::emit`].
#[derive(Default)]
pub struct MockCenterSource {
    catalog: Option<Vec<Center>>,
    subscriptions: Mutex<Vec<(CenterQuery, mpsc::Sender<SnapshotEvent>)>>,
}

impl MockCenterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Vec<Center>) -> Self {
        Self {
            catalog: Some(catalog),
            ..Self::default()
        }
    }

    /// Queries of every subscription opened so far, oldest first.
    pub fn queries(&self) -> Vec<CenterQuery> {
        self.subscriptions
            .lock()
            .iter()
            .map(|(query, _)| query.clone())
            .collect()
    }

    /// Delivers `event` on the most recent subscription. Returns `false` when there is
    /// none or its consumer is gone.
    pub async fn emit(&self, event: SnapshotEvent) -> bool {
        let latest = self.subscriptions.lock().len().checked_sub(1);
        match latest {
            Some(index) => self.emit_to(index, event).await,
            None => false,
        }
    }

    /// Delivers `event` on the `index`-th subscription ever opened.
    pub async fn emit_to(&self, index: usize, event: SnapshotEvent) -> bool {
        let sender = self
            .subscriptions
            .lock()
            .get(index)
            .map(|(_, sender)| sender.clone());
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    fn matching(&self, query: &CenterQuery) -> Option<Vec<Center>> {
        let catalog = self.catalog.as_ref()?;
        let centers = match query {
            CenterQuery::AllOrderedByName => {
                let mut all = catalog.clone();
                all.sort_by(|a, b| a.name.cmp(&b.name));
                all
            }
            CenterQuery::ByIds(ids) => catalog
                .iter()
                .filter(|center| ids.contains(&center.id))
                .cloned()
                .collect(),
        };
        Some(centers)
    }
}

impl CenterSource for MockCenterSource {
    fn subscribe(&self, query: CenterQuery) -> mpsc::Receiver<SnapshotEvent> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        if let Some(centers) = self.matching(&query) {
            // Fresh channel, the buffer has room.
            let _ = tx.try_send(SnapshotEvent::Snapshot(centers));
        }
        self.subscriptions.lock().push((query, tx));
        rx
    }
}
