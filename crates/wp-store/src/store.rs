use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, warn};
use wp_backend::{ApiError, BackendApi};
use wp_format::revive_dates;
use wp_storage::{AUTH_TOKEN_KEY, ClientStorage, MANUAL_CONNECT_KEY, SNAPSHOT_KEY, load_json, save_json};
use wp_wallet_bridge::WalletBridge;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{CurrentStore, WalletState};
use crate::notify::{LocalizedText, Notice, NoticeLevel, Notifier};
use crate::state::{AppState, ConnectionStatus, LoadFlag, PersistedSnapshot, View};

/// Collaborators injected into [`AppStore`].
pub struct StoreDeps {
    pub backend: Arc<dyn BackendApi>,
    pub storage: Arc<dyn ClientStorage>,
    /// Resolved once at startup; `None` when no extension is present.
    pub wallet_bridge: Option<Arc<dyn WalletBridge>>,
    pub notifier: Arc<dyn Notifier>,
}

/// The single application state container.
///
/// All mutation goes through action methods. No lock guard is ever held
/// across an `.await`, so concurrent actions interleave at await points and
/// readers always see a whole state.
pub struct AppStore {
    state: RwLock<AppState>,
    pub(crate) backend: Arc<dyn BackendApi>,
    pub(crate) storage: Arc<dyn ClientStorage>,
    pub(crate) wallet_bridge: Option<Arc<dyn WalletBridge>>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: StoreConfig,
}

impl AppStore {
    /// Builds a store and rehydrates the persisted snapshot, if any.
    pub fn new(deps: StoreDeps, config: StoreConfig) -> Self {
        let state = hydrate(deps.storage.as_ref());
        Self {
            state: RwLock::new(state),
            backend: deps.backend,
            storage: deps.storage,
            wallet_bridge: deps.wallet_bridge,
            notifier: deps.notifier,
            config,
        }
    }

    pub fn shared(deps: StoreDeps, config: StoreConfig) -> Arc<Self> {
        Arc::new(Self::new(deps, config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn has_wallet_bridge(&self) -> bool {
        self.wallet_bridge.is_some()
    }

    // ── reads ────────────────────────────────────────────────────────

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        let guard = self.read_guard();
        f(&*guard)
    }

    pub fn snapshot(&self) -> AppState {
        self.read(AppState::clone)
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(AppState::is_authenticated)
    }

    pub fn current_store(&self) -> Option<CurrentStore> {
        self.read(|state| state.current_store.clone())
    }

    pub fn current_store_id(&self) -> Option<String> {
        self.read(|state| state.current_store_id().map(str::to_owned))
    }

    pub fn wallet(&self) -> WalletState {
        self.read(|state| state.wallet.clone())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.read(|state| state.connection_status)
    }

    pub fn is_loading(&self, flag: LoadFlag) -> bool {
        self.read(|state| state.loading.is_loading(flag))
    }

    pub fn set_view(&self, view: View) {
        self.update(|state| state.current_view = view);
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Mutates state and writes the snapshot.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> R {
        let (result, snapshot) = {
            let mut guard = self.write_guard();
            let result = f(&mut *guard);
            (result, PersistedSnapshot::capture(&guard))
        };
        self.save_snapshot(&snapshot);
        result
    }

    /// Like [`Self::update`] but only persists when `f` succeeds.
    pub(crate) fn mutate<R>(
        &self,
        f: impl FnOnce(&mut AppState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let (result, snapshot) = {
            let mut guard = self.write_guard();
            let result = f(&mut *guard)?;
            (result, PersistedSnapshot::capture(&guard))
        };
        self.save_snapshot(&snapshot);
        Ok(result)
    }

    /// Mutates fields that are never persisted (flags, connection status).
    pub(crate) fn update_transient<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> R {
        let mut guard = self.write_guard();
        f(&mut *guard)
    }

    /// Applies `f` to the current store only if it is still `store_id`.
    /// Results for a store that has since been switched away are dropped.
    pub(crate) fn apply_to_store(&self, store_id: &str, f: impl FnOnce(&mut CurrentStore)) -> bool {
        self.update(|state| match state.store_mut(store_id) {
            Some(store) => {
                f(store);
                true
            }
            None => {
                debug!(store_id, "discarding result for a store that is no longer current");
                false
            }
        })
    }

    pub(crate) fn begin_load(&self, flag: LoadFlag) -> Option<LoadGuard<'_>> {
        let mut guard = self.write_guard();
        let slot = guard.loading.slot(flag);
        if *slot {
            return None;
        }
        *slot = true;
        Some(LoadGuard { store: self, flag })
    }

    // ── context checks ───────────────────────────────────────────────

    pub(crate) fn require_store_id(&self) -> Result<String, StoreError> {
        self.current_store_id().ok_or(StoreError::NoCurrentStore)
    }

    /// Authenticated session plus a current store.
    pub(crate) fn require_context(&self) -> Result<String, StoreError> {
        self.read(|state| {
            if !state.is_authenticated() {
                return Err(StoreError::NotAuthenticated);
            }
            state
                .current_store_id()
                .map(str::to_owned)
                .ok_or(StoreError::NoCurrentStore)
        })
    }

    // ── notifications ────────────────────────────────────────────────

    pub(crate) fn notify_success(&self, text: LocalizedText) {
        self.notifier.notify(Notice {
            level: NoticeLevel::Success,
            text,
        });
    }

    pub(crate) fn notify_error(&self, text: LocalizedText) {
        self.notifier.notify(Notice {
            level: NoticeLevel::Error,
            text,
        });
    }

    /// Write failure: notify, log, hand the error back for the caller.
    pub(crate) fn write_failed(&self, action: &str, text: LocalizedText, err: ApiError) -> StoreError {
        warn!(action, error = %err, "backend write failed");
        self.notify_error(text);
        StoreError::Api(err)
    }

    /// Read failure: notify unless the backend is rate limiting us.
    pub(crate) fn load_failed(&self, resource: &str, text: LocalizedText, err: &ApiError) {
        if err.is_rate_limited() {
            debug!(resource, "load rate limited");
            return;
        }
        warn!(resource, error = %err, "load failed");
        self.notify_error(text);
    }

    // ── durable storage ──────────────────────────────────────────────

    pub(crate) fn stored_token(&self) -> Option<String> {
        match self.storage.get_item(AUTH_TOKEN_KEY) {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                warn!("failed to read auth token: {}", err);
                None
            }
        }
    }

    pub(crate) fn store_token(&self, token: &str) {
        if let Err(err) = self.storage.set_item(AUTH_TOKEN_KEY, token) {
            warn!("failed to persist auth token: {}", err);
        }
    }

    /// Token and manual-connect preference always leave together.
    pub(crate) fn clear_credentials(&self) {
        for key in [AUTH_TOKEN_KEY, MANUAL_CONNECT_KEY] {
            if let Err(err) = self.storage.remove_item(key) {
                warn!("failed to remove {}: {}", key, err);
            }
        }
    }

    fn save_snapshot(&self, snapshot: &PersistedSnapshot) {
        if let Err(err) = save_json(self.storage.as_ref(), SNAPSHOT_KEY, snapshot) {
            warn!("failed to persist snapshot: {}", err);
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a loading flag when dropped, error paths included.
pub(crate) struct LoadGuard<'a> {
    store: &'a AppStore,
    flag: LoadFlag,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let flag = self.flag;
        self.store.update_transient(|state| *state.loading.slot(flag) = false);
    }
}

/// Reads the snapshot, revives its dates and falls back to a blank state
/// on anything unreadable.
fn hydrate(storage: &dyn ClientStorage) -> AppState {
    let raw = match load_json::<Value>(storage, SNAPSHOT_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return AppState::default(),
        Err(err) => {
            warn!("discarding unreadable snapshot: {}", err);
            return AppState::default();
        }
    };

    let mut raw = raw;
    revive_dates(&mut raw);
    match serde_json::from_value::<PersistedSnapshot>(raw) {
        Ok(snapshot) => {
            debug!(authenticated = snapshot.is_authenticated, "snapshot restored");
            snapshot.into_state()
        }
        Err(err) => {
            warn!("discarding snapshot with unexpected shape: {}", err);
            AppState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wp_storage::{AUTH_TOKEN_KEY, ClientStorage, SNAPSHOT_KEY};

    use crate::model::{NewProduct, NewTransaction, TransactionItem};
    use crate::state::{LoadFlag, View};
    use crate::testing::Harness;

    #[tokio::test]
    async fn reload_restores_dates_exactly() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        h.store
            .add_product(NewProduct {
                name: "Kopi".into(),
                price: 8_000.0,
                stock: 4,
                ..NewProduct::default()
            })
            .await?;
        let kopi = h.store.read(|state| state.products()[0].clone());
        h.store
            .add_transaction(NewTransaction {
                items: vec![TransactionItem {
                    product_id: kopi.id.clone(),
                    product_name: kopi.name.clone(),
                    quantity: 1,
                    price: kopi.price,
                    subtotal: kopi.price,
                }],
                total: kopi.price,
                ..NewTransaction::default()
            })
            .await?;
        h.store.set_view(View::Pos);
        let before = h.store.current_store().expect("store");
        let sold = &before.transactions[0];
        assert!(sold.created_at.is_some());

        let reloaded = h.reload();
        let after = reloaded.current_store().expect("store survives reload");
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.last_active, before.last_active);
        assert_eq!(after.products, before.products);
        assert_eq!(after.transactions[0].timestamp, sold.timestamp);
        assert_eq!(after.transactions[0].created_at, sold.created_at);
        assert_eq!(after.transactions, before.transactions);
        assert_eq!(reloaded.snapshot().current_view, View::Pos);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_snapshot_dates_become_now() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        let raw = h.storage.get_item(SNAPSHOT_KEY)?.expect("snapshot written");
        let mut snapshot: serde_json::Value = serde_json::from_str(&raw)?;
        snapshot["currentStore"]["lastActive"] = json!("not a date");
        h.storage.set_item(SNAPSHOT_KEY, &snapshot.to_string())?;

        let reloaded = h.reload();
        let store = reloaded.current_store().expect("store survives bad date");
        assert!(chrono::Utc::now() - store.last_active < chrono::Duration::seconds(5));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_snapshot_starts_blank() -> anyhow::Result<()> {
        let h = Harness::new();
        h.storage.set_item(SNAPSHOT_KEY, "{not json")?;
        assert!(!h.reload().is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn logout_leaves_nothing_behind() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        let product = h
            .store
            .add_product(NewProduct {
                name: "Kopi".into(),
                price: 8_000.0,
                stock: 4,
                ..NewProduct::default()
            })
            .await?;
        h.store.add_to_cart(&product, 1)?;
        h.store.connect_wallet().await?;
        h.store.load_all_stores().await?;

        h.store.logout();
        let state = h.store.snapshot();
        assert!(!state.is_authenticated());
        assert!(state.session.current_user.is_none());
        assert!(state.current_store.is_none());
        assert!(state.cart.is_empty());
        assert!(state.all_stores.is_empty());
        assert!(state.marketplace_stats.is_none());
        assert!(!state.wallet.is_connected);
        assert_eq!(h.storage.get_item(AUTH_TOKEN_KEY)?, None);
        assert!(!h.reload().is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn load_guard_releases_on_error() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        h.backend.fail("list_products", wp_backend::ApiError::Transport("reset".into()));

        assert!(h.store.load_products(&store_id).await.is_err());
        assert!(!h.store.is_loading(LoadFlag::Products));
    }
}
