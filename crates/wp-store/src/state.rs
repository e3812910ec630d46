use serde::{Deserialize, Serialize};

use crate::model::{
    BusinessInfo, CartItem, CurrentStore, Customer, DefiPool, DefiPosition, MarketplaceStats,
    Product, Session, StoreSummary, Transaction, User, WalletState,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Dashboard,
    Pos,
    Products,
    Transactions,
    Defi,
    Marketplace,
    Settings,
}

/// The one wallet connection state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFlag {
    Products,
    Cart,
    Transactions,
    DefiPositions,
    Auth,
}

/// In-flight markers, one per resource class (not per store).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    pub products: bool,
    pub cart: bool,
    pub transactions: bool,
    pub defi_positions: bool,
    pub auth: bool,
}

impl LoadingFlags {
    pub fn is_loading(&self, flag: LoadFlag) -> bool {
        match flag {
            LoadFlag::Products => self.products,
            LoadFlag::Cart => self.cart,
            LoadFlag::Transactions => self.transactions,
            LoadFlag::DefiPositions => self.defi_positions,
            LoadFlag::Auth => self.auth,
        }
    }

    pub(crate) fn slot(&mut self, flag: LoadFlag) -> &mut bool {
        match flag {
            LoadFlag::Products => &mut self.products,
            LoadFlag::Cart => &mut self.cart,
            LoadFlag::Transactions => &mut self.transactions,
            LoadFlag::DefiPositions => &mut self.defi_positions,
            LoadFlag::Auth => &mut self.auth,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub session: Session,
    pub current_store: Option<CurrentStore>,
    pub business_info: Option<BusinessInfo>,
    pub cart: Vec<CartItem>,
    pub wallet: WalletState,
    pub connection_status: ConnectionStatus,
    pub extension_available: bool,
    pub current_view: View,
    pub all_stores: Vec<StoreSummary>,
    pub marketplace_stats: Option<MarketplaceStats>,
    pub categories: Vec<String>,
    pub defi_pools: Vec<DefiPool>,
    pub customers: Vec<Customer>,
    pub loading: LoadingFlags,
}

impl AppState {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated
    }

    pub fn current_store_id(&self) -> Option<&str> {
        self.current_store.as_ref().map(|store| store.store_id.as_str())
    }

    pub fn products(&self) -> &[Product] {
        self.current_store
            .as_ref()
            .map(|store| store.products.as_slice())
            .unwrap_or_default()
    }

    pub fn transactions(&self) -> &[Transaction] {
        self.current_store
            .as_ref()
            .map(|store| store.transactions.as_slice())
            .unwrap_or_default()
    }

    pub fn defi_positions(&self) -> &[DefiPosition] {
        self.current_store
            .as_ref()
            .map(|store| store.defi_positions.as_slice())
            .unwrap_or_default()
    }

    /// Store whose id is `store_id`, if it is still the current one.
    pub(crate) fn store_mut(&mut self, store_id: &str) -> Option<&mut CurrentStore> {
        self.current_store.as_mut().filter(|store| store.store_id == store_id)
    }

    pub(crate) fn install_store(&mut self, store: CurrentStore) {
        self.business_info = Some(store.business_info.clone());
        self.current_store = Some(store);
        self.customers.clear();
    }

    /// Everything a session owns goes back to its default. Loading flags
    /// stay as they are; their guards release them.
    pub(crate) fn reset_session(&mut self) {
        let loading = std::mem::take(&mut self.loading);
        let extension_available = self.extension_available;
        let defi_pools = std::mem::take(&mut self.defi_pools);
        *self = Self {
            loading,
            extension_available,
            defi_pools,
            ..Self::default()
        };
    }
}

/// What survives a reload, stored under [`wp_storage::SNAPSHOT_KEY`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSnapshot {
    pub is_authenticated: bool,
    pub auth_token: Option<String>,
    pub current_user: Option<User>,
    pub current_store: Option<CurrentStore>,
    pub wallet: WalletState,
    pub current_view: View,
    pub business_info: Option<BusinessInfo>,
    pub all_stores: Vec<StoreSummary>,
    pub marketplace_stats: Option<MarketplaceStats>,
    pub cart: Vec<CartItem>,
}

impl PersistedSnapshot {
    pub fn capture(state: &AppState) -> Self {
        Self {
            is_authenticated: state.session.is_authenticated,
            auth_token: state.session.auth_token.clone(),
            current_user: state.session.current_user.clone(),
            current_store: state.current_store.clone(),
            wallet: state.wallet.clone(),
            current_view: state.current_view,
            business_info: state.business_info.clone(),
            all_stores: state.all_stores.clone(),
            marketplace_stats: state.marketplace_stats.clone(),
            cart: state.cart.clone(),
        }
    }

    pub fn into_state(self) -> AppState {
        let wallet = if self.wallet.is_consistent() {
            self.wallet
        } else {
            WalletState::default()
        };
        let connection_status = if wallet.is_connected {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };

        AppState {
            session: Session {
                is_authenticated: self.is_authenticated,
                auth_token: self.auth_token,
                current_user: self.current_user,
            },
            current_store: self.current_store,
            business_info: self.business_info,
            cart: self.cart,
            wallet,
            connection_status,
            current_view: self.current_view,
            all_stores: self.all_stores,
            marketplace_stats: self.marketplace_stats,
            ..AppState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_in_flight_markers() {
        let mut state = AppState::default();
        state.session.is_authenticated = true;
        state.loading.products = true;
        state.cart.clear();
        state.current_view = View::Pos;

        state.reset_session();
        assert!(!state.is_authenticated());
        assert!(state.loading.is_loading(LoadFlag::Products));
        assert_eq!(state.current_view, View::Dashboard);
    }

    #[test]
    fn inconsistent_wallet_snapshot_is_dropped() {
        let snapshot = PersistedSnapshot {
            wallet: WalletState {
                is_connected: true,
                address: Some(String::new()),
                ..WalletState::default()
            },
            ..PersistedSnapshot::default()
        };
        let state = snapshot.into_state();
        assert!(!state.wallet.is_connected);
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let json = serde_json::to_value(PersistedSnapshot::default()).unwrap();
        assert!(json.get("isAuthenticated").is_some());
        assert!(json.get("marketplaceStats").is_some());
        assert_eq!(json["currentView"], "dashboard");
    }
}
