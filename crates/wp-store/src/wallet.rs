//! Wallet connection reconciliation and the background pollers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wp_storage::{MANUAL_CONNECT_KEY, read_flag};
use wp_wallet_bridge::{SignedTransaction, UnsignedTransaction, WalletBridge, WalletError};

use crate::error::StoreError;
use crate::model::WalletState;
use crate::notify::LocalizedText;
use crate::state::ConnectionStatus;
use crate::store::AppStore;

impl AppStore {
    /// User-initiated connect. On failure the wallet fields stay as they
    /// were and the status moves to `Error`.
    pub async fn connect_wallet(&self) -> Result<WalletState, StoreError> {
        let bridge = self.require_bridge()?;
        self.update_transient(|state| state.connection_status = ConnectionStatus::Connecting);

        let wallet = match bridge.connect().await {
            Ok(result) if result.success => result
                .address
                .as_deref()
                .and_then(|address| WalletState::connected(address, result.balance.unwrap_or(0.0)))
                .ok_or_else(|| WalletError::Rejected("wallet returned no address".to_owned())),
            Ok(_) => Err(WalletError::Rejected("connection was declined".to_owned())),
            Err(err) => Err(err),
        };
        let wallet = match wallet {
            Ok(wallet) => wallet,
            Err(err) => {
                warn!(bridge = bridge.name(), error = %err, "wallet connect failed");
                self.update_transient(|state| state.connection_status = ConnectionStatus::Error);
                self.notify_error(LocalizedText::new(
                    "Failed to connect wallet",
                    "Gagal menghubungkan dompet",
                ));
                return Err(err.into());
            }
        };

        self.install_wallet(wallet.clone());
        if let Err(err) = self.storage.set_item(MANUAL_CONNECT_KEY, "true") {
            warn!("failed to record manual-connect preference: {}", err);
        }
        info!(bridge = bridge.name(), "wallet connected");

        if !self.is_authenticated() {
            if let Some(address) = wallet.address.as_deref() {
                self.login(address).await;
            }
        }
        Ok(wallet)
    }

    /// Restores a connection the user made earlier. Without the stored
    /// preference this never connects.
    pub async fn auto_reconnect(&self) -> bool {
        if !read_flag(self.storage.as_ref(), MANUAL_CONNECT_KEY) {
            debug!("manual-connect preference not set; skipping auto reconnect");
            return false;
        }
        let Some(bridge) = self.wallet_bridge.clone() else {
            return false;
        };

        let data = match bridge.get_storage().await {
            Ok(result) if result.success => result.data,
            Ok(_) => None,
            Err(err) => {
                debug!(error = %err, "wallet storage unavailable");
                None
            }
        };
        let wallet = data.filter(|data| data.is_connected).and_then(|data| {
            data.address
                .as_deref()
                .and_then(|address| WalletState::connected(address, data.balance.unwrap_or(0.0)))
        });
        let Some(wallet) = wallet else {
            debug!("wallet reports no active connection");
            return false;
        };

        self.install_wallet(wallet);
        info!(bridge = bridge.name(), "wallet reconnected");
        true
    }

    /// Only the balance changes; nothing else about the wallet is touched.
    pub async fn refresh_balance(&self) -> Result<f64, StoreError> {
        if !self.read(|state| state.wallet.is_connected) {
            return Ok(0.0);
        }
        let bridge = self.require_bridge()?;

        let result = bridge.get_balance().await?;
        let Some(balance) = result.balance.filter(|balance| result.success && balance.is_finite()) else {
            debug!("balance query returned nothing");
            return Ok(self.read(|state| state.wallet.balance.main_asset));
        };
        self.update(|state| {
            if state.wallet.is_connected {
                state.wallet.balance.main_asset = balance;
            }
        });
        Ok(balance)
    }

    /// Forgets the wallet and ends the session. The extension itself is
    /// left connected.
    pub fn disconnect_wallet(&self) {
        self.update(|state| {
            state.wallet = WalletState::default();
            state.connection_status = ConnectionStatus::Disconnected;
        });
        if let Err(err) = self.storage.remove_item(MANUAL_CONNECT_KEY) {
            warn!("failed to clear manual-connect preference: {}", err);
        }
        self.logout();
    }

    pub fn set_extension_available(&self, available: bool) {
        self.update_transient(|state| state.extension_available = available);
    }

    pub(crate) async fn sign_with_wallet(&self, txn: &UnsignedTransaction) -> Result<SignedTransaction, StoreError> {
        let bridge = self.require_bridge()?;
        match bridge.sign_transaction(txn).await {
            Ok(signed) => {
                debug!(tx_hash = %signed.tx_hash, "transaction signed");
                Ok(signed)
            }
            Err(err) => {
                warn!(bridge = bridge.name(), error = %err, "signing failed");
                self.notify_error(LocalizedText::new(
                    "Wallet could not sign the transaction",
                    "Dompet gagal menandatangani transaksi",
                ));
                Err(err.into())
            }
        }
    }

    fn require_bridge(&self) -> Result<Arc<dyn WalletBridge>, StoreError> {
        match self.wallet_bridge.clone() {
            Some(bridge) => Ok(bridge),
            None => {
                self.notify_error(LocalizedText::new(
                    "Wallet extension not found",
                    "Ekstensi dompet tidak ditemukan",
                ));
                Err(WalletError::Unavailable.into())
            }
        }
    }

    fn install_wallet(&self, wallet: WalletState) {
        self.update(|state| {
            state.wallet = wallet;
            state.connection_status = ConnectionStatus::Connected;
        });
    }
}

/// Owns a background task; dropping the handle stops it.
#[derive(Debug)]
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl AppStore {
    /// Refreshes the balance every `interval` while a wallet is connected.
    /// The task ends on its own once the store is dropped.
    pub fn spawn_balance_poller(self: &Arc<Self>, interval: Duration) -> PollerHandle {
        let store = Arc::downgrade(self);
        PollerHandle {
            task: tokio::spawn(poll(store, interval, |store| async move {
                if !store.read(|state| state.wallet.is_connected) {
                    return;
                }
                if let Err(err) = store.refresh_balance().await {
                    debug!(error = %err, "balance poll failed");
                }
            })),
        }
    }

    /// Re-checks bridge availability every `interval`.
    pub fn spawn_extension_watch(self: &Arc<Self>, interval: Duration) -> PollerHandle {
        let store = Arc::downgrade(self);
        PollerHandle {
            task: tokio::spawn(poll(store, interval, |store| async move {
                let available = store
                    .wallet_bridge
                    .as_ref()
                    .is_some_and(|bridge| bridge.is_available());
                store.set_extension_available(available);
            })),
        }
    }
}

async fn poll<F, Fut>(store: Weak<AppStore>, interval: Duration, tick: F)
where
    F: Fn(Arc<AppStore>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
            debug!("store dropped; poller exiting");
            return;
        };
        tick(store).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::StoreError;
    use crate::state::ConnectionStatus;
    use crate::testing::Harness;
    use wp_storage::{ClientStorage, MANUAL_CONNECT_KEY};
    use wp_wallet_bridge::WalletError;

    #[tokio::test]
    async fn connect_logs_in_and_records_preference() -> anyhow::Result<()> {
        let h = Harness::new();
        let wallet = h.store.connect_wallet().await?;

        assert!(wallet.is_connected);
        assert_eq!(h.store.connection_status(), ConnectionStatus::Connected);
        assert_eq!(h.storage.get_item(MANUAL_CONNECT_KEY)?.as_deref(), Some("true"));
        assert!(h.store.is_authenticated());
        assert_eq!(
            h.store.current_store().map(|store| store.wallet_address),
            wallet.address
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_bridge_fails_without_touching_wallet() {
        let h = Harness::without_bridge();
        let result = h.store.connect_wallet().await;
        assert_eq!(result.unwrap_err(), StoreError::Wallet(WalletError::Unavailable));
        assert!(!h.store.wallet().is_connected);
        assert_eq!(h.notifier.errors(), 1);
    }

    #[tokio::test]
    async fn auto_reconnect_needs_the_preference() -> anyhow::Result<()> {
        let h = Harness::new();
        h.store.connect_wallet().await?;
        h.storage.remove_item(MANUAL_CONNECT_KEY)?;

        let fresh = h.reload();
        assert!(!fresh.auto_reconnect().await);

        h.storage.set_item(MANUAL_CONNECT_KEY, "true")?;
        assert!(fresh.auto_reconnect().await);
        assert_eq!(fresh.connection_status(), ConnectionStatus::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_never_calls_the_bridge() -> anyhow::Result<()> {
        let h = Harness::new();
        h.store.connect_wallet().await?;

        h.store.disconnect_wallet();
        assert_eq!(h.bridge.disconnects(), 0);
        assert!(!h.store.wallet().is_connected);
        assert!(!h.store.is_authenticated());
        assert_eq!(h.storage.get_item(MANUAL_CONNECT_KEY)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn balance_refresh_only_touches_balance() -> anyhow::Result<()> {
        let h = Harness::new();
        let before = h.store.connect_wallet().await?;
        h.store.refresh_balance().await?;

        let after = h.store.wallet();
        assert_eq!(after.address, before.address);
        assert_eq!(after.provider, before.provider);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn extension_watch_updates_availability_until_dropped() {
        let h = Harness::new();
        let handle = h.store.spawn_extension_watch(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(h.store.snapshot().extension_available);

        h.store.set_extension_available(false);
        drop(handle);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!h.store.snapshot().extension_available);
    }
}
