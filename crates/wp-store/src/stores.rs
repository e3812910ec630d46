//! Store initialization, switching, business profile and marketplace reads.

use tracing::{debug, info, warn};
use wp_api_types::StoreStatsDto;

use crate::convert;
use crate::error::StoreError;
use crate::model::{BusinessInfo, BusinessInfoPatch, MarketplaceStats, StoreSummary};
use crate::notify::LocalizedText;
use crate::store::AppStore;

impl AppStore {
    /// Fetches the wallet's store and makes it current. Falls back to a
    /// local default store so an authenticated session always has one.
    pub async fn initialize_store(&self, wallet_address: &str) {
        match self.backend.store_by_wallet(wallet_address).await {
            Ok(dto) => {
                let store = convert::store_from_dto(&dto);
                let store_id = store.store_id.clone();
                self.update(|state| state.install_store(store));
                info!(store_id = %store_id, "store initialized");
                self.refresh_store_collections(&store_id).await;
            }
            Err(err) => {
                warn!(wallet = wallet_address, error = %err, "store fetch failed; using local store");
                self.install_local_store(wallet_address);
            }
        }
    }

    /// Fetches first; on failure the previous store stays current.
    pub async fn switch_store(&self, wallet_address: &str) -> Result<(), StoreError> {
        let dto = match self.backend.store_by_wallet(wallet_address).await {
            Ok(dto) => dto,
            Err(err) => {
                warn!(wallet = wallet_address, error = %err, "store switch failed");
                self.notify_error(LocalizedText::new("Could not switch store", "Gagal berpindah toko"));
                return Err(err.into());
            }
        };

        let store = convert::store_from_dto(&dto);
        let store_id = store.store_id.clone();
        self.update(|state| {
            state.install_store(store);
            state.cart.clear();
        });
        self.refresh_store_collections(&store_id).await;
        Ok(())
    }

    pub(crate) async fn create_default_store(&self, wallet_address: &str) {
        let request = convert::default_store_request(wallet_address);
        match self.backend.create_store(&request).await {
            Ok(dto) => {
                let store = convert::store_from_dto(&dto);
                let store_id = store.store_id.clone();
                self.update(|state| state.install_store(store));
                info!(store_id = %store_id, "default store created");
                self.refresh_store_collections(&store_id).await;
            }
            Err(err) => {
                warn!(wallet = wallet_address, error = %err, "default store creation failed; using local store");
                self.install_local_store(wallet_address);
            }
        }
    }

    fn install_local_store(&self, wallet_address: &str) {
        let store = convert::local_default_store(wallet_address);
        self.update(|state| state.install_store(store));
    }

    /// Reloads every per-store collection. Resources load independently;
    /// failures have already been reported by the individual loaders.
    pub(crate) async fn refresh_store_collections(&self, store_id: &str) {
        let (products, transactions, positions, cart) = tokio::join!(
            self.load_products(store_id),
            self.load_transactions(store_id),
            self.load_defi_positions(store_id),
            self.load_cart(store_id),
        );
        for (resource, result) in [
            ("products", products),
            ("transactions", transactions),
            ("defi_positions", positions),
            ("cart", cart),
        ] {
            if let Err(err) = result {
                debug!(resource, error = %err, "collection refresh incomplete");
            }
        }
    }

    /// Write-through update of the current store's business profile.
    pub async fn update_business_info(&self, patch: BusinessInfoPatch) -> Result<BusinessInfo, StoreError> {
        let store_id = self.require_context()?;
        let request = convert::store_update_request(&patch);
        let dto = match self.backend.update_store(&store_id, &request).await {
            Ok(dto) => dto,
            Err(err) => {
                return Err(self.write_failed(
                    "update_store",
                    LocalizedText::new("Failed to save store settings", "Gagal menyimpan pengaturan toko"),
                    err,
                ));
            }
        };

        let info = convert::business_info_from_dto(&dto);
        let applied = info.clone();
        self.update(|state| {
            if let Some(store) = state.store_mut(&store_id) {
                store.business_info = applied.clone();
                store.touch();
                state.business_info = Some(applied);
            }
        });
        self.notify_success(LocalizedText::new("Store settings saved", "Pengaturan toko tersimpan"));
        Ok(info)
    }

    /// Bumps `last_active` locally and tells the backend, best effort.
    pub async fn touch_activity(&self) {
        let Some(store_id) = self.current_store_id() else {
            return;
        };
        self.apply_to_store(&store_id, |store| store.touch());
        if let Err(err) = self.backend.touch_store_activity(&store_id).await {
            debug!(store_id = %store_id, error = %err, "activity ping failed");
        }
    }

    pub async fn load_store_stats(&self) -> Result<StoreStatsDto, StoreError> {
        let store_id = self.require_store_id()?;
        Ok(self.backend.store_stats(&store_id).await?)
    }

    // ── marketplace ──────────────────────────────────────────────────

    pub async fn load_all_stores(&self) -> Result<Vec<StoreSummary>, StoreError> {
        let stores: Vec<StoreSummary> = match self.backend.marketplace_stores().await {
            Ok(dtos) => dtos.iter().map(convert::store_summary_from_dto).collect(),
            Err(err) => {
                self.load_failed(
                    "marketplace_stores",
                    LocalizedText::new("Failed to load stores", "Gagal memuat daftar toko"),
                    &err,
                );
                return Err(err.into());
            }
        };
        let cached = stores.clone();
        self.update(|state| state.all_stores = cached);
        Ok(stores)
    }

    /// Falls back to aggregating `all_stores` when the stats endpoint fails.
    pub async fn refresh_marketplace_stats(&self) -> MarketplaceStats {
        let stats = match self.backend.marketplace_stats().await {
            Ok(dto) => convert::marketplace_stats_from_dto(&dto),
            Err(err) => {
                debug!(error = %err, "marketplace stats unavailable; aggregating locally");
                self.read(|state| convert::aggregate_marketplace_stats(&state.all_stores))
            }
        };
        let cached = stats.clone();
        self.update(|state| state.marketplace_stats = Some(cached));
        stats
    }

    pub async fn search_marketplace(&self, query: &str) -> Result<Vec<StoreSummary>, StoreError> {
        let dtos = self.backend.marketplace_search(query).await?;
        Ok(dtos.iter().map(convert::store_summary_from_dto).collect())
    }

    pub async fn trending_stores(&self) -> Result<Vec<StoreSummary>, StoreError> {
        let dtos = self.backend.marketplace_trending().await?;
        Ok(dtos.iter().map(convert::store_summary_from_dto).collect())
    }

    pub async fn marketplace_categories(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.backend.marketplace_categories().await?)
    }
}
