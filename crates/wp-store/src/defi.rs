//! DeFi positions: the local cache, its reconciliation rules and the
//! signed deposit/withdraw/claim flows built on top of them.

use chrono::Utc;
use tracing::{debug, info};
use wp_api_types::{ClaimRequest, DefiStatsDto, DepositRequest, PositionPatch};
use wp_wallet_bridge::UnsignedTransaction;

use crate::convert;
use crate::error::StoreError;
use crate::model::{CurrentStore, DefiPool, DefiPosition, DefiPositionPatch};
use crate::notify::LocalizedText;
use crate::state::{AppState, LoadFlag};
use crate::store::AppStore;

const DEFAULT_POOL_ASSET: &str = "MIDEN";

impl AppStore {
    // ── local cache ──────────────────────────────────────────────────

    pub fn add_defi_position(&self, position: DefiPosition) -> Result<(), StoreError> {
        self.with_current_store(|store| {
            store.defi_positions.push(position);
            Ok(())
        })
    }

    pub fn update_defi_position(&self, pool_id: &str, patch: DefiPositionPatch) -> Result<(), StoreError> {
        self.with_current_store(|store| {
            let position = position_mut(store, pool_id)?;
            if let Some(amount) = patch.amount {
                position.amount = amount;
            }
            if let Some(value) = patch.value {
                position.value = value;
            }
            if let Some(rewards) = patch.rewards {
                position.rewards = rewards;
            }
            if patch.tx_hash.is_some() {
                position.tx_hash = patch.tx_hash;
            }
            Ok(())
        })
    }

    pub fn remove_defi_position(&self, pool_id: &str) -> Result<(), StoreError> {
        self.with_current_store(|store| {
            let index = store
                .defi_positions
                .iter()
                .position(|position| position.pool_id == pool_id)
                .ok_or_else(|| StoreError::PositionNotFound(pool_id.to_owned()))?;
            store.defi_positions.remove(index);
            Ok(())
        })
    }

    /// Adds to the pool's position, creating it with zero rewards.
    pub fn reconcile_deposit(&self, pool_id: &str, amount: f64, tx_hash: Option<String>) -> Result<(), StoreError> {
        require_positive(amount)?;
        let price = self.config.defi_asset_price;
        self.with_current_store(|store| {
            apply_deposit(store, pool_id, amount, price, tx_hash, None);
            Ok(())
        })
    }

    /// A position that drops to zero or below leaves the cache.
    pub fn reconcile_withdraw(&self, pool_id: &str, amount: f64) -> Result<(), StoreError> {
        require_positive(amount)?;
        let price = self.config.defi_asset_price;
        self.with_current_store(|store| apply_withdraw(store, pool_id, amount, price))
    }

    pub fn reconcile_claim(&self, pool_id: &str) -> Result<(), StoreError> {
        self.with_current_store(|store| {
            position_mut(store, pool_id)?.rewards = 0.0;
            Ok(())
        })
    }

    /// Any failure empties the cached positions.
    pub async fn load_defi_positions(&self, store_id: &str) -> Result<(), StoreError> {
        let Some(_guard) = self.begin_load(LoadFlag::DefiPositions) else {
            debug!(store_id, "defi positions already loading");
            return Ok(());
        };

        let result = self.backend.defi_positions(store_id).await;
        let positions: Vec<DefiPosition> = match &result {
            Ok(dtos) => dtos.iter().map(convert::position_from_dto).collect(),
            Err(_) => Vec::new(),
        };
        self.apply_to_store(store_id, |store| {
            store.defi_positions = positions;
            store.recompute_defi_value();
        });

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                self.load_failed(
                    "defi_positions",
                    LocalizedText::new("Failed to load DeFi positions", "Gagal memuat posisi DeFi"),
                    &err,
                );
                if err.is_rate_limited() { Ok(()) } else { Err(err.into()) }
            }
        }
    }

    pub async fn load_defi_pools(&self) -> Result<Vec<DefiPool>, StoreError> {
        let pools: Vec<DefiPool> = self.backend.defi_pools().await?.iter().map(convert::pool_from_dto).collect();
        let cached = pools.clone();
        self.update_transient(|state| state.defi_pools = cached);
        Ok(pools)
    }

    pub async fn load_defi_stats(&self) -> Result<DefiStatsDto, StoreError> {
        let store_id = self.require_store_id()?;
        Ok(self.backend.defi_stats(&store_id).await?)
    }

    // ── signed flows ─────────────────────────────────────────────────

    pub async fn deposit(&self, pool_id: &str, amount: f64) -> Result<DefiPosition, StoreError> {
        let store_id = self.require_context()?;
        require_positive(amount)?;

        let asset = self.read(|state| pool_asset(state, pool_id));
        let signed = self
            .sign_with_wallet(&UnsignedTransaction {
                to: pool_id.to_owned(),
                amount,
                asset,
                memo: Some("defi deposit".to_owned()),
            })
            .await?;

        let request = DepositRequest {
            store_id: store_id.clone(),
            pool_id: pool_id.to_owned(),
            amount,
            tx_hash: Some(signed.tx_hash.clone()),
        };
        let dto = match self.backend.defi_deposit(&request).await {
            Ok(dto) => dto,
            Err(err) => {
                return Err(self.write_failed(
                    "defi_deposit",
                    LocalizedText::new("Deposit failed", "Deposit gagal"),
                    err,
                ));
            }
        };

        let price = self.config.defi_asset_price;
        let mut deposited = None;
        self.apply_to_store(&store_id, |store| {
            deposited = Some(apply_deposit(
                store,
                pool_id,
                amount,
                price,
                Some(signed.tx_hash),
                Some(dto.id),
            ));
        });
        info!(pool_id, amount, "defi deposit recorded");
        self.notify_success(LocalizedText::new("Deposit successful", "Deposit berhasil"));
        deposited.ok_or(StoreError::NoCurrentStore)
    }

    pub async fn withdraw(&self, pool_id: &str, amount: f64) -> Result<(), StoreError> {
        self.require_context()?;
        require_positive(amount)?;

        let (position, recipient, asset) = self.read(|state| {
            (
                state.current_store.as_ref().and_then(|store| store.position(pool_id)).cloned(),
                state.current_store.as_ref().map(|store| store.wallet_address.clone()),
                pool_asset(state, pool_id),
            )
        });
        let position = position.ok_or_else(|| StoreError::PositionNotFound(pool_id.to_owned()))?;
        if amount > position.amount {
            return Err(StoreError::InvalidAmount(format!(
                "withdrawal {amount} exceeds position {}",
                position.amount
            )));
        }

        let signed = self
            .sign_with_wallet(&UnsignedTransaction {
                to: recipient.unwrap_or_default(),
                amount,
                asset,
                memo: Some(format!("defi withdraw {pool_id}")),
            })
            .await?;

        let remaining = position.amount - amount;
        if let Some(position_id) = position.id.as_deref() {
            let result = if remaining <= 0.0 {
                self.backend.delete_defi_position(position_id).await
            } else {
                let patch = PositionPatch {
                    amount: Some(remaining),
                    value: Some(remaining * self.config.defi_asset_price),
                    tx_hash: Some(signed.tx_hash.clone()),
                    ..PositionPatch::default()
                };
                self.backend.update_defi_position(position_id, &patch).await.map(drop)
            };
            if let Err(err) = result {
                return Err(self.write_failed(
                    "defi_withdraw",
                    LocalizedText::new("Withdrawal failed", "Penarikan gagal"),
                    err,
                ));
            }
        } else {
            debug!(pool_id, "position unknown to backend; reconciling locally");
        }

        self.reconcile_withdraw(pool_id, amount)?;
        info!(pool_id, amount, remaining, "defi withdrawal recorded");
        self.notify_success(LocalizedText::new("Withdrawal successful", "Penarikan berhasil"));
        Ok(())
    }

    /// Returns the claimed amount reported by the backend.
    pub async fn claim_rewards(&self, pool_id: &str) -> Result<f64, StoreError> {
        let store_id = self.require_context()?;
        let has_position = self.read(|state| {
            state
                .current_store
                .as_ref()
                .is_some_and(|store| store.position(pool_id).is_some())
        });
        if !has_position {
            return Err(StoreError::PositionNotFound(pool_id.to_owned()));
        }

        let request = ClaimRequest {
            store_id,
            pool_id: pool_id.to_owned(),
            tx_hash: None,
        };
        let response = match self.backend.defi_claim(&request).await {
            Ok(response) => response,
            Err(err) => {
                return Err(self.write_failed(
                    "defi_claim",
                    LocalizedText::new("Failed to claim rewards", "Gagal mengklaim hadiah"),
                    err,
                ));
            }
        };

        self.reconcile_claim(pool_id)?;
        self.notify_success(LocalizedText::new("Rewards claimed", "Hadiah berhasil diklaim"));
        Ok(response.claimed)
    }

    /// Runs `f` on the current store, then refreshes its DeFi total and
    /// activity stamp. Nothing is persisted when `f` fails.
    fn with_current_store(
        &self,
        f: impl FnOnce(&mut CurrentStore) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.mutate(|state| {
            let store = state.current_store.as_mut().ok_or(StoreError::NoCurrentStore)?;
            f(store)?;
            store.recompute_defi_value();
            store.touch();
            Ok(())
        })
    }
}

fn position_mut<'a>(store: &'a mut CurrentStore, pool_id: &str) -> Result<&'a mut DefiPosition, StoreError> {
    store
        .defi_positions
        .iter_mut()
        .find(|position| position.pool_id == pool_id)
        .ok_or_else(|| StoreError::PositionNotFound(pool_id.to_owned()))
}

fn apply_deposit(
    store: &mut CurrentStore,
    pool_id: &str,
    amount: f64,
    price: f64,
    tx_hash: Option<String>,
    backend_id: Option<String>,
) -> DefiPosition {
    let position = match store.defi_positions.iter_mut().find(|position| position.pool_id == pool_id) {
        Some(position) => {
            position.amount += amount;
            position.value = position.amount * price;
            if tx_hash.is_some() {
                position.tx_hash = tx_hash;
            }
            if position.id.is_none() {
                position.id = backend_id;
            }
            position.clone()
        }
        None => {
            let position = DefiPosition {
                id: backend_id,
                pool_id: pool_id.to_owned(),
                amount,
                value: amount * price,
                rewards: 0.0,
                timestamp: Utc::now(),
                tx_hash,
            };
            store.defi_positions.push(position.clone());
            position
        }
    };
    store.recompute_defi_value();
    store.touch();
    position
}

fn apply_withdraw(store: &mut CurrentStore, pool_id: &str, amount: f64, price: f64) -> Result<(), StoreError> {
    let position = position_mut(store, pool_id)?;
    position.amount -= amount;
    position.value = position.amount * price;
    if position.amount <= 0.0 {
        store.defi_positions.retain(|position| position.pool_id != pool_id);
    }
    Ok(())
}

fn pool_asset(state: &AppState, pool_id: &str) -> String {
    state
        .defi_pools
        .iter()
        .find(|pool| pool.id == pool_id)
        .map(|pool| pool.asset.clone())
        .filter(|asset| !asset.is_empty())
        .unwrap_or_else(|| DEFAULT_POOL_ASSET.to_owned())
}

fn require_positive(amount: f64) -> Result<(), StoreError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(StoreError::InvalidAmount(format!("amount {amount} must be positive")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::StoreError;
    use crate::model::{DefiPosition, DefiPositionPatch};
    use crate::testing::Harness;
    use wp_backend::ApiError;
    use wp_wallet_bridge::WalletError;

    fn local_position(pool_id: &str, amount: f64) -> DefiPosition {
        DefiPosition {
            id: None,
            pool_id: pool_id.into(),
            amount,
            value: amount,
            rewards: 1.5,
            timestamp: Utc::now(),
            tx_hash: None,
        }
    }

    #[tokio::test]
    async fn full_withdraw_removes_position() {
        let h = Harness::signed_in().await;
        h.store.add_defi_position(local_position("miden-stable", 10.0)).unwrap();

        h.store.reconcile_withdraw("miden-stable", 4.0).unwrap();
        assert_eq!(h.store.read(|state| state.defi_positions()[0].amount), 6.0);

        h.store.reconcile_withdraw("miden-stable", 6.0).unwrap();
        let store = h.store.current_store().unwrap();
        assert!(store.position("miden-stable").is_none());
        assert_eq!(store.total_defi_value, 0.0);
    }

    #[tokio::test]
    async fn deposit_reconciliation_accumulates() {
        let h = Harness::signed_in().await;
        h.store.reconcile_deposit("miden-lp", 5.0, Some("0x1".into())).unwrap();
        h.store.reconcile_deposit("miden-lp", 2.5, None).unwrap();

        let store = h.store.current_store().unwrap();
        let position = store.position("miden-lp").unwrap();
        assert_eq!(position.amount, 7.5);
        assert_eq!(position.rewards, 0.0);
        assert_eq!(position.tx_hash.as_deref(), Some("0x1"));
        assert_eq!(store.total_defi_value, 7.5);
    }

    #[tokio::test]
    async fn reconciliation_rejects_non_positive_amounts() {
        let h = Harness::signed_in().await;
        for amount in [-5.0, 0.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                h.store.reconcile_deposit("miden-lp", amount, None),
                Err(StoreError::InvalidAmount(_))
            ));
        }
        assert!(h.store.current_store().unwrap().position("miden-lp").is_none());

        h.store.add_defi_position(local_position("miden-stable", 3.0)).unwrap();
        assert!(matches!(
            h.store.reconcile_withdraw("miden-stable", -2.0),
            Err(StoreError::InvalidAmount(_))
        ));
        assert_eq!(h.store.read(|state| state.defi_positions()[0].amount), 3.0);
    }

    #[tokio::test]
    async fn concurrent_position_loads_share_one_request() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        let before = h.backend.calls("defi_positions");

        let (first, second) = tokio::join!(
            h.store.load_defi_positions(&store_id),
            h.store.load_defi_positions(&store_id)
        );
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(h.backend.calls("defi_positions") - before, 1);
    }

    #[tokio::test]
    async fn local_primitives_report_missing_pools() {
        let h = Harness::signed_in().await;
        assert_eq!(
            h.store.remove_defi_position("nope"),
            Err(StoreError::PositionNotFound("nope".into()))
        );

        h.store.add_defi_position(local_position("miden-stable", 3.0)).unwrap();
        h.store
            .update_defi_position("miden-stable", DefiPositionPatch {
                rewards: Some(9.0),
                ..DefiPositionPatch::default()
            })
            .unwrap();
        h.store.reconcile_claim("miden-stable").unwrap();
        assert_eq!(h.store.read(|state| state.defi_positions()[0].rewards), 0.0);
    }

    #[tokio::test]
    async fn failed_position_load_resets_to_empty() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        h.store.add_defi_position(local_position("miden-stable", 3.0)).unwrap();
        h.backend.fail("defi_positions", ApiError::Transport("offline".into()));

        assert!(h.store.load_defi_positions(&store_id).await.is_err());
        assert!(h.store.read(|state| state.defi_positions().is_empty()));
        assert_eq!(h.notifier.errors(), 1);
    }

    #[tokio::test]
    async fn signed_deposit_then_full_withdraw() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        h.store.connect_wallet().await?;

        let position = h.store.deposit("miden-stable", 10.0).await?;
        assert!(position.id.is_some());
        assert!(position.tx_hash.is_some());

        h.store.withdraw("miden-stable", 4.0).await?;
        assert_eq!(h.backend.calls("update_defi_position"), 1);
        h.store.withdraw("miden-stable", 6.0).await?;
        assert_eq!(h.backend.calls("delete_defi_position"), 1);
        assert!(h.store.read(|state| state.defi_positions().is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn claim_zeroes_rewards_without_signing() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        h.store.connect_wallet().await?;
        h.store.deposit("miden-lp", 5.0).await?;
        let signatures = h.bridge.signatures();

        let claimed = h.store.claim_rewards("miden-lp").await?;
        assert!(claimed >= 0.0);
        assert_eq!(h.bridge.signatures(), signatures);
        assert_eq!(h.store.read(|state| state.defi_positions()[0].rewards), 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn deposit_without_connected_wallet_is_rejected() {
        let h = Harness::signed_in().await;
        let result = h.store.deposit("miden-stable", 1.0).await;
        assert!(matches!(result, Err(StoreError::Wallet(WalletError::Rejected(_)))));
        assert_eq!(h.backend.calls("defi_deposit"), 0);
        assert!(matches!(h.store.deposit("miden-stable", -1.0).await, Err(StoreError::InvalidAmount(_))));
    }
}
