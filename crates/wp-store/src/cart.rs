//! The cart is local state. The backend copy is mirrored best effort and
//! only read back to restore a cart on store load.

use tracing::{debug, warn};
use uuid::Uuid;
use wp_api_types::CartItemInput;

use crate::convert;
use crate::error::StoreError;
use crate::model::{CartItem, Product, TransactionItem};
use crate::state::{AppState, LoadFlag};
use crate::store::AppStore;

impl AppStore {
    /// Adds `quantity` units. A product already in the cart keeps its line
    /// and its effective price; only the quantity grows.
    pub fn add_to_cart(&self, product: &Product, quantity: u32) -> Result<(), StoreError> {
        if quantity == 0 {
            return Err(StoreError::InvalidAmount("quantity must be at least 1".into()));
        }
        self.require_context()?;

        self.mutate(|state| {
            let available = available_stock(state, product);
            match state.cart.iter_mut().find(|item| item.product.id == product.id) {
                Some(item) => {
                    let requested = item.quantity.saturating_add(quantity);
                    check_stock(&product.id, requested, available)?;
                    item.quantity = requested;
                    item.recompute();
                }
                None => {
                    check_stock(&product.id, quantity, available)?;
                    let mut item = CartItem {
                        id: Uuid::new_v4().to_string(),
                        product: product.clone(),
                        quantity,
                        unit_price: Some(product.price),
                        subtotal: 0.0,
                    };
                    item.recompute();
                    state.cart.push(item);
                }
            }
            Ok(())
        })
    }

    /// Zero removes the line.
    pub fn update_cart_item(&self, product_id: &str, quantity: u32) -> Result<(), StoreError> {
        self.require_context()?;
        if quantity == 0 {
            return self.remove_from_cart(product_id);
        }

        self.mutate(|state| {
            let index = cart_index(state, product_id)?;
            let available = available_stock(state, &state.cart[index].product);
            check_stock(product_id, quantity, available)?;
            let item = &mut state.cart[index];
            item.quantity = quantity;
            item.recompute();
            Ok(())
        })
    }

    /// Negative and non-finite prices clamp to zero.
    pub fn update_cart_item_price(&self, product_id: &str, unit_price: f64) -> Result<(), StoreError> {
        self.require_context()?;
        let unit_price = if unit_price.is_finite() { unit_price.max(0.0) } else { 0.0 };

        self.mutate(|state| {
            let index = cart_index(state, product_id)?;
            let item = &mut state.cart[index];
            item.unit_price = Some(unit_price);
            item.recompute();
            Ok(())
        })
    }

    pub fn remove_from_cart(&self, product_id: &str) -> Result<(), StoreError> {
        self.require_context()?;
        self.mutate(|state| {
            let index = cart_index(state, product_id)?;
            state.cart.remove(index);
            Ok(())
        })
    }

    /// Empties the local cart, then the backend copy so a later
    /// [`Self::load_cart`] cannot bring the lines back.
    pub async fn clear_cart(&self) -> Result<(), StoreError> {
        let store_id = self.require_context()?;
        self.update(|state| state.cart.clear());
        self.clear_backend_cart(&store_id).await;
        Ok(())
    }

    pub fn cart_total(&self) -> f64 {
        self.read(|state| {
            state
                .cart
                .iter()
                .map(|item| item.subtotal)
                .filter(|subtotal| subtotal.is_finite())
                .sum()
        })
    }

    pub fn cart_item_count(&self) -> u32 {
        self.read(|state| state.cart.iter().map(|item| item.quantity).sum())
    }

    /// Mirrors the local cart to the backend. Advisory only: failures are
    /// logged and never surface.
    pub async fn sync_cart_to_database(&self) {
        let Some((store_id, items)) = self.read(|state| {
            state
                .current_store_id()
                .map(|store_id| (store_id.to_owned(), state.cart.clone()))
        }) else {
            return;
        };

        if let Err(err) = self.backend.clear_cart(&store_id).await {
            warn!(store_id = %store_id, error = %err, "cart sync: clear failed");
            return;
        }
        for item in &items {
            let input = CartItemInput {
                product_id: item.product.id.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            };
            if let Err(err) = self.backend.add_cart_item(&store_id, &input).await {
                warn!(store_id = %store_id, product_id = %item.product.id, error = %err, "cart sync: item failed");
            }
        }
        debug!(store_id = %store_id, lines = items.len(), "cart synced");
    }

    /// Takes the sold quantities out of the cart. Lines added while the
    /// sale was in flight stay, and the backend cart follows what is left.
    pub(crate) async fn remove_sold_items(&self, store_id: &str, sold: &[TransactionItem]) {
        let remaining = self.update(|state| {
            if state.current_store_id() != Some(store_id) {
                return None;
            }
            for item in sold {
                if let Some(line) = state.cart.iter_mut().find(|line| line.product.id == item.product_id) {
                    line.quantity = line.quantity.saturating_sub(item.quantity);
                    line.recompute();
                }
            }
            state.cart.retain(|line| line.quantity > 0);
            Some(state.cart.len())
        });

        match remaining {
            Some(0) => self.clear_backend_cart(store_id).await,
            Some(_) => self.sync_cart_to_database().await,
            None => debug!(store_id, "store changed during checkout; cart left alone"),
        }
    }

    async fn clear_backend_cart(&self, store_id: &str) {
        if let Err(err) = self.backend.clear_cart(store_id).await {
            warn!(store_id, error = %err, "backend cart clear failed");
        }
    }

    /// Restores the backend cart. An empty backend cart never overwrites
    /// a non-empty local one.
    pub async fn load_cart(&self, store_id: &str) -> Result<(), StoreError> {
        let Some(_guard) = self.begin_load(LoadFlag::Cart) else {
            debug!(store_id, "cart already loading");
            return Ok(());
        };

        let dtos = match self.backend.list_cart(store_id).await {
            Ok(dtos) => dtos,
            Err(err) => {
                debug!(store_id, error = %err, "cart load failed; keeping local cart");
                return Err(err.into());
            }
        };
        if dtos.is_empty() {
            return Ok(());
        }

        let items: Vec<CartItem> = dtos.iter().map(convert::cart_item_from_dto).collect();
        self.update(|state| {
            if state.current_store_id() == Some(store_id) {
                state.cart = items;
            }
        });
        Ok(())
    }
}

fn cart_index(state: &AppState, product_id: &str) -> Result<usize, StoreError> {
    state
        .cart
        .iter()
        .position(|item| item.product.id == product_id)
        .ok_or_else(|| StoreError::ProductNotInCart(product_id.to_owned()))
}

/// The cached catalog entry wins over the cart's snapshot.
fn available_stock(state: &AppState, product: &Product) -> u32 {
    state
        .current_store
        .as_ref()
        .and_then(|store| store.product(&product.id))
        .map_or(product.stock, |cached| cached.stock)
}

fn check_stock(product_id: &str, requested: u32, available: u32) -> Result<(), StoreError> {
    if requested > available {
        return Err(StoreError::InsufficientStock {
            product_id: product_id.to_owned(),
            requested,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::model::{NewProduct, Product};
    use crate::testing::Harness;

    async fn stocked(h: &Harness, name: &str, price: f64, stock: u32) -> Product {
        h.store
            .add_product(NewProduct {
                name: name.into(),
                price,
                stock,
                ..NewProduct::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn subtotals_follow_quantity_and_price() {
        let h = Harness::signed_in().await;
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;
        let teh = stocked(&h, "Teh", 5_000.0, 10).await;

        h.store.add_to_cart(&kopi, 2).unwrap();
        h.store.add_to_cart(&teh, 3).unwrap();
        for item in h.store.snapshot().cart {
            assert_eq!(item.subtotal, f64::from(item.quantity) * item.effective_unit_price());
        }
        assert_eq!(h.store.cart_total(), 31_000.0);
        assert_eq!(h.store.cart_item_count(), 5);
    }

    #[tokio::test]
    async fn re_adding_merges_into_one_line() {
        let h = Harness::signed_in().await;
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;

        h.store.add_to_cart(&kopi, 2).unwrap();
        h.store.add_to_cart(&kopi, 3).unwrap();
        let cart = h.store.snapshot().cart;
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].quantity, 5);
        assert_eq!(cart[0].subtotal, 40_000.0);
    }

    #[tokio::test]
    async fn price_override_survives_quantity_changes() {
        let h = Harness::signed_in().await;
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;

        h.store.add_to_cart(&kopi, 1).unwrap();
        h.store.update_cart_item_price(&kopi.id, 6_500.0).unwrap();
        h.store.update_cart_item(&kopi.id, 4).unwrap();
        h.store.add_to_cart(&kopi, 1).unwrap();

        let item = &h.store.snapshot().cart[0];
        assert_eq!(item.unit_price, Some(6_500.0));
        assert_eq!(item.subtotal, 32_500.0);
    }

    #[tokio::test]
    async fn prices_clamp_and_zero_quantity_removes() {
        let h = Harness::signed_in().await;
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;
        h.store.add_to_cart(&kopi, 2).unwrap();

        h.store.update_cart_item_price(&kopi.id, -50.0).unwrap();
        assert_eq!(h.store.cart_total(), 0.0);
        h.store.update_cart_item_price(&kopi.id, f64::NAN).unwrap();
        assert_eq!(h.store.snapshot().cart[0].unit_price, Some(0.0));

        h.store.update_cart_item(&kopi.id, 0).unwrap();
        assert!(h.store.snapshot().cart.is_empty());
        assert!(matches!(
            h.store.update_cart_item(&kopi.id, 1),
            Err(StoreError::ProductNotInCart(_))
        ));
    }

    #[tokio::test]
    async fn stock_is_enforced() {
        let h = Harness::signed_in().await;
        let kopi = stocked(&h, "Kopi", 8_000.0, 3).await;

        h.store.add_to_cart(&kopi, 2).unwrap();
        let err = h.store.add_to_cart(&kopi, 2).unwrap_err();
        assert_eq!(err, StoreError::InsufficientStock {
            product_id: kopi.id.clone(),
            requested: 4,
            available: 3,
        });
        assert!(h.store.update_cart_item(&kopi.id, 9).is_err());
        assert_eq!(h.store.snapshot().cart[0].quantity, 2);
        assert!(matches!(h.store.add_to_cart(&kopi, 0), Err(StoreError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn cart_requires_a_session() {
        let h = Harness::new();
        let product = Product {
            id: "p1".into(),
            name: "Kopi".into(),
            localized_name: None,
            price: 1.0,
            buy_price: None,
            category: String::new(),
            image: None,
            stock: 1,
            barcode: None,
            created_at: None,
            updated_at: None,
        };
        assert_eq!(h.store.add_to_cart(&product, 1), Err(StoreError::NotAuthenticated));
        assert_eq!(h.store.clear_cart().await, Err(StoreError::NotAuthenticated));
    }

    #[tokio::test]
    async fn sync_mirrors_lines_and_load_restores_them() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;
        h.store.add_to_cart(&kopi, 2).unwrap();
        h.store.update_cart_item_price(&kopi.id, 7_000.0).unwrap();

        h.store.sync_cart_to_database().await;
        h.store.remove_from_cart(&kopi.id).unwrap();
        h.store.load_cart(&store_id).await.unwrap();

        let cart = h.store.snapshot().cart;
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].quantity, 2);
        assert_eq!(cart[0].subtotal, 14_000.0);
    }

    #[tokio::test]
    async fn cleared_cart_stays_empty_after_load() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;
        h.store.add_to_cart(&kopi, 2).unwrap();
        h.store.sync_cart_to_database().await;

        h.store.clear_cart().await.unwrap();
        h.store.load_cart(&store_id).await.unwrap();
        assert!(h.store.snapshot().cart.is_empty());

        let reloaded = h.reload();
        reloaded.initialize_auth().await;
        assert!(reloaded.snapshot().cart.is_empty());
    }

    #[tokio::test]
    async fn concurrent_cart_loads_share_one_request() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        let before = h.backend.calls("list_cart");

        let (first, second) = tokio::join!(h.store.load_cart(&store_id), h.store.load_cart(&store_id));
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(h.backend.calls("list_cart") - before, 1);
    }

    #[tokio::test]
    async fn failed_sync_is_silent() {
        let h = Harness::signed_in().await;
        let kopi = stocked(&h, "Kopi", 8_000.0, 10).await;
        h.store.add_to_cart(&kopi, 1).unwrap();
        h.backend.fail("clear_cart", wp_backend::ApiError::Transport("offline".into()));

        h.store.sync_cart_to_database().await;
        assert_eq!(h.notifier.errors(), 0);
        assert_eq!(h.store.snapshot().cart.len(), 1);
    }
}
