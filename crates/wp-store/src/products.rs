//! Product catalog cache. Writes go to the backend first and the local
//! cache applies whatever canonical object comes back.

use tracing::debug;
use wp_api_types::{BulkStockRequest, ProductPatch, StockUpdate};
use wp_backend::ApiError;

use crate::convert;
use crate::error::StoreError;
use crate::model::{NewProduct, Product};
use crate::notify::LocalizedText;
use crate::state::LoadFlag;
use crate::store::AppStore;

impl AppStore {
    /// Guarded against re-entry; a 429 is swallowed.
    pub async fn load_products(&self, store_id: &str) -> Result<(), StoreError> {
        let Some(_guard) = self.begin_load(LoadFlag::Products) else {
            debug!(store_id, "products already loading");
            return Ok(());
        };

        match self.backend.list_products(store_id).await {
            Ok(dtos) => {
                let products: Vec<Product> = dtos.iter().map(convert::product_from_dto).collect();
                debug!(store_id, count = products.len(), "products loaded");
                self.apply_to_store(store_id, |store| store.products = products);
                Ok(())
            }
            Err(ApiError::RateLimited) => {
                debug!(store_id, "product load rate limited");
                Ok(())
            }
            Err(err) => {
                self.load_failed(
                    "products",
                    LocalizedText::new("Failed to load products", "Gagal memuat produk"),
                    &err,
                );
                Err(err.into())
            }
        }
    }

    /// Re-reads the catalog after a sale, since the backend owns stock
    /// levels. A failed read keeps the cached catalog and stays silent.
    pub(crate) async fn refresh_stock(&self, store_id: &str) {
        match self.backend.list_products(store_id).await {
            Ok(dtos) => {
                let products: Vec<Product> = dtos.iter().map(convert::product_from_dto).collect();
                self.apply_to_store(store_id, |store| store.products = products);
            }
            Err(err) => debug!(store_id, error = %err, "stock refresh failed; keeping cached catalog"),
        }
    }

    pub async fn add_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let store_id = self.require_store_id()?;
        let input = convert::product_input(&store_id, &product);
        let dto = match self.backend.create_product(&input).await {
            Ok(dto) => dto,
            Err(err) => {
                return Err(self.write_failed(
                    "create_product",
                    LocalizedText::new("Failed to add product", "Gagal menambahkan produk"),
                    err,
                ));
            }
        };

        let created = convert::product_from_dto(&dto);
        let cached = created.clone();
        self.apply_to_store(&store_id, |store| {
            store.products.push(cached);
            store.touch();
        });
        Ok(created)
    }

    pub async fn update_product(&self, product_id: &str, patch: ProductPatch) -> Result<Product, StoreError> {
        let store_id = self.require_store_id()?;
        let dto = match self.backend.update_product(product_id, &patch).await {
            Ok(dto) => dto,
            Err(err) => {
                return Err(self.write_failed(
                    "update_product",
                    LocalizedText::new("Failed to update product", "Gagal memperbarui produk"),
                    err,
                ));
            }
        };

        let updated = convert::product_from_dto(&dto);
        let cached = updated.clone();
        self.apply_to_store(&store_id, |store| {
            replace_product(&mut store.products, cached);
            store.touch();
        });
        Ok(updated)
    }

    pub async fn delete_product(&self, product_id: &str) -> Result<(), StoreError> {
        let store_id = self.require_store_id()?;
        if let Err(err) = self.backend.delete_product(product_id).await {
            return Err(self.write_failed(
                "delete_product",
                LocalizedText::new("Failed to delete product", "Gagal menghapus produk"),
                err,
            ));
        }

        self.apply_to_store(&store_id, |store| {
            store.products.retain(|product| product.id != product_id);
            store.touch();
        });
        Ok(())
    }

    pub async fn load_categories(&self) -> Result<Vec<String>, StoreError> {
        let categories = self.backend.product_categories().await?;
        let cached = categories.clone();
        self.update_transient(|state| state.categories = cached);
        Ok(categories)
    }

    /// Cache first, then the backend lookup. An unknown code is `None`.
    pub async fn find_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError> {
        let cached = self.read(|state| {
            state
                .products()
                .iter()
                .find(|product| product.barcode.as_deref() == Some(barcode))
                .cloned()
        });
        if cached.is_some() {
            return Ok(cached);
        }

        match self.backend.product_by_barcode(barcode).await {
            Ok(dto) => Ok(Some(convert::product_from_dto(&dto))),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn bulk_update_stock(&self, updates: Vec<StockUpdate>) -> Result<Vec<Product>, StoreError> {
        let store_id = self.require_store_id()?;
        let request = BulkStockRequest { updates };
        let dtos = match self.backend.bulk_update_stock(&request).await {
            Ok(dtos) => dtos,
            Err(err) => {
                return Err(self.write_failed(
                    "bulk_update_stock",
                    LocalizedText::new("Failed to update stock", "Gagal memperbarui stok"),
                    err,
                ));
            }
        };

        let updated: Vec<Product> = dtos.iter().map(convert::product_from_dto).collect();
        let cached = updated.clone();
        self.apply_to_store(&store_id, |store| {
            for product in cached {
                replace_product(&mut store.products, product);
            }
            store.touch();
        });
        Ok(updated)
    }
}

fn replace_product(products: &mut Vec<Product>, product: Product) {
    match products.iter_mut().find(|existing| existing.id == product.id) {
        Some(existing) => *existing = product,
        None => products.push(product),
    }
}

#[cfg(test)]
mod tests {
    use crate::model::NewProduct;
    use crate::testing::Harness;
    use wp_api_types::{ProductPatch, StockUpdate};
    use wp_backend::ApiError;

    fn kopi() -> NewProduct {
        NewProduct {
            name: "Kopi Susu".into(),
            price: 8_000.0,
            category: "Minuman".into(),
            stock: 10,
            barcode: Some("8991002101234".into()),
            ..NewProduct::default()
        }
    }

    #[tokio::test]
    async fn concurrent_loads_hit_the_backend_once() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        let before = h.backend.calls("list_products");

        let (first, second) = tokio::join!(h.store.load_products(&store_id), h.store.load_products(&store_id));
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(h.backend.calls("list_products") - before, 1);
        assert!(!h.store.is_loading(crate::LoadFlag::Products));
    }

    #[tokio::test]
    async fn failed_create_leaves_cache_untouched() {
        let h = Harness::signed_in().await;
        h.store.add_product(kopi()).await.unwrap();
        h.backend.fail("create_product", ApiError::Http {
            status: 500,
            message: "db down".into(),
        });

        let result = h.store.add_product(kopi()).await;
        assert!(matches!(result, Err(crate::StoreError::Api(ApiError::Http { status: 500, .. }))));
        assert_eq!(h.store.read(|state| state.products().len()), 1);
        assert_eq!(h.notifier.errors(), 1);
    }

    #[tokio::test]
    async fn rate_limited_load_is_silent() {
        let h = Harness::signed_in().await;
        let store_id = h.store.current_store_id().unwrap();
        h.backend.fail("list_products", ApiError::RateLimited);

        assert!(h.store.load_products(&store_id).await.is_ok());
        assert_eq!(h.notifier.errors(), 0);

        h.backend.fail("list_products", ApiError::Transport("reset".into()));
        assert!(h.store.load_products(&store_id).await.is_err());
        assert_eq!(h.notifier.errors(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_apply_canonical_results() {
        let h = Harness::signed_in().await;
        let product = h.store.add_product(kopi()).await.unwrap();

        let updated = h
            .store
            .update_product(&product.id, ProductPatch {
                price: Some(9_000.0),
                ..ProductPatch::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.price, 9_000.0);
        assert_eq!(h.store.read(|state| state.products()[0].price), 9_000.0);

        let restocked = h
            .store
            .bulk_update_stock(vec![StockUpdate {
                product_id: product.id.clone(),
                stock: 42,
            }])
            .await
            .unwrap();
        assert_eq!(restocked[0].stock, 42);

        h.store.delete_product(&product.id).await.unwrap();
        assert!(h.store.read(|state| state.products().is_empty()));
    }

    #[tokio::test]
    async fn barcode_lookup_prefers_cache() {
        let h = Harness::signed_in().await;
        h.store.add_product(kopi()).await.unwrap();

        let found = h.store.find_by_barcode("8991002101234").await.unwrap();
        assert_eq!(found.map(|product| product.name), Some("Kopi Susu".into()));
        assert_eq!(h.backend.calls("product_by_barcode"), 0);

        assert_eq!(h.store.find_by_barcode("0000").await.unwrap(), None);
        assert_eq!(h.backend.calls("product_by_barcode"), 1);
    }
}
