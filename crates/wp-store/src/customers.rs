//! Customer directory for the current store.

use wp_api_types::CustomerStatsDto;

use crate::convert;
use crate::error::StoreError;
use crate::model::Customer;
use crate::notify::LocalizedText;
use crate::store::AppStore;

impl AppStore {
    pub async fn load_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let store_id = self.require_store_id()?;
        let customers = match self.backend.list_customers(&store_id).await {
            Ok(dtos) => convert::customers_from_dtos(&dtos),
            Err(err) => {
                self.load_failed(
                    "customers",
                    LocalizedText::new("Failed to load customers", "Gagal memuat pelanggan"),
                    &err,
                );
                return Err(err.into());
            }
        };

        let cached = customers.clone();
        self.update_transient(|state| {
            if state.current_store_id() == Some(store_id.as_str()) {
                state.customers = cached;
            }
        });
        Ok(customers)
    }

    pub async fn create_customer(&self, customer: Customer) -> Result<Customer, StoreError> {
        let store_id = self.require_context()?;
        let dto = convert::customer_to_dto(&customer, Some(&store_id));
        let created = match self.backend.create_customer(&dto).await {
            Ok(created) => convert::customer_from_dto(&created),
            Err(err) => {
                return Err(self.write_failed(
                    "create_customer",
                    LocalizedText::new("Failed to add customer", "Gagal menambahkan pelanggan"),
                    err,
                ));
            }
        };

        let cached = created.clone();
        self.update_transient(|state| state.customers.push(cached));
        Ok(created)
    }

    pub async fn update_customer(&self, customer_id: &str, customer: Customer) -> Result<Customer, StoreError> {
        let store_id = self.require_context()?;
        let dto = convert::customer_to_dto(&customer, Some(&store_id));
        let updated = match self.backend.update_customer(customer_id, &dto).await {
            Ok(updated) => convert::customer_from_dto(&updated),
            Err(err) => {
                return Err(self.write_failed(
                    "update_customer",
                    LocalizedText::new("Failed to update customer", "Gagal memperbarui pelanggan"),
                    err,
                ));
            }
        };

        let cached = updated.clone();
        self.update_transient(|state| {
            match state
                .customers
                .iter_mut()
                .find(|entry| entry.id.as_deref() == Some(customer_id))
            {
                Some(entry) => *entry = cached,
                None => state.customers.push(cached),
            }
        });
        Ok(updated)
    }

    pub async fn delete_customer(&self, customer_id: &str) -> Result<(), StoreError> {
        self.require_context()?;
        if let Err(err) = self.backend.delete_customer(customer_id).await {
            return Err(self.write_failed(
                "delete_customer",
                LocalizedText::new("Failed to delete customer", "Gagal menghapus pelanggan"),
                err,
            ));
        }
        self.update_transient(|state| {
            state
                .customers
                .retain(|entry| entry.id.as_deref() != Some(customer_id))
        });
        Ok(())
    }

    pub async fn customer_stats(&self) -> Result<CustomerStatsDto, StoreError> {
        let store_id = self.require_store_id()?;
        Ok(self.backend.customer_stats(&store_id).await?)
    }

    pub async fn search_customers(&self, query: &str) -> Result<Vec<Customer>, StoreError> {
        let dtos = self.backend.search_customers(query).await?;
        Ok(convert::customers_from_dtos(&dtos))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Customer, NotificationChannel};
    use crate::testing::Harness;

    fn budi() -> Customer {
        Customer {
            id: None,
            name: "Budi".into(),
            phone: Some("0812000111".into()),
            email: None,
            preferred_notification: Some(NotificationChannel::Whatsapp),
        }
    }

    #[tokio::test]
    async fn customer_crud_keeps_cache_in_step() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        let created = h.store.create_customer(budi()).await?;
        let id = created.id.clone().expect("backend assigns an id");

        let renamed = h
            .store
            .update_customer(&id, Customer {
                name: "Budi Santoso".into(),
                ..created
            })
            .await?;
        assert_eq!(renamed.name, "Budi Santoso");

        let loaded = h.store.load_customers().await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(h.store.search_customers("santoso").await?.len(), 1);
        assert_eq!(h.store.customer_stats().await?.total_customers, 1);

        h.store.delete_customer(&id).await?;
        assert!(h.store.snapshot().customers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn customers_require_a_session() {
        let h = Harness::new();
        assert!(h.store.create_customer(budi()).await.is_err());
        assert_eq!(h.backend.calls("create_customer"), 0);
    }
}
