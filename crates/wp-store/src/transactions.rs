//! Transaction history and checkout.

use std::collections::HashMap;

use tracing::{debug, info};
use wp_api_types::{ReceiptPatch, StatusPatch, TransactionDto, TransactionStatsDto};
use wp_backend::ApiResult;
use wp_wallet_bridge::UnsignedTransaction;

use crate::convert;
use crate::error::StoreError;
use crate::model::{
    CheckoutRequest, NewTransaction, PaymentDetails, PaymentMethod, PaymentStatus, Product,
    Transaction, TransactionItem,
};
use crate::notify::LocalizedText;
use crate::state::LoadFlag;
use crate::store::AppStore;

impl AppStore {
    /// Records a sale. Stock is checked against the cached catalog before
    /// any request goes out.
    pub async fn add_transaction(&self, data: NewTransaction) -> Result<Transaction, StoreError> {
        let store_id = self.require_context()?;
        self.read(|state| check_items_in_stock(state.products(), &data.items))?;

        let request = convert::transaction_request(&store_id, &data);
        let dto = match self.backend.create_transaction(&request).await {
            Ok(dto) => dto,
            Err(err) => {
                return Err(self.write_failed(
                    "create_transaction",
                    LocalizedText::new("Failed to save transaction", "Gagal menyimpan transaksi"),
                    err,
                ));
            }
        };

        let transaction = convert::transaction_from_dto(&dto);
        let recorded = transaction.clone();
        self.apply_to_store(&store_id, |store| {
            if recorded.payment_status == PaymentStatus::Completed {
                store.total_earnings += recorded.total;
            }
            store.transactions.insert(0, recorded);
            store.touch();
        });
        info!(transaction_id = %transaction.id, total = transaction.total, "transaction recorded");
        if transaction.payment_status != PaymentStatus::Failed {
            self.refresh_stock(&store_id).await;
        }
        Ok(transaction)
    }

    /// Keeps the last known history when the request fails.
    pub async fn load_transactions(&self, store_id: &str) -> Result<(), StoreError> {
        let Some(_guard) = self.begin_load(LoadFlag::Transactions) else {
            debug!(store_id, "transactions already loading");
            return Ok(());
        };

        match self.backend.list_transactions(store_id).await {
            Ok(dtos) => {
                let transactions: Vec<Transaction> = dtos.iter().map(convert::transaction_from_dto).collect();
                debug!(store_id, count = transactions.len(), "transactions loaded");
                self.apply_to_store(store_id, |store| store.transactions = transactions);
                Ok(())
            }
            Err(err) => {
                self.load_failed(
                    "transactions",
                    LocalizedText::new("Failed to load transactions", "Gagal memuat transaksi"),
                    &err,
                );
                if err.is_rate_limited() { Ok(()) } else { Err(err.into()) }
            }
        }
    }

    pub async fn update_transaction_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<Transaction, StoreError> {
        let store_id = self.require_store_id()?;
        let patch = StatusPatch {
            payment_status: convert::payment_status_to_backend(status),
        };
        let result = self.backend.update_transaction_status(transaction_id, &patch).await;
        self.apply_transaction_patch(
            &store_id,
            result,
            "update_transaction_status",
            LocalizedText::new("Failed to update payment status", "Gagal memperbarui status pembayaran"),
        )
    }

    pub async fn mark_receipt_sent(&self, transaction_id: &str) -> Result<Transaction, StoreError> {
        let store_id = self.require_store_id()?;
        let patch = ReceiptPatch { receipt_sent: true };
        let result = self.backend.update_transaction_receipt(transaction_id, &patch).await;
        self.apply_transaction_patch(
            &store_id,
            result,
            "update_transaction_receipt",
            LocalizedText::new("Failed to update receipt", "Gagal memperbarui struk"),
        )
    }

    pub async fn load_transaction_stats(&self) -> Result<TransactionStatsDto, StoreError> {
        let store_id = self.require_store_id()?;
        Ok(self.backend.transaction_stats(&store_id).await?)
    }

    /// Turns the cart into a recorded sale. Once the sale completes the sold
    /// quantities leave the cart, locally and on the backend.
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Transaction, StoreError> {
        let store_id = self.require_context()?;
        let (items, total, receiving_wallet) = self.read(|state| {
            let items: Vec<TransactionItem> = state.cart.iter().map(TransactionItem::from).collect();
            let total: f64 = items.iter().map(|item| item.subtotal).filter(|s| s.is_finite()).sum();
            let receiving_wallet = state
                .business_info
                .as_ref()
                .and_then(|info| info.wallet_address.clone())
                .or_else(|| state.current_store.as_ref().map(|store| store.wallet_address.clone()));
            (items, total, receiving_wallet)
        });
        if items.is_empty() {
            return Err(StoreError::EmptyCart);
        }
        self.read(|state| check_items_in_stock(state.products(), &items))?;
        validate_payment(&request.payment, total)?;
        self.sync_cart_to_database().await;

        let mut data = NewTransaction {
            items,
            total,
            customer: request.customer,
            ..NewTransaction::default()
        };
        match request.payment {
            PaymentDetails::Cash { tendered } => {
                data.payment_method = PaymentMethod::Cash;
                data.change = Some(tendered - total);
            }
            PaymentDetails::Card { card_info } => {
                data.payment_method = PaymentMethod::Card;
                data.card_info = card_info;
            }
            PaymentDetails::Crypto { currency, amount } => {
                let to = receiving_wallet.ok_or(StoreError::NoCurrentStore)?;
                let signed = self
                    .sign_with_wallet(&UnsignedTransaction {
                        to,
                        amount,
                        asset: currency.clone(),
                        memo: Some(format!("WarungPay sale {total}")),
                    })
                    .await?;
                data.payment_method = PaymentMethod::Crypto;
                data.tx_hash = Some(signed.tx_hash);
                data.crypto_currency = Some(currency);
                data.crypto_amount = Some(amount);
            }
        }

        let sold = data.items.clone();
        let transaction = self.add_transaction(data).await?;
        if transaction.payment_status == PaymentStatus::Completed {
            self.remove_sold_items(&store_id, &sold).await;
        }
        self.notify_success(LocalizedText::new("Payment recorded", "Pembayaran tercatat"));
        Ok(transaction)
    }

    fn apply_transaction_patch(
        &self,
        store_id: &str,
        result: ApiResult<TransactionDto>,
        action: &str,
        text: LocalizedText,
    ) -> Result<Transaction, StoreError> {
        let dto = result.map_err(|err| self.write_failed(action, text, err))?;
        let transaction = convert::transaction_from_dto(&dto);
        let replacement = transaction.clone();
        self.apply_to_store(store_id, |store| {
            let Some(existing) = store.transactions.iter_mut().find(|t| t.id == replacement.id) else {
                return;
            };
            if existing.payment_status != PaymentStatus::Completed
                && replacement.payment_status == PaymentStatus::Completed
            {
                store.total_earnings += replacement.total;
            }
            *existing = replacement;
            store.touch();
        });
        Ok(transaction)
    }
}

fn validate_payment(payment: &PaymentDetails, total: f64) -> Result<(), StoreError> {
    match payment {
        PaymentDetails::Cash { tendered } if !tendered.is_finite() || *tendered < total => Err(
            StoreError::InvalidAmount(format!("tendered {tendered} does not cover total {total}")),
        ),
        PaymentDetails::Crypto { amount, .. } if !amount.is_finite() || *amount <= 0.0 => {
            Err(StoreError::InvalidAmount(format!("crypto amount {amount}")))
        }
        _ => Ok(()),
    }
}

/// Quantities are summed per product before comparing against stock.
/// Products missing from the cache are left for the backend to judge.
fn check_items_in_stock(products: &[Product], items: &[TransactionItem]) -> Result<(), StoreError> {
    let mut requested: HashMap<&str, u32> = HashMap::new();
    for item in items {
        let entry = requested.entry(item.product_id.as_str()).or_default();
        *entry = entry.saturating_add(item.quantity);
    }
    for (product_id, quantity) in requested {
        let Some(product) = products.iter().find(|product| product.id == product_id) else {
            continue;
        };
        if quantity > product.stock {
            return Err(StoreError::InsufficientStock {
                product_id: product_id.to_owned(),
                requested: quantity,
                available: product.stock,
            });
        }
    }
    Ok(())
}
