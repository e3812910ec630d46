//! In-process backend for offline/demo mode.
//!
//! Holds every resource in memory and mirrors it into client storage, so a
//! demo session survives a reload the same way a real backend would.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use wp_api_types::{
    AuthRequest, AuthResponse, BackendPaymentMethod, BackendPaymentStatus,
    BulkStockRequest, CartItemDto, CartItemInput, ClaimRequest, ClaimResponse, CreateStoreRequest,
    CreateTransactionRequest, CustomerDto, CustomerStatsDto, DefiPoolDto, DefiPositionDto,
    DefiStatsDto, DepositRequest, MarketplaceStatsDto, MarketplaceStoreDto, PositionPatch,
    ProductDto, ProductInput, ProductPatch, ProfilePatch, ReceiptPatch, StatusPatch, StoreDto,
    StoreStatsDto, TransactionDto, TransactionStatsDto, UpdateStoreRequest, UserDto,
};
use wp_format::{format_timestamp, parse_number_or_zero, timestamp_value_or_now};
use wp_storage::{AUTH_TOKEN_KEY, ClientStorage, load_json, save_json};

use crate::{ApiError, ApiResult, BackendApi};

pub const OFFLINE_DB_KEY: &str = "warungpay-offline-db";

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    id: String,
    wallet_address: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct OfflineData {
    users: HashMap<String, UserRecord>,
    tokens: HashMap<String, String>,
    stores: Vec<StoreDto>,
    products: Vec<ProductDto>,
    transactions: Vec<TransactionDto>,
    carts: HashMap<String, Vec<CartItemDto>>,
    positions: Vec<DefiPositionDto>,
    customers: Vec<CustomerDto>,
}

impl OfflineData {
    fn user_dto(&self, wallet_address: &str) -> ApiResult<UserDto> {
        let record = self
            .users
            .get(wallet_address)
            .ok_or_else(|| ApiError::NotFound("user not found".to_owned()))?;
        Ok(UserDto {
            id: record.id.clone(),
            wallet_address: record.wallet_address.clone(),
            name: record.name.clone(),
            email: record.email.clone(),
            stores: self
                .stores
                .iter()
                .filter(|store| store.wallet_address == wallet_address)
                .cloned()
                .collect(),
        })
    }

    fn store_mut(&mut self, store_id: &str) -> ApiResult<&mut StoreDto> {
        self.stores
            .iter_mut()
            .find(|store| store.id == store_id)
            .ok_or_else(|| ApiError::NotFound(format!("store {store_id}")))
    }

    fn product(&self, product_id: &str) -> ApiResult<&ProductDto> {
        self.products
            .iter()
            .find(|product| product.id == product_id)
            .ok_or_else(|| ApiError::NotFound(format!("product {product_id}")))
    }

    fn product_mut(&mut self, product_id: &str) -> ApiResult<&mut ProductDto> {
        self.products
            .iter_mut()
            .find(|product| product.id == product_id)
            .ok_or_else(|| ApiError::NotFound(format!("product {product_id}")))
    }

    fn transaction_mut(&mut self, transaction_id: &str) -> ApiResult<&mut TransactionDto> {
        self.transactions
            .iter_mut()
            .find(|transaction| transaction.id == transaction_id)
            .ok_or_else(|| ApiError::NotFound(format!("transaction {transaction_id}")))
    }

    fn marketplace_row(&self, store: &StoreDto) -> MarketplaceStoreDto {
        let transactions: Vec<&TransactionDto> = self
            .transactions
            .iter()
            .filter(|transaction| transaction.store_id == store.id)
            .collect();
        MarketplaceStoreDto {
            id: store.id.clone(),
            name: store.name.clone(),
            wallet_address: store.wallet_address.clone(),
            category: None,
            total_transactions: transactions.len() as u64,
            total_revenue: transactions
                .iter()
                .filter(|transaction| transaction.payment_status == BackendPaymentStatus::Completed)
                .map(|transaction| transaction.total)
                .sum(),
            product_count: self
                .products
                .iter()
                .filter(|product| product.store_id == store.id)
                .count() as u64,
            last_active: store.last_active.clone(),
        }
    }
}

pub struct OfflineBackend {
    storage: Arc<dyn ClientStorage>,
    data: RwLock<OfflineData>,
    demo_catalog: bool,
    asset_price: f64,
}

impl OfflineBackend {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        let data = match load_json::<OfflineData>(storage.as_ref(), OFFLINE_DB_KEY) {
            Ok(Some(data)) => data,
            Ok(None) => OfflineData::default(),
            Err(err) => {
                warn!("discarding unreadable offline database: {}", err);
                OfflineData::default()
            }
        };

        Self {
            storage,
            data: RwLock::new(data),
            demo_catalog: false,
            asset_price: 1.0,
        }
    }

    /// Seed new stores with a handful of warung products.
    pub fn with_demo_catalog(mut self, enabled: bool) -> Self {
        self.demo_catalog = enabled;
        self
    }

    pub fn with_asset_price(mut self, asset_price: f64) -> Self {
        self.asset_price = asset_price;
        self
    }

    fn current_wallet(&self, data: &OfflineData) -> ApiResult<String> {
        let token = self
            .storage
            .get_item(AUTH_TOKEN_KEY)
            .map_err(|err| ApiError::Transport(err.to_string()))?
            .ok_or(ApiError::Unauthorized)?;
        data.tokens.get(&token).cloned().ok_or(ApiError::Unauthorized)
    }

    fn flush(&self, data: &OfflineData) {
        if let Err(err) = save_json(self.storage.as_ref(), OFFLINE_DB_KEY, data) {
            warn!("failed to persist offline database: {}", err);
        }
    }

    fn issue_session(&self, data: &mut OfflineData, request: &AuthRequest) -> ApiResult<AuthResponse> {
        if request.wallet_address.trim().is_empty() {
            return Err(ApiError::bad_request("walletAddress is required"));
        }

        let record = data
            .users
            .entry(request.wallet_address.clone())
            .or_insert_with(|| UserRecord {
                id: Uuid::new_v4().to_string(),
                wallet_address: request.wallet_address.clone(),
                name: None,
                email: None,
            });
        if request.name.is_some() {
            record.name = request.name.clone();
        }
        if request.email.is_some() {
            record.email = request.email.clone();
        }

        let token = format!("offline-{}", Uuid::new_v4());
        data.tokens.insert(token.clone(), request.wallet_address.clone());
        let user = data.user_dto(&request.wallet_address)?;
        Ok(AuthResponse { token, user })
    }

    fn demo_products(store_id: &str) -> Vec<ProductDto> {
        let now = now_string();
        [
            ("Kopi Susu", "Minuman", 8_000.0, 50),
            ("Teh Botol", "Minuman", 5_000.0, 80),
            ("Indomie Goreng", "Makanan", 3_500.0, 120),
            ("Roti Bakar", "Makanan", 12_000.0, 20),
        ]
        .into_iter()
        .map(|(name, category, price, stock)| ProductDto {
            id: Uuid::new_v4().to_string(),
            store_id: store_id.to_owned(),
            name: name.to_owned(),
            localized_name: None,
            price,
            buy_price: Some(price * 0.7),
            category: category.to_owned(),
            image: None,
            stock,
            barcode: None,
            created_at: Some(now.clone()),
            updated_at: Some(now.clone()),
        })
        .collect()
    }
}

fn now_string() -> String {
    format_timestamp(&Utc::now())
}

fn now_value() -> Value {
    Value::String(now_string())
}

fn seeded_pools() -> Vec<DefiPoolDto> {
    vec![
        DefiPoolDto {
            id: "miden-stable".to_owned(),
            name: "Miden Stable Yield".to_owned(),
            apy: 8.0,
            tvl: 250_000.0,
            asset: "MIDEN".to_owned(),
        },
        DefiPoolDto {
            id: "miden-lp".to_owned(),
            name: "Miden Liquidity".to_owned(),
            apy: 12.5,
            tvl: 90_000.0,
            asset: "MIDEN".to_owned(),
        },
    ]
}

fn accrued_rewards(position: &DefiPositionDto, apy: f64) -> f64 {
    let elapsed = (Utc::now() - timestamp_value_or_now(&position.timestamp)).num_seconds().max(0) as f64;
    parse_number_or_zero(&position.amount) * (apy / 100.0) * (elapsed / SECONDS_PER_YEAR)
}

fn cart_subtotal(product: &ProductDto, quantity: u32, unit_price: Option<f64>) -> Value {
    json!(quantity as f64 * unit_price.unwrap_or(product.price))
}

#[async_trait]
impl BackendApi for OfflineBackend {
    async fn register(&self, request: &AuthRequest) -> ApiResult<AuthResponse> {
        let mut data = self.data.write().await;
        let response = self.issue_session(&mut data, request)?;
        self.flush(&data);
        Ok(response)
    }

    async fn login(&self, wallet_address: &str) -> ApiResult<AuthResponse> {
        let mut data = self.data.write().await;
        let request = AuthRequest {
            wallet_address: wallet_address.to_owned(),
            ..AuthRequest::default()
        };
        let response = self.issue_session(&mut data, &request)?;
        self.flush(&data);
        debug!(wallet = wallet_address, "offline login");
        Ok(response)
    }

    async fn profile(&self) -> ApiResult<UserDto> {
        let data = self.data.read().await;
        let wallet = self.current_wallet(&data)?;
        data.user_dto(&wallet)
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> ApiResult<UserDto> {
        let mut data = self.data.write().await;
        let wallet = self.current_wallet(&data)?;
        let record = data
            .users
            .get_mut(&wallet)
            .ok_or_else(|| ApiError::NotFound("user not found".to_owned()))?;
        if patch.name.is_some() {
            record.name = patch.name.clone();
        }
        if patch.email.is_some() {
            record.email = patch.email.clone();
        }
        let user = data.user_dto(&wallet)?;
        self.flush(&data);
        Ok(user)
    }

    async fn verify_token(&self) -> ApiResult<UserDto> {
        let data = self.data.read().await;
        let wallet = self.current_wallet(&data)?;
        data.user_dto(&wallet).map_err(|_| ApiError::Unauthorized)
    }

    async fn list_stores(&self) -> ApiResult<Vec<StoreDto>> {
        let data = self.data.read().await;
        let wallet = self.current_wallet(&data)?;
        Ok(data
            .stores
            .iter()
            .filter(|store| store.wallet_address == wallet)
            .cloned()
            .collect())
    }

    async fn store_by_wallet(&self, wallet_address: &str) -> ApiResult<StoreDto> {
        let data = self.data.read().await;
        data.stores
            .iter()
            .find(|store| store.wallet_address == wallet_address)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("store for wallet {wallet_address}")))
    }

    async fn create_store(&self, request: &CreateStoreRequest) -> ApiResult<StoreDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        if request.name.trim().is_empty() {
            return Err(ApiError::bad_request("store name is required"));
        }

        let now = now_string();
        let store = StoreDto {
            id: Uuid::new_v4().to_string(),
            wallet_address: request.wallet_address.clone(),
            name: request.name.clone(),
            address: request.address.clone(),
            phone: request.phone.clone(),
            whatsapp: None,
            telegram: None,
            currency: request.currency,
            language: request.language,
            receiving_wallet: Some(request.wallet_address.clone()),
            total_earnings: 0.0,
            total_defi_value: 0.0,
            created_at: Some(now.clone()),
            last_active: Some(now),
        };

        if self.demo_catalog {
            let products = Self::demo_products(&store.id);
            data.products.extend(products);
        }
        data.stores.push(store.clone());
        self.flush(&data);
        Ok(store)
    }

    async fn update_store(&self, store_id: &str, request: &UpdateStoreRequest) -> ApiResult<StoreDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let store = data.store_mut(store_id)?;
        if let Some(name) = &request.name {
            store.name = name.clone();
        }
        if let Some(address) = &request.address {
            store.address = address.clone();
        }
        if let Some(phone) = &request.phone {
            store.phone = phone.clone();
        }
        if request.whatsapp.is_some() {
            store.whatsapp = request.whatsapp.clone();
        }
        if request.telegram.is_some() {
            store.telegram = request.telegram.clone();
        }
        if let Some(currency) = request.currency {
            store.currency = currency;
        }
        if let Some(language) = request.language {
            store.language = language;
        }
        if request.receiving_wallet.is_some() {
            store.receiving_wallet = request.receiving_wallet.clone();
        }
        store.last_active = Some(now_string());
        let updated = store.clone();
        self.flush(&data);
        Ok(updated)
    }

    async fn delete_store(&self, store_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let before = data.stores.len();
        data.stores.retain(|store| store.id != store_id);
        if data.stores.len() == before {
            return Err(ApiError::NotFound(format!("store {store_id}")));
        }
        data.products.retain(|product| product.store_id != store_id);
        data.carts.remove(store_id);
        self.flush(&data);
        Ok(())
    }

    async fn store_stats(&self, store_id: &str) -> ApiResult<StoreStatsDto> {
        let data = self.data.read().await;
        let today = Utc::now().date_naive();
        let completed: Vec<&TransactionDto> = data
            .transactions
            .iter()
            .filter(|transaction| {
                transaction.store_id == store_id
                    && transaction.payment_status == BackendPaymentStatus::Completed
            })
            .collect();
        let products: Vec<&ProductDto> = data
            .products
            .iter()
            .filter(|product| product.store_id == store_id)
            .collect();

        Ok(StoreStatsDto {
            total_revenue: completed.iter().map(|transaction| transaction.total).sum(),
            total_transactions: completed.len() as u64,
            total_products: products.len() as u64,
            low_stock_products: products.iter().filter(|product| product.stock < 5).count() as u64,
            today_revenue: completed
                .iter()
                .filter(|transaction| timestamp_value_or_now(&transaction.timestamp).date_naive() == today)
                .map(|transaction| transaction.total)
                .sum(),
        })
    }

    async fn touch_store_activity(&self, store_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        data.store_mut(store_id)?.last_active = Some(now_string());
        self.flush(&data);
        Ok(())
    }

    async fn list_products(&self, store_id: &str) -> ApiResult<Vec<ProductDto>> {
        let data = self.data.read().await;
        Ok(data
            .products
            .iter()
            .filter(|product| product.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn create_product(&self, input: &ProductInput) -> ApiResult<ProductDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        if input.name.trim().is_empty() {
            return Err(ApiError::bad_request("product name is required"));
        }
        if !input.price.is_finite() || input.price < 0.0 {
            return Err(ApiError::bad_request("price must be a non-negative number"));
        }
        data.store_mut(&input.store_id)?;

        let now = now_string();
        let product = ProductDto {
            id: Uuid::new_v4().to_string(),
            store_id: input.store_id.clone(),
            name: input.name.clone(),
            localized_name: input.localized_name.clone(),
            price: input.price,
            buy_price: input.buy_price,
            category: input.category.clone(),
            image: input.image.clone(),
            stock: i64::from(input.stock),
            barcode: input.barcode.clone(),
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };
        data.products.push(product.clone());
        self.flush(&data);
        Ok(product)
    }

    async fn update_product(&self, product_id: &str, patch: &ProductPatch) -> ApiResult<ProductDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let product = data.product_mut(product_id)?;
        if let Some(name) = &patch.name {
            product.name = name.clone();
        }
        if patch.localized_name.is_some() {
            product.localized_name = patch.localized_name.clone();
        }
        if let Some(price) = patch.price {
            product.price = price;
        }
        if patch.buy_price.is_some() {
            product.buy_price = patch.buy_price;
        }
        if let Some(category) = &patch.category {
            product.category = category.clone();
        }
        if patch.image.is_some() {
            product.image = patch.image.clone();
        }
        if let Some(stock) = patch.stock {
            product.stock = i64::from(stock);
        }
        if patch.barcode.is_some() {
            product.barcode = patch.barcode.clone();
        }
        product.updated_at = Some(now_string());
        let updated = product.clone();
        self.flush(&data);
        Ok(updated)
    }

    async fn delete_product(&self, product_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        data.product(product_id)?;
        data.products.retain(|product| product.id != product_id);
        self.flush(&data);
        Ok(())
    }

    async fn product_categories(&self) -> ApiResult<Vec<String>> {
        let data = self.data.read().await;
        let categories: BTreeSet<String> = data
            .products
            .iter()
            .map(|product| product.category.clone())
            .filter(|category| !category.is_empty())
            .collect();
        Ok(categories.into_iter().collect())
    }

    async fn product_by_barcode(&self, barcode: &str) -> ApiResult<ProductDto> {
        let data = self.data.read().await;
        data.products
            .iter()
            .find(|product| product.barcode.as_deref() == Some(barcode))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("barcode {barcode}")))
    }

    async fn bulk_update_stock(&self, request: &BulkStockRequest) -> ApiResult<Vec<ProductDto>> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        for update in &request.updates {
            data.product(&update.product_id)?;
        }

        let now = now_string();
        let mut updated = Vec::with_capacity(request.updates.len());
        for update in &request.updates {
            let product = data.product_mut(&update.product_id)?;
            product.stock = i64::from(update.stock);
            product.updated_at = Some(now.clone());
            updated.push(product.clone());
        }
        self.flush(&data);
        Ok(updated)
    }

    async fn create_transaction(&self, request: &CreateTransactionRequest) -> ApiResult<TransactionDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        if request.items.is_empty() {
            return Err(ApiError::bad_request("transaction has no items"));
        }

        for item in &request.items {
            let product = data.product(&item.product_id)?;
            if product.stock < i64::from(item.quantity) {
                return Err(ApiError::Http {
                    status: 409,
                    message: format!("insufficient stock for {}", product.name),
                });
            }
        }

        if request.payment_status != BackendPaymentStatus::Failed {
            for item in &request.items {
                data.product_mut(&item.product_id)?.stock -= i64::from(item.quantity);
            }
        }

        let now = now_value();
        let transaction = TransactionDto {
            id: Uuid::new_v4().to_string(),
            store_id: request.store_id.clone(),
            timestamp: now.clone(),
            created_at: now.clone(),
            updated_at: now,
            items: request.items.clone(),
            total: request.total,
            payment_method: request.payment_method,
            payment_status: request.payment_status,
            customer: request.customer.clone(),
            tx_hash: request.tx_hash.clone(),
            receipt_sent: false,
            change: request.change,
            crypto_currency: request.crypto_currency.clone(),
            crypto_amount: request.crypto_amount.map_or(Value::Null, |amount| json!(amount)),
            card_info: request.card_info.clone(),
        };

        let store = data.store_mut(&request.store_id)?;
        if request.payment_status == BackendPaymentStatus::Completed {
            store.total_earnings += request.total;
        }
        store.last_active = Some(now_string());

        data.transactions.push(transaction.clone());
        self.flush(&data);
        Ok(transaction)
    }

    async fn list_transactions(&self, store_id: &str) -> ApiResult<Vec<TransactionDto>> {
        let data = self.data.read().await;
        let mut transactions: Vec<TransactionDto> = data
            .transactions
            .iter()
            .filter(|transaction| transaction.store_id == store_id)
            .cloned()
            .collect();
        transactions.reverse();
        Ok(transactions)
    }

    async fn update_transaction_status(&self, transaction_id: &str, patch: &StatusPatch) -> ApiResult<TransactionDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let transaction = data.transaction_mut(transaction_id)?;
        let newly_completed = transaction.payment_status != BackendPaymentStatus::Completed
            && patch.payment_status == BackendPaymentStatus::Completed;
        transaction.payment_status = patch.payment_status;
        transaction.updated_at = now_value();
        let updated = transaction.clone();

        if newly_completed {
            data.store_mut(&updated.store_id)?.total_earnings += updated.total;
        }
        self.flush(&data);
        Ok(updated)
    }

    async fn update_transaction_receipt(&self, transaction_id: &str, patch: &ReceiptPatch) -> ApiResult<TransactionDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let transaction = data.transaction_mut(transaction_id)?;
        transaction.receipt_sent = patch.receipt_sent;
        transaction.updated_at = now_value();
        let updated = transaction.clone();
        self.flush(&data);
        Ok(updated)
    }

    async fn transaction_stats(&self, store_id: &str) -> ApiResult<TransactionStatsDto> {
        let data = self.data.read().await;
        let completed: Vec<&TransactionDto> = data
            .transactions
            .iter()
            .filter(|transaction| {
                transaction.store_id == store_id
                    && transaction.payment_status == BackendPaymentStatus::Completed
            })
            .collect();
        let revenue_for = |method: BackendPaymentMethod| {
            completed
                .iter()
                .filter(|transaction| transaction.payment_method == method)
                .map(|transaction| transaction.total)
                .sum::<f64>()
        };
        let total_revenue: f64 = completed.iter().map(|transaction| transaction.total).sum();
        let count = completed.len() as u64;

        Ok(TransactionStatsDto {
            total_revenue,
            total_transactions: count,
            average_ticket: if count == 0 { 0.0 } else { total_revenue / count as f64 },
            cash_revenue: revenue_for(BackendPaymentMethod::Cash),
            card_revenue: revenue_for(BackendPaymentMethod::Card),
            crypto_revenue: revenue_for(BackendPaymentMethod::Crypto),
        })
    }

    async fn list_cart(&self, store_id: &str) -> ApiResult<Vec<CartItemDto>> {
        let data = self.data.read().await;
        Ok(data.carts.get(store_id).cloned().unwrap_or_default())
    }

    async fn add_cart_item(&self, store_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let product = data.product(&item.product_id)?.clone();
        let cart = data.carts.entry(store_id.to_owned()).or_default();

        let line = match cart.iter_mut().find(|line| line.product.id == item.product_id) {
            Some(line) => {
                line.quantity += item.quantity;
                if item.unit_price.is_some() {
                    line.unit_price = item.unit_price;
                }
                line.subtotal = cart_subtotal(&line.product, line.quantity, line.unit_price);
                line.clone()
            }
            None => {
                let line = CartItemDto {
                    id: Uuid::new_v4().to_string(),
                    subtotal: cart_subtotal(&product, item.quantity, item.unit_price),
                    product,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                };
                cart.push(line.clone());
                line
            }
        };
        self.flush(&data);
        Ok(line)
    }

    async fn update_cart_item(&self, store_id: &str, product_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let line = data
            .carts
            .get_mut(store_id)
            .and_then(|cart| cart.iter_mut().find(|line| line.product.id == product_id))
            .ok_or_else(|| ApiError::NotFound(format!("cart item {product_id}")))?;
        line.quantity = item.quantity;
        line.unit_price = item.unit_price;
        line.subtotal = cart_subtotal(&line.product, line.quantity, line.unit_price);
        let updated = line.clone();
        self.flush(&data);
        Ok(updated)
    }

    async fn remove_cart_item(&self, store_id: &str, product_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        if let Some(cart) = data.carts.get_mut(store_id) {
            cart.retain(|line| line.product.id != product_id);
        }
        self.flush(&data);
        Ok(())
    }

    async fn clear_cart(&self, store_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        data.carts.remove(store_id);
        self.flush(&data);
        Ok(())
    }

    async fn defi_pools(&self) -> ApiResult<Vec<DefiPoolDto>> {
        Ok(seeded_pools())
    }

    async fn defi_positions(&self, store_id: &str) -> ApiResult<Vec<DefiPositionDto>> {
        let data = self.data.read().await;
        Ok(data
            .positions
            .iter()
            .filter(|position| position.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn defi_deposit(&self, request: &DepositRequest) -> ApiResult<DefiPositionDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(ApiError::bad_request("deposit amount must be positive"));
        }
        if !seeded_pools().iter().any(|pool| pool.id == request.pool_id) {
            return Err(ApiError::NotFound(format!("pool {}", request.pool_id)));
        }

        let existing = data
            .positions
            .iter_mut()
            .find(|position| position.store_id == request.store_id && position.pool_id == request.pool_id);
        let position = match existing {
            Some(position) => {
                let amount = parse_number_or_zero(&position.amount) + request.amount;
                position.amount = json!(amount);
                position.value = json!(amount * self.asset_price);
                position.tx_hash = request.tx_hash.clone();
                position.clone()
            }
            None => {
                let position = DefiPositionDto {
                    id: Uuid::new_v4().to_string(),
                    store_id: request.store_id.clone(),
                    pool_id: request.pool_id.clone(),
                    amount: json!(request.amount),
                    value: json!(request.amount * self.asset_price),
                    rewards: json!(0.0),
                    timestamp: now_value(),
                    tx_hash: request.tx_hash.clone(),
                };
                data.positions.push(position.clone());
                position
            }
        };
        self.flush(&data);
        Ok(position)
    }

    async fn update_defi_position(&self, position_id: &str, patch: &PositionPatch) -> ApiResult<DefiPositionDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let position = data
            .positions
            .iter_mut()
            .find(|position| position.id == position_id)
            .ok_or_else(|| ApiError::NotFound(format!("position {position_id}")))?;
        if let Some(amount) = patch.amount {
            position.amount = json!(amount);
        }
        if let Some(value) = patch.value {
            position.value = json!(value);
        }
        if let Some(rewards) = patch.rewards {
            position.rewards = json!(rewards);
        }
        if patch.tx_hash.is_some() {
            position.tx_hash = patch.tx_hash.clone();
        }
        let updated = position.clone();
        self.flush(&data);
        Ok(updated)
    }

    async fn delete_defi_position(&self, position_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let before = data.positions.len();
        data.positions.retain(|position| position.id != position_id);
        if data.positions.len() == before {
            return Err(ApiError::NotFound(format!("position {position_id}")));
        }
        self.flush(&data);
        Ok(())
    }

    async fn defi_claim(&self, request: &ClaimRequest) -> ApiResult<ClaimResponse> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let apy = seeded_pools()
            .into_iter()
            .find(|pool| pool.id == request.pool_id)
            .map(|pool| pool.apy)
            .ok_or_else(|| ApiError::NotFound(format!("pool {}", request.pool_id)))?;
        let position = data
            .positions
            .iter_mut()
            .find(|position| position.store_id == request.store_id && position.pool_id == request.pool_id)
            .ok_or_else(|| ApiError::NotFound(format!("position in {}", request.pool_id)))?;

        let claimed = parse_number_or_zero(&position.rewards) + accrued_rewards(position, apy);
        position.rewards = json!(0.0);
        position.timestamp = now_value();
        self.flush(&data);

        Ok(ClaimResponse {
            claimed,
            tx_hash: request.tx_hash.clone(),
        })
    }

    async fn defi_stats(&self, store_id: &str) -> ApiResult<DefiStatsDto> {
        let data = self.data.read().await;
        let positions: Vec<&DefiPositionDto> = data
            .positions
            .iter()
            .filter(|position| position.store_id == store_id)
            .collect();
        Ok(DefiStatsDto {
            total_deposited: positions.iter().map(|p| parse_number_or_zero(&p.amount)).sum(),
            total_value: positions.iter().map(|p| parse_number_or_zero(&p.value)).sum(),
            total_rewards: positions.iter().map(|p| parse_number_or_zero(&p.rewards)).sum(),
            position_count: positions.len() as u64,
        })
    }

    async fn marketplace_stores(&self) -> ApiResult<Vec<MarketplaceStoreDto>> {
        let data = self.data.read().await;
        Ok(data.stores.iter().map(|store| data.marketplace_row(store)).collect())
    }

    async fn marketplace_stats(&self) -> ApiResult<MarketplaceStatsDto> {
        let data = self.data.read().await;
        let rows: Vec<MarketplaceStoreDto> =
            data.stores.iter().map(|store| data.marketplace_row(store)).collect();
        Ok(MarketplaceStatsDto {
            total_stores: rows.len() as u64,
            total_transactions: rows.iter().map(|row| row.total_transactions).sum(),
            total_revenue: rows.iter().map(|row| row.total_revenue).sum(),
            total_products: rows.iter().map(|row| row.product_count).sum(),
            active_stores: rows.iter().filter(|row| row.total_transactions > 0).count() as u64,
        })
    }

    async fn marketplace_search(&self, query: &str) -> ApiResult<Vec<MarketplaceStoreDto>> {
        let needle = query.trim().to_lowercase();
        let data = self.data.read().await;
        Ok(data
            .stores
            .iter()
            .filter(|store| store.name.to_lowercase().contains(&needle))
            .map(|store| data.marketplace_row(store))
            .collect())
    }

    async fn marketplace_trending(&self) -> ApiResult<Vec<MarketplaceStoreDto>> {
        let data = self.data.read().await;
        let mut rows: Vec<MarketplaceStoreDto> =
            data.stores.iter().map(|store| data.marketplace_row(store)).collect();
        rows.sort_by(|a, b| b.total_transactions.cmp(&a.total_transactions));
        rows.truncate(5);
        Ok(rows)
    }

    async fn marketplace_categories(&self) -> ApiResult<Vec<String>> {
        self.product_categories().await
    }

    async fn list_customers(&self, store_id: &str) -> ApiResult<Vec<CustomerDto>> {
        let data = self.data.read().await;
        Ok(data
            .customers
            .iter()
            .filter(|customer| customer.store_id.as_deref() == Some(store_id))
            .cloned()
            .collect())
    }

    async fn create_customer(&self, customer: &CustomerDto) -> ApiResult<CustomerDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        if customer.name.trim().is_empty() {
            return Err(ApiError::bad_request("customer name is required"));
        }
        let mut created = customer.clone();
        created.id = Some(Uuid::new_v4().to_string());
        data.customers.push(created.clone());
        self.flush(&data);
        Ok(created)
    }

    async fn update_customer(&self, customer_id: &str, customer: &CustomerDto) -> ApiResult<CustomerDto> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let existing = data
            .customers
            .iter_mut()
            .find(|entry| entry.id.as_deref() == Some(customer_id))
            .ok_or_else(|| ApiError::NotFound(format!("customer {customer_id}")))?;
        let store_id = existing.store_id.clone();
        *existing = CustomerDto {
            id: Some(customer_id.to_owned()),
            store_id: customer.store_id.clone().or(store_id),
            ..customer.clone()
        };
        let updated = existing.clone();
        self.flush(&data);
        Ok(updated)
    }

    async fn delete_customer(&self, customer_id: &str) -> ApiResult<()> {
        let mut data = self.data.write().await;
        self.current_wallet(&data)?;
        let before = data.customers.len();
        data.customers.retain(|entry| entry.id.as_deref() != Some(customer_id));
        if data.customers.len() == before {
            return Err(ApiError::NotFound(format!("customer {customer_id}")));
        }
        self.flush(&data);
        Ok(())
    }

    async fn customer_stats(&self, store_id: &str) -> ApiResult<CustomerStatsDto> {
        let data = self.data.read().await;
        let customers: Vec<&CustomerDto> = data
            .customers
            .iter()
            .filter(|customer| customer.store_id.as_deref() == Some(store_id))
            .collect();
        let returning = customers
            .iter()
            .filter(|customer| {
                data.transactions
                    .iter()
                    .filter(|transaction| {
                        transaction.store_id == store_id
                            && transaction.customer.as_ref().map(|c| &c.name) == Some(&customer.name)
                    })
                    .count()
                    > 1
            })
            .count();
        Ok(CustomerStatsDto {
            total_customers: customers.len() as u64,
            returning_customers: returning as u64,
        })
    }

    async fn search_customers(&self, query: &str) -> ApiResult<Vec<CustomerDto>> {
        let needle = query.trim().to_lowercase();
        let data = self.data.read().await;
        Ok(data
            .customers
            .iter()
            .filter(|customer| {
                customer.name.to_lowercase().contains(&needle)
                    || customer.phone.as_deref().is_some_and(|phone| phone.contains(&needle))
            })
            .cloned()
            .collect())
    }
}
