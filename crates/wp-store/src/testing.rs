//! Test doubles shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use wp_api_types::{
    AuthRequest, AuthResponse, BulkStockRequest, CartItemDto, CartItemInput, ClaimRequest,
    ClaimResponse, CreateStoreRequest, CreateTransactionRequest, CustomerDto, CustomerStatsDto,
    DefiPoolDto, DefiPositionDto, DefiStatsDto, DepositRequest, MarketplaceStatsDto,
    MarketplaceStoreDto, PositionPatch, ProductDto, ProductInput, ProductPatch, ProfilePatch,
    ReceiptPatch, StatusPatch, StoreDto, StoreStatsDto, TransactionDto, TransactionStatsDto,
    UpdateStoreRequest, UserDto,
};
use wp_backend::{ApiError, ApiResult, BackendApi, OfflineBackend};
use wp_storage::{ClientStorage, InMemoryStorage};
use wp_wallet_bridge::{
    BalanceResult, ConnectResult, DevWalletBridge, SignedTransaction, StorageResult,
    UnsignedTransaction, WalletBridge, WalletError,
};

use crate::config::StoreConfig;
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::store::{AppStore, StoreDeps};

#[derive(Default)]
struct Ledger {
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, ApiError>,
    holds: HashMap<&'static str, Arc<Notify>>,
}

/// [`OfflineBackend`] with call counting and injectable failures. Every
/// call yields once so concurrent actions really interleave.
pub(crate) struct MockBackend {
    inner: OfflineBackend,
    ledger: Mutex<Ledger>,
}

impl MockBackend {
    pub(crate) fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self {
            inner: OfflineBackend::new(storage),
            ledger: Mutex::default(),
        }
    }

    /// Every later call to `method` fails with `err`.
    pub(crate) fn fail(&self, method: &'static str, err: ApiError) {
        self.ledger().failures.insert(method, err);
    }

    /// The next call to `method` waits until the returned handle is
    /// notified.
    pub(crate) fn hold(&self, method: &'static str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.ledger().holds.insert(method, release.clone());
        release
    }

    pub(crate) fn calls(&self, method: &str) -> usize {
        self.ledger().calls.get(method).copied().unwrap_or(0)
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn gate(&self, method: &'static str) -> ApiResult<()> {
        let (failure, hold) = {
            let mut ledger = self.ledger();
            *ledger.calls.entry(method).or_default() += 1;
            (ledger.failures.get(method).cloned(), ledger.holds.remove(method))
        };
        tokio::task::yield_now().await;
        if let Some(release) = hold {
            release.notified().await;
        }
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    // auth
    async fn register(&self, request: &AuthRequest) -> ApiResult<AuthResponse> {
        self.gate("register").await?;
        self.inner.register(request).await
    }

    async fn login(&self, wallet_address: &str) -> ApiResult<AuthResponse> {
        self.gate("login").await?;
        self.inner.login(wallet_address).await
    }

    async fn profile(&self) -> ApiResult<UserDto> {
        self.gate("profile").await?;
        self.inner.profile().await
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> ApiResult<UserDto> {
        self.gate("update_profile").await?;
        self.inner.update_profile(patch).await
    }

    async fn verify_token(&self) -> ApiResult<UserDto> {
        self.gate("verify_token").await?;
        self.inner.verify_token().await
    }

    // stores
    async fn list_stores(&self) -> ApiResult<Vec<StoreDto>> {
        self.gate("list_stores").await?;
        self.inner.list_stores().await
    }

    async fn store_by_wallet(&self, wallet_address: &str) -> ApiResult<StoreDto> {
        self.gate("store_by_wallet").await?;
        self.inner.store_by_wallet(wallet_address).await
    }

    async fn create_store(&self, request: &CreateStoreRequest) -> ApiResult<StoreDto> {
        self.gate("create_store").await?;
        self.inner.create_store(request).await
    }

    async fn update_store(&self, store_id: &str, request: &UpdateStoreRequest) -> ApiResult<StoreDto> {
        self.gate("update_store").await?;
        self.inner.update_store(store_id, request).await
    }

    async fn delete_store(&self, store_id: &str) -> ApiResult<()> {
        self.gate("delete_store").await?;
        self.inner.delete_store(store_id).await
    }

    async fn store_stats(&self, store_id: &str) -> ApiResult<StoreStatsDto> {
        self.gate("store_stats").await?;
        self.inner.store_stats(store_id).await
    }

    async fn touch_store_activity(&self, store_id: &str) -> ApiResult<()> {
        self.gate("touch_store_activity").await?;
        self.inner.touch_store_activity(store_id).await
    }

    // products
    async fn list_products(&self, store_id: &str) -> ApiResult<Vec<ProductDto>> {
        self.gate("list_products").await?;
        self.inner.list_products(store_id).await
    }

    async fn create_product(&self, input: &ProductInput) -> ApiResult<ProductDto> {
        self.gate("create_product").await?;
        self.inner.create_product(input).await
    }

    async fn update_product(&self, product_id: &str, patch: &ProductPatch) -> ApiResult<ProductDto> {
        self.gate("update_product").await?;
        self.inner.update_product(product_id, patch).await
    }

    async fn delete_product(&self, product_id: &str) -> ApiResult<()> {
        self.gate("delete_product").await?;
        self.inner.delete_product(product_id).await
    }

    async fn product_categories(&self) -> ApiResult<Vec<String>> {
        self.gate("product_categories").await?;
        self.inner.product_categories().await
    }

    async fn product_by_barcode(&self, barcode: &str) -> ApiResult<ProductDto> {
        self.gate("product_by_barcode").await?;
        self.inner.product_by_barcode(barcode).await
    }

    async fn bulk_update_stock(&self, request: &BulkStockRequest) -> ApiResult<Vec<ProductDto>> {
        self.gate("bulk_update_stock").await?;
        self.inner.bulk_update_stock(request).await
    }

    // transactions
    async fn create_transaction(&self, request: &CreateTransactionRequest) -> ApiResult<TransactionDto> {
        self.gate("create_transaction").await?;
        self.inner.create_transaction(request).await
    }

    async fn list_transactions(&self, store_id: &str) -> ApiResult<Vec<TransactionDto>> {
        self.gate("list_transactions").await?;
        self.inner.list_transactions(store_id).await
    }

    async fn update_transaction_status(&self, transaction_id: &str, patch: &StatusPatch) -> ApiResult<TransactionDto> {
        self.gate("update_transaction_status").await?;
        self.inner.update_transaction_status(transaction_id, patch).await
    }

    async fn update_transaction_receipt(&self, transaction_id: &str, patch: &ReceiptPatch) -> ApiResult<TransactionDto> {
        self.gate("update_transaction_receipt").await?;
        self.inner.update_transaction_receipt(transaction_id, patch).await
    }

    async fn transaction_stats(&self, store_id: &str) -> ApiResult<TransactionStatsDto> {
        self.gate("transaction_stats").await?;
        self.inner.transaction_stats(store_id).await
    }

    // cart
    async fn list_cart(&self, store_id: &str) -> ApiResult<Vec<CartItemDto>> {
        self.gate("list_cart").await?;
        self.inner.list_cart(store_id).await
    }

    async fn add_cart_item(&self, store_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto> {
        self.gate("add_cart_item").await?;
        self.inner.add_cart_item(store_id, item).await
    }

    async fn update_cart_item(&self, store_id: &str, product_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto> {
        self.gate("update_cart_item").await?;
        self.inner.update_cart_item(store_id, product_id, item).await
    }

    async fn remove_cart_item(&self, store_id: &str, product_id: &str) -> ApiResult<()> {
        self.gate("remove_cart_item").await?;
        self.inner.remove_cart_item(store_id, product_id).await
    }

    async fn clear_cart(&self, store_id: &str) -> ApiResult<()> {
        self.gate("clear_cart").await?;
        self.inner.clear_cart(store_id).await
    }

    // defi
    async fn defi_pools(&self) -> ApiResult<Vec<DefiPoolDto>> {
        self.gate("defi_pools").await?;
        self.inner.defi_pools().await
    }

    async fn defi_positions(&self, store_id: &str) -> ApiResult<Vec<DefiPositionDto>> {
        self.gate("defi_positions").await?;
        self.inner.defi_positions(store_id).await
    }

    async fn defi_deposit(&self, request: &DepositRequest) -> ApiResult<DefiPositionDto> {
        self.gate("defi_deposit").await?;
        self.inner.defi_deposit(request).await
    }

    async fn update_defi_position(&self, position_id: &str, patch: &PositionPatch) -> ApiResult<DefiPositionDto> {
        self.gate("update_defi_position").await?;
        self.inner.update_defi_position(position_id, patch).await
    }

    async fn delete_defi_position(&self, position_id: &str) -> ApiResult<()> {
        self.gate("delete_defi_position").await?;
        self.inner.delete_defi_position(position_id).await
    }

    async fn defi_claim(&self, request: &ClaimRequest) -> ApiResult<ClaimResponse> {
        self.gate("defi_claim").await?;
        self.inner.defi_claim(request).await
    }

    async fn defi_stats(&self, store_id: &str) -> ApiResult<DefiStatsDto> {
        self.gate("defi_stats").await?;
        self.inner.defi_stats(store_id).await
    }

    // marketplace
    async fn marketplace_stores(&self) -> ApiResult<Vec<MarketplaceStoreDto>> {
        self.gate("marketplace_stores").await?;
        self.inner.marketplace_stores().await
    }

    async fn marketplace_stats(&self) -> ApiResult<MarketplaceStatsDto> {
        self.gate("marketplace_stats").await?;
        self.inner.marketplace_stats().await
    }

    async fn marketplace_search(&self, query: &str) -> ApiResult<Vec<MarketplaceStoreDto>> {
        self.gate("marketplace_search").await?;
        self.inner.marketplace_search(query).await
    }

    async fn marketplace_trending(&self) -> ApiResult<Vec<MarketplaceStoreDto>> {
        self.gate("marketplace_trending").await?;
        self.inner.marketplace_trending().await
    }

    async fn marketplace_categories(&self) -> ApiResult<Vec<String>> {
        self.gate("marketplace_categories").await?;
        self.inner.marketplace_categories().await
    }

    // customers
    async fn list_customers(&self, store_id: &str) -> ApiResult<Vec<CustomerDto>> {
        self.gate("list_customers").await?;
        self.inner.list_customers(store_id).await
    }

    async fn create_customer(&self, customer: &CustomerDto) -> ApiResult<CustomerDto> {
        self.gate("create_customer").await?;
        self.inner.create_customer(customer).await
    }

    async fn update_customer(&self, customer_id: &str, customer: &CustomerDto) -> ApiResult<CustomerDto> {
        self.gate("update_customer").await?;
        self.inner.update_customer(customer_id, customer).await
    }

    async fn delete_customer(&self, customer_id: &str) -> ApiResult<()> {
        self.gate("delete_customer").await?;
        self.inner.delete_customer(customer_id).await
    }

    async fn customer_stats(&self, store_id: &str) -> ApiResult<CustomerStatsDto> {
        self.gate("customer_stats").await?;
        self.inner.customer_stats(store_id).await
    }

    async fn search_customers(&self, query: &str) -> ApiResult<Vec<CustomerDto>> {
        self.gate("search_customers").await?;
        self.inner.search_customers(query).await
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub(crate) fn errors(&self) -> usize {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|notice| notice.level == NoticeLevel::Error)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).push(notice);
    }
}

/// Dev bridge that counts the calls a test cares about.
pub(crate) struct CountingBridge {
    inner: DevWalletBridge,
    disconnects: AtomicUsize,
    signatures: AtomicUsize,
}

impl CountingBridge {
    fn new() -> Self {
        Self {
            inner: DevWalletBridge::from_secret_key_bytes([7; 32]).with_balance(1_000.0),
            disconnects: AtomicUsize::new(0),
            signatures: AtomicUsize::new(0),
        }
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn signatures(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletBridge for CountingBridge {
    fn name(&self) -> &str {
        "counting"
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn connect(&self) -> Result<ConnectResult, WalletError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.disconnect().await
    }

    async fn get_balance(&self) -> Result<BalanceResult, WalletError> {
        self.inner.get_balance().await
    }

    async fn get_storage(&self) -> Result<StorageResult, WalletError> {
        self.inner.get_storage().await
    }

    async fn sign_transaction(&self, txn: &UnsignedTransaction) -> Result<SignedTransaction, WalletError> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_transaction(txn).await
    }
}

/// One isolated store with its collaborators exposed for assertions.
pub(crate) struct Harness {
    pub store: Arc<AppStore>,
    pub backend: Arc<MockBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub storage: Arc<InMemoryStorage>,
    pub bridge: Arc<CountingBridge>,
    with_bridge: bool,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::build(true)
    }

    pub(crate) fn without_bridge() -> Self {
        Self::build(false)
    }

    /// Logged in as `0xabc` with a backend-created store.
    pub(crate) async fn signed_in() -> Self {
        let harness = Self::new();
        assert!(harness.store.login("0xabc").await, "harness login failed");
        harness
    }

    /// A second store over the same storage, backend and bridge, as after
    /// an application restart.
    pub(crate) fn reload(&self) -> AppStore {
        AppStore::new(self.deps(), StoreConfig::offline())
    }

    fn build(with_bridge: bool) -> Self {
        let storage = InMemoryStorage::shared();
        let backend = Arc::new(MockBackend::new(storage.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = Arc::new(CountingBridge::new());
        let deps = StoreDeps {
            backend: backend.clone(),
            storage: storage.clone(),
            wallet_bridge: with_bridge.then(|| bridge.clone() as Arc<dyn WalletBridge>),
            notifier: notifier.clone(),
        };
        Self {
            store: AppStore::shared(deps, StoreConfig::offline()),
            backend,
            notifier,
            storage,
            bridge,
            with_bridge,
        }
    }

    fn deps(&self) -> StoreDeps {
        StoreDeps {
            backend: self.backend.clone(),
            storage: self.storage.clone(),
            wallet_bridge: self
                .with_bridge
                .then(|| self.bridge.clone() as Arc<dyn WalletBridge>),
            notifier: self.notifier.clone(),
        }
    }
}
