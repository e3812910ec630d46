use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use urlencoding::encode;
use wp_api_types::{
    ApiEnvelope, AuthRequest, AuthResponse, BulkStockRequest, CartItemDto, CartItemInput,
    ClaimRequest, ClaimResponse, CreateStoreRequest, CreateTransactionRequest, CustomerDto,
    CustomerStatsDto, DefiPoolDto, DefiPositionDto, DefiStatsDto, DepositRequest,
    MarketplaceStatsDto, MarketplaceStoreDto, PositionPatch, ProductDto, ProductInput,
    ProductPatch, ProfilePatch, ReceiptPatch, StatusPatch, StoreDto, StoreStatsDto,
    TransactionDto, TransactionStatsDto, UpdateStoreRequest, UserDto,
};
use wp_backend::{ApiError, ApiResult, BackendApi};
use wp_storage::{AUTH_TOKEN_KEY, ClientStorage};

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";

/// Invoked after a 401 has wiped the token; the host reloads from there.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// REST client for the WarungPay backend.
///
/// Reads `WARUNGPAY_API_URL` from environment at construction time
/// (default: `http://localhost:3001/api`). The bearer token is read from
/// client storage on every request, never cached.
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
    storage: Arc<dyn ClientStorage>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>, storage: Arc<dyn ClientStorage>) -> Self {
        let base_url = base_url
            .or_else(|| std::env::var("WARUNGPAY_API_URL").ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            storage,
            on_unauthorized: None,
        }
    }

    pub fn with_unauthorized_hook(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn bearer_token(&self) -> Option<String> {
        match self.storage.get_item(AUTH_TOKEN_KEY) {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                warn!("failed to read auth token: {}", err);
                None
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn handle_unauthorized(&self) {
        warn!("backend rejected the session token; clearing it");
        if let Err(err) = self.storage.remove_item(AUTH_TOKEN_KEY) {
            warn!("failed to remove auth token: {}", err);
        }
        if let Some(hook) = &self.on_unauthorized {
            hook();
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ApiResult<T> {
        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
            return Err(ApiError::Unauthorized);
        }
        decode_envelope(status.as_u16(), &body)
    }

    async fn send_unit(&self, builder: RequestBuilder) -> ApiResult<()> {
        let _: Option<Value> = self.send(builder).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        debug!(path, "GET");
        self.send(self.request(Method::GET, path)).await
    }

    async fn get_query<T: DeserializeOwned>(&self, path: &str, query: &str) -> ApiResult<T> {
        debug!(path, query, "GET");
        self.send(self.request(Method::GET, path).query(&[("q", query)]))
            .await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        debug!(path, "POST");
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn put<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        debug!(path, "PUT");
        self.send(self.request(Method::PUT, path).json(body)).await
    }

    async fn patch<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        debug!(path, "PATCH");
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    async fn delete(&self, path: &str) -> ApiResult<()> {
        debug!(path, "DELETE");
        self.send_unit(self.request(Method::DELETE, path)).await
    }
}

/// Decodes a `{ success, data, message }` body into `T`.
///
/// A `null` or absent `data` is only accepted when `T` itself tolerates null.
fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> ApiResult<T> {
    let envelope: Option<ApiEnvelope<Value>> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let message = envelope
            .and_then(|envelope| envelope.message)
            .unwrap_or_else(|| body.trim().to_string());
        return Err(ApiError::from_status(status, message));
    }

    let envelope = envelope.ok_or_else(|| ApiError::Decode("response is not an API envelope".to_string()))?;
    if !envelope.success {
        return Err(ApiError::Http {
            status,
            message: envelope.message.unwrap_or_else(|| "request failed".to_string()),
        });
    }

    serde_json::from_value(envelope.data.unwrap_or(Value::Null))
        .map_err(|err| ApiError::Decode(err.to_string()))
}

#[async_trait]
impl BackendApi for HttpBackend {
    // ── auth ─────────────────────────────────────────────────────────

    async fn register(&self, request: &AuthRequest) -> ApiResult<AuthResponse> {
        self.post("auth/register", request).await
    }

    async fn login(&self, wallet_address: &str) -> ApiResult<AuthResponse> {
        let request = AuthRequest {
            wallet_address: wallet_address.to_owned(),
            ..AuthRequest::default()
        };
        self.post("auth/login", &request).await
    }

    async fn profile(&self) -> ApiResult<UserDto> {
        self.get("auth/profile").await
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> ApiResult<UserDto> {
        self.put("auth/profile", patch).await
    }

    async fn verify_token(&self) -> ApiResult<UserDto> {
        self.get("auth/verify").await
    }

    // ── stores ───────────────────────────────────────────────────────

    async fn list_stores(&self) -> ApiResult<Vec<StoreDto>> {
        self.get("stores").await
    }

    async fn store_by_wallet(&self, wallet_address: &str) -> ApiResult<StoreDto> {
        self.get(&format!("stores/wallet/{}", encode(wallet_address))).await
    }

    async fn create_store(&self, request: &CreateStoreRequest) -> ApiResult<StoreDto> {
        self.post("stores", request).await
    }

    async fn update_store(&self, store_id: &str, request: &UpdateStoreRequest) -> ApiResult<StoreDto> {
        self.put(&format!("stores/{}", encode(store_id)), request).await
    }

    async fn delete_store(&self, store_id: &str) -> ApiResult<()> {
        self.delete(&format!("stores/{}", encode(store_id))).await
    }

    async fn store_stats(&self, store_id: &str) -> ApiResult<StoreStatsDto> {
        self.get(&format!("stores/{}/stats", encode(store_id))).await
    }

    async fn touch_store_activity(&self, store_id: &str) -> ApiResult<()> {
        let _: Option<Value> = self
            .patch(&format!("stores/{}/activity", encode(store_id)), &Value::Null)
            .await?;
        Ok(())
    }

    // ── products ─────────────────────────────────────────────────────

    async fn list_products(&self, store_id: &str) -> ApiResult<Vec<ProductDto>> {
        self.get(&format!("products/store/{}", encode(store_id))).await
    }

    async fn create_product(&self, input: &ProductInput) -> ApiResult<ProductDto> {
        self.post("products", input).await
    }

    async fn update_product(&self, product_id: &str, patch: &ProductPatch) -> ApiResult<ProductDto> {
        self.put(&format!("products/{}", encode(product_id)), patch).await
    }

    async fn delete_product(&self, product_id: &str) -> ApiResult<()> {
        self.delete(&format!("products/{}", encode(product_id))).await
    }

    async fn product_categories(&self) -> ApiResult<Vec<String>> {
        self.get("products/categories").await
    }

    async fn product_by_barcode(&self, barcode: &str) -> ApiResult<ProductDto> {
        self.get(&format!("products/barcode/{}", encode(barcode))).await
    }

    async fn bulk_update_stock(&self, request: &BulkStockRequest) -> ApiResult<Vec<ProductDto>> {
        self.patch("products/bulk-stock", request).await
    }

    // ── transactions ─────────────────────────────────────────────────

    async fn create_transaction(&self, request: &CreateTransactionRequest) -> ApiResult<TransactionDto> {
        self.post("transactions", request).await
    }

    async fn list_transactions(&self, store_id: &str) -> ApiResult<Vec<TransactionDto>> {
        self.get(&format!("transactions/store/{}", encode(store_id))).await
    }

    async fn update_transaction_status(&self, transaction_id: &str, patch: &StatusPatch) -> ApiResult<TransactionDto> {
        self.patch(&format!("transactions/{}/status", encode(transaction_id)), patch)
            .await
    }

    async fn update_transaction_receipt(&self, transaction_id: &str, patch: &ReceiptPatch) -> ApiResult<TransactionDto> {
        self.patch(&format!("transactions/{}/receipt", encode(transaction_id)), patch)
            .await
    }

    async fn transaction_stats(&self, store_id: &str) -> ApiResult<TransactionStatsDto> {
        self.get(&format!("transactions/store/{}/stats", encode(store_id))).await
    }

    // ── cart ─────────────────────────────────────────────────────────

    async fn list_cart(&self, store_id: &str) -> ApiResult<Vec<CartItemDto>> {
        self.get(&format!("cart/{}", encode(store_id))).await
    }

    async fn add_cart_item(&self, store_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto> {
        self.post(&format!("cart/{}/items", encode(store_id)), item).await
    }

    async fn update_cart_item(&self, store_id: &str, product_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto> {
        self.put(
            &format!("cart/{}/items/{}", encode(store_id), encode(product_id)),
            item,
        )
        .await
    }

    async fn remove_cart_item(&self, store_id: &str, product_id: &str) -> ApiResult<()> {
        self.delete(&format!("cart/{}/items/{}", encode(store_id), encode(product_id)))
            .await
    }

    async fn clear_cart(&self, store_id: &str) -> ApiResult<()> {
        self.delete(&format!("cart/{}", encode(store_id))).await
    }

    // ── defi ─────────────────────────────────────────────────────────

    async fn defi_pools(&self) -> ApiResult<Vec<DefiPoolDto>> {
        self.get("defi/pools").await
    }

    async fn defi_positions(&self, store_id: &str) -> ApiResult<Vec<DefiPositionDto>> {
        self.get(&format!("defi/positions/{}", encode(store_id))).await
    }

    async fn defi_deposit(&self, request: &DepositRequest) -> ApiResult<DefiPositionDto> {
        self.post("defi/deposit", request).await
    }

    async fn update_defi_position(&self, position_id: &str, patch: &PositionPatch) -> ApiResult<DefiPositionDto> {
        self.patch(&format!("defi/positions/{}", encode(position_id)), patch)
            .await
    }

    async fn delete_defi_position(&self, position_id: &str) -> ApiResult<()> {
        self.delete(&format!("defi/positions/{}", encode(position_id))).await
    }

    async fn defi_claim(&self, request: &ClaimRequest) -> ApiResult<ClaimResponse> {
        self.post("defi/claim", request).await
    }

    async fn defi_stats(&self, store_id: &str) -> ApiResult<DefiStatsDto> {
        self.get(&format!("defi/stats/{}", encode(store_id))).await
    }

    // ── marketplace ──────────────────────────────────────────────────

    async fn marketplace_stores(&self) -> ApiResult<Vec<MarketplaceStoreDto>> {
        self.get("marketplace/stores").await
    }

    async fn marketplace_stats(&self) -> ApiResult<MarketplaceStatsDto> {
        self.get("marketplace/stats").await
    }

    async fn marketplace_search(&self, query: &str) -> ApiResult<Vec<MarketplaceStoreDto>> {
        self.get_query("marketplace/search", query).await
    }

    async fn marketplace_trending(&self) -> ApiResult<Vec<MarketplaceStoreDto>> {
        self.get("marketplace/trending").await
    }

    async fn marketplace_categories(&self) -> ApiResult<Vec<String>> {
        self.get("marketplace/categories").await
    }

    // ── customers ────────────────────────────────────────────────────

    async fn list_customers(&self, store_id: &str) -> ApiResult<Vec<CustomerDto>> {
        self.get(&format!("customers/store/{}", encode(store_id))).await
    }

    async fn create_customer(&self, customer: &CustomerDto) -> ApiResult<CustomerDto> {
        self.post("customers", customer).await
    }

    async fn update_customer(&self, customer_id: &str, customer: &CustomerDto) -> ApiResult<CustomerDto> {
        self.put(&format!("customers/{}", encode(customer_id)), customer).await
    }

    async fn delete_customer(&self, customer_id: &str) -> ApiResult<()> {
        self.delete(&format!("customers/{}", encode(customer_id))).await
    }

    async fn customer_stats(&self, store_id: &str) -> ApiResult<CustomerStatsDto> {
        self.get(&format!("customers/store/{}/stats", encode(store_id))).await
    }

    async fn search_customers(&self, query: &str) -> ApiResult<Vec<CustomerDto>> {
        self.get_query("customers/search", query).await
    }
}
