//! Typed surface of the WarungPay REST backend.
//!
//! [`BackendApi`] is implemented over HTTP by `wp-backend-http` and in-process
//! by [`OfflineBackend`] for offline/demo mode.

pub mod offline;

use async_trait::async_trait;
use thiserror::Error;
use wp_api_types::{
    AuthRequest, AuthResponse, BulkStockRequest, CartItemDto, CartItemInput, ClaimRequest,
    ClaimResponse, CreateStoreRequest, CreateTransactionRequest, CustomerDto, CustomerStatsDto,
    DefiPoolDto, DefiPositionDto, DefiStatsDto, DepositRequest, MarketplaceStatsDto,
    MarketplaceStoreDto, PositionPatch, ProductDto, ProductInput, ProductPatch, ProfilePatch,
    ReceiptPatch, StatusPatch, StoreDto, StoreStatsDto, TransactionDto, TransactionStatsDto,
    UpdateStoreRequest, UserDto,
};

pub use offline::OfflineBackend;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized,
            404 => Self::NotFound(message),
            429 => Self::RateLimited,
            _ => Self::Http { status, message },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: 400,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[async_trait]
pub trait BackendApi: Send + Sync {
    // auth
    async fn register(&self, request: &AuthRequest) -> ApiResult<AuthResponse>;
    async fn login(&self, wallet_address: &str) -> ApiResult<AuthResponse>;
    async fn profile(&self) -> ApiResult<UserDto>;
    async fn update_profile(&self, patch: &ProfilePatch) -> ApiResult<UserDto>;
    async fn verify_token(&self) -> ApiResult<UserDto>;

    // stores
    async fn list_stores(&self) -> ApiResult<Vec<StoreDto>>;
    async fn store_by_wallet(&self, wallet_address: &str) -> ApiResult<StoreDto>;
    async fn create_store(&self, request: &CreateStoreRequest) -> ApiResult<StoreDto>;
    async fn update_store(&self, store_id: &str, request: &UpdateStoreRequest) -> ApiResult<StoreDto>;
    async fn delete_store(&self, store_id: &str) -> ApiResult<()>;
    async fn store_stats(&self, store_id: &str) -> ApiResult<StoreStatsDto>;
    async fn touch_store_activity(&self, store_id: &str) -> ApiResult<()>;

    // products
    async fn list_products(&self, store_id: &str) -> ApiResult<Vec<ProductDto>>;
    async fn create_product(&self, input: &ProductInput) -> ApiResult<ProductDto>;
    async fn update_product(&self, product_id: &str, patch: &ProductPatch) -> ApiResult<ProductDto>;
    async fn delete_product(&self, product_id: &str) -> ApiResult<()>;
    async fn product_categories(&self) -> ApiResult<Vec<String>>;
    async fn product_by_barcode(&self, barcode: &str) -> ApiResult<ProductDto>;
    async fn bulk_update_stock(&self, request: &BulkStockRequest) -> ApiResult<Vec<ProductDto>>;

    // transactions
    async fn create_transaction(&self, request: &CreateTransactionRequest) -> ApiResult<TransactionDto>;
    async fn list_transactions(&self, store_id: &str) -> ApiResult<Vec<TransactionDto>>;
    async fn update_transaction_status(&self, transaction_id: &str, patch: &StatusPatch) -> ApiResult<TransactionDto>;
    async fn update_transaction_receipt(&self, transaction_id: &str, patch: &ReceiptPatch) -> ApiResult<TransactionDto>;
    async fn transaction_stats(&self, store_id: &str) -> ApiResult<TransactionStatsDto>;

    // cart
    async fn list_cart(&self, store_id: &str) -> ApiResult<Vec<CartItemDto>>;
    async fn add_cart_item(&self, store_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto>;
    async fn update_cart_item(&self, store_id: &str, product_id: &str, item: &CartItemInput) -> ApiResult<CartItemDto>;
    async fn remove_cart_item(&self, store_id: &str, product_id: &str) -> ApiResult<()>;
    async fn clear_cart(&self, store_id: &str) -> ApiResult<()>;

    // defi
    async fn defi_pools(&self) -> ApiResult<Vec<DefiPoolDto>>;
    async fn defi_positions(&self, store_id: &str) -> ApiResult<Vec<DefiPositionDto>>;
    async fn defi_deposit(&self, request: &DepositRequest) -> ApiResult<DefiPositionDto>;
    async fn update_defi_position(&self, position_id: &str, patch: &PositionPatch) -> ApiResult<DefiPositionDto>;
    async fn delete_defi_position(&self, position_id: &str) -> ApiResult<()>;
    async fn defi_claim(&self, request: &ClaimRequest) -> ApiResult<ClaimResponse>;
    async fn defi_stats(&self, store_id: &str) -> ApiResult<DefiStatsDto>;

    // marketplace
    async fn marketplace_stores(&self) -> ApiResult<Vec<MarketplaceStoreDto>>;
    async fn marketplace_stats(&self) -> ApiResult<MarketplaceStatsDto>;
    async fn marketplace_search(&self, query: &str) -> ApiResult<Vec<MarketplaceStoreDto>>;
    async fn marketplace_trending(&self) -> ApiResult<Vec<MarketplaceStoreDto>>;
    async fn marketplace_categories(&self) -> ApiResult<Vec<String>>;

    // customers
    async fn list_customers(&self, store_id: &str) -> ApiResult<Vec<CustomerDto>>;
    async fn create_customer(&self, customer: &CustomerDto) -> ApiResult<CustomerDto>;
    async fn update_customer(&self, customer_id: &str, customer: &CustomerDto) -> ApiResult<CustomerDto>;
    async fn delete_customer(&self, customer_id: &str) -> ApiResult<()>;
    async fn customer_stats(&self, store_id: &str) -> ApiResult<CustomerStatsDto>;
    async fn search_customers(&self, query: &str) -> ApiResult<Vec<CustomerDto>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_onto_the_taxonomy() {
        assert_eq!(ApiError::from_status(401, "x"), ApiError::Unauthorized);
        assert_eq!(ApiError::from_status(429, "slow down"), ApiError::RateLimited);
        assert_eq!(ApiError::from_status(404, "gone"), ApiError::NotFound("gone".into()));
        assert_eq!(
            ApiError::from_status(500, "boom"),
            ApiError::Http {
                status: 500,
                message: "boom".into()
            }
        );
        assert!(ApiError::RateLimited.is_rate_limited());
        assert!(!ApiError::Unauthorized.is_rate_limited());
    }
}
