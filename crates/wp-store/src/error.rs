use thiserror::Error;
use wp_backend::ApiError;
use wp_wallet_bridge::WalletError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("no current store")]
    NoCurrentStore,
    #[error("cart is empty")]
    EmptyCart,
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("product {0} is not in the cart")]
    ProductNotInCart(String),
    #[error("no DeFi position in pool {0}")]
    PositionNotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl StoreError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api(err) if err.is_rate_limited())
    }
}
