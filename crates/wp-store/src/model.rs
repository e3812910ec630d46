//! Client-side shape of the data model.
//!
//! These are what the store holds and persists. Wire DTOs live in
//! `wp-api-types` and are mapped in [`crate::convert`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wp_format::{Currency, Language};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Crypto,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    #[default]
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Whatsapp,
    Telegram,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub wallet_address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub is_authenticated: bool,
    pub auth_token: Option<String>,
    pub current_user: Option<User>,
}

// ── wallet ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalletProvider {
    #[serde(rename = "wallet-extension")]
    Extension,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletBalance {
    pub main_asset: f64,
}

/// `is_connected` implies a non-empty `address`; [`WalletState::connected`]
/// is the only way to build a connected state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletState {
    pub is_connected: bool,
    pub address: Option<String>,
    pub balance: WalletBalance,
    pub provider: Option<WalletProvider>,
}

impl WalletState {
    pub fn connected(address: &str, balance: f64) -> Option<Self> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }
        Some(Self {
            is_connected: true,
            address: Some(address.to_owned()),
            balance: WalletBalance {
                main_asset: if balance.is_finite() { balance } else { 0.0 },
            },
            provider: Some(WalletProvider::Extension),
        })
    }

    /// A snapshot claiming a connection without an address is discarded.
    pub fn is_consistent(&self) -> bool {
        !self.is_connected || self.address.as_deref().is_some_and(|address| !address.is_empty())
    }
}

// ── store ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BusinessInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub whatsapp: Option<String>,
    pub telegram: Option<String>,
    pub currency: Currency,
    pub language: Language,
    pub wallet_address: Option<String>,
    pub store_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct BusinessInfoPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub telegram: Option<String>,
    pub currency: Option<Currency>,
    pub language: Option<Language>,
    pub receiving_wallet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStore {
    pub store_id: String,
    pub wallet_address: String,
    pub business_info: BusinessInfo,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub defi_positions: Vec<DefiPosition>,
    #[serde(default)]
    pub total_earnings: f64,
    #[serde(default)]
    pub total_defi_value: f64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Never reached the backend; created when store setup failed.
    #[serde(default)]
    pub local_only: bool,
}

impl CurrentStore {
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn product(&self, product_id: &str) -> Option<&Product> {
        self.products.iter().find(|product| product.id == product_id)
    }

    pub fn position(&self, pool_id: &str) -> Option<&DefiPosition> {
        self.defi_positions.iter().find(|position| position.pool_id == pool_id)
    }

    pub(crate) fn recompute_defi_value(&mut self) {
        self.total_defi_value = self.defi_positions.iter().map(|position| position.value).sum();
    }
}

// ── catalog ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub localized_name: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub localized_name: Option<String>,
    pub price: f64,
    pub buy_price: Option<f64>,
    pub category: String,
    pub image: Option<String>,
    pub stock: u32,
    pub barcode: Option<String>,
}

// ── cart ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub product: Product,
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub subtotal: f64,
}

impl CartItem {
    pub fn effective_unit_price(&self) -> f64 {
        self.unit_price.unwrap_or(self.product.price)
    }

    pub(crate) fn recompute(&mut self) {
        self.subtotal = f64::from(self.quantity) * self.effective_unit_price();
    }
}

// ── transactions ─────────────────────────────────────────────────────

/// Frozen at sale time; never re-derived from the live product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price: f64,
    pub subtotal: f64,
}

impl From<&CartItem> for TransactionItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product.id.clone(),
            product_name: item.product.name.clone(),
            quantity: item.quantity,
            price: item.effective_unit_price(),
            subtotal: item.subtotal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_notification: Option<NotificationChannel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CardInfo {
    pub last4: Option<String>,
    pub brand: Option<String>,
    pub approval_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub items: Vec<TransactionItem>,
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub receipt_sent: bool,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub crypto_currency: Option<String>,
    #[serde(default)]
    pub crypto_amount: Option<f64>,
    #[serde(default)]
    pub card_info: Option<CardInfo>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTransaction {
    pub items: Vec<TransactionItem>,
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub customer: Option<Customer>,
    pub tx_hash: Option<String>,
    pub change: Option<f64>,
    pub crypto_currency: Option<String>,
    pub crypto_amount: Option<f64>,
    pub card_info: Option<CardInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentDetails {
    Cash { tendered: f64 },
    Card { card_info: Option<CardInfo> },
    Crypto { currency: String, amount: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub payment: PaymentDetails,
    pub customer: Option<Customer>,
}

// ── defi ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefiPosition {
    /// Backend id; absent for positions only known locally.
    #[serde(default)]
    pub id: Option<String>,
    pub pool_id: String,
    pub amount: f64,
    pub value: f64,
    #[serde(default)]
    pub rewards: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DefiPositionPatch {
    pub amount: Option<f64>,
    pub value: Option<f64>,
    pub rewards: Option<f64>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefiPool {
    pub id: String,
    pub name: String,
    pub apy: f64,
    pub tvl: f64,
    pub asset: String,
}

// ── marketplace ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketplaceStats {
    pub total_stores: u64,
    pub total_transactions: u64,
    pub total_revenue: f64,
    pub total_products: u64,
    pub active_stores: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub id: String,
    pub name: String,
    pub wallet_address: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub total_transactions: u64,
    #[serde(default)]
    pub total_revenue: f64,
    #[serde(default)]
    pub product_count: u64,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: f64) -> Product {
        Product {
            id: "p1".into(),
            name: "Kopi".into(),
            localized_name: None,
            price,
            buy_price: None,
            category: String::new(),
            image: None,
            stock: 5,
            barcode: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn connected_wallet_requires_address() {
        assert!(WalletState::connected("  ", 1.0).is_none());
        let wallet = WalletState::connected("0xabc", f64::NAN).unwrap();
        assert!(wallet.is_connected);
        assert_eq!(wallet.balance.main_asset, 0.0);
        assert!(wallet.is_consistent());

        let forged = WalletState {
            is_connected: true,
            ..WalletState::default()
        };
        assert!(!forged.is_consistent());
    }

    #[test]
    fn cart_item_prefers_override_price() {
        let mut item = CartItem {
            id: "c1".into(),
            product: product(10_000.0),
            quantity: 2,
            unit_price: None,
            subtotal: 0.0,
        };
        item.recompute();
        assert_eq!(item.subtotal, 20_000.0);

        item.unit_price = Some(7_500.0);
        item.recompute();
        assert_eq!(item.subtotal, 15_000.0);
        assert_eq!(TransactionItem::from(&item).price, 7_500.0);
    }

    #[test]
    fn provider_uses_wire_token() {
        let json = serde_json::to_string(&WalletProvider::Extension).unwrap();
        assert_eq!(json, "\"wallet-extension\"");
    }
}
