//! Mapping between backend DTOs (uppercase tokens, loose dates) and the
//! client model (lowercase enums, typed dates).

use chrono::Utc;
use uuid::Uuid;
use wp_api_types::{
    BackendCurrency, BackendLanguage, BackendNotification, BackendPaymentMethod,
    BackendPaymentStatus, CardInfoDto, CartItemDto, CreateStoreRequest, CreateTransactionRequest,
    CustomerDto, DefiPoolDto, DefiPositionDto, MarketplaceStatsDto, MarketplaceStoreDto,
    ProductDto, ProductInput, StoreDto, TransactionDto, TransactionItemDto, UpdateStoreRequest,
    UserDto,
};
use wp_format::{
    Currency, Language, optional_timestamp, parse_number_or_zero, parse_timestamp_or_now,
    short_address, timestamp_value_or_now,
};

use crate::model::{
    BusinessInfo, BusinessInfoPatch, CardInfo, CartItem, CurrentStore, Customer, DefiPool,
    DefiPosition, MarketplaceStats, NewProduct, NewTransaction, NotificationChannel,
    PaymentMethod, PaymentStatus, Product, StoreSummary, Transaction, TransactionItem, User,
};

// ── enums ────────────────────────────────────────────────────────────

pub fn language_from_backend(language: BackendLanguage) -> Language {
    match language {
        BackendLanguage::Indonesian => Language::Id,
        BackendLanguage::English => Language::En,
    }
}

pub fn language_to_backend(language: Language) -> BackendLanguage {
    match language {
        Language::Id => BackendLanguage::Indonesian,
        Language::En => BackendLanguage::English,
    }
}

pub fn currency_from_backend(currency: BackendCurrency) -> Currency {
    match currency {
        BackendCurrency::Idr => Currency::Idr,
        BackendCurrency::Usd => Currency::Usd,
    }
}

pub fn currency_to_backend(currency: Currency) -> BackendCurrency {
    match currency {
        Currency::Idr => BackendCurrency::Idr,
        Currency::Usd => BackendCurrency::Usd,
    }
}

pub fn payment_method_from_backend(method: BackendPaymentMethod) -> PaymentMethod {
    match method {
        BackendPaymentMethod::Cash => PaymentMethod::Cash,
        BackendPaymentMethod::Card => PaymentMethod::Card,
        BackendPaymentMethod::Crypto => PaymentMethod::Crypto,
    }
}

pub fn payment_method_to_backend(method: PaymentMethod) -> BackendPaymentMethod {
    match method {
        PaymentMethod::Cash => BackendPaymentMethod::Cash,
        PaymentMethod::Card => BackendPaymentMethod::Card,
        PaymentMethod::Crypto => BackendPaymentMethod::Crypto,
    }
}

pub fn payment_status_from_backend(status: BackendPaymentStatus) -> PaymentStatus {
    match status {
        BackendPaymentStatus::Pending => PaymentStatus::Pending,
        BackendPaymentStatus::Completed => PaymentStatus::Completed,
        BackendPaymentStatus::Failed => PaymentStatus::Failed,
    }
}

pub fn payment_status_to_backend(status: PaymentStatus) -> BackendPaymentStatus {
    match status {
        PaymentStatus::Pending => BackendPaymentStatus::Pending,
        PaymentStatus::Completed => BackendPaymentStatus::Completed,
        PaymentStatus::Failed => BackendPaymentStatus::Failed,
    }
}

fn notification_from_backend(channel: BackendNotification) -> NotificationChannel {
    match channel {
        BackendNotification::Email => NotificationChannel::Email,
        BackendNotification::Whatsapp => NotificationChannel::Whatsapp,
        BackendNotification::Telegram => NotificationChannel::Telegram,
    }
}

fn notification_to_backend(channel: NotificationChannel) -> BackendNotification {
    match channel {
        NotificationChannel::Email => BackendNotification::Email,
        NotificationChannel::Whatsapp => BackendNotification::Whatsapp,
        NotificationChannel::Telegram => BackendNotification::Telegram,
    }
}

// ── session and stores ───────────────────────────────────────────────

pub fn user_from_dto(dto: &UserDto) -> User {
    User {
        id: dto.id.clone(),
        wallet_address: dto.wallet_address.clone(),
        name: dto.name.clone(),
        email: dto.email.clone(),
    }
}

pub fn business_info_from_dto(dto: &StoreDto) -> BusinessInfo {
    BusinessInfo {
        name: dto.name.clone(),
        address: dto.address.clone(),
        phone: dto.phone.clone(),
        whatsapp: dto.whatsapp.clone(),
        telegram: dto.telegram.clone(),
        currency: currency_from_backend(dto.currency),
        language: language_from_backend(dto.language),
        wallet_address: dto
            .receiving_wallet
            .clone()
            .or_else(|| Some(dto.wallet_address.clone())),
        store_id: dto.id.clone(),
    }
}

/// A fresh store with empty collections; the caller loads them afterwards.
pub fn store_from_dto(dto: &StoreDto) -> CurrentStore {
    CurrentStore {
        store_id: dto.id.clone(),
        wallet_address: dto.wallet_address.clone(),
        business_info: business_info_from_dto(dto),
        products: Vec::new(),
        transactions: Vec::new(),
        defi_positions: Vec::new(),
        total_earnings: finite_or_zero(dto.total_earnings),
        total_defi_value: finite_or_zero(dto.total_defi_value),
        created_at: dto.created_at.as_deref().map_or_else(Utc::now, parse_timestamp_or_now),
        last_active: dto.last_active.as_deref().map_or_else(Utc::now, parse_timestamp_or_now),
        local_only: false,
    }
}

pub fn default_store_name(wallet_address: &str) -> String {
    format!("Warung {}", short_address(wallet_address))
}

pub fn default_store_request(wallet_address: &str) -> CreateStoreRequest {
    CreateStoreRequest {
        wallet_address: wallet_address.to_owned(),
        name: default_store_name(wallet_address),
        address: String::new(),
        phone: String::new(),
        currency: BackendCurrency::Idr,
        language: BackendLanguage::Indonesian,
    }
}

/// Stand-in used when the backend cannot create or return a store.
pub fn local_default_store(wallet_address: &str) -> CurrentStore {
    let now = Utc::now();
    let store_id = format!("local-{}", Uuid::new_v4());
    CurrentStore {
        business_info: BusinessInfo {
            name: default_store_name(wallet_address),
            wallet_address: Some(wallet_address.to_owned()),
            store_id: store_id.clone(),
            ..BusinessInfo::default()
        },
        store_id,
        wallet_address: wallet_address.to_owned(),
        products: Vec::new(),
        transactions: Vec::new(),
        defi_positions: Vec::new(),
        total_earnings: 0.0,
        total_defi_value: 0.0,
        created_at: now,
        last_active: now,
        local_only: true,
    }
}

pub fn store_update_request(patch: &BusinessInfoPatch) -> UpdateStoreRequest {
    UpdateStoreRequest {
        name: patch.name.clone(),
        address: patch.address.clone(),
        phone: patch.phone.clone(),
        whatsapp: patch.whatsapp.clone(),
        telegram: patch.telegram.clone(),
        currency: patch.currency.map(currency_to_backend),
        language: patch.language.map(language_to_backend),
        receiving_wallet: patch.receiving_wallet.clone(),
    }
}

pub fn store_summary_from_dto(dto: &MarketplaceStoreDto) -> StoreSummary {
    StoreSummary {
        id: dto.id.clone(),
        name: dto.name.clone(),
        wallet_address: dto.wallet_address.clone(),
        category: dto.category.clone(),
        total_transactions: dto.total_transactions,
        total_revenue: finite_or_zero(dto.total_revenue),
        product_count: dto.product_count,
        last_active: dto.last_active.as_deref().map(parse_timestamp_or_now),
    }
}

pub fn marketplace_stats_from_dto(dto: &MarketplaceStatsDto) -> MarketplaceStats {
    MarketplaceStats {
        total_stores: dto.total_stores,
        total_transactions: dto.total_transactions,
        total_revenue: finite_or_zero(dto.total_revenue),
        total_products: dto.total_products,
        active_stores: dto.active_stores,
    }
}

/// Legacy fallback when the backend stats endpoint is unavailable.
pub fn aggregate_marketplace_stats(stores: &[StoreSummary]) -> MarketplaceStats {
    MarketplaceStats {
        total_stores: stores.len() as u64,
        total_transactions: stores.iter().map(|store| store.total_transactions).sum(),
        total_revenue: stores.iter().map(|store| store.total_revenue).sum(),
        total_products: stores.iter().map(|store| store.product_count).sum(),
        active_stores: stores.iter().filter(|store| store.total_transactions > 0).count() as u64,
    }
}

// ── catalog and cart ─────────────────────────────────────────────────

pub fn product_from_dto(dto: &ProductDto) -> Product {
    Product {
        id: dto.id.clone(),
        name: dto.name.clone(),
        localized_name: dto.localized_name.clone(),
        price: finite_or_zero(dto.price),
        buy_price: dto.buy_price.filter(|price| price.is_finite()),
        category: dto.category.clone(),
        image: dto.image.clone(),
        stock: u32::try_from(dto.stock.max(0)).unwrap_or(u32::MAX),
        barcode: dto.barcode.clone(),
        created_at: dto.created_at.as_deref().map(parse_timestamp_or_now),
        updated_at: dto.updated_at.as_deref().map(parse_timestamp_or_now),
    }
}

pub fn product_input(store_id: &str, product: &NewProduct) -> ProductInput {
    ProductInput {
        store_id: store_id.to_owned(),
        name: product.name.clone(),
        localized_name: product.localized_name.clone(),
        price: product.price,
        buy_price: product.buy_price,
        category: product.category.clone(),
        image: product.image.clone(),
        stock: product.stock,
        barcode: product.barcode.clone(),
    }
}

/// The subtotal is recomputed rather than trusted.
pub fn cart_item_from_dto(dto: &CartItemDto) -> CartItem {
    let mut item = CartItem {
        id: dto.id.clone(),
        product: product_from_dto(&dto.product),
        quantity: dto.quantity.max(1),
        unit_price: dto.unit_price.filter(|price| price.is_finite()),
        subtotal: 0.0,
    };
    item.recompute();
    item
}

// ── transactions ─────────────────────────────────────────────────────

pub fn customer_from_dto(dto: &CustomerDto) -> Customer {
    Customer {
        id: dto.id.clone(),
        name: dto.name.clone(),
        phone: dto.phone.clone(),
        email: dto.email.clone(),
        preferred_notification: dto.preferred_notification.map(notification_from_backend),
    }
}

pub fn customer_to_dto(customer: &Customer, store_id: Option<&str>) -> CustomerDto {
    CustomerDto {
        id: customer.id.clone(),
        store_id: store_id.map(str::to_owned),
        name: customer.name.clone(),
        phone: customer.phone.clone(),
        email: customer.email.clone(),
        preferred_notification: customer.preferred_notification.map(notification_to_backend),
    }
}

pub fn customers_from_dtos(dtos: &[CustomerDto]) -> Vec<Customer> {
    dtos.iter().map(customer_from_dto).collect()
}

fn card_info_from_dto(dto: &CardInfoDto) -> CardInfo {
    CardInfo {
        last4: dto.last4.clone(),
        brand: dto.brand.clone(),
        approval_code: dto.approval_code.clone(),
    }
}

fn card_info_to_dto(card: &CardInfo) -> CardInfoDto {
    CardInfoDto {
        last4: card.last4.clone(),
        brand: card.brand.clone(),
        approval_code: card.approval_code.clone(),
    }
}

/// Unparseable dates become now and `cryptoAmount` is numeric-coerced.
pub fn transaction_from_dto(dto: &TransactionDto) -> Transaction {
    Transaction {
        id: dto.id.clone(),
        timestamp: timestamp_value_or_now(&dto.timestamp),
        items: dto
            .items
            .iter()
            .map(|item| TransactionItem {
                product_id: item.product_id.clone(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                price: finite_or_zero(item.price),
                subtotal: finite_or_zero(item.subtotal),
            })
            .collect(),
        total: finite_or_zero(dto.total),
        payment_method: payment_method_from_backend(dto.payment_method),
        payment_status: payment_status_from_backend(dto.payment_status),
        customer: dto.customer.as_ref().map(customer_from_dto),
        tx_hash: dto.tx_hash.clone(),
        receipt_sent: dto.receipt_sent,
        change: dto.change.filter(|change| change.is_finite()),
        crypto_currency: dto.crypto_currency.clone(),
        crypto_amount: (!dto.crypto_amount.is_null()).then(|| parse_number_or_zero(&dto.crypto_amount)),
        card_info: dto.card_info.as_ref().map(card_info_from_dto),
        created_at: optional_timestamp(&dto.created_at),
        updated_at: optional_timestamp(&dto.updated_at),
    }
}

pub fn transaction_request(store_id: &str, data: &NewTransaction) -> CreateTransactionRequest {
    CreateTransactionRequest {
        store_id: store_id.to_owned(),
        items: data
            .items
            .iter()
            .map(|item| TransactionItemDto {
                product_id: item.product_id.clone(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                price: item.price,
                subtotal: item.subtotal,
            })
            .collect(),
        total: data.total,
        payment_method: payment_method_to_backend(data.payment_method),
        payment_status: payment_status_to_backend(data.payment_status),
        customer: data.customer.as_ref().map(|customer| customer_to_dto(customer, Some(store_id))),
        tx_hash: data.tx_hash.clone(),
        change: data.change,
        crypto_currency: data.crypto_currency.clone(),
        crypto_amount: data.crypto_amount,
        card_info: data.card_info.as_ref().map(card_info_to_dto),
    }
}

// ── defi ─────────────────────────────────────────────────────────────

pub fn position_from_dto(dto: &DefiPositionDto) -> DefiPosition {
    DefiPosition {
        id: Some(dto.id.clone()),
        pool_id: dto.pool_id.clone(),
        amount: parse_number_or_zero(&dto.amount),
        value: parse_number_or_zero(&dto.value),
        rewards: parse_number_or_zero(&dto.rewards),
        timestamp: timestamp_value_or_now(&dto.timestamp),
        tx_hash: dto.tx_hash.clone(),
    }
}

pub fn pool_from_dto(dto: &DefiPoolDto) -> DefiPool {
    DefiPool {
        id: dto.id.clone(),
        name: dto.name.clone(),
        apy: finite_or_zero(dto.apy),
        tvl: finite_or_zero(dto.tvl),
        asset: dto.asset.clone(),
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
