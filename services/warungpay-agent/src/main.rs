//! WarungPay agent - drives the client store from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in with a wallet address (or omit it to connect the wallet bridge)
//! warungpay-agent login 0xabc...
//!
//! # Manage the catalog and sell
//! warungpay-agent products add "Kopi Susu" 8000 --stock 20
//! warungpay-agent sell <product-id> --quantity 2 --tendered 20000
//!
//! # Keep the wallet balance fresh until Ctrl-C
//! warungpay-agent watch
//! ```
//!
//! Configuration comes from the environment (see `wp_store::config`); a
//! `.env` file in the working directory is loaded first.

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{info, warn};
use wp_format::{format_currency, short_address};
use wp_storage::{ClientStorage, RocksDbStorage};
use wp_store::model::{CheckoutRequest, NewProduct, PaymentDetails};
use wp_store::{AppStore, StoreConfig, StoreDeps, StoreMode, TracingNotifier};
use wp_wallet_bridge::{NoExtensionHost, detect_wallet_bridge};

#[derive(Parser)]
#[command(name = "warungpay-agent")]
#[command(author, version, about = "WarungPay point-of-sale agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in; without an address the wallet bridge is connected instead
    Login {
        wallet_address: Option<String>,
    },
    /// Register a wallet and create its default store
    Register {
        wallet_address: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Connect the wallet bridge
    Connect,
    /// Forget the wallet and end the session
    Logout,
    /// Show session, store and wallet state
    Status,
    /// Manage the product catalog
    Products {
        #[command(subcommand)]
        action: ProductAction,
    },
    /// Sell a single product through checkout
    Sell {
        product_id: String,
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
        #[arg(short, long, value_enum, default_value_t = Method::Cash)]
        method: Method,
        /// Cash handed over; defaults to the exact total
        #[arg(long)]
        tendered: Option<f64>,
        /// Crypto amount for `--method crypto`
        #[arg(long)]
        amount: Option<f64>,
    },
    /// List recorded transactions
    History,
    /// DeFi pools and positions
    Defi {
        #[command(subcommand)]
        action: DefiAction,
    },
    /// Poll the wallet balance and extension availability until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum ProductAction {
    /// List cached products
    List,
    /// Add a product
    Add {
        name: String,
        price: f64,
        #[arg(long, default_value_t = 0)]
        stock: u32,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long)]
        barcode: Option<String>,
    },
    /// Delete a product
    Delete { product_id: String },
}

#[derive(Subcommand)]
enum DefiAction {
    /// List pools
    Pools,
    /// Show positions for the current store
    Positions,
    Deposit { pool_id: String, amount: f64 },
    Withdraw { pool_id: String, amount: f64 },
    Claim { pool_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Cash,
    Card,
    Crypto,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::from_env().context("load configuration")?;
    let store = build_store(config)?;
    run(&store, cli.command).await
}

fn build_store(config: StoreConfig) -> anyhow::Result<Arc<AppStore>> {
    let storage: Arc<dyn ClientStorage> = Arc::new(RocksDbStorage::open_default(&config.storage_path)?);
    let backend = config.backend_for_mode(
        storage.clone(),
        Some(Arc::new(|| warn!("session expired; sign in again"))),
    );

    let detection = detect_wallet_bridge(&NoExtensionHost, config.force_dev_wallet);
    let extension_present = detection.extension_present();
    info!(
        mode = ?config.mode,
        storage = %config.storage_path,
        extension_present,
        "warungpay agent starting"
    );

    let store = AppStore::shared(
        StoreDeps {
            backend,
            storage,
            wallet_bridge: detection.into_bridge(),
            notifier: Arc::new(TracingNotifier),
        },
        config,
    );
    store.set_extension_available(extension_present);
    Ok(store)
}

async fn run(store: &Arc<AppStore>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login { wallet_address } => {
            match wallet_address {
                Some(address) => {
                    if !store.login(&address).await {
                        bail!("login failed");
                    }
                }
                None => {
                    store.connect_wallet().await?;
                }
            }
            print_status(store);
        }
        Commands::Register {
            wallet_address,
            name,
            email,
        } => {
            let profile = wp_store::RegistrationProfile { name, email };
            if !store.register(&wallet_address, Some(profile)).await {
                bail!("registration failed");
            }
            print_status(store);
        }
        Commands::Connect => {
            let wallet = store.connect_wallet().await?;
            println!("connected {}", wallet.address.as_deref().map(short_address).unwrap_or_default());
        }
        Commands::Logout => {
            store.disconnect_wallet();
            println!("signed out");
        }
        Commands::Status => {
            restore_session(store).await;
            print_status(store);
        }
        Commands::Products { action } => {
            restore_session(store).await;
            products(store, action).await?;
        }
        Commands::Sell {
            product_id,
            quantity,
            method,
            tendered,
            amount,
        } => {
            restore_session(store).await;
            sell(store, &product_id, quantity, method, tendered, amount).await?;
        }
        Commands::History => {
            restore_session(store).await;
            let transactions = store.read(|state| state.transactions().to_vec());
            println!("{}", serde_json::to_string_pretty(&transactions)?);
        }
        Commands::Defi { action } => {
            restore_session(store).await;
            defi(store, action).await?;
        }
        Commands::Watch => {
            restore_session(store).await;
            store.auto_reconnect().await;
            let config = store.config().clone();
            let _balance = store.spawn_balance_poller(config.balance_poll_interval);
            let _extension = store.spawn_extension_watch(config.extension_check_interval);
            info!("watching wallet; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
            info!("stopping");
        }
    }
    Ok(())
}

async fn restore_session(store: &AppStore) {
    store.initialize_auth().await;
    if !store.is_authenticated() {
        warn!("not signed in; run `warungpay-agent login` first");
    }
}

async fn products(store: &AppStore, action: ProductAction) -> anyhow::Result<()> {
    match action {
        ProductAction::List => {
            let currency = currency(store);
            for product in store.read(|state| state.products().to_vec()) {
                println!(
                    "{}  {:<24} {:>14}  stock {}",
                    product.id,
                    product.name,
                    format_currency(product.price, currency),
                    product.stock
                );
            }
        }
        ProductAction::Add {
            name,
            price,
            stock,
            category,
            barcode,
        } => {
            let product = store
                .add_product(NewProduct {
                    name,
                    price,
                    stock,
                    category,
                    barcode,
                    ..NewProduct::default()
                })
                .await?;
            println!("added {} ({})", product.name, product.id);
        }
        ProductAction::Delete { product_id } => {
            store.delete_product(&product_id).await?;
            println!("deleted {product_id}");
        }
    }
    Ok(())
}

async fn sell(
    store: &AppStore,
    product_id: &str,
    quantity: u32,
    method: Method,
    tendered: Option<f64>,
    amount: Option<f64>,
) -> anyhow::Result<()> {
    let product = store
        .current_store()
        .and_then(|current| current.product(product_id).cloned())
        .with_context(|| format!("unknown product {product_id}"))?;

    store.clear_cart().await?;
    store.add_to_cart(&product, quantity)?;
    let total = store.cart_total();

    let payment = match method {
        Method::Cash => PaymentDetails::Cash {
            tendered: tendered.unwrap_or(total),
        },
        Method::Card => PaymentDetails::Card { card_info: None },
        Method::Crypto => {
            store.connect_wallet().await?;
            PaymentDetails::Crypto {
                currency: "MIDEN".to_owned(),
                amount: amount.context("--amount is required for crypto payments")?,
            }
        }
    };

    let transaction = store
        .checkout(CheckoutRequest {
            payment,
            customer: None,
        })
        .await?;
    let currency = currency(store);
    println!(
        "sold {} x {} for {} ({})",
        quantity,
        product.name,
        format_currency(transaction.total, currency),
        transaction.id
    );
    if let Some(change) = transaction.change {
        println!("change {}", format_currency(change, currency));
    }
    Ok(())
}

async fn defi(store: &AppStore, action: DefiAction) -> anyhow::Result<()> {
    match action {
        DefiAction::Pools => {
            for pool in store.load_defi_pools().await? {
                println!("{:<14} {:<24} apy {:>5.2}%  tvl {}", pool.id, pool.name, pool.apy, pool.tvl);
            }
        }
        DefiAction::Positions => {
            let positions = store.read(|state| state.defi_positions().to_vec());
            println!("{}", serde_json::to_string_pretty(&positions)?);
        }
        DefiAction::Deposit { pool_id, amount } => {
            store.connect_wallet().await?;
            let position = store.deposit(&pool_id, amount).await?;
            println!("deposited; position now {}", position.amount);
        }
        DefiAction::Withdraw { pool_id, amount } => {
            store.connect_wallet().await?;
            store.withdraw(&pool_id, amount).await?;
            println!("withdrew {amount} from {pool_id}");
        }
        DefiAction::Claim { pool_id } => {
            let claimed = store.claim_rewards(&pool_id).await?;
            println!("claimed {claimed}");
        }
    }
    Ok(())
}

fn currency(store: &AppStore) -> wp_format::Currency {
    store.read(|state| {
        state
            .business_info
            .as_ref()
            .map(|info| info.currency)
            .unwrap_or_default()
    })
}

fn print_status(store: &AppStore) {
    let state = store.snapshot();
    let mode = match store.config().mode {
        StoreMode::Online => "online",
        StoreMode::Offline => "offline",
    };
    let status = json!({
        "mode": mode,
        "authenticated": state.is_authenticated(),
        "user": state.session.current_user.as_ref().map(|user| &user.wallet_address),
        "store": state.current_store.as_ref().map(|current| json!({
            "id": current.store_id,
            "name": current.business_info.name,
            "products": current.products.len(),
            "transactions": current.transactions.len(),
            "totalEarnings": current.total_earnings,
            "totalDefiValue": current.total_defi_value,
            "localOnly": current.local_only,
        })),
        "wallet": {
            "connected": state.wallet.is_connected,
            "address": state.wallet.address,
            "balance": state.wallet.balance.main_asset,
        },
        "connection": format!("{:?}", state.connection_status),
        "cartLines": state.cart.len(),
    });
    match serde_json::to_string_pretty(&status) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => warn!("failed to render status: {}", err),
    }
}
