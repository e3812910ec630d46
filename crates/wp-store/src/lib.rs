//! Client-side state container for the WarungPay point of sale.
//!
//! [`AppStore`] owns the session, the current store and its cached
//! collections, the local cart and the wallet connection. Every action is
//! an inherent method split across the modules below by concern.

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod notify;
pub mod state;

mod cart;
mod customers;
mod defi;
mod products;
mod session;
mod store;
mod stores;
mod transactions;
mod wallet;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, StoreConfig, StoreMode};
pub use error::StoreError;
pub use notify::{LocalizedText, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use session::RegistrationProfile;
pub use state::{AppState, ConnectionStatus, LoadFlag, PersistedSnapshot, View};
pub use store::{AppStore, StoreDeps};
pub use wallet::PollerHandle;
