//! Capability surface of the browser-extension wallet.
//!
//! The extension is optional: hosts without one resolve to `None` once at
//! startup and the rest of the client treats that as the normal case.

pub mod dev;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use dev::DevWalletBridge;

/// Names an extension may inject itself under, probed in this order.
pub const INJECTED_BRIDGE_NAMES: [&str; 2] = ["midenWallet", "midenSimpleWallet"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WalletError {
    #[error("wallet extension is not available")]
    Unavailable,
    #[error("wallet request rejected: {0}")]
    Rejected(String),
    #[error("wallet bridge error: {0}")]
    Bridge(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub success: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResult {
    pub success: bool,
    #[serde(default)]
    pub balance: Option<f64>,
}

/// What the extension remembers about an existing connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletStorageData {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub balance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<WalletStorageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub to: String,
    pub amount: f64,
    pub asset: String,
    #[serde(default)]
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub tx_hash: String,
    pub signature: String,
    pub payload: String,
}

#[async_trait]
pub trait WalletBridge: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    async fn connect(&self) -> Result<ConnectResult, WalletError>;
    async fn disconnect(&self) -> Result<(), WalletError>;
    async fn get_balance(&self) -> Result<BalanceResult, WalletError>;
    async fn get_storage(&self) -> Result<StorageResult, WalletError>;
    async fn sign_transaction(&self, txn: &UnsignedTransaction) -> Result<SignedTransaction, WalletError>;
}

/// The environment the client runs in, as far as wallet injection goes.
pub trait ExtensionHost: Send + Sync {
    fn injected_bridge(&self, name: &str) -> Option<Arc<dyn WalletBridge>>;
    /// A generic extension runtime is present even if no bridge object is.
    fn has_extension_runtime(&self) -> bool;
}

/// Host with no extension at all (CLI, tests, server-side rendering).
#[derive(Default)]
pub struct NoExtensionHost;

impl ExtensionHost for NoExtensionHost {
    fn injected_bridge(&self, _name: &str) -> Option<Arc<dyn WalletBridge>> {
        None
    }

    fn has_extension_runtime(&self) -> bool {
        false
    }
}

/// Host whose injected bridges are registered up front.
#[derive(Default)]
pub struct StaticExtensionHost {
    bridges: HashMap<String, Arc<dyn WalletBridge>>,
    runtime: bool,
}

impl StaticExtensionHost {
    pub fn inject(&mut self, name: &str, bridge: Arc<dyn WalletBridge>) {
        self.bridges.insert(name.to_owned(), bridge);
        self.runtime = true;
    }

    pub fn with_runtime(mut self, present: bool) -> Self {
        self.runtime = present;
        self
    }
}

impl ExtensionHost for StaticExtensionHost {
    fn injected_bridge(&self, name: &str) -> Option<Arc<dyn WalletBridge>> {
        self.bridges.get(name).cloned()
    }

    fn has_extension_runtime(&self) -> bool {
        self.runtime
    }
}

pub enum BridgeDetection {
    Injected {
        name: &'static str,
        bridge: Arc<dyn WalletBridge>,
    },
    /// An extension runtime answered but exposed no usable bridge.
    RuntimeOnly,
    Dev(Arc<dyn WalletBridge>),
    Absent,
}

impl BridgeDetection {
    pub fn extension_present(&self) -> bool {
        matches!(self, Self::Injected { .. } | Self::RuntimeOnly)
    }

    pub fn into_bridge(self) -> Option<Arc<dyn WalletBridge>> {
        match self {
            Self::Injected { bridge, .. } | Self::Dev(bridge) => Some(bridge),
            Self::RuntimeOnly | Self::Absent => None,
        }
    }
}

/// The one place that decides which bridge, if any, the client talks to.
///
/// Injected bridges win. `force_dev` substitutes [`DevWalletBridge`] when
/// nothing is injected.
pub fn detect_wallet_bridge(host: &dyn ExtensionHost, force_dev: bool) -> BridgeDetection {
    for name in INJECTED_BRIDGE_NAMES {
        if let Some(bridge) = host.injected_bridge(name) {
            info!(bridge = name, "wallet extension detected");
            return BridgeDetection::Injected { name, bridge };
        }
    }

    if force_dev {
        info!("no wallet extension injected; using dev wallet bridge");
        return BridgeDetection::Dev(Arc::new(DevWalletBridge::new_random()));
    }

    if host.has_extension_runtime() {
        debug!("extension runtime present without a wallet bridge");
        return BridgeDetection::RuntimeOnly;
    }

    debug!("no wallet extension present");
    BridgeDetection::Absent
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_host_yields_no_bridge() {
        let detection = detect_wallet_bridge(&NoExtensionHost, false);
        assert!(!detection.extension_present());
        assert!(detection.into_bridge().is_none());
    }

    #[test]
    fn forced_dev_bridge_when_nothing_injected() {
        let detection = detect_wallet_bridge(&NoExtensionHost, true);
        assert!(matches!(detection, BridgeDetection::Dev(_)));
        let bridge = detection.into_bridge().expect("dev bridge");
        assert_eq!(bridge.name(), "dev");
    }

    #[test]
    fn primary_injection_name_wins() {
        let mut host = StaticExtensionHost::default();
        host.inject("midenSimpleWallet", Arc::new(DevWalletBridge::new_random()));
        host.inject("midenWallet", Arc::new(DevWalletBridge::new_random()));

        match detect_wallet_bridge(&host, true) {
            BridgeDetection::Injected { name, .. } => assert_eq!(name, "midenWallet"),
            _ => panic!("expected injected bridge"),
        }
    }

    #[test]
    fn fallback_injection_name_is_probed() {
        let mut host = StaticExtensionHost::default();
        host.inject("midenSimpleWallet", Arc::new(DevWalletBridge::new_random()));

        match detect_wallet_bridge(&host, false) {
            BridgeDetection::Injected { name, .. } => assert_eq!(name, "midenSimpleWallet"),
            _ => panic!("expected injected bridge"),
        }
    }

    #[test]
    fn runtime_without_bridge_is_reported_but_unusable() {
        let host = StaticExtensionHost::default().with_runtime(true);
        let detection = detect_wallet_bridge(&host, false);
        assert!(detection.extension_present());
        assert!(detection.into_bridge().is_none());
    }
}
