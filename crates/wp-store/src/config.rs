//! Store configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All optional:
//! - `WARUNGPAY_MODE` - `online` or `offline` (default: online)
//! - `WARUNGPAY_API_URL` - backend base URL including `/api`
//! - `WARUNGPAY_STORAGE_PATH` - client storage directory (default: ./data/warungpay)
//! - `WARUNGPAY_BALANCE_POLL_SECS` - wallet balance refresh interval (default: 30)
//! - `WARUNGPAY_EXTENSION_CHECK_SECS` - extension availability check interval (default: 10)
//! - `WARUNGPAY_FORCE_DEV_WALLET` - use the dev wallet bridge when no extension is injected
//! - `WARUNGPAY_DEFI_ASSET_PRICE` - fixed price of the DeFi asset in store currency (default: 1)

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use wp_backend::{BackendApi, OfflineBackend};
use wp_backend_http::{HttpBackend, UnauthorizedHook};
use wp_storage::ClientStorage;

pub const DEFAULT_STORAGE_PATH: &str = "./data/warungpay";
pub const DEFAULT_DEFI_ASSET_PRICE: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreMode {
    #[default]
    Online,
    /// Everything runs against [`OfflineBackend`]; nothing leaves the process.
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub mode: StoreMode,
    pub api_url: Option<String>,
    pub storage_path: String,
    pub balance_poll_interval: Duration,
    pub extension_check_interval: Duration,
    pub force_dev_wallet: bool,
    pub defi_asset_price: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::Online,
            api_url: None,
            storage_path: DEFAULT_STORAGE_PATH.to_string(),
            balance_poll_interval: Duration::from_secs(30),
            extension_check_interval: Duration::from_secs(10),
            force_dev_wallet: false,
            defi_asset_price: DEFAULT_DEFI_ASSET_PRICE,
        }
    }
}

impl StoreConfig {
    pub fn offline() -> Self {
        Self {
            mode: StoreMode::Offline,
            force_dev_wallet: true,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mode = match lookup("WARUNGPAY_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("online") => StoreMode::Online,
            Some("offline") | Some("demo") => StoreMode::Offline,
            Some(other) => {
                return Err(ConfigError::InvalidEnvVar(
                    "WARUNGPAY_MODE".to_string(),
                    format!("expected online or offline, got {other}"),
                ));
            }
        };

        let force_dev_wallet = match lookup("WARUNGPAY_FORCE_DEV_WALLET") {
            Some(raw) => parse_bool("WARUNGPAY_FORCE_DEV_WALLET", &raw)?,
            None => mode == StoreMode::Offline,
        };

        let defi_asset_price = match lookup("WARUNGPAY_DEFI_ASSET_PRICE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|price| price.is_finite() && *price > 0.0)
                .ok_or_else(|| {
                    ConfigError::InvalidEnvVar(
                        "WARUNGPAY_DEFI_ASSET_PRICE".to_string(),
                        format!("expected a positive number, got {raw}"),
                    )
                })?,
            None => defaults.defi_asset_price,
        };

        Ok(Self {
            mode,
            api_url: lookup("WARUNGPAY_API_URL").filter(|url| !url.trim().is_empty()),
            storage_path: lookup("WARUNGPAY_STORAGE_PATH").unwrap_or(defaults.storage_path),
            balance_poll_interval: parse_secs(
                "WARUNGPAY_BALANCE_POLL_SECS",
                lookup("WARUNGPAY_BALANCE_POLL_SECS"),
                defaults.balance_poll_interval,
            )?,
            extension_check_interval: parse_secs(
                "WARUNGPAY_EXTENSION_CHECK_SECS",
                lookup("WARUNGPAY_EXTENSION_CHECK_SECS"),
                defaults.extension_check_interval,
            )?,
            force_dev_wallet,
            defi_asset_price,
        })
    }

    /// Builds the backend for the configured mode. Both modes share the same
    /// client storage so the token key means the same thing everywhere.
    pub fn backend_for_mode(
        &self,
        storage: Arc<dyn ClientStorage>,
        on_unauthorized: Option<UnauthorizedHook>,
    ) -> Arc<dyn BackendApi> {
        match self.mode {
            StoreMode::Online => {
                let backend = HttpBackend::new(self.api_url.clone(), storage);
                match on_unauthorized {
                    Some(hook) => Arc::new(backend.with_unauthorized_hook(hook)),
                    None => Arc::new(backend),
                }
            }
            StoreMode::Offline => Arc::new(
                OfflineBackend::new(storage)
                    .with_demo_catalog(true)
                    .with_asset_price(self.defi_asset_price),
            ),
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got {other}"),
        )),
    }
}

fn parse_secs(key: &str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a positive number of seconds, got {raw}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn offline_mode_forces_dev_wallet_unless_overridden() {
        let config = StoreConfig::from_lookup(lookup(&[("WARUNGPAY_MODE", "offline")])).unwrap();
        assert_eq!(config.mode, StoreMode::Offline);
        assert!(config.force_dev_wallet);

        let config = StoreConfig::from_lookup(lookup(&[
            ("WARUNGPAY_MODE", "offline"),
            ("WARUNGPAY_FORCE_DEV_WALLET", "false"),
        ]))
        .unwrap();
        assert!(!config.force_dev_wallet);
    }

    #[test]
    fn intervals_and_price_are_parsed() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("WARUNGPAY_BALANCE_POLL_SECS", "45"),
            ("WARUNGPAY_EXTENSION_CHECK_SECS", "5"),
            ("WARUNGPAY_DEFI_ASSET_PRICE", "15000"),
            ("WARUNGPAY_API_URL", "https://api.warungpay.test/api"),
        ]))
        .unwrap();
        assert_eq!(config.balance_poll_interval, Duration::from_secs(45));
        assert_eq!(config.extension_check_interval, Duration::from_secs(5));
        assert_eq!(config.defi_asset_price, 15000.0);
        assert_eq!(config.api_url.as_deref(), Some("https://api.warungpay.test/api"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(StoreConfig::from_lookup(lookup(&[("WARUNGPAY_MODE", "hybrid")])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[("WARUNGPAY_BALANCE_POLL_SECS", "0")])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[("WARUNGPAY_DEFI_ASSET_PRICE", "-1")])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[("WARUNGPAY_FORCE_DEV_WALLET", "maybe")])).is_err());
    }
}
