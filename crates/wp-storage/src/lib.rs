use anyhow::{Context, Result};
use rocksdb::{DB, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// Key of the application snapshot (session, current store, wallet, cart...).
pub const SNAPSHOT_KEY: &str = "warungpay-storage";

/// Bearer token, stored on its own so the API client can read it without
/// decoding the snapshot.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Set once the user connects the wallet manually; gates auto-reconnect.
pub const MANUAL_CONNECT_KEY: &str = "warungpay-wallet-manual-connect";

/// Durable key/value storage that survives reloads.
///
/// Calls are synchronous, the same as browser `localStorage`.
pub trait ClientStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

pub fn load_json<T: DeserializeOwned>(storage: &dyn ClientStorage, key: &str) -> Result<Option<T>> {
    match storage.get_item(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw).with_context(|| format!("decode {key}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize>(storage: &dyn ClientStorage, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("encode {key}"))?;
    storage.set_item(key, &raw)
}

/// Reads a boolean flag. Unreadable storage counts as unset.
pub fn read_flag(storage: &dyn ClientStorage, key: &str) -> bool {
    match storage.get_item(key) {
        Ok(value) => value.as_deref() == Some("true"),
        Err(err) => {
            warn!("failed to read flag {}: {}", key, err);
            false
        }
    }
}

#[derive(Default)]
pub struct InMemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ClientStorage for InMemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let guard = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key);
        Ok(())
    }
}

pub struct RocksDbStorage {
    db: Arc<DB>,
}

impl RocksDbStorage {
    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).with_context(|| format!("open client storage at {path}"))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn key_for(key: &str) -> String {
        format!("client:{key}")
    }
}

impl ClientStorage for RocksDbStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self.db.get(Self::key_for(key).as_bytes())?;
        match value {
            Some(raw) => Ok(Some(String::from_utf8(raw).context("stored value is not utf-8")?)),
            None => Ok(None),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.db.put(Self::key_for(key).as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.db.delete(Self::key_for(key).as_bytes())?;
        Ok(())
    }
}
