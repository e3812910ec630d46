//! Local stand-in for the extension, used in offline/demo mode and tests.
//!
//! Keys are generated in-process and signatures are real ed25519, but nothing
//! is broadcast anywhere.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ed25519_dalek::{Signature, Signer as _, SigningKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use zeroize::Zeroize;

use crate::{
    BalanceResult, ConnectResult, SignedTransaction, StorageResult, UnsignedTransaction,
    WalletBridge, WalletError, WalletStorageData, hex_lower,
};

const SIGNING_DOMAIN: &[u8] = b"warungpay:v1:transaction:";
const DEFAULT_DEV_BALANCE: f64 = 1_000.0;

#[derive(Debug)]
struct DevState {
    connected: bool,
    balance: f64,
}

pub struct DevWalletBridge {
    signing_key: SigningKey,
    state: Mutex<DevState>,
}

impl DevWalletBridge {
    pub fn new_random() -> Self {
        let mut rng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    pub fn from_secret_key_bytes(mut secret_key: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret_key);
        secret_key.zeroize();
        Self::from_signing_key(signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            state: Mutex::new(DevState {
                connected: false,
                balance: DEFAULT_DEV_BALANCE,
            }),
        }
    }

    pub fn with_balance(self, balance: f64) -> Self {
        self.lock().balance = balance;
        self
    }

    /// `0x` + first 20 bytes of sha256(public key).
    pub fn wallet_address(&self) -> String {
        let digest = Sha256::digest(self.signing_key.verifying_key().to_bytes());
        format!("0x{}", hex_lower(&digest[..20]))
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Deduct a spent amount so balance polling shows movement.
    fn debit(&self, amount: f64) -> Result<(), WalletError> {
        let mut state = self.lock();
        if amount > state.balance {
            return Err(WalletError::Rejected("insufficient balance".to_owned()));
        }
        state.balance -= amount;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DevState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WalletBridge for DevWalletBridge {
    fn name(&self) -> &str {
        "dev"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<ConnectResult, WalletError> {
        let mut state = self.lock();
        state.connected = true;
        Ok(ConnectResult {
            success: true,
            address: Some(self.wallet_address()),
            balance: Some(state.balance),
        })
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.lock().connected = false;
        Ok(())
    }

    async fn get_balance(&self) -> Result<BalanceResult, WalletError> {
        let state = self.lock();
        if !state.connected {
            return Ok(BalanceResult {
                success: false,
                balance: None,
            });
        }
        Ok(BalanceResult {
            success: true,
            balance: Some(state.balance),
        })
    }

    async fn get_storage(&self) -> Result<StorageResult, WalletError> {
        let state = self.lock();
        Ok(StorageResult {
            success: true,
            data: Some(WalletStorageData {
                address: state.connected.then(|| self.wallet_address()),
                is_connected: state.connected,
                balance: Some(state.balance),
            }),
        })
    }

    async fn sign_transaction(&self, txn: &UnsignedTransaction) -> Result<SignedTransaction, WalletError> {
        if !self.is_connected() {
            return Err(WalletError::Rejected("wallet is not connected".to_owned()));
        }
        if !txn.amount.is_finite() || txn.amount <= 0.0 {
            return Err(WalletError::Rejected("amount must be positive".to_owned()));
        }
        if txn.to.trim().is_empty() {
            return Err(WalletError::Rejected("recipient is required".to_owned()));
        }

        let payload = serde_json::to_string(txn).map_err(|err| WalletError::Bridge(err.to_string()))?;

        let mut signing_input = Vec::with_capacity(SIGNING_DOMAIN.len() + payload.len());
        signing_input.extend_from_slice(SIGNING_DOMAIN);
        signing_input.extend_from_slice(payload.as_bytes());

        let signature: Signature = self.signing_key.sign(&signing_input);
        let signature_bytes = signature.to_bytes();
        let tx_hash = format!("0x{}", hex_lower(&Sha256::digest(signature_bytes)));

        self.debit(txn.amount)?;
        debug!(tx_hash = %tx_hash, to = %txn.to, "dev wallet signed transaction");

        Ok(SignedTransaction {
            tx_hash,
            signature: STANDARD.encode(signature_bytes),
            payload,
        })
    }
}
