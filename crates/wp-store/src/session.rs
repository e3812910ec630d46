//! Session lifecycle: token verification, login, register, logout.

use tracing::{debug, info, warn};
use wp_api_types::{AuthRequest, AuthResponse, ProfilePatch, StoreDto};

use crate::convert;
use crate::error::StoreError;
use crate::model::{Session, User};
use crate::notify::LocalizedText;
use crate::state::LoadFlag;
use crate::store::AppStore;

#[derive(Debug, Clone, Default)]
pub struct RegistrationProfile {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl AppStore {
    /// Restores a session from the persisted token.
    pub async fn initialize_auth(&self) {
        let Some(_guard) = self.begin_load(LoadFlag::Auth) else {
            debug!("auth initialization already in flight");
            return;
        };

        let Some(token) = self.stored_token() else {
            debug!("no persisted auth token");
            return;
        };

        match self.backend.verify_token().await {
            Ok(user) => {
                let wallet_address = user.wallet_address.clone();
                self.update(|state| {
                    state.session = Session {
                        is_authenticated: true,
                        auth_token: Some(token),
                        current_user: Some(convert::user_from_dto(&user)),
                    };
                });
                info!(wallet = %wallet_address, "session restored");
                self.bootstrap_store(&wallet_address, &user.stores).await;
            }
            Err(err) => {
                warn!(error = %err, "token verification failed; wiping session");
                self.reset_everything();
            }
        }
    }

    /// Never fails: errors become a notification and `false`.
    pub async fn login(&self, wallet_address: &str) -> bool {
        let response = match self.backend.login(wallet_address).await {
            Ok(response) => response,
            Err(err) => {
                warn!(wallet = wallet_address, error = %err, "login failed");
                self.notify_error(LocalizedText::new(
                    "Login failed. Please try again.",
                    "Gagal masuk. Silakan coba lagi.",
                ));
                return false;
            }
        };

        let stores = response.user.stores.clone();
        self.start_session(response);
        self.bootstrap_store(wallet_address, &stores).await;
        self.refresh_marketplace_stats().await;
        info!(wallet = wallet_address, "logged in");
        true
    }

    /// Like [`Self::login`] but always creates a default store.
    pub async fn register(&self, wallet_address: &str, profile: Option<RegistrationProfile>) -> bool {
        let profile = profile.unwrap_or_default();
        let request = AuthRequest {
            wallet_address: wallet_address.to_owned(),
            name: profile.name,
            email: profile.email,
        };

        let response = match self.backend.register(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(wallet = wallet_address, error = %err, "registration failed");
                self.notify_error(LocalizedText::new(
                    "Registration failed. Please try again.",
                    "Pendaftaran gagal. Silakan coba lagi.",
                ));
                return false;
            }
        };

        self.start_session(response);
        self.create_default_store(wallet_address).await;
        self.notify_success(LocalizedText::new("Welcome to WarungPay!", "Selamat datang di WarungPay!"));
        true
    }

    /// Resets every session-owned field in one critical section, then drops
    /// the stored credentials.
    pub fn logout(&self) {
        self.reset_everything();
        info!("logged out");
    }

    pub async fn refresh_profile(&self) -> Result<User, StoreError> {
        let dto = self.backend.profile().await?;
        let user = convert::user_from_dto(&dto);
        self.update(|state| state.session.current_user = Some(user.clone()));
        Ok(user)
    }

    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<User, StoreError> {
        if !self.is_authenticated() {
            return Err(StoreError::NotAuthenticated);
        }
        let dto = match self.backend.update_profile(&patch).await {
            Ok(dto) => dto,
            Err(err) => {
                return Err(self.write_failed(
                    "update_profile",
                    LocalizedText::new("Failed to update profile", "Gagal memperbarui profil"),
                    err,
                ));
            }
        };
        let user = convert::user_from_dto(&dto);
        self.update(|state| state.session.current_user = Some(user.clone()));
        Ok(user)
    }

    fn start_session(&self, response: AuthResponse) {
        self.store_token(&response.token);
        self.update(|state| {
            state.session = Session {
                is_authenticated: true,
                auth_token: Some(response.token),
                current_user: Some(convert::user_from_dto(&response.user)),
            };
        });
    }

    /// Picks the store for a freshly authenticated wallet.
    async fn bootstrap_store(&self, wallet_address: &str, backend_stores: &[StoreDto]) {
        let persisted = self.read(|state| {
            state
                .current_store
                .as_ref()
                .filter(|store| store.wallet_address == wallet_address && !store.local_only)
                .map(|store| store.store_id.clone())
        });

        if let Some(store_id) = persisted {
            debug!(store_id = %store_id, "refreshing persisted store");
            self.refresh_store_collections(&store_id).await;
        } else if !backend_stores.is_empty() {
            self.initialize_store(wallet_address).await;
        } else {
            self.create_default_store(wallet_address).await;
        }
    }

    pub(crate) fn reset_everything(&self) {
        self.update(|state| state.reset_session());
        self.clear_credentials();
    }
}

#[cfg(test)]
mod tests {
    use crate::model::NewProduct;
    use crate::testing::Harness;
    use wp_api_types::ProfilePatch;
    use wp_backend::ApiError;
    use wp_storage::{AUTH_TOKEN_KEY, ClientStorage, MANUAL_CONNECT_KEY};

    #[tokio::test]
    async fn login_creates_a_default_store_and_persists_token() -> anyhow::Result<()> {
        let h = Harness::new();
        assert!(h.store.login("0xabc").await);

        let state = h.store.snapshot();
        assert!(state.is_authenticated());
        let store = state.current_store.expect("store installed");
        assert_eq!(store.wallet_address, "0xabc");
        assert!(!store.local_only);
        assert!(h.storage.get_item(AUTH_TOKEN_KEY)?.is_some());
        assert!(state.marketplace_stats.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn failed_login_notifies_and_returns_false() {
        let h = Harness::new();
        h.backend.fail("login", ApiError::Transport("offline".into()));

        assert!(!h.store.login("0xabc").await);
        assert!(!h.store.is_authenticated());
        assert_eq!(h.notifier.errors(), 1);
    }

    #[tokio::test]
    async fn failed_store_creation_falls_back_to_local_store() {
        let h = Harness::new();
        h.backend.fail("create_store", ApiError::Transport("offline".into()));

        assert!(h.store.login("0xabc").await);
        let store = h.store.current_store().expect("never authenticated without a store");
        assert!(store.local_only);
    }

    #[tokio::test]
    async fn initialize_auth_restores_session_and_existing_store() -> anyhow::Result<()> {
        let h = Harness::new();
        assert!(h.store.login("0xabc").await);
        let store_id = h.store.current_store_id().expect("store");
        h.store
            .add_product(NewProduct {
                name: "Kopi".into(),
                price: 8_000.0,
                stock: 10,
                ..NewProduct::default()
            })
            .await?;

        let reloaded = h.reload();
        assert!(reloaded.is_authenticated());
        reloaded.initialize_auth().await;
        assert_eq!(reloaded.current_store_id().as_deref(), Some(store_id.as_str()));
        assert_eq!(reloaded.read(|state| state.products().len()), 1);
        assert_eq!(h.backend.calls("verify_token"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_initialization_verifies_once() {
        let h = Harness::new();
        assert!(h.store.login("0xabc").await);

        let reloaded = h.reload();
        tokio::join!(reloaded.initialize_auth(), reloaded.initialize_auth());
        assert!(reloaded.is_authenticated());
        assert_eq!(h.backend.calls("verify_token"), 1);
    }

    #[tokio::test]
    async fn rejected_token_wipes_everything() -> anyhow::Result<()> {
        let h = Harness::new();
        assert!(h.store.login("0xabc").await);
        h.storage.set_item(MANUAL_CONNECT_KEY, "true")?;
        h.backend.fail("verify_token", ApiError::Unauthorized);

        h.store.initialize_auth().await;
        let state = h.store.snapshot();
        assert!(!state.is_authenticated());
        assert!(state.current_store.is_none());
        assert_eq!(h.storage.get_item(AUTH_TOKEN_KEY)?, None);
        assert_eq!(h.storage.get_item(MANUAL_CONNECT_KEY)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn profile_update_is_written_through() -> anyhow::Result<()> {
        let h = Harness::signed_in().await;
        let user = h
            .store
            .update_profile(ProfilePatch {
                name: Some("Sri".into()),
                ..ProfilePatch::default()
            })
            .await?;
        assert_eq!(user.name.as_deref(), Some("Sri"));

        let refreshed = h.store.refresh_profile().await?;
        assert_eq!(refreshed, user);
        assert_eq!(h.store.snapshot().session.current_user, Some(user));
        Ok(())
    }

    #[tokio::test]
    async fn profile_update_requires_a_session() {
        let h = Harness::new();
        assert!(h.store.update_profile(ProfilePatch::default()).await.is_err());
        assert_eq!(h.backend.calls("update_profile"), 0);
    }

    #[tokio::test]
    async fn register_always_creates_a_store() {
        let h = Harness::new();
        assert!(h.store.register("0xnew", None).await);
        assert_eq!(h.backend.calls("create_store"), 1);
        assert_eq!(h.backend.calls("store_by_wallet"), 0);
    }
}
