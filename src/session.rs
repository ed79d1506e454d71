//! Signed-in session: the auth state plus one mission store and one answer
//! store, all wired to the same gateway, clock and credential store.
//!
//! Logging out (or failing token verification) resets every store, which bumps
//! their epochs so responses and poll ticks still in flight are discarded.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::answer::AnswerStore;
use crate::api::{ApiGateway, HttpGateway};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, UploadLimits};
use crate::credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::domain::User;
use crate::error::{ClientResult, StoreError};
use crate::mission::MissionStore;

#[derive(Clone, Debug, Default)]
pub struct AuthState {
    pub user: Option<User>,
    pub error: Option<StoreError>,
}

#[derive(Clone)]
pub struct Session {
    api: Arc<dyn ApiGateway>,
    credentials: Arc<dyn CredentialStore>,
    auth: Arc<RwLock<AuthState>>,
    missions: MissionStore,
    answers: AnswerStore,
}

impl Session {
    pub fn new(
        api: Arc<dyn ApiGateway>,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            missions: MissionStore::new(api.clone(), clock),
            answers: AnswerStore::new(api.clone(), limits),
            api,
            credentials,
            auth: Arc::new(RwLock::new(AuthState::default())),
        }
    }

    /// Production wiring: HTTP gateway, system clock, token file if configured.
    pub fn from_config(cfg: &ClientConfig) -> ClientResult<Self> {
        let credentials: Arc<dyn CredentialStore> = match &cfg.token_path {
            Some(path) => Arc::new(FileCredentialStore::new(path.clone())),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let api = Arc::new(HttpGateway::new(cfg, credentials.clone())?);
        Ok(Self::new(api, credentials, Arc::new(SystemClock), cfg.uploads.clone()))
    }

    pub fn api(&self) -> &Arc<dyn ApiGateway> {
        &self.api
    }

    pub fn missions(&self) -> &MissionStore {
        &self.missions
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    pub async fn user(&self) -> Option<User> {
        self.auth.read().await.user.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.read().await.user.is_some()
    }

    pub async fn auth_error(&self) -> Option<StoreError> {
        self.auth.read().await.error.clone()
    }

    #[instrument(level = "info", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<User, StoreError> {
        // A new sign-in never inherits another user's mission or answer state.
        self.reset_stores().await;
        let out = match self.api.login(username, password).await {
            Ok(out) => out,
            Err(e) => {
                let err = StoreError::from(&e);
                warn!(target: "session", error = %e, "Login failed");
                self.auth.write().await.error = Some(err.clone());
                return Err(err);
            }
        };
        if let Err(e) = self.credentials.save(&out.access_token) {
            let err = StoreError::from(&e);
            warn!(target: "session", error = %e, "Could not persist token");
            self.auth.write().await.error = Some(err.clone());
            return Err(err);
        }
        info!(target: "session", user_id = out.user.id, "Logged in");
        let mut auth = self.auth.write().await;
        auth.user = Some(out.user.clone());
        auth.error = None;
        Ok(out.user)
    }

    /// Check the stored token. Any failure signs out silently.
    #[instrument(level = "info", skip(self))]
    pub async fn verify_token(&self) -> Option<User> {
        if self.credentials.load().is_none() {
            debug!(target: "session", "No stored token");
            self.auth.write().await.user = None;
            return None;
        }
        match self.api.verify_token().await {
            Ok(user) => {
                info!(target: "session", user_id = user.id, "Stored token verified");
                let mut auth = self.auth.write().await;
                auth.user = Some(user.clone());
                auth.error = None;
                Some(user)
            }
            Err(e) => {
                debug!(target: "session", error = %e, "Stored token rejected");
                self.clear_local().await;
                None
            }
        }
    }

    #[instrument(level = "info", skip(self))]
    pub async fn logout(&self) {
        if self.credentials.load().is_some() {
            if let Err(e) = self.api.logout().await {
                warn!(target: "session", error = %e, "Backend logout failed; clearing local session anyway");
            }
        }
        self.clear_local().await;
        info!(target: "session", "Logged out");
    }

    async fn clear_local(&self) {
        if let Err(e) = self.credentials.clear() {
            warn!(target: "session", error = %e, "Could not remove stored token");
        }
        *self.auth.write().await = AuthState::default();
        self.reset_stores().await;
    }

    async fn reset_stores(&self) {
        self.answers.reset().await;
        self.missions.reset().await;
    }
}
