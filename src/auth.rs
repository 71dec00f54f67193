//! Authentication lifecycle: credential handling, session caching with
//! expiration tracking, proactive refresh, and transparent re-authentication
//! on 401 (spec §3.1.3, §3.1.4, §4.6).

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::audit::{AuditEventKind, AuditEvent, AuditHandle, AuditOutcome};
use crate::error::{CoreError, CoreResult};
use crate::http_client::HttpClient;

/// Session lifetime from the moment of authentication (spec §3.1.4).
const SESSION_LIFETIME: Duration = Duration::from_secs(3600);
/// How long before expiry a proactive refresh is triggered.
const REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Which credential scheme the configured account uses (spec §3.1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ApiKey,
    UserToken,
}

/// Upstream-API credentials and endpoint binding (spec §3.1.3). Constructed
/// once at startup and never mutated; `access_password` never appears in
/// `Debug` output or logs courtesy of [`SecretString`].
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub access_key_id: String,
    pub access_password: SecretString,
    pub username: Option<String>,
    pub api_base_url: String,
}

impl AuthConfig {
    /// Startup validation: `username` is required under `USER_TOKEN` mode
    /// (spec §3.1.3 Invariants).
    pub fn validate(&self) -> CoreResult<()> {
        if self.mode == AuthMode::UserToken && self.username.is_none() {
            return Err(CoreError::configuration(
                "AuthConfig.username is required when mode = USER_TOKEN",
            ));
        }
        if self.access_key_id.is_empty() {
            return Err(CoreError::configuration("AuthConfig.access_key_id must not be empty"));
        }
        if self.access_password.expose_secret().is_empty() {
            return Err(CoreError::configuration(
                "AuthConfig.access_password must not be empty",
            ));
        }
        Ok(())
    }
}

/// Credential material handed to the `HTTPClient` for the next outbound
/// request (spec §4.6 `current_credentials`). A plain value, not an
/// interior reference, so a mid-request session swap can never produce a
/// torn read (spec §5.5).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub mode: AuthMode,
    pub access_key_id: String,
    pub secret_or_token: String,
    pub username: Option<String>,
}

/// A currently-valid authenticated session (spec §3.1.4). Immutable once
/// constructed; replaced wholesale, never mutated in place.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub authenticated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    fn new(user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            authenticated_at: now,
            expires_at: now
                + chrono::Duration::from_std(SESSION_LIFETIME).expect("constant duration fits"),
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let threshold =
            chrono::Duration::from_std(REFRESH_THRESHOLD).expect("constant duration fits");
        now >= self.expires_at - threshold
    }
}

/// The credential-provider capability `HTTPClient` holds instead of owning
/// an `AuthManager` outright (spec §2.3). Implemented by `AuthManager`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current_credentials(&self) -> Credentials;
    /// Invalidate the current session, re-authenticate, and signal the
    /// caller to retry its original request exactly once. Returns an error
    /// only if re-authentication itself fails (e.g. a network error); the
    /// *second* 401 on the retried request is the caller's concern, not
    /// this method's (spec §4.6).
    async fn handle_unauthorized(&self) -> CoreResult<()>;
}

/// Produces and maintains a valid `AuthSession`, mediating transparent
/// refresh and 401 recovery (spec §4.6).
pub struct AuthManager {
    config: AuthConfig,
    session: ArcSwapOption<AuthSession>,
    http_client: OnceLock<Arc<HttpClient>>,
    audit: AuditHandle,
}

impl AuthManager {
    pub fn new(config: AuthConfig, audit: AuditHandle) -> Self {
        Self {
            config,
            session: ArcSwapOption::empty(),
            http_client: OnceLock::new(),
            audit,
        }
    }

    /// Wire in the `HTTPClient` used to perform the authentication call.
    /// Two-phase construction resolves the `AuthManager` <-> `HTTPClient`
    /// reference cycle described in spec §2.3: the `HTTPClient` is built
    /// with this manager as its credential provider, then handed back here.
    pub fn wire_http_client(&self, client: Arc<HttpClient>) {
        let _ = self.http_client.set(client);
    }

    /// Startup-time fatal validation (spec §4.6 Failure semantics).
    pub fn validate_config(&self) -> CoreResult<()> {
        self.config.validate()
    }

    /// The authenticated user's ID from the current session. Callers must
    /// have called `ensure_authenticated` first; this never authenticates
    /// on its own.
    pub fn user_id(&self) -> CoreResult<String> {
        self.session
            .load_full()
            .map(|session| session.user_id.clone())
            .ok_or_else(|| CoreError::internal("user_id requested before authentication"))
    }

    /// Ensure a fresh session exists, authenticating or proactively
    /// refreshing as needed (spec §4.6 `ensure_authenticated`).
    pub async fn ensure_authenticated(&self, corr_id: &str) -> CoreResult<()> {
        let now = Utc::now();
        match self.session.load_full() {
            None => self.authenticate(corr_id, AuditEventKind::AuthSuccess).await,
            Some(session) if session.needs_refresh(now) => {
                self.authenticate(corr_id, AuditEventKind::AuthRefresh).await
            }
            Some(_) => Ok(()),
        }
    }

    async fn authenticate(&self, corr_id: &str, event_kind: AuditEventKind) -> CoreResult<()> {
        let client = self
            .http_client
            .get()
            .ok_or_else(|| CoreError::internal("AuthManager used before HTTPClient was wired"))?;

        let mut params = Vec::new();
        if self.config.mode == AuthMode::UserToken {
            if let Some(username) = &self.config.username {
                params.push(("username".to_string(), username.clone()));
            }
        }

        match client.get("/users/user_info", &params).await {
            Ok(response) => {
                let user_id = response
                    .body
                    .get("user_id")
                    .or_else(|| response.body.get("id"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        CoreError::Authentication(
                            "user_info response did not contain a user id".to_string(),
                        )
                    })?
                    .to_string();

                let session = AuthSession::new(user_id.clone(), Utc::now());
                self.audit.emit(
                    AuditEvent::new(corr_id, event_kind, AuditOutcome::Ok).with_user_id(&user_id),
                );
                self.session.store(Some(Arc::new(session)));
                Ok(())
            }
            Err(err) => {
                self.audit.emit(
                    AuditEvent::new(corr_id, AuditEventKind::AuthFailure, AuditOutcome::Error)
                        .with_message(err.to_string()),
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for AuthManager {
    async fn current_credentials(&self) -> Credentials {
        Credentials {
            mode: self.config.mode,
            access_key_id: self.config.access_key_id.clone(),
            secret_or_token: self.config.access_password.expose_secret().to_string(),
            username: self.config.username.clone(),
        }
    }

    async fn handle_unauthorized(&self) -> CoreResult<()> {
        self.session.store(None);
        self.authenticate("unauthorized-retry", AuditEventKind::AuthRefresh)
            .await
    }
}
