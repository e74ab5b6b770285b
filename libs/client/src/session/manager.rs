//! Session lifecycle: login, OTP verification, single-flight refresh, logout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fingerprint;
use crate::http::ApiClient;
use crate::storage::{SessionStore, USER_KEY};

use super::state::{
    AuthFailure, LoginOutcome, SessionEvent, SessionSnapshot, User, UserPatch, UserStatus,
};

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    fingerprint: &'a str,
}

#[derive(Debug, Serialize)]
struct OtpRequest<'a> {
    email: &'a str,
    code: &'a str,
    fingerprint: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct ResetPasswordRequest<'a> {
    token: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    fingerprint: &'a str,
}

/// Login and OTP verification share this response shape. `otp_required` means
/// no session exists yet; otherwise token and user must both be present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    otp_required: bool,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    user: Option<User>,
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

/// Single source of truth for "who is logged in" and "what bearer credential
/// to attach to outbound calls".
///
/// One instance per process (or per test). The access token lives only in
/// the shared bearer slot; the session id rides in the HTTP cookie jar; the
/// user record is the only thing persisted through the [`SessionStore`].
///
/// Consumers read [`SessionManager::snapshot`] and subscribe to
/// [`SessionEvent`]s for flow control. On `SignedOut` / `AccountSuspended`
/// they are expected to tear down dependent services (the realtime router in
/// particular).
pub struct SessionManager {
    api: ApiClient,
    store: Arc<dyn SessionStore>,
    fingerprint: String,
    state: RwLock<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    // Single-flight refresh: the gate serializes attempts; the epoch and the
    // stored outcome let callers that waited out someone else's refresh adopt
    // that result instead of issuing a second request.
    refresh_gate: tokio::sync::Mutex<()>,
    refresh_epoch: AtomicU64,
    last_refresh_ok: AtomicBool,
}

impl SessionManager {
    pub fn new(config: &ClientConfig, store: Arc<dyn SessionStore>) -> Result<Self, ClientError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            api: ApiClient::new(config)?,
            store,
            fingerprint: fingerprint::derive(&config.user_agent),
            state: RwLock::new(SessionSnapshot::default()),
            events,
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
            last_refresh_ok: AtomicBool::new(false),
        })
    }

    /// The shared REST transport. Other services (the realtime router) take
    /// their bearer slot from here.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().clone()
    }

    /// Current bearer token, if a session is open.
    pub fn access_token(&self) -> Option<String> {
        self.api.bearer()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Hydration
    // -----------------------------------------------------------------------

    /// Hydrate the session at startup: restore the persisted user record and
    /// validate the cookie-held session id against the backend.
    ///
    /// Resolves `is_loading` to `false` exactly once, on every branch.
    pub async fn initialize(&self) {
        self.set_loading(true);
        match self.store.get(USER_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<User>(&raw) {
                Ok(user) => {
                    self.state.write().user = Some(user);
                }
                Err(err) => {
                    tracing::warn!(%err, "discarding corrupt persisted user record");
                    let _ = self.store.remove(USER_KEY).await;
                }
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "durable storage read failed during hydration"),
        }
        // refresh_session resolves is_loading on every branch.
        self.refresh_session().await;
    }

    // -----------------------------------------------------------------------
    // Login and OTP
    // -----------------------------------------------------------------------

    /// Authenticate with email and password.
    ///
    /// Returns `None` on any failure; the reason lands in the snapshot's
    /// `error` field. An account reported suspended or inactive fails closed:
    /// no token is stored and no partial session remains.
    pub async fn login(&self, email: &str, password: &str) -> Option<LoginOutcome> {
        self.set_loading(true);
        let outcome = self.login_inner(email, password).await;
        self.set_loading(false);
        outcome
    }

    async fn login_inner(&self, email: &str, password: &str) -> Option<LoginOutcome> {
        let req = LoginRequest {
            email,
            password,
            fingerprint: &self.fingerprint,
        };
        match self.api.post_json::<_, SessionResponse>("/auth/login", &req).await {
            Ok(resp) => {
                if resp.otp_required {
                    // No session yet; the OTP exchange completes it.
                    return Some(LoginOutcome::OtpRequired);
                }
                if self.establish(resp).await {
                    Some(LoginOutcome::Authenticated)
                } else {
                    None
                }
            }
            Err(err) => {
                self.record_auth_error(err, AuthFailure::InvalidCredentials).await;
                None
            }
        }
    }

    /// Exchange a pending login or registration for a full session.
    pub async fn verify_otp(&self, email: &str, code: &str) -> bool {
        self.set_loading(true);
        let req = OtpRequest {
            email,
            code,
            fingerprint: &self.fingerprint,
        };
        let ok = match self
            .api
            .post_json::<_, SessionResponse>("/auth/verify-otp", &req)
            .await
        {
            Ok(resp) => self.establish(resp).await,
            Err(err) => {
                self.record_auth_error(err, AuthFailure::InvalidOtp).await;
                false
            }
        };
        self.set_loading(false);
        ok
    }

    pub async fn resend_otp(&self, email: &str) -> bool {
        self.post_ack("/auth/resend-otp", &EmailRequest { email }).await
    }

    pub async fn forgot_password(&self, email: &str) -> bool {
        self.post_ack("/auth/forgot-password", &EmailRequest { email }).await
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> bool {
        self.post_ack(
            "/auth/reset-password",
            &ResetPasswordRequest { token, password },
        )
        .await
    }

    /// Store the token and user from a successful login/OTP response.
    /// Returns `false` (with the session cleared) when the response is
    /// malformed or the account status is terminal.
    async fn establish(&self, resp: SessionResponse) -> bool {
        let (Some(token), Some(user)) = (resp.access_token, resp.user) else {
            tracing::error!("malformed session response: token or user missing");
            self.record_failure(AuthFailure::ServerError);
            return false;
        };
        if user.status.is_terminal() {
            tracing::info!(status = ?user.status, "rejecting session for terminal account status");
            self.reject_terminal_status(user.status).await;
            return false;
        }
        self.api.set_bearer(Some(token));
        {
            let mut st = self.state.write();
            st.user = Some(user.clone());
            st.is_authenticated = true;
            st.error = None;
        }
        self.persist_user(&user).await;
        // send() returns Err if there are no receivers; that's fine.
        let _ = self.events.send(SessionEvent::SignedIn);
        true
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Exchange the cookie-held session id for a fresh access token.
    ///
    /// Safe to call concurrently: callers that arrive while a refresh is in
    /// flight await that attempt and observe its outcome instead of issuing
    /// a duplicate request.
    pub async fn refresh_session(&self) -> bool {
        self.set_loading(true);
        let ok = self.refresh_single_flight().await;
        self.set_loading(false);
        ok
    }

    async fn refresh_single_flight(&self) -> bool {
        let epoch = self.refresh_epoch.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_epoch.load(Ordering::Acquire) != epoch {
            // A refresh completed while we waited on the gate; adopt its
            // outcome rather than hitting the network again.
            return self.last_refresh_ok.load(Ordering::Acquire);
        }
        let ok = self.do_refresh().await;
        self.last_refresh_ok.store(ok, Ordering::Release);
        self.refresh_epoch.fetch_add(1, Ordering::Release);
        ok
    }

    async fn do_refresh(&self) -> bool {
        let req = RefreshRequest {
            fingerprint: &self.fingerprint,
        };
        match self
            .api
            .post_json::<_, RefreshResponse>("/auth/refresh-session", &req)
            .await
        {
            Ok(resp) => {
                self.api.set_bearer(Some(resp.access_token));
                let user = {
                    let mut st = self.state.write();
                    if let Some(user) = resp.user {
                        st.user = Some(user);
                    }
                    st.is_authenticated = true;
                    st.error = None;
                    st.user.clone()
                };
                if let Some(user) = user {
                    self.persist_user(&user).await;
                }
                true
            }
            Err(err) => self.handle_refresh_failure(err).await,
        }
    }

    async fn handle_refresh_failure(&self, err: ClientError) -> bool {
        if err.is_credential_failure() {
            tracing::info!(%err, "session refresh rejected; signing out");
            self.clear_session(None, SessionEvent::SignedOut {
                redirect_to_login: true,
            })
            .await;
            return false;
        }
        let have_identity = self.state.read().user.is_some();
        if have_identity {
            // Keep the cached identity and stay authenticated across a
            // transient failure; the next 4xx signs the user out. A revoked
            // session can hide behind this, hence the warning.
            tracing::warn!(%err, "session refresh failed; retaining cached identity");
            let mut st = self.state.write();
            st.is_authenticated = true;
            st.error = Some(if err.is_server_error() {
                AuthFailure::ServerError
            } else {
                AuthFailure::Network
            });
            false
        } else {
            tracing::info!(%err, "session refresh failed with no cached identity");
            self.clear_session(None, SessionEvent::SignedOut {
                redirect_to_login: true,
            })
            .await;
            false
        }
    }

    // -----------------------------------------------------------------------
    // Logout and profile updates
    // -----------------------------------------------------------------------

    /// Clear all client-side session state, then notify the server
    /// best-effort on a background task.
    ///
    /// The local logout completes before the notify is even attempted and is
    /// not reversible by a failed server call.
    pub async fn logout(&self) {
        self.clear_session(None, SessionEvent::SignedOut {
            redirect_to_login: false,
        })
        .await;
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(err) = api
                .post_json::<_, serde_json::Value>("/auth/logout", &serde_json::json!({}))
                .await
            {
                tracing::debug!(%err, "logout notify failed");
            }
        });
    }

    /// Merge a partial identity update into the current user record and
    /// re-persist it. Silent no-op when no session is active.
    pub async fn update_user(&self, patch: UserPatch) {
        let updated = {
            let mut st = self.state.write();
            let Some(user) = st.user.as_mut() else {
                return;
            };
            if let Some(email) = patch.email {
                user.email = email;
            }
            if let Some(name) = patch.name {
                user.name = name;
            }
            if let Some(role) = patch.role {
                user.role = role;
            }
            if let Some(status) = patch.status {
                user.status = status;
            }
            if let Some(verified) = patch.email_verified {
                user.email_verified = verified;
            }
            user.updated_at = Utc::now();
            user.clone()
        };
        if updated.status.is_terminal() {
            self.reject_terminal_status(updated.status).await;
            return;
        }
        self.persist_user(&updated).await;
        let _ = self.events.send(SessionEvent::UserUpdated);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn post_ack<B: Serialize>(&self, path: &str, body: &B) -> bool {
        match self.api.post_json::<_, serde_json::Value>(path, body).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(%err, path, "auth request failed");
                false
            }
        }
    }

    /// Map a transport error from login/OTP into the failure taxonomy and
    /// record it. Terminal account statuses clear the session.
    async fn record_auth_error(&self, err: ClientError, credential_kind: AuthFailure) {
        let failure = match &err {
            ClientError::Api { code, .. } if code == "ACCOUNT_SUSPENDED" => {
                AuthFailure::AccountSuspended
            }
            ClientError::Api { code, .. } if code == "ACCOUNT_INACTIVE" => {
                AuthFailure::AccountInactive
            }
            e if e.is_server_error() => AuthFailure::ServerError,
            e if e.is_credential_failure() => credential_kind,
            _ => AuthFailure::Network,
        };
        tracing::info!(%err, ?failure, "auth operation failed");
        match failure {
            AuthFailure::AccountSuspended | AuthFailure::AccountInactive => {
                self.clear_session(Some(failure), SessionEvent::AccountSuspended)
                    .await;
            }
            _ => self.record_failure(failure),
        }
    }

    async fn reject_terminal_status(&self, status: UserStatus) {
        let failure = if status == UserStatus::Inactive {
            AuthFailure::AccountInactive
        } else {
            AuthFailure::AccountSuspended
        };
        self.clear_session(Some(failure), SessionEvent::AccountSuspended)
            .await;
    }

    /// Drop every piece of client-held session state. The bearer slot goes
    /// first so no outbound call can pick up a stale credential.
    async fn clear_session(&self, failure: Option<AuthFailure>, event: SessionEvent) {
        self.api.set_bearer(None);
        {
            let mut st = self.state.write();
            st.user = None;
            st.is_authenticated = false;
            st.error = failure;
        }
        // The user record is the only durable key, but remove it on every
        // clearing transition regardless of how we got here.
        if let Err(err) = self.store.remove(USER_KEY).await {
            tracing::warn!(%err, "failed to clear persisted user record");
        }
        let _ = self.events.send(event);
    }

    async fn persist_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(raw) => {
                if let Err(err) = self.store.set(USER_KEY, &raw).await {
                    tracing::warn!(%err, "failed to persist user record");
                }
            }
            Err(err) => tracing::error!(%err, "user record serialization failed"),
        }
    }

    fn set_loading(&self, loading: bool) {
        self.state.write().is_loading = loading;
    }

    fn record_failure(&self, failure: AuthFailure) {
        self.state.write().error = Some(failure);
    }
}
