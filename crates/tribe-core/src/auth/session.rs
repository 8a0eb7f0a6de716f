//! Session lifecycle: login, registration, refresh, logout, profile updates.
//!
//! A `SessionService` is created once at startup and cloned wherever it is
//! needed; clones share one credential store, one refresh slot and one
//! renewal timer.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::credentials::CredentialStore;
use super::error::{SessionError, StorageError};
use super::scheduler::RenewalScheduler;
use crate::api::client::AuthReply;
use crate::api::{ApiClient, ApiError, AuthorizedClient};
use crate::config::Config;
use crate::models::{LoginRequest, RegisterData, RemoteUser, SessionUser, UserUpdate};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session state changes, for front ends to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "user")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionEvent {
    LoggedIn(SessionUser),
    Refreshed,
    UserUpdated(SessionUser),
    LoggedOut,
    /// Send the user back to the login entry point.
    LoginRequired,
}

type RefreshFlight = Shared<BoxFuture<'static, Result<String, SessionError>>>;

pub(crate) struct SessionInner {
    api: ApiClient,
    store: CredentialStore,
    in_flight: Mutex<Option<RefreshFlight>>,
    events: broadcast::Sender<SessionEvent>,
    scheduler: RenewalScheduler,
}

/// Empties the refresh slot when the refresh task ends, however it ends.
struct FlightReset(Arc<SessionInner>);

impl Drop for FlightReset {
    fn drop(&mut self) {
        let mut slot = self.0.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

#[derive(Clone)]
pub struct SessionService {
    inner: Arc<SessionInner>,
}

/// Non-owning handle, used by the renewal timer.
#[derive(Clone)]
pub struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub fn upgrade(&self) -> Option<SessionService> {
        self.0.upgrade().map(|inner| SessionService { inner })
    }
}

impl SessionService {
    pub fn new(config: Config, store: CredentialStore) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let scheduler = RenewalScheduler::new(config.refresh_interval(), config.refresh_on_start);
        Ok(Self {
            inner: Arc::new(SessionInner {
                api,
                store,
                in_flight: Mutex::new(None),
                events,
                scheduler,
            }),
        })
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.inner.scheduler
    }

    /// Client for authenticated API calls through this session.
    pub fn authorized(&self) -> AuthorizedClient {
        AuthorizedClient::new(self.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Ask the front end to return to the login entry point.
    pub fn require_login(&self) {
        self.emit(SessionEvent::LoginRequired);
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.inner.store.user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_authenticated()
    }

    // ===== Login / Registration =====

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, SessionError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(SessionError::Credential(
                "Email and password are required".to_string(),
            ));
        }

        info!(email = %email, "Login attempt");
        let reply = self
            .inner
            .api
            .login(&LoginRequest { email, password })
            .await
            .map_err(|e| {
                warn!(error = %e, "Login request failed");
                SessionError::Credential(e.to_string())
            })?;

        self.establish(reply, &[StatusCode::OK], "Login failed")
    }

    pub async fn register(&self, data: &RegisterData) -> Result<SessionUser, SessionError> {
        data.validate()?;

        info!(email = %data.email, role = data.role_id, "Registration attempt");
        let reply = self
            .inner
            .api
            .register(&data.to_request())
            .await
            .map_err(|e| {
                warn!(error = %e, "Registration request failed");
                SessionError::Credential(e.to_string())
            })?;

        self.establish(reply, &[StatusCode::OK, StatusCode::CREATED], "Registration failed")
    }

    /// Accept or reject a login/registration reply and persist the session.
    fn establish(
        &self,
        reply: AuthReply,
        accepted: &[StatusCode],
        fallback_message: &str,
    ) -> Result<SessionUser, SessionError> {
        let AuthReply { status, body } = reply;

        let access_token = match body.granted_access_token() {
            Some(token) if accepted.contains(&status) => token.to_string(),
            _ => {
                let message = body
                    .message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or(fallback_message)
                    .to_string();
                warn!(status = %status, message = %message, "Server rejected credentials");
                return Err(SessionError::Credential(message));
            }
        };

        let user = body
            .user
            .as_ref()
            .map(RemoteUser::to_session_user)
            .ok_or_else(|| SessionError::Credential("No user data received from server".to_string()))?;

        let refresh_token = body.refresh_token.as_deref().filter(|t| !t.is_empty());
        if let Err(e) = self.persist(&access_token, refresh_token, &user) {
            // tokens and user exist together or not at all
            error!(error = %e, "Could not persist session");
            self.inner.store.clear_all();
            return Err(e.into());
        }

        info!(user_id = %user.id, role = %user.role, "Session established");
        self.emit(SessionEvent::LoggedIn(user.clone()));
        Ok(user)
    }

    fn persist(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        user: &SessionUser,
    ) -> Result<(), StorageError> {
        match refresh_token {
            Some(refresh_token) => self.inner.store.set_tokens(access_token, refresh_token)?,
            None => {
                warn!("Server issued no refresh token; session cannot be renewed");
                self.inner.store.set_access_token(access_token)?;
            }
        }
        self.inner.store.set_user(user)
    }

    // ===== Refresh =====

    /// Exchange the refresh token for a new token pair.
    ///
    /// Concurrent callers share one network call and one outcome. Any
    /// failure ends the session and yields `SessionExpired`.
    pub async fn refresh_token(&self) -> Result<String, SessionError> {
        let flight = {
            let mut slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let refresh_token = self
                        .inner
                        .store
                        .refresh_token()
                        .ok_or(SessionError::NoRefreshToken)?;
                    let flight = self.start_refresh(refresh_token);
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Run the refresh on its own task so a dropped caller cannot cancel it
    /// for everyone else.
    fn start_refresh(&self, refresh_token: String) -> RefreshFlight {
        let session = self.clone();
        let task = tokio::spawn(async move {
            let _reset = FlightReset(Arc::clone(&session.inner));
            session.rotate_tokens(&refresh_token).await
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Token refresh task aborted");
                    Err(SessionError::SessionExpired)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn rotate_tokens(&self, refresh_token: &str) -> Result<String, SessionError> {
        debug!("Refreshing access token");
        let outcome = match self.inner.api.refresh(refresh_token).await {
            Ok(response) => match response.rotated_pair() {
                Some((access, refresh)) => self
                    .inner
                    .store
                    .set_tokens(access, refresh)
                    .map(|()| access.to_string())
                    .map_err(|e| e.to_string()),
                None => Err(response
                    .message
                    .clone()
                    .unwrap_or_else(|| "refresh response carried no token pair".to_string())),
            },
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(access_token) => {
                info!("Access token refreshed");
                self.emit(SessionEvent::Refreshed);
                Ok(access_token)
            }
            Err(reason) => {
                warn!(reason = %reason, "Token refresh failed, ending session");
                self.end_session();
                Err(SessionError::SessionExpired)
            }
        }
    }

    // ===== Logout =====

    fn end_session(&self) {
        self.inner.store.clear_all();
        self.emit(SessionEvent::LoggedOut);
    }

    /// Revoke the refresh token server-side (best effort) and clear all
    /// local credentials. Local state is cleared even if the call fails.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.inner.store.refresh_token() {
            if let Err(e) = self.inner.api.logout(&refresh_token).await {
                warn!(error = %e, "Logout request failed");
            }
        }
        self.end_session();
        info!("Logged out");
    }

    // ===== Profile =====

    pub async fn update_user(&self, update: &UserUpdate) -> Result<SessionUser, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let current = self.current_user().ok_or(SessionError::NotAuthenticated)?;

        let path = format!("/users/{}", current.id);
        let updated: RemoteUser = self
            .authorized()
            .send_json(Method::PUT, &path, update)
            .await
            .map_err(|e| match e {
                ApiError::Session(err) => err,
                other => {
                    warn!(error = %other, "Profile update failed");
                    SessionError::RequestFailed(
                        other.server_message().unwrap_or_else(|| "Update failed".to_string()),
                    )
                }
            })?;

        let user = updated.to_session_user();
        self.inner.store.set_user(&user)?;
        info!(user_id = %user.id, "Profile updated");
        self.emit(SessionEvent::UserUpdated(user.clone()));
        Ok(user)
    }

    // ===== Renewal =====

    /// Start the proactive renewal timer. Returns `false` if it was already
    /// running.
    pub fn schedule_token_refresh(&self) -> bool {
        self.inner.scheduler.start(self.downgrade())
    }
}
