//! Bearer attachment and retry-once handling for authenticated requests.
//!
//! Every request sent through [`AuthorizedClient`] carries the current
//! access token. A 401 triggers one token refresh and one replay of the
//! original request; a second 401 is returned to the caller as-is.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::{ApiClient, ApiError};
use crate::auth::SessionService;

/// Where a single request is in its authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Sent,
    Refreshing,
    Retried,
    Done,
    RefreshFailed,
    LoggedOut,
}

/// What the caller should do after a response arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Complete,
    RefreshAndRetry,
}

/// Request-scoped retry state. Lives for one logical request, including
/// its single replay.
#[derive(Debug)]
pub struct RequestContext {
    phase: RequestPhase,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            phase: RequestPhase::Sent,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn on_response(&mut self, status: StatusCode) -> NextStep {
        match (self.phase, status) {
            (RequestPhase::Sent, StatusCode::UNAUTHORIZED) => {
                self.phase = RequestPhase::Refreshing;
                NextStep::RefreshAndRetry
            }
            _ => {
                self.phase = RequestPhase::Done;
                NextStep::Complete
            }
        }
    }

    pub fn on_refreshed(&mut self) {
        debug_assert_eq!(self.phase, RequestPhase::Refreshing);
        self.phase = RequestPhase::Retried;
    }

    pub fn on_refresh_failed(&mut self) {
        debug_assert_eq!(self.phase, RequestPhase::Refreshing);
        self.phase = RequestPhase::RefreshFailed;
    }

    pub fn on_logged_out(&mut self) {
        self.phase = RequestPhase::LoggedOut;
    }

    /// The replay could not be built; the original 401 stands.
    pub fn abandon(&mut self) {
        self.phase = RequestPhase::Done;
    }
}

fn bearer(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| ApiError::InvalidToken(e.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// HTTP client that authenticates requests from the session's credential
/// store and repairs expired tokens.
#[derive(Clone)]
pub struct AuthorizedClient {
    session: SessionService,
}

impl AuthorizedClient {
    pub fn new(session: SessionService) -> Self {
        Self { session }
    }

    fn api(&self) -> &ApiClient {
        self.session.api()
    }

    /// Outbound hook: attach the stored access token, if any.
    pub fn attach_bearer(&self, request: &mut Request) -> Result<(), ApiError> {
        if let Some(token) = self.session.store().access_token() {
            request.headers_mut().insert(AUTHORIZATION, bearer(&token)?);
        }
        Ok(())
    }

    /// Send `request`, refreshing the token and replaying once on a 401.
    pub async fn execute(&self, mut request: Request) -> Result<Response, ApiError> {
        let mut ctx = RequestContext::new();
        let replay = request.try_clone();

        self.attach_bearer(&mut request)?;
        let response = self.api().http().execute(request).await?;
        if ctx.on_response(response.status()) == NextStep::Complete {
            return ApiClient::check_response(response).await;
        }

        let Some(mut replay) = replay else {
            warn!("Request body cannot be replayed, returning 401");
            ctx.abandon();
            return ApiClient::check_response(response).await;
        };

        debug!(url = %replay.url(), "Received 401, refreshing access token");
        let token = match self.session.refresh_token().await {
            Ok(token) => {
                ctx.on_refreshed();
                token
            }
            Err(e) => {
                ctx.on_refresh_failed();
                self.session.logout().await;
                ctx.on_logged_out();
                self.session.require_login();
                return Err(e.into());
            }
        };

        replay.headers_mut().insert(AUTHORIZATION, bearer(&token)?);
        let response = self.api().http().execute(replay).await?;
        ctx.on_response(response.status());
        ApiClient::check_response(response).await
    }

    /// Send a JSON body and decode a JSON reply.
    pub async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.api().request(method, path).json(body).build()?;
        let response = self.execute(request).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{} from {}", e, path)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.api().request(Method::GET, path).build()?;
        let response = self.execute(request).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{} from {}", e, path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_completes_immediately() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.on_response(StatusCode::OK), NextStep::Complete);
        assert_eq!(ctx.phase(), RequestPhase::Done);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.on_response(StatusCode::FORBIDDEN), NextStep::Complete);
        assert_eq!(ctx.phase(), RequestPhase::Done);
    }

    #[test]
    fn test_unauthorized_retries_once() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.on_response(StatusCode::UNAUTHORIZED), NextStep::RefreshAndRetry);
        assert_eq!(ctx.phase(), RequestPhase::Refreshing);

        ctx.on_refreshed();
        assert_eq!(ctx.phase(), RequestPhase::Retried);

        // a second 401 ends the request instead of looping
        assert_eq!(ctx.on_response(StatusCode::UNAUTHORIZED), NextStep::Complete);
        assert_eq!(ctx.phase(), RequestPhase::Done);
    }

    #[test]
    fn test_refresh_failure_path() {
        let mut ctx = RequestContext::new();
        ctx.on_response(StatusCode::UNAUTHORIZED);
        ctx.on_refresh_failed();
        assert_eq!(ctx.phase(), RequestPhase::RefreshFailed);
        ctx.on_logged_out();
        assert_eq!(ctx.phase(), RequestPhase::LoggedOut);
    }

    #[test]
    fn test_bearer_header_is_sensitive() {
        let value = bearer("AT1").unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer AT1");
        assert!(value.is_sensitive());
        assert!(matches!(bearer("bad\ntoken"), Err(ApiError::InvalidToken(_))));
    }
}
