//! API client for the Tribe authentication endpoints.
//!
//! This module provides the `ApiClient` struct for the unauthenticated
//! `/auth/*` calls. Authenticated calls go through
//! [`AuthorizedClient`](super::AuthorizedClient).

use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::ApiError;
use crate::config::Config;
use crate::models::auth::RegisterRequest;
use crate::models::{AuthResponse, LoginRequest, RefreshResponse, RefreshTokenBody};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

/// Status plus parsed body of a login or registration call. Acceptance is
/// decided by the caller since the accepted statuses differ.
#[derive(Debug)]
pub struct AuthReply {
    pub status: StatusCode,
    pub body: AuthResponse,
}

/// API client for the Tribe backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Config,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn url(&self, path: &str) -> String {
        self.config.endpoint(path)
    }

    /// Builder for an arbitrary API call, without credentials attached.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(header::ACCEPT, "application/json")
    }

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{} from {}", e, path)))
    }

    /// Any status is read; non-JSON bodies become an empty reply.
    async fn post_for_auth<B: Serialize>(&self, path: &str, body: &B) -> Result<AuthReply, ApiError> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!(path = path, status = %status, error = %e, "Auth response body is not JSON");
            AuthResponse::default()
        });
        Ok(AuthReply { status, body })
    }

    pub async fn login(&self, request: &LoginRequest<'_>) -> Result<AuthReply, ApiError> {
        self.post_for_auth(LOGIN_PATH, request).await
    }

    pub(crate) async fn register(&self, request: &RegisterRequest<'_>) -> Result<AuthReply, ApiError> {
        self.post_for_auth(REGISTER_PATH, request).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.post(REFRESH_PATH, &RefreshTokenBody { refresh_token }).await
    }

    /// Revoke the refresh token server-side. The response body is ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, LOGOUT_PATH)
            .json(&RefreshTokenBody { refresh_token })
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
