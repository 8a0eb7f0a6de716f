//! Tribe session core.
//!
//! Client-side session lifecycle for the Tribe platform: credential
//! storage with fallback, login and registration, single-flight token
//! refresh, retry-once request handling and proactive token renewal.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, AuthorizedClient};
pub use auth::{CredentialStore, SessionError, SessionEvent, SessionService};
pub use config::Config;
pub use models::{RegisterData, SessionUser, UserUpdate};
