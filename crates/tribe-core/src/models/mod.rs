//! Data models for the Tribe authentication API.
//!
//! - `user`: the denormalized `SessionUser` and the tolerant server user shape
//! - `auth`: request and response bodies of the `/auth/*` endpoints

pub mod auth;
pub mod user;

pub use auth::{AuthResponse, LoginRequest, RefreshResponse, RefreshTokenBody, RegisterData};
pub use user::{RemoteUser, SessionUser, UserUpdate};
