//! REST API client module for the Tribe backend.
//!
//! This module provides the `ApiClient` for the `/auth/*` endpoints and the
//! `AuthorizedClient` that attaches bearer tokens and retries a request once
//! after refreshing an expired token.

pub mod client;
pub mod error;
pub mod interceptor;

pub use client::{ApiClient, AuthReply};
pub use error::ApiError;
pub use interceptor::{AuthorizedClient, RequestContext, RequestPhase};
