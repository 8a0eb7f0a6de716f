//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: token and user persistence over a fallback chain
//!   of storage backends (keychain, local file, memory)
//! - `SessionService`: login, registration, single-flight refresh, logout
//! - `RenewalScheduler`: proactive token renewal on a timer
//!
//! Access tokens expire after 15 minutes and are renewed after 14.

pub mod backends;
pub mod credentials;
pub mod error;
pub mod scheduler;
pub mod session;

pub use backends::{FileStore, KeyringStore, MemoryStore, StorageBackend};
pub use credentials::CredentialStore;
pub use error::{SessionError, StorageError};
pub use scheduler::RenewalScheduler;
pub use session::{SessionEvent, SessionService, WeakSession};
