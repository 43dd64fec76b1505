//! OAuth credential management.
//!
//! Credentials live on disk in the Claude CLI's JSON shape and are
//! refreshed against the provider's OAuth token endpoint when they get
//! within five minutes of expiry. Refresh is single-flight per manager:
//! concurrent callers share one in-flight refresh and observe the same
//! outcome.

mod credentials;
mod error;
mod manager;
mod store;

pub use credentials::{AccountProfile, Credentials, EXPIRY_SKEW};
pub use error::OAuthError;
pub use manager::CredentialsManager;
pub use store::CredentialsStore;
