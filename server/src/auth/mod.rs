//! Session and credential collaborators used by the dispatcher.
//!
//! Both traits are synchronous; the hub calls them through
//! [`crate::db::blocking`] so a slow store never stalls a connection's task.

pub mod accounts;
pub mod sessions;

use crate::db::models::{NewAccount, UserProfile};
use crate::error::StoreError;

/// Resolves and issues opaque session tokens.
pub trait SessionStore: Send + Sync {
    /// Resolve a session token to the owning user's profile.
    /// Unknown and expired tokens both yield `StoreError::NotFound`.
    fn validate_session(&self, token: &str) -> Result<UserProfile, StoreError>;

    /// Create a new session for `user_id` and return its token.
    fn issue_session(&self, user_id: &str) -> Result<String, StoreError>;
}

/// Registers accounts and checks credentials.
pub trait AccountStore: Send + Sync {
    fn register(&self, account: &NewAccount) -> Result<UserProfile, StoreError>;

    /// Check an email-or-nickname and password pair.
    /// Unknown identifier and wrong password both yield `StoreError::NotFound`.
    fn authenticate(&self, identifier: &str, password: &str) -> Result<UserProfile, StoreError>;
}
