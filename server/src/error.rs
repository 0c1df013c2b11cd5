//! Error types for the hub and its storage collaborators.

use thiserror::Error;

/// Failures reported by the session, account and message stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Errors surfaced while handling a frame on one connection.
///
/// None of these are fatal to the process. Everything except `Transport`
/// leaves the connection open and is answered with an error frame.
#[derive(Debug, Error)]
pub enum HubError {
    /// Malformed inbound payload for a known frame type.
    #[error("invalid {0} data format")]
    Decode(&'static str),

    /// Invalid or expired session token.
    #[error("session invalid or expired")]
    InvalidSession,

    /// Wrong identifier or wrong password; deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration rejected by the account store.
    #[error("registration rejected: {0}")]
    Registration(String),

    /// Frame requires an authenticated connection.
    #[error("connection is not authenticated")]
    Unauthenticated,

    /// Connection is already bound to a different user.
    #[error("connection already authenticated as another user")]
    AlreadyAuthenticated,

    /// Store unavailable or constraint violated.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// Socket read/write failure on a single connection.
    #[error("transport error: {0}")]
    Transport(String),
}

impl HubError {
    /// The text placed in the `error` field of an outbound frame.
    pub fn client_message(&self) -> String {
        match self {
            HubError::Decode(what) => format!("Invalid {} data format", what),
            HubError::InvalidSession => {
                "Session invalid or expired. Please log in again".to_string()
            }
            HubError::InvalidCredentials => "Invalid credentials".to_string(),
            HubError::Registration(reason) => reason.clone(),
            HubError::Unauthenticated => "You must be logged in".to_string(),
            HubError::AlreadyAuthenticated => {
                "Connection is already signed in as another user".to_string()
            }
            HubError::Persistence(_) => "Request could not be completed".to_string(),
            HubError::Transport(_) => "Connection error".to_string(),
        }
    }
}
