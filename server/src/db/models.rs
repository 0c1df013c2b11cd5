//! Row and payload types shared between the stores and the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public profile of a registered user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub age: u32,
    pub gender: String,
}

/// Registration input handed to the account store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub password: String,
}

/// A persisted private message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_nickname: String,
}

/// One user as returned by the roster query, before online flags are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub user_id: String,
    pub nickname: String,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}
