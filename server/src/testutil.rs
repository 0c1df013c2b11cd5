//! Shared test utilities: temp SQLite stores, an in-memory fake for all
//! three collaborators, and helpers for inspecting connection output.

use axum::extract::ws::Message;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use crate::auth::accounts::validate_new_account;
use crate::auth::{AccountStore, SessionStore};
use crate::chat::store::MessageStore;
use crate::db::models::{NewAccount, PrivateMessage, RosterRow, UserProfile};
use crate::db::{self, SqliteStore};
use crate::error::StoreError;
use crate::state::AppState;
use crate::ws::frames::ServerFrame;
use crate::ws::ConnectionHandle;

/// A SQLite store in a fresh temp directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let pool = db::init_db(tmp.path().to_str().unwrap()).unwrap();
    (tmp, SqliteStore::new(pool).with_hash_cost(4))
}

/// A valid registration for `nickname`, password `hunter22`.
pub fn sample_account(nickname: &str) -> NewAccount {
    NewAccount {
        nickname: nickname.to_string(),
        first_name: "Sample".to_string(),
        last_name: "User".to_string(),
        email: format!("{}@example.com", nickname.to_lowercase()),
        age: 28,
        gender: "other".to_string(),
        password: "hunter22".to_string(),
    }
}

/// A connection handle plus the receiver its writer task would drain.
pub fn connection() -> (ConnectionHandle, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(tx), rx)
}

/// Everything queued on `rx` so far, decoded. Non-text messages are skipped.
pub fn drain_frames(rx: &mut UnboundedReceiver<Message>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    frames
}

/// App state over a fresh [`MemoryStore`].
pub fn memory_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let state = AppState::with_stores(store.clone(), store.clone(), store.clone());
    (state, store)
}

struct MemoryUser {
    profile: UserProfile,
    password: String,
}

#[derive(Default)]
struct MemoryInner {
    users: Vec<MemoryUser>,
    sessions: HashMap<String, String>,
    messages: Vec<PrivateMessage>,
    fail_persist: bool,
    seeded: i64,
}

/// In-memory fake implementing every collaborator trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn add_user(&self, user_id: &str, nickname: &str) {
        self.add_account(user_id, nickname, &format!("{}@example.com", nickname), "hunter22");
    }

    pub fn add_account(&self, user_id: &str, nickname: &str, email: &str, password: &str) {
        self.inner.lock().unwrap().users.push(MemoryUser {
            profile: UserProfile {
                user_id: user_id.to_string(),
                nickname: nickname.to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                email: email.to_string(),
                age: 30,
                gender: "other".to_string(),
            },
            password: password.to_string(),
        });
    }

    /// Open a session for `user_id` and return its token.
    pub fn add_session(&self, user_id: &str) -> String {
        let token = Uuid::now_v7().simple().to_string();
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(token.clone(), user_id.to_string());
        token
    }

    /// Store a message directly, one second after the previous seeded one.
    pub fn seed_message(&self, from: &str, to: &str, content: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.seeded += 1;
        let created_at = DateTime::from_timestamp(1_790_000_000, 0).unwrap()
            + Duration::seconds(inner.seeded);
        let sender_nickname = nickname_of(&inner, from).unwrap_or("Unknown").to_string();
        inner.messages.push(PrivateMessage {
            id: Uuid::now_v7().to_string(),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            content: content.to_string(),
            created_at,
            sender_nickname,
        });
    }

    pub fn fail_persist(&self, fail: bool) {
        self.inner.lock().unwrap().fail_persist = fail;
    }

    pub fn persisted(&self) -> Vec<PrivateMessage> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn account_count(&self) -> usize {
        self.inner.lock().unwrap().users.len()
    }
}

fn nickname_of<'a>(inner: &'a MemoryInner, user_id: &str) -> Option<&'a str> {
    inner
        .users
        .iter()
        .find(|u| u.profile.user_id == user_id)
        .map(|u| u.profile.nickname.as_str())
}

fn between(m: &PrivateMessage, a: &str, b: &str) -> bool {
    (m.sender_id == a && m.recipient_id == b) || (m.sender_id == b && m.recipient_id == a)
}

impl SessionStore for MemoryStore {
    fn validate_session(&self, token: &str) -> Result<UserProfile, StoreError> {
        let inner = self.inner.lock().unwrap();
        let user_id = inner.sessions.get(token).ok_or(StoreError::NotFound)?;
        inner
            .users
            .iter()
            .find(|u| &u.profile.user_id == user_id)
            .map(|u| u.profile.clone())
            .ok_or(StoreError::NotFound)
    }

    fn issue_session(&self, user_id: &str) -> Result<String, StoreError> {
        Ok(self.add_session(user_id))
    }
}

impl AccountStore for MemoryStore {
    fn register(&self, account: &NewAccount) -> Result<UserProfile, StoreError> {
        validate_new_account(account)?;
        let mut inner = self.inner.lock().unwrap();
        let taken = inner.users.iter().any(|u| {
            u.profile.nickname.eq_ignore_ascii_case(&account.nickname)
                || u.profile.email.eq_ignore_ascii_case(&account.email)
        });
        if taken {
            return Err(StoreError::Conflict("nickname or email already taken".to_string()));
        }

        let profile = UserProfile {
            user_id: Uuid::now_v7().to_string(),
            nickname: account.nickname.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            email: account.email.to_lowercase(),
            age: account.age,
            gender: account.gender.clone(),
        };
        inner.users.push(MemoryUser {
            profile: profile.clone(),
            password: account.password.clone(),
        });
        Ok(profile)
    }

    fn authenticate(&self, identifier: &str, password: &str) -> Result<UserProfile, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|u| {
                (u.profile.nickname.eq_ignore_ascii_case(identifier)
                    || u.profile.email.eq_ignore_ascii_case(identifier))
                    && u.password == password
            })
            .map(|u| u.profile.clone())
            .ok_or(StoreError::NotFound)
    }
}

impl MessageStore for MemoryStore {
    fn persist_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_persist {
            return Err(StoreError::Conflict("store offline".to_string()));
        }
        let id = Uuid::now_v7().to_string();
        let sender_nickname = nickname_of(&inner, sender_id).unwrap_or("Unknown").to_string();
        inner.messages.push(PrivateMessage {
            id: id.clone(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            created_at,
            sender_nickname,
        });
        Ok(id)
    }

    fn fetch_history(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PrivateMessage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut page: Vec<PrivateMessage> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| between(m, user_a, user_b))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    fn fetch_roster(&self, viewer_id: &str) -> Result<Vec<RosterRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .iter()
            .map(|u| {
                let last = inner
                    .messages
                    .iter()
                    .rev()
                    .find(|m| between(m, viewer_id, &u.profile.user_id));
                RosterRow {
                    user_id: u.profile.user_id.clone(),
                    nickname: u.profile.nickname.clone(),
                    last_message: last.map(|m| m.content.clone()),
                    last_timestamp: last.map(|m| m.created_at),
                }
            })
            .collect())
    }

    fn nickname(&self, user_id: &str) -> Result<String, StoreError> {
        let inner = self.inner.lock().unwrap();
        nickname_of(&inner, user_id)
            .map(str::to_string)
            .ok_or(StoreError::NotFound)
    }
}
