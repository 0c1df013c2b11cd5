//! Roster computation and presence broadcast.
//!
//! The roster lists every registered user with the latest message they
//! exchanged with the viewer and whether they are online. It is rebuilt on
//! every broadcast and never stored.
//!
//! Broadcasts run one at a time. A broadcast started after a registry change
//! always finishes after any broadcast that could have seen the old state, so
//! the last roster each connection receives is current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::db::{self, models::RosterRow};
use crate::error::HubError;
use crate::state::AppState;
use crate::ws::frames::{FrameKind, ServerFrame};
use crate::ws::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "id")]
    pub user_id: String,
    pub nickname: String,
    #[serde(rename = "lastMsg")]
    pub last_message: String,
    #[serde(rename = "created_at")]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
}

/// Most recently messaged first; users without messages last; ties by nickname.
pub fn roster_order(a: &RosterEntry, b: &RosterEntry) -> Ordering {
    let by_time = match (&a.last_timestamp, &b.last_timestamp) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time
        .then_with(|| a.nickname.cmp(&b.nickname))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Apply online flags from the registry and sort.
pub fn build_roster(rows: Vec<RosterRow>, registry: &ConnectionRegistry) -> Vec<RosterEntry> {
    let mut entries: Vec<RosterEntry> = rows
        .into_iter()
        .map(|row| RosterEntry {
            is_online: registry.is_online(&row.user_id),
            user_id: row.user_id,
            nickname: row.nickname,
            last_message: row.last_message.unwrap_or_default(),
            last_timestamp: row.last_timestamp,
        })
        .collect();
    entries.sort_by(roster_order);
    entries
}

/// The roster as seen by `viewer_id`.
pub async fn roster_for(state: &AppState, viewer_id: &str) -> Result<Vec<RosterEntry>, HubError> {
    let store = state.messages.clone();
    let viewer = viewer_id.to_string();
    let rows = db::blocking(move || store.fetch_roster(&viewer)).await?;
    Ok(build_roster(rows, &state.registry))
}

/// Answer a `users_list` request on a single connection.
pub async fn send_roster(
    state: &AppState,
    conn: &ConnectionHandle,
    viewer_id: &str,
) -> Result<(), HubError> {
    let roster = roster_for(state, viewer_id).await?;
    conn.send_frame(&ServerFrame::ok(FrameKind::UsersList.response_tag(), &roster))
}

/// Push a fresh roster to every connection of every online user.
///
/// Each user gets their own view. Failures are logged per user and do not
/// stop the broadcast.
pub async fn broadcast_roster(state: &AppState) {
    let _serial = state.presence_lock.lock().await;
    let online = state.registry.online_users();
    tracing::debug!(online = online.len(), "Broadcasting presence");

    for user_id in online {
        match roster_for(state, &user_id).await {
            Ok(roster) => {
                let frame = ServerFrame::ok(FrameKind::UsersList.response_tag(), &roster);
                state.registry.send_to_user(&user_id, &frame);
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Roster build failed");
            }
        }
    }
}
