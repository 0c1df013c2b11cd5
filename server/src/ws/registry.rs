//! Authoritative map of online users to their live connections.
//!
//! A user key is present iff at least one connection is registered for it.
//! The registry never broadcasts on its own; callers trigger presence updates
//! after `register`/`unregister`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ws::frames::ServerFrame;
use crate::ws::{ConnectionHandle, ConnectionId};

type ConnectionSet = HashMap<ConnectionId, ConnectionHandle>;

/// Tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs).
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<DashMap<String, ConnectionSet>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the user's set, creating the entry if needed.
    /// Returns the number of connections the user now has.
    pub fn register(&self, user_id: &str, conn: ConnectionHandle) -> usize {
        let mut set = self.users.entry(user_id.to_string()).or_default();
        set.insert(conn.id(), conn);
        let count = set.len();

        tracing::debug!(user_id = %user_id, connections = count, "Connection registered");
        count
    }

    /// Remove one connection. The user's entry is dropped together with its
    /// last connection. Returns whether anything was removed; removing an
    /// unknown connection is a no-op.
    pub fn unregister(&self, user_id: &str, conn_id: ConnectionId) -> bool {
        match self.users.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&conn_id).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                }
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %conn_id,
                    removed,
                    "Connection unregistered"
                );
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Snapshot of the user's connections. The set may change as soon as this returns.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.users
            .get(user_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every user with at least one live connection.
    pub fn online_users(&self) -> Vec<String> {
        self.users.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    /// Best-effort delivery of `frame` to every connection of `user_id`.
    ///
    /// The frame is serialized once. A failed send is logged and does not stop
    /// delivery to the user's other connections. No lock is held while sending.
    /// Returns the number of connections the frame was queued on.
    pub fn send_to_user(&self, user_id: &str, frame: &ServerFrame) -> usize {
        let connections = self.connections_for(user_id);
        if connections.is_empty() {
            return 0;
        }

        let msg = match frame.to_message() {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(frame_type = %frame.kind, error = %e, "Failed to encode frame");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn in connections {
            match conn.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %conn.id(),
                        error = %e,
                        "Dropping frame for closed connection"
                    );
                }
            }
        }
        delivered
    }
}
