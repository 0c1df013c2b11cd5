//! Private message pipeline: validate, persist, then fan out.
//!
//! Persistence always happens before delivery. If the store rejects the
//! message nobody receives it, not even the sender's other tabs.

use chrono::Utc;
use serde::Deserialize;

use crate::db::{self, models::PrivateMessage};
use crate::error::HubError;
use crate::state::AppState;
use crate::ws::frames::{FrameKind, ServerFrame};
use crate::ws::ConnectionRegistry;

/// Maximum message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Nickname used when the sender's nickname cannot be resolved.
const UNKNOWN_NICKNAME: &str = "Unknown";

/// Client-supplied part of a private message. Anything else the client sends
/// (sender, timestamps) is ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MessageDraft {
    pub recipient_id: String,
    pub content: String,
}

impl MessageDraft {
    pub fn validate(&self) -> Result<(), HubError> {
        if self.recipient_id.trim().is_empty() || self.content.trim().is_empty() {
            return Err(HubError::Decode("private message"));
        }
        if self.content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(HubError::Decode("private message"));
        }
        Ok(())
    }
}

/// Persist a message from `sender_id` and deliver it to every connection of
/// the recipient and of the sender.
pub async fn send_private_message(
    state: &AppState,
    sender_id: &str,
    draft: MessageDraft,
) -> Result<PrivateMessage, HubError> {
    draft.validate()?;

    let store = state.messages.clone();
    let sid = sender_id.to_string();
    let sender_nickname = match db::blocking(move || store.nickname(&sid)).await {
        Ok(nickname) => nickname,
        Err(e) => {
            tracing::warn!(user_id = %sender_id, error = %e, "Sender nickname lookup failed");
            UNKNOWN_NICKNAME.to_string()
        }
    };

    // Server clock only; the client never sets message time
    let created_at = Utc::now();

    let store = state.messages.clone();
    let sid = sender_id.to_string();
    let recipient = draft.recipient_id.clone();
    let content = draft.content.clone();
    let id = db::blocking(move || store.persist_message(&sid, &recipient, &content, created_at))
        .await
        .map_err(|e| {
            tracing::warn!(
                user_id = %sender_id,
                recipient_id = %draft.recipient_id,
                error = %e,
                "Private message not persisted"
            );
            HubError::Persistence(e)
        })?;

    let message = PrivateMessage {
        id,
        sender_id: sender_id.to_string(),
        recipient_id: draft.recipient_id,
        content: draft.content,
        created_at,
        sender_nickname,
    };

    let delivered = deliver_private_message(&state.registry, &message);
    tracing::debug!(
        message_id = %message.id,
        user_id = %message.sender_id,
        recipient_id = %message.recipient_id,
        delivered,
        "Private message delivered"
    );

    Ok(message)
}

/// Fan a persisted message out to the recipient's and the sender's connections.
/// Returns the number of connections reached.
pub fn deliver_private_message(registry: &ConnectionRegistry, message: &PrivateMessage) -> usize {
    let frame = ServerFrame::ok(FrameKind::PrivateMessage.response_tag(), message);

    let mut delivered = registry.send_to_user(&message.recipient_id, &frame);
    if message.sender_id != message.recipient_id {
        delivered += registry.send_to_user(&message.sender_id, &frame);
    }
    delivered
}
