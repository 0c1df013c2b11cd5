use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::ws::frames::{FrameKind, ServerFrame};
use crate::ws::ConnectionRegistry;

/// Ephemeral typing indicator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    #[serde(rename = "istyping", default)]
    pub is_typing: bool,
    #[serde(rename = "whoIsTyping", default)]
    pub from_user_id: String,
    #[serde(rename = "whoIsReceiving")]
    pub to_user_id: String,
}

/// Forward a typing event to the recipient's connections only.
///
/// On an authenticated connection the sender field is replaced with the
/// connection's user. Returns the number of connections reached.
pub fn forward_typing(
    registry: &ConnectionRegistry,
    sender: Option<&str>,
    mut event: TypingEvent,
) -> Result<usize, HubError> {
    if event.to_user_id.trim().is_empty() {
        return Err(HubError::Decode("typing"));
    }
    if let Some(user_id) = sender {
        event.from_user_id = user_id.to_string();
    }

    let frame = ServerFrame::ok(FrameKind::Typing.response_tag(), &event);
    Ok(registry.send_to_user(&event.to_user_id, &frame))
}
