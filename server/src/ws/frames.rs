//! JSON wire format: the inbound `{type, data}` envelope, the closed set of
//! request kinds, and the outbound `{type, status, data, error}` frame.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::messages::MessageDraft;
use crate::chat::typing::TypingEvent;
use crate::db::models::NewAccount;
use crate::error::HubError;

/// Response type used when the envelope itself cannot be parsed.
pub const ENVELOPE_ERROR_TAG: &str = "error";

/// Every request kind the hub understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    SessionCheck,
    Register,
    Login,
    PrivateMessage,
    ChatHistory,
    UsersList,
    Typing,
}

impl FrameKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "session_check" => Some(Self::SessionCheck),
            "register" => Some(Self::Register),
            "login" => Some(Self::Login),
            "private_message" => Some(Self::PrivateMessage),
            "get_chat_history" => Some(Self::ChatHistory),
            "users_list" => Some(Self::UsersList),
            "typing" => Some(Self::Typing),
            _ => None,
        }
    }

    pub fn request_tag(self) -> &'static str {
        match self {
            Self::SessionCheck => "session_check",
            Self::Register => "register",
            Self::Login => "login",
            Self::PrivateMessage => "private_message",
            Self::ChatHistory => "get_chat_history",
            Self::UsersList => "users_list",
            Self::Typing => "typing",
        }
    }

    /// The `type` of every frame sent in answer to (or as a result of) this request.
    pub fn response_tag(self) -> &'static str {
        match self {
            Self::SessionCheck => "session_check_result",
            Self::Register => "register_result",
            Self::Login => "login_result",
            Self::PrivateMessage => "private_message",
            Self::ChatHistory => "chat_history_result",
            Self::UsersList => "users_list",
            Self::Typing => "typing_result",
        }
    }

    pub fn requires_auth(self) -> bool {
        match self {
            Self::PrivateMessage | Self::ChatHistory | Self::UsersList => true,
            Self::SessionCheck | Self::Register | Self::Login | Self::Typing => false,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::SessionCheck => "session",
            Self::Register => "register",
            Self::Login => "login",
            Self::PrivateMessage => "private message",
            Self::ChatHistory => "chat history",
            Self::UsersList => "users list",
            Self::Typing => "typing",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Result of reading one text frame's envelope.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Request(FrameKind, Value),
    /// A well-formed envelope with a `type` the hub does not handle.
    Unknown(String),
}

pub fn parse_envelope(text: &str) -> Result<Inbound, HubError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|_| HubError::Decode("message"))?;

    Ok(match FrameKind::from_tag(&raw.kind) {
        Some(kind) => Inbound::Request(kind, raw.data),
        None => Inbound::Unknown(raw.kind),
    })
}

#[derive(Debug, Deserialize)]
struct UserWrapper<T> {
    user: T,
}

#[derive(Debug, Deserialize)]
struct SessionFields {
    #[serde(default)]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct LoginFields {
    #[serde(default)]
    email_or_nickname: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HistoryQuery {
    pub with_user_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// A decoded request; one variant per [`FrameKind`].
#[derive(Debug)]
pub enum ClientRequest {
    SessionCheck { session_id: String },
    Register(NewAccount),
    Login { identifier: String, password: String },
    PrivateMessage(MessageDraft),
    ChatHistory(HistoryQuery),
    UsersList,
    Typing(TypingEvent),
}

impl ClientRequest {
    pub fn decode(kind: FrameKind, data: Value) -> Result<Self, HubError> {
        let bad = |_| HubError::Decode(kind.label());

        Ok(match kind {
            FrameKind::SessionCheck => {
                let wrapper: UserWrapper<SessionFields> =
                    serde_json::from_value(data).map_err(bad)?;
                Self::SessionCheck {
                    session_id: wrapper.user.session_id,
                }
            }
            FrameKind::Register => {
                let wrapper: UserWrapper<NewAccount> =
                    serde_json::from_value(data).map_err(bad)?;
                Self::Register(wrapper.user)
            }
            FrameKind::Login => {
                let wrapper: UserWrapper<LoginFields> =
                    serde_json::from_value(data).map_err(bad)?;
                Self::Login {
                    identifier: wrapper.user.email_or_nickname,
                    password: wrapper.user.password,
                }
            }
            FrameKind::PrivateMessage => {
                Self::PrivateMessage(serde_json::from_value(data).map_err(bad)?)
            }
            FrameKind::ChatHistory => {
                Self::ChatHistory(serde_json::from_value(data).map_err(bad)?)
            }
            FrameKind::UsersList => Self::UsersList,
            FrameKind::Typing => Self::Typing(serde_json::from_value(data).map_err(bad)?),
        })
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::SessionCheck { .. } => FrameKind::SessionCheck,
            Self::Register(_) => FrameKind::Register,
            Self::Login { .. } => FrameKind::Login,
            Self::PrivateMessage(_) => FrameKind::PrivateMessage,
            Self::ChatHistory(_) => FrameKind::ChatHistory,
            Self::UsersList => FrameKind::UsersList,
            Self::Typing(_) => FrameKind::Typing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Ok,
    Error,
}

/// Outbound frame. `error` is present only when `status` is `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: FrameStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerFrame {
    pub fn ok(kind: &str, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or_else(|e| {
            tracing::error!(frame_type = %kind, error = %e, "Failed to serialize frame payload");
            Value::Null
        });
        Self {
            kind: kind.to_string(),
            status: FrameStatus::Ok,
            data,
            error: None,
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self::error_with(kind, message, Value::Null)
    }

    /// Error frame that still carries a payload (e.g. the echoed login identifier).
    pub fn error_with(kind: &str, message: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            status: FrameStatus::Error,
            data,
            error: Some(message.into()),
        }
    }

    pub fn to_message(&self) -> Result<Message, HubError> {
        let text = serde_json::to_string(self)
            .map_err(|e| HubError::Transport(format!("frame encoding failed: {}", e)))?;
        Ok(Message::Text(text.into()))
    }
}
