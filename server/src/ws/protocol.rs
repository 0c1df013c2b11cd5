//! Per-connection frame dispatcher.
//!
//! A connection starts `Unauthenticated` and moves to `Authenticated` on a
//! successful `session_check` or `login`. It never moves back; the binding
//! ends when the socket closes.

use serde::Serialize;
use serde_json::json;

use crate::chat::messages::send_private_message;
use crate::chat::presence::{broadcast_roster, send_roster};
use crate::chat::typing::{forward_typing, TypingEvent};
use crate::db::{self, models::NewAccount, models::UserProfile};
use crate::error::{HubError, StoreError};
use crate::state::AppState;
use crate::ws::frames::{
    parse_envelope, ClientRequest, FrameKind, HistoryQuery, Inbound, ServerFrame,
    ENVELOPE_ERROR_TAG,
};
use crate::ws::ConnectionHandle;

/// Upper bound on a single history page.
pub const MAX_HISTORY_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated { user_id: String },
}

/// Everything the dispatcher knows about one connection.
pub struct ConnectionContext {
    pub handle: ConnectionHandle,
    pub auth: AuthState,
}

impl ConnectionContext {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            auth: AuthState::Unauthenticated,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.auth {
            AuthState::Authenticated { user_id } => Some(user_id),
            AuthState::Unauthenticated => None,
        }
    }

    /// Whether binding to `user_id` would add this connection to the registry.
    /// Rebinding to the same user is allowed and changes nothing.
    fn needs_binding(&self, user_id: &str) -> Result<bool, HubError> {
        match self.user_id() {
            None => Ok(true),
            Some(current) if current == user_id => Ok(false),
            Some(_) => Err(HubError::AlreadyAuthenticated),
        }
    }
}

/// `{ "user": { ...profile, session_id? } }`
#[derive(Serialize)]
struct ProfileReply<'a> {
    user: ProfileBody<'a>,
}

#[derive(Serialize)]
struct ProfileBody<'a> {
    #[serde(flatten)]
    profile: &'a UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

fn profile_reply<'a>(profile: &'a UserProfile, session_id: Option<&'a str>) -> ProfileReply<'a> {
    ProfileReply {
        user: ProfileBody {
            profile,
            session_id,
        },
    }
}

/// Handle one inbound text frame. Never fails: every problem is answered
/// with an error frame or logged, and the connection stays open.
pub async fn handle_text_message(text: &str, ctx: &mut ConnectionContext, state: &AppState) {
    let (kind, data) = match parse_envelope(text) {
        Ok(Inbound::Request(kind, data)) => (kind, data),
        Ok(Inbound::Unknown(tag)) => {
            tracing::debug!(
                connection_id = %ctx.handle.id(),
                frame_type = %tag,
                "Ignoring unknown frame type"
            );
            return;
        }
        Err(e) => {
            send_error(ctx, ENVELOPE_ERROR_TAG, &e);
            return;
        }
    };

    // Authorization comes before payload decoding
    if kind.requires_auth() && ctx.user_id().is_none() {
        send_error(ctx, kind.response_tag(), &HubError::Unauthenticated);
        return;
    }

    match ClientRequest::decode(kind, data) {
        Ok(request) => dispatch(request, ctx, state).await,
        Err(e) => send_error(ctx, kind.response_tag(), &e),
    }
}

async fn dispatch(request: ClientRequest, ctx: &mut ConnectionContext, state: &AppState) {
    let kind = request.kind();

    let result = match request {
        ClientRequest::SessionCheck { session_id } => {
            handle_session_check(ctx, state, session_id).await
        }
        ClientRequest::Register(account) => handle_register(ctx, state, account).await,
        ClientRequest::Login {
            identifier,
            password,
        } => handle_login(ctx, state, identifier, password).await,
        ClientRequest::PrivateMessage(draft) => match ctx.user_id() {
            Some(user_id) => send_private_message(state, user_id, draft).await.map(|_| ()),
            None => Err(HubError::Unauthenticated),
        },
        ClientRequest::ChatHistory(query) => handle_chat_history(ctx, state, query).await,
        ClientRequest::UsersList => match ctx.user_id() {
            Some(user_id) => send_roster(state, &ctx.handle, user_id).await,
            None => Err(HubError::Unauthenticated),
        },
        ClientRequest::Typing(event) => handle_typing(ctx, state, event),
    };

    if let Err(e) = result {
        send_error(ctx, kind.response_tag(), &e);
    }
}

async fn handle_session_check(
    ctx: &mut ConnectionContext,
    state: &AppState,
    token: String,
) -> Result<(), HubError> {
    let sessions = state.sessions.clone();
    let lookup = token.clone();
    let profile = db::blocking(move || sessions.validate_session(&lookup))
        .await
        .map_err(|e| match e {
            StoreError::NotFound => HubError::InvalidSession,
            other => HubError::Persistence(other),
        })?;

    bind(ctx, state, &profile.user_id).await?;

    ctx.handle.send_frame(&ServerFrame::ok(
        FrameKind::SessionCheck.response_tag(),
        profile_reply(&profile, Some(&token)),
    ))
}

async fn handle_register(
    ctx: &mut ConnectionContext,
    state: &AppState,
    account: NewAccount,
) -> Result<(), HubError> {
    let tag = FrameKind::Register.response_tag();
    let echo = json!({ "user": { "email": account.email, "nickname": account.nickname } });

    let accounts = state.accounts.clone();
    let result = db::blocking(move || accounts.register(&account)).await;

    let frame = match result {
        Ok(_) => ServerFrame::ok(tag, echo),
        Err(StoreError::Validation(reason)) | Err(StoreError::Conflict(reason)) => {
            ServerFrame::error_with(tag, HubError::Registration(reason).client_message(), echo)
        }
        Err(e) => {
            tracing::error!(error = %e, "Registration failed");
            ServerFrame::error_with(tag, HubError::Persistence(e).client_message(), echo)
        }
    };
    ctx.handle.send_frame(&frame)
}

async fn handle_login(
    ctx: &mut ConnectionContext,
    state: &AppState,
    identifier: String,
    password: String,
) -> Result<(), HubError> {
    let tag = FrameKind::Login.response_tag();

    match login(ctx, state, &identifier, password).await {
        Ok((profile, token)) => {
            ctx.handle.send_frame(&ServerFrame::ok(tag, profile_reply(&profile, Some(&token))))
        }
        Err(e) => {
            tracing::debug!(connection_id = %ctx.handle.id(), error = %e, "Login rejected");
            let echo = json!({ "user": { "email_or_nickname": identifier } });
            ctx.handle
                .send_frame(&ServerFrame::error_with(tag, e.client_message(), echo))
        }
    }
}

async fn login(
    ctx: &mut ConnectionContext,
    state: &AppState,
    identifier: &str,
    password: String,
) -> Result<(UserProfile, String), HubError> {
    let accounts = state.accounts.clone();
    let ident = identifier.to_string();
    let profile = db::blocking(move || accounts.authenticate(&ident, &password))
        .await
        .map_err(|e| match e {
            StoreError::NotFound | StoreError::Validation(_) => HubError::InvalidCredentials,
            other => HubError::Persistence(other),
        })?;

    // Refuse before a session is issued for the wrong user
    ctx.needs_binding(&profile.user_id)?;

    let sessions = state.sessions.clone();
    let user_id = profile.user_id.clone();
    let token = db::blocking(move || sessions.issue_session(&user_id)).await?;

    bind(ctx, state, &profile.user_id).await?;
    tracing::info!(user_id = %profile.user_id, connection_id = %ctx.handle.id(), "User logged in");

    Ok((profile, token))
}

/// Bind the connection to `user_id`, register it and broadcast presence.
async fn bind(ctx: &mut ConnectionContext, state: &AppState, user_id: &str) -> Result<(), HubError> {
    if !ctx.needs_binding(user_id)? {
        return Ok(());
    }

    let count = state.registry.register(user_id, ctx.handle.clone());
    ctx.auth = AuthState::Authenticated {
        user_id: user_id.to_string(),
    };
    tracing::info!(
        user_id = %user_id,
        connection_id = %ctx.handle.id(),
        connections = count,
        "Connection authenticated"
    );

    broadcast_roster(state).await;
    Ok(())
}

/// Resolve the page size: absent or zero means the configured default.
fn page_size(requested: Option<u32>, default: u32) -> u32 {
    match requested {
        None | Some(0) => default.clamp(1, MAX_HISTORY_PAGE),
        Some(n) => n.min(MAX_HISTORY_PAGE),
    }
}

async fn handle_chat_history(
    ctx: &ConnectionContext,
    state: &AppState,
    query: HistoryQuery,
) -> Result<(), HubError> {
    let user_id = ctx.user_id().ok_or(HubError::Unauthenticated)?.to_string();
    if query.with_user_id.trim().is_empty() {
        return Err(HubError::Decode("chat history"));
    }

    let limit = page_size(query.limit, state.history_page_size);
    let offset = query.offset.unwrap_or(0);
    let messages = state.messages.clone();
    let other = query.with_user_id;

    let history =
        db::blocking(move || messages.fetch_history(&user_id, &other, limit, offset)).await?;

    ctx.handle.send_frame(&ServerFrame::ok(
        FrameKind::ChatHistory.response_tag(),
        &history,
    ))
}

fn handle_typing(
    ctx: &ConnectionContext,
    state: &AppState,
    event: TypingEvent,
) -> Result<(), HubError> {
    let reached = forward_typing(&state.registry, ctx.user_id(), event)?;
    tracing::trace!(connection_id = %ctx.handle.id(), reached, "Typing forwarded");
    Ok(())
}

/// Send an error frame on this connection only.
fn send_error(ctx: &ConnectionContext, tag: &str, err: &HubError) {
    match err {
        HubError::Persistence(e) => {
            tracing::warn!(connection_id = %ctx.handle.id(), error = %e, "Request failed in store")
        }
        other => {
            tracing::debug!(connection_id = %ctx.handle.id(), error = %other, "Request rejected")
        }
    }

    if let Err(e) = ctx.handle.send_frame(&ServerFrame::error(tag, err.client_message())) {
        tracing::warn!(connection_id = %ctx.handle.id(), error = %e, "Failed to send error frame");
    }
}
