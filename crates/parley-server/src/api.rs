use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_core::{
    pinned_first, ChatService, ConversationSummary, GroupDetailsUpdate, ReactionOutcome,
    UserPresence,
};
use parley_shared::constants::{PRESENCE_HEARTBEAT_SECS, TYPING_REFRESH_MIN_MS};
use parley_shared::{ConversationId, DeleteMode, MessageId, UserId};
use parley_store::{Message, ProfileSync, User};

use crate::auth::Caller;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::subscribe::subscribe;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        // users
        .route("/users", get(list_users))
        .route("/users/sync", post(sync_user))
        .route("/users/me", get(current_user))
        .route("/users/presence", post(update_presence))
        .route("/users/:id/block", post(toggle_block))
        // directory and groups
        .route("/conversations", get(list_conversations))
        .route("/conversations/direct", post(get_or_create_direct))
        .route("/conversations/groups", post(create_group))
        .route("/conversations/:id", axum::routing::delete(delete_conversation))
        .route("/conversations/:id/read", post(mark_as_read))
        .route("/conversations/:id/pin", post(toggle_pin))
        .route("/conversations/:id/name", put(rename_group))
        .route("/conversations/:id/details", patch(update_group_details))
        .route("/conversations/:id/members", post(add_members))
        .route(
            "/conversations/:id/members/:user_id",
            axum::routing::delete(kick_member),
        )
        .route("/conversations/:id/leave", post(leave_group))
        // messages
        .route(
            "/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/:id/messages/search", get(search_messages))
        .route("/messages/:id", patch(edit_message).delete(delete_message))
        .route("/messages/:id/reactions", post(react))
        // typing
        .route(
            "/conversations/:id/typing",
            get(active_typers).post(start_typing).delete(stop_typing),
        )
        .route("/subscribe", get(subscribe))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a chat operation on the blocking pool; SQLite calls are synchronous.
async fn run<T, F>(state: &AppState, op: F) -> Result<T, ServerError>
where
    F: FnOnce(&ChatService) -> parley_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let chat = state.chat.clone();
    tokio::task::spawn_blocking(move || op(&chat))
        .await
        .map_err(|e| ServerError::Internal(format!("chat task failed: {e}")))?
        .map_err(ServerError::from)
}

fn user_path(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

// ---------------------------------------------------------------------------
// Service info
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    typing_window_ms: i64,
    typing_refresh_min_ms: i64,
    presence_heartbeat_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        typing_window_ms: state.chat.settings().typing_window.num_milliseconds(),
        typing_refresh_min_ms: TYPING_REFRESH_MIN_MS,
        presence_heartbeat_secs: PRESENCE_HEARTBEAT_SECS,
    })
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct BlockListResponse {
    blocked_user_ids: BTreeSet<UserId>,
}

async fn sync_user(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(profile): Json<ProfileSync>,
) -> Result<Json<User>, ServerError> {
    run(&state, move |chat| chat.sync_user(&caller, profile)).await.map(Json)
}

async fn current_user(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<User>, ServerError> {
    run(&state, move |chat| chat.current_user(&caller)).await.map(Json)
}

async fn list_users(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<UserPresence>>, ServerError> {
    run(&state, move |chat| chat.list_users(&caller)).await.map(Json)
}

async fn update_presence(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.update_presence(&caller)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_block(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(target): Path<String>,
) -> Result<Json<BlockListResponse>, ServerError> {
    let target = user_path(&target)?;
    let blocked_user_ids = run(&state, move |chat| chat.toggle_block(&caller, &target)).await?;
    Ok(Json(BlockListResponse { blocked_user_ids }))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DirectRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    member_ids: Vec<UserId>,
}

#[derive(Serialize)]
struct ConversationCreated {
    conversation_id: ConversationId,
}

#[derive(Deserialize, Default)]
struct ListConversationsQuery {
    #[serde(default)]
    pinned_first: bool,
}

#[derive(Serialize)]
struct PinResponse {
    pinned: bool,
}

async fn get_or_create_direct(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<DirectRequest>,
) -> Result<Json<ConversationCreated>, ServerError> {
    let other = user_path(req.user_id.as_str())?;
    let conversation_id = run(&state, move |chat| chat.get_or_create_direct(&caller, &other)).await?;
    Ok(Json(ConversationCreated { conversation_id }))
}

async fn create_group(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<ConversationCreated>, ServerError> {
    let members = req
        .member_ids
        .iter()
        .map(|id| user_path(id.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let conversation_id = run(&state, move |chat| {
        chat.create_group(&caller, &req.name, members)
    })
    .await?;
    info!(conversation = %conversation_id, "group created via API");
    Ok(Json(ConversationCreated { conversation_id }))
}

async fn list_conversations(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let summaries = run(&state, move |chat| chat.list_conversations(&caller)).await?;
    Ok(Json(if query.pinned_first {
        pinned_first(summaries)
    } else {
        summaries
    }))
}

async fn mark_as_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.mark_as_read(&caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_pin(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<PinResponse>, ServerError> {
    let pinned = run(&state, move |chat| chat.toggle_pin(&caller, id)).await?;
    Ok(Json(PinResponse { pinned }))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.delete_conversation(&caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Group membership
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Deserialize)]
struct AddMembersRequest {
    user_ids: Vec<UserId>,
}

#[derive(Serialize)]
struct AddMembersResponse {
    added: Vec<UserId>,
}

#[derive(Deserialize, Default)]
struct LeaveRequest {
    #[serde(default)]
    delete_history: bool,
}

async fn rename_group(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(req): Json<RenameRequest>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.rename_group(&caller, id, &req.name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_group_details(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(update): Json<GroupDetailsUpdate>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.update_group_details(&caller, id, update)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_members(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(req): Json<AddMembersRequest>,
) -> Result<Json<AddMembersResponse>, ServerError> {
    let users = req
        .user_ids
        .iter()
        .map(|id| user_path(id.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let added = run(&state, move |chat| chat.add_members(&caller, id, users)).await?;
    Ok(Json(AddMembersResponse { added }))
}

async fn kick_member(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, target)): Path<(ConversationId, String)>,
) -> Result<StatusCode, ServerError> {
    let target = user_path(&target)?;
    run(&state, move |chat| chat.kick_member(&caller, id, &target)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_group(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    req: Option<Json<LeaveRequest>>,
) -> Result<StatusCode, ServerError> {
    let delete_history = req.map(|Json(r)| r.delete_history).unwrap_or_default();
    run(&state, move |chat| chat.leave_group(&caller, id, delete_history)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SendRequest {
    content: String,
    reply_to: Option<MessageId>,
}

#[derive(Serialize)]
struct MessageCreated {
    message_id: MessageId,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct EditRequest {
    content: String,
}

#[derive(Deserialize)]
struct DeleteQuery {
    mode: Option<DeleteMode>,
}

#[derive(Deserialize)]
struct ReactRequest {
    emoji: String,
}

async fn list_messages(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    run(&state, move |chat| chat.list_messages(&caller, id)).await.map(Json)
}

async fn search_messages(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    run(&state, move |chat| chat.search_messages(&caller, id, &query.q))
        .await
        .map(Json)
}

async fn send_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<MessageCreated>), ServerError> {
    let message_id = run(&state, move |chat| {
        chat.send(&caller, id, &req.content, req.reply_to)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(MessageCreated { message_id })))
}

async fn edit_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
    Json(req): Json<EditRequest>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.edit(&caller, id, &req.content)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ServerError> {
    let mode = query.mode.unwrap_or(DeleteMode::ForMe);
    run(&state, move |chat| chat.delete_message(&caller, id, mode)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn react(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
    Json(req): Json<ReactRequest>,
) -> Result<Json<ReactionOutcome>, ServerError> {
    run(&state, move |chat| chat.react(&caller, id, &req.emoji))
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TypersResponse {
    user_ids: BTreeSet<UserId>,
}

async fn start_typing(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.start_typing(&caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_typing(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, ServerError> {
    run(&state, move |chat| chat.stop_typing(&caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn active_typers(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<TypersResponse>, ServerError> {
    let user_ids = run(&state, move |chat| chat.active_typers(&caller, id)).await?;
    Ok(Json(TypersResponse { user_ids }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
