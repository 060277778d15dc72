//! Route definitions for the Analyst gateway.
//!
//! Provides HTTP endpoints for login, accounts, sessions and drafts, plus
//! the two WebSocket channels.

use crate::agent::{AgentServices, DEFAULT_SESSION_TITLE};
use crate::auth::{auth_middleware, AuthState, AuthUser};
use crate::classify::ReplyClassifier;
use crate::document::DocxRenderer;
use crate::drafts::{DraftError, DraftService};
use crate::hub::ConnectionHub;
use crate::llm::LlmGateway;
use crate::ws::{agent_ws_handler, team_ws_handler};
use analyst_common::{Config, Error, Result};
use analyst_store::{
    CreateUserRequest, Database, Draft, DraftRepository, Message, MessageRepository,
    PeerMessageRepository, Session, SessionRepository, SessionStatus, User, UserId, UserStore,
    ADMIN_ROLE,
};
use axum::{
    extract::{Extension, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthState,
    pub users: UserStore,
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub drafts: Arc<dyn DraftRepository>,
    pub draft_service: Arc<DraftService>,
    pub peer_messages: Arc<dyn PeerMessageRepository>,
    pub hub: ConnectionHub,
    pub agent: Arc<AgentServices>,
}

impl AppState {
    /// Wire every service over `db`, using `llm` for model calls.
    pub fn new(config: Config, db: &Database, llm: Arc<LlmGateway>) -> Self {
        let sessions: Arc<dyn SessionRepository> = Arc::new(db.sessions());
        let messages: Arc<dyn MessageRepository> = Arc::new(db.messages());
        let drafts: Arc<dyn DraftRepository> = Arc::new(db.drafts());

        let draft_service = Arc::new(DraftService::new(
            drafts.clone(),
            messages.clone(),
            llm.clone(),
            DocxRenderer::new(&config.storage.documents_dir),
        ));

        let agent = Arc::new(AgentServices {
            sessions: sessions.clone(),
            messages: messages.clone(),
            llm,
            drafts: draft_service.clone(),
            classifier: ReplyClassifier::new(config.llm.structured_types.clone()),
        });

        Self {
            auth: AuthState::from_config(&config.auth),
            users: db.users(),
            sessions,
            messages,
            drafts,
            draft_service,
            peer_messages: Arc::new(db.peer_messages()),
            hub: ConnectionHub::new(),
            agent,
            config: Arc::new(config),
        }
    }

    /// Open the configured database and build the Gemini-backed gateway.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let db = Database::open(&config.storage.database_path)?;
        let llm = Arc::new(LlmGateway::from_config(&config.llm));
        Ok(Self::new(config, &db, llm))
    }
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// User response (sanitized user data).
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: UserResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: i64,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListDraftsResponse {
    pub drafts: Vec<Draft>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateDraftRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub request: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

/// Build the complete router with all routes.
pub fn build_all_routes(state: AppState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.auth.clone(), auth_middleware);

    let api_routes = Router::new()
        .route("/me", get(me_handler))
        .route("/api/users", get(list_users_handler))
        .route("/api/admin/users", post(create_user_handler))
        .route(
            "/sessions",
            get(list_sessions_handler)
                .post(create_session_handler)
                .delete(delete_all_sessions_handler),
        )
        .route("/sessions/:id", delete(delete_session_handler))
        .route("/sessions/:id/messages", get(list_messages_handler))
        .route("/sessions/:id/accept", post(accept_session_handler))
        .route("/sessions/:id/reject", post(reject_session_handler))
        .route(
            "/drafts",
            get(list_drafts_handler)
                .post(create_draft_handler)
                .delete(delete_all_drafts_handler),
        )
        .route("/drafts/:id", delete(delete_draft_handler))
        .route("/drafts/:id/download", get(download_draft_handler))
        .route("/drafts/:id/approve", post(approve_draft_handler))
        .route("/drafts/:id/reject", post(reject_draft_handler))
        .layer(auth_layer);

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/ws/agent", get(agent_ws_handler))
        .route("/ws/team", get(team_ws_handler))
        .merge(api_routes)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// The caller, or 401 when the request carries no user identity.
fn require_user(auth: Option<Extension<AuthUser>>) -> Result<AuthUser> {
    match auth {
        Some(Extension(user)) if user.user_id > 0 => Ok(user),
        _ => Err(Error::Auth("login required".into())),
    }
}

fn owned_session(state: &AppState, user: &AuthUser, id: i64) -> Result<Session> {
    let session = state
        .sessions
        .get(id)?
        .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
    if session.owner_user_id != user.user_id {
        return Err(Error::Forbidden(format!("session {id} belongs to another user")));
    }
    Ok(session)
}

fn owned_draft(state: &AppState, user: &AuthUser, id: i64) -> Result<Draft> {
    let draft = state
        .drafts
        .get(id)?
        .ok_or_else(|| Error::NotFound(format!("draft {id}")))?;
    if draft.owner_user_id != user.user_id {
        return Err(Error::Forbidden(format!("draft {id} belongs to another user")));
    }
    Ok(draft)
}

fn draft_error(err: DraftError) -> Error {
    let message = err.to_string();
    match err {
        DraftError::NotFound(id) => Error::NotFound(format!("draft {id}")),
        DraftError::EmptyRequest => Error::InvalidInput(message),
        DraftError::Analysis(_) => Error::External(message),
        _ => Error::Internal(message),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Health & Auth Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "analyst-gateway".into(),
    })
}

async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    if !state.auth.is_configured() {
        return Err(Error::Config("server jwt not configured".into()));
    }
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(Error::Auth("invalid credentials".into()));
    }

    let user = state
        .users
        .verify_password(&request.email, &request.password)?
        .ok_or_else(|| {
            tracing::info!(email = %request.email, "Failed login attempt");
            Error::Auth("invalid credentials".into())
        })?;

    let token = state
        .auth
        .issue_token(&user)
        .map_err(|e| Error::Internal(e.to_string()))?;

    tracing::info!(user_id = user.id, "User logged in");
    Ok(Json(LoginResponse {
        token,
        expires_in: state.auth.token_expiry_secs,
    }))
}

async fn me_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<MeResponse>> {
    let caller = require_user(auth)?;
    let user = state
        .users
        .get(caller.user_id)?
        .ok_or_else(|| Error::NotFound(format!("user {}", caller.user_id)))?;
    Ok(Json(MeResponse { user: user.into() }))
}

async fn list_users_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<ListUsersResponse>> {
    let caller = require_user(auth)?;
    let users = state
        .users
        .list_all()?
        .into_iter()
        .filter(|u| u.id != caller.user_id)
        .map(UserResponse::from)
        .collect();
    Ok(Json(ListUsersResponse { users }))
}

async fn create_user_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let caller = require_user(auth)?;
    if caller.role != ADMIN_ROLE {
        return Err(Error::Forbidden(format!("{ADMIN_ROLE} role required")));
    }

    let user = state
        .users
        .create(&request)
        .map_err(|e| Error::InvalidInput(format!("{e:#}")))?;
    tracing::info!(user_id = user.id, created_by = caller.user_id, "User created");
    Ok((StatusCode::CREATED, Json(user.into())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_sessions_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<ListSessionsResponse>> {
    let caller = require_user(auth)?;
    let sessions = state.sessions.list_by_owner(caller.user_id)?;
    Ok(Json(ListSessionsResponse { sessions }))
}

async fn create_session_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>)> {
    let caller = require_user(auth)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let title = match request.title.trim() {
        "" => DEFAULT_SESSION_TITLE,
        title => title,
    };

    let session = state.sessions.create(caller.user_id, title)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            title: session.title,
        }),
    ))
}

async fn delete_all_sessions_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<DeletedResponse>> {
    let caller = require_user(auth)?;
    let deleted = state.sessions.delete_all_by_owner(caller.user_id)?;
    let orphans = state.messages.purge_orphans()?;
    tracing::info!(user_id = caller.user_id, deleted, orphans, "Sessions cleared");
    Ok(Json(DeletedResponse { deleted }))
}

async fn delete_session_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let caller = require_user(auth)?;
    owned_session(&state, &caller, id)?;

    state.messages.delete_by_session(id)?;
    state.sessions.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> Result<Json<ListMessagesResponse>> {
    let caller = require_user(auth)?;
    owned_session(&state, &caller, id)?;
    let messages = state.messages.list_by_session(id)?;
    Ok(Json(ListMessagesResponse { messages }))
}

async fn accept_session_handler(
    state: State<AppState>,
    auth: Option<Extension<AuthUser>>,
    id: Path<i64>,
) -> Result<Json<Session>> {
    set_session_status(state, auth, id, SessionStatus::Accepted).await
}

async fn reject_session_handler(
    state: State<AppState>,
    auth: Option<Extension<AuthUser>>,
    id: Path<i64>,
) -> Result<Json<Session>> {
    set_session_status(state, auth, id, SessionStatus::Rejected).await
}

async fn set_session_status(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
    status: SessionStatus,
) -> Result<Json<Session>> {
    let caller = require_user(auth)?;
    owned_session(&state, &caller, id)?;
    let session = state
        .sessions
        .set_status(id, status)?
        .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
    Ok(Json(session))
}

// ─────────────────────────────────────────────────────────────────────────────
// Draft Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_drafts_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<ListDraftsResponse>> {
    let caller = require_user(auth)?;
    let drafts = state.drafts.list_by_owner(caller.user_id)?;
    Ok(Json(ListDraftsResponse { drafts }))
}

async fn create_draft_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Json(request): Json<CreateDraftRequest>,
) -> Result<(StatusCode, Json<Draft>)> {
    let caller = require_user(auth)?;
    let draft = state
        .draft_service
        .create_from_request(caller.user_id, &request.title, &request.request)
        .await
        .map_err(draft_error)?;
    Ok((StatusCode::CREATED, Json(draft)))
}

async fn delete_all_drafts_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<DeletedResponse>> {
    let caller = require_user(auth)?;
    let deleted = state.drafts.delete_all_by_owner(caller.user_id)?;
    Ok(Json(DeletedResponse { deleted }))
}

/// Deleting a draft also removes the session it came from.
async fn delete_draft_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let caller = require_user(auth)?;
    let draft = owned_draft(&state, &caller, id)?;

    state.drafts.delete(id)?;
    if let Some(session_id) = draft.session_id {
        state.messages.delete_by_session(session_id)?;
        state.sessions.delete(session_id)?;
    }
    if let Err(e) = tokio::fs::remove_file(&draft.file_path).await {
        tracing::debug!(draft_id = id, path = %draft.file_path, error = %e, "Draft file not removed");
    }

    tracing::info!(draft_id = id, session_id = ?draft.session_id, "Draft deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn download_draft_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> Result<Response> {
    let caller = require_user(auth)?;
    let draft = owned_draft(&state, &caller, id)?;

    let bytes = tokio::fs::read(&draft.file_path).await.map_err(|e| {
        tracing::warn!(draft_id = id, path = %draft.file_path, error = %e, "Draft file unreadable");
        Error::NotFound(format!("document for draft {id}"))
    })?;

    let filename = std::path::Path::new(&draft.file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.docx")
        .to_string();

    Ok((
        [
            (header::CONTENT_TYPE, DOCX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn approve_draft_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> Result<Json<Draft>> {
    let caller = require_user(auth)?;
    owned_draft(&state, &caller, id)?;
    state.draft_service.approve(id).map(Json).map_err(draft_error)
}

async fn reject_draft_handler(
    State(state): State<AppState>,
    auth: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> Result<Json<Draft>> {
    let caller = require_user(auth)?;
    owned_draft(&state, &caller, id)?;
    state.draft_service.reject(id).map(Json).map_err(draft_error)
}
