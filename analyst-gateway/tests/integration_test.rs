//! Integration tests for the Analyst gateway HTTP API.
//!
//! Tests login, account management, sessions and drafts against an
//! isolated database and documents directory.

use analyst_common::config::Config;
use analyst_gateway::classify::parse_requirements;
use analyst_gateway::provider::{
    ChatRequest, ChatResponse, Provider, ProviderError, ProviderErrorKind, TokenUsage,
};
use analyst_gateway::{build_router, prepare, AppState, LlmGateway};
use analyst_store::{Database, DraftRepository, MessageRepository, NewMessage, SessionRepository};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "test-secret-key-for-integration-tests!";
const ADMIN_EMAIL: &str = "admin@example.com";
const ADMIN_PASSWORD: &str = "admin-password";

/// REST routes never reach the model.
struct NoModel;

#[async_trait]
impl Provider for NoModel {
    fn name(&self) -> &str {
        "none"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::new("none", request.model, ProviderErrorKind::NotConfigured, "no model"))
    }
}

/// Answers every prompt with the same text.
struct Fixed(&'static str);

#[async_trait]
impl Provider for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            provider: "fixed".into(),
            model: request.model,
            content: self.0.to_string(),
            usage: TokenUsage::default(),
            finish_reason: Some("STOP".into()),
            latency_ms: 0,
        })
    }
}

fn test_config(temp_dir: &TempDir, secret: Option<&str>) -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = secret.map(str::to_string);
    config.auth.token_expiry_secs = 3600;
    config.auth.admin_email = Some(ADMIN_EMAIL.into());
    config.auth.admin_password = Some(ADMIN_PASSWORD.into());
    config.storage.database_path = temp_dir.path().join("test-analyst.db");
    config.storage.documents_dir = temp_dir.path().join("docs");
    config
}

/// Test helper to create a router and its state with an isolated database.
fn create_test_app(temp_dir: &TempDir, secret: Option<&str>) -> (Router, AppState) {
    create_test_app_with(temp_dir, secret, Arc::new(NoModel))
}

fn create_test_app_with(
    temp_dir: &TempDir,
    secret: Option<&str>,
    provider: Arc<dyn Provider>,
) -> (Router, AppState) {
    let config = test_config(temp_dir, secret);
    let db = Database::open(&config.storage.database_path).unwrap();
    let llm = Arc::new(LlmGateway::new(provider, &config.llm));
    let state = AppState::new(config, &db, llm);
    prepare(&state).unwrap();
    (build_router(state.clone()), state)
}

/// Helper to make a request and get a JSON response (`Null` for empty bodies).
async fn request_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);

    if let Some(t) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }

    let request = if let Some(b) = body {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap()
    } else {
        request.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    (status, json)
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = request_json(
        app,
        Method::POST,
        "/auth/login",
        Some(json!({"email": email, "password": password})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

async fn create_user(app: &Router, admin_token: &str, email: &str, role: &str) -> i64 {
    let (status, body) = request_json(
        app,
        Method::POST,
        "/api/admin/users",
        Some(json!({"email": email, "password": "password123", "name": "Member", "role": role})),
        Some(admin_token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body["id"].as_i64().unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Health & Auth Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, Some(SECRET));

    let (status, body) = request_json(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "analyst-gateway");
}

#[tokio::test]
async fn test_login_and_me() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, Some(SECRET));

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/auth/login",
        Some(json!({"email": "ADMIN@example.com", "password": ADMIN_PASSWORD})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expires_in"], 3600);
    let token = body["token"].as_str().unwrap();

    let (status, body) = request_json(&app, Method::GET, "/me", None, Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], ADMIN_EMAIL);
    assert_eq!(body["user"]["role"], "Business Analyst");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, Some(SECRET));

    for (email, password) in [(ADMIN_EMAIL, "wrong"), ("nobody@example.com", "x"), ("", "")] {
        let (status, body) = request_json(
            &app,
            Method::POST,
            "/auth/login",
            Some(json!({"email": email, "password": password})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }
}

#[tokio::test]
async fn test_protected_routes_need_a_valid_token() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, Some(SECRET));

    let (status, _) = request_json(&app, Method::GET, "/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request_json(&app, Method::GET, "/me", None, Some("invalid-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unconfigured_secret_leaves_routes_open_but_anonymous() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, None);

    // the middleware lets the request through, the handler needs a user
    let (status, body) = request_json(&app, Method::GET, "/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/auth/login",
        Some(json!({"email": ADMIN_EMAIL, "password": ADMIN_PASSWORD})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// ─────────────────────────────────────────────────────────────────────────────
// User Management Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_admin_creates_users() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, Some(SECRET));
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let member_id = create_user(&app, &admin, "member@example.com", "User").await;
    assert!(member_id > 0);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/admin/users",
        Some(json!({"email": "member@example.com", "password": "password123"})),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/admin/users",
        Some(json!({"email": "short@example.com", "password": "short"})),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let member = login(&app, "member@example.com", "password123").await;
    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/admin/users",
        Some(json!({"email": "other@example.com", "password": "password123"})),
        Some(&member),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn test_user_list_excludes_caller() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, Some(SECRET));
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    create_user(&app, &admin, "a@example.com", "User").await;
    create_user(&app, &admin, "b@example.com", "User").await;

    let (status, body) = request_json(&app, Method::GET, "/api/users", None, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    let emails: Vec<&str> = body["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["email"].as_str().unwrap())
        .collect();
    assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&temp_dir, Some(SECRET));
    let token = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = request_json(&app, Method::POST, "/sessions", None, Some(&token)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["title"], "New Project");
    let first = body["session_id"].as_i64().unwrap();

    let (_, body) = request_json(
        &app,
        Method::POST,
        "/sessions",
        Some(json!({"title": "Shoe Shop"})),
        Some(&token),
    )
    .await;
    let second = body["session_id"].as_i64().unwrap();

    let (status, body) = request_json(&app, Method::GET, "/sessions", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![second, first]);

    state.messages.save(&NewMessage::user(second, "I sell shoes")).unwrap();
    state.messages.save(&NewMessage::ai(second, "Tell me more")).unwrap();

    let uri = format!("/sessions/{second}/messages");
    let (status, body) = request_json(&app, Method::GET, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"][0]["text"], "I sell shoes");
    assert_eq!(body["messages"][1]["author"], "ai");

    let uri = format!("/sessions/{second}/accept");
    let (status, body) = request_json(&app, Method::POST, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let uri = format!("/sessions/{second}");
    let (status, _) = request_json(&app, Method::DELETE, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.sessions.get(second).unwrap().is_none());
    assert!(state.messages.list_by_session(second).unwrap().is_empty());

    let (status, body) = request_json(&app, Method::DELETE, "/sessions", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
}

#[tokio::test]
async fn test_sessions_are_private() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&temp_dir, Some(SECRET));
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    create_user(&app, &admin, "member@example.com", "User").await;
    let member = login(&app, "member@example.com", "password123").await;

    let session = state.sessions.create(1, "Admin only").unwrap();

    let uri = format!("/sessions/{}/messages", session.id);
    let (status, _) = request_json(&app, Method::GET, &uri, None, Some(&member)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/sessions/{}", session.id);
    let (status, _) = request_json(&app, Method::DELETE, &uri, None, Some(&member)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request_json(&app, Method::POST, "/sessions/999/reject", None, Some(&member)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─────────────────────────────────────────────────────────────────────────────
// Draft Tests
// ─────────────────────────────────────────────────────────────────────────────

fn seed_draft(state: &AppState, session_id: i64, owner: i64) -> i64 {
    let parsed = parse_requirements(
        r#"{"type":"requirements","data":{"project":{"name":"Shoe Shop","description":"Online store"},
            "objectives":["Sell shoes"]}}"#,
    )
    .unwrap();
    state
        .draft_service
        .create_or_update_for_session(session_id, owner, &parsed)
        .unwrap()
        .draft
        .id
}

#[tokio::test]
async fn test_draft_download_and_review() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&temp_dir, Some(SECRET));
    let token = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let session = state.sessions.create(1, "Shoe Shop").unwrap();
    let draft_id = seed_draft(&state, session.id, 1);

    let (status, body) = request_json(&app, Method::GET, "/drafts", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drafts"][0]["id"], draft_id);
    assert_eq!(body["drafts"][0]["status"], "pending");
    assert_eq!(body["drafts"][0]["title"], "Shoe Shop");

    let request = Request::builder()
        .uri(format!("/drafts/{draft_id}/download"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains(&format!("session_{}_requirements.docx", session.id)));
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    assert!(bytes.starts_with(b"PK"));

    let uri = format!("/drafts/{draft_id}/approve");
    let (status, body) = request_json(&app, Method::POST, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let uri = format!("/drafts/{draft_id}/reject");
    let (_, body) = request_json(&app, Method::POST, &uri, None, Some(&token)).await;
    assert_eq!(body["status"], "rejected");
}

#[tokio::test]
async fn test_deleting_a_draft_removes_its_session() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&temp_dir, Some(SECRET));
    let token = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let session = state.sessions.create(1, "Shoe Shop").unwrap();
    state.messages.save(&NewMessage::user(session.id, "hi")).unwrap();
    let draft_id = seed_draft(&state, session.id, 1);

    let uri = format!("/drafts/{draft_id}");
    let (status, _) = request_json(&app, Method::DELETE, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(state.drafts.get(draft_id).unwrap().is_none());
    assert!(state.sessions.get(session.id).unwrap().is_none());
    assert!(state.messages.list_by_session(session.id).unwrap().is_empty());

    let uri = format!("/drafts/{draft_id}/download");
    let (status, _) = request_json(&app, Method::GET, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_drafts_are_private() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&temp_dir, Some(SECRET));
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    create_user(&app, &admin, "member@example.com", "User").await;
    let member = login(&app, "member@example.com", "password123").await;

    let draft_id = seed_draft(&state, 0, 1);

    let (_, body) = request_json(&app, Method::GET, "/drafts", None, Some(&member)).await;
    assert!(body["drafts"].as_array().unwrap().is_empty());

    let uri = format!("/drafts/{draft_id}/download");
    let (status, _) = request_json(&app, Method::GET, &uri, None, Some(&member)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = request_json(&app, Method::DELETE, "/drafts", None, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
}

#[tokio::test]
async fn test_create_draft_from_request() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app_with(
        &temp_dir,
        Some(SECRET),
        Arc::new(Fixed(r#"{"goal":"Loyalty points","kpis":["retention"]}"#)),
    );
    let token = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/drafts",
        Some(json!({"title": "Loyalty", "request": "Give buyers points"})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["title"], "Loyalty");
    assert_eq!(body["content"], "Give buyers points");
    assert_eq!(body["session_id"], Value::Null);

    let id = body["id"].as_i64().unwrap();
    let stored = state.drafts.get(id).unwrap().unwrap();
    assert!(std::path::Path::new(&stored.file_path).exists());

    let request = Request::builder()
        .uri(format!("/drafts/{id}/download"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("draft_loyalty_"));
}

#[tokio::test]
async fn test_create_draft_failures_store_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&temp_dir, Some(SECRET));
    let token = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/drafts",
        Some(json!({"title": "X", "request": "anything"})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["code"], "upstream_error");

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/drafts",
        Some(json!({"title": "X", "request": "   "})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/drafts",
        Some(json!({"title": "X", "request": "anything"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let admin = state.users.find_by_email(ADMIN_EMAIL).unwrap().unwrap();
    assert!(state.drafts.list_by_owner(admin.id).unwrap().is_empty());
}
