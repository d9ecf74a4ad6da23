//! Router tests for registration, login and refresh-token sessions.

mod common;

use axum::http::StatusCode;
use mercato_core::models::auth::Role;
use serde_json::{Value, json};

use common::TestApp;

async fn register(app: &TestApp, name: &str, email: &str) -> Value {
    let (status, body) = app
        .send(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "name": name,
                "email": email,
                "phone": "555-0100",
                "password": "correct horse battery"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "register answered {body}");
    body
}

async fn refresh(app: &TestApp, token: &Value) -> (StatusCode, Value) {
    app.send(
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": token })),
    )
    .await
}

#[tokio::test]
async fn health_reports_version() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], mercato_core::version());
}

#[tokio::test]
async fn register_creates_user_store_and_session() {
    let app = TestApp::new();
    let body = register(&app, "Ada", "ada@example.com").await;

    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["refresh_token"].as_str().unwrap().len(), 64);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    let user_id = body["user_id"].as_i64().unwrap();
    let stores: Vec<String> = app
        .store
        .stores_of(user_id)
        .into_iter()
        .map(|(_, name)| name)
        .collect();
    assert_eq!(stores, vec!["Ada's Store".to_string()]);

    // The access token works against protected routes.
    let auth = format!("Bearer {}", body["token"].as_str().unwrap());
    let (status, _) = app.send("GET", "/transactions", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn register_rejects_duplicates_and_bad_input() {
    let app = TestApp::new();
    register(&app, "Ada", "ada@example.com").await;

    let (status, body) = app
        .send(
            "POST",
            "/auth/register",
            None,
            Some(json!({"name": "Ada 2", "email": "ADA@example.com", "password": "long enough pw"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    for bad in [
        json!({"name": "", "email": "x@example.com", "password": "long enough pw"}),
        json!({"name": "X", "email": "not-an-email", "password": "long enough pw"}),
        json!({"name": "X", "email": "x@example.com", "password": "short"}),
    ] {
        let (status, _) = app.send("POST", "/auth/register", None, Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn login_uses_one_generic_error() {
    let app = TestApp::new();
    register(&app, "Ada", "ada@example.com").await;

    let (status, body) = app
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "correct horse battery"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user_id"].is_i64());

    let (wrong_pw, wrong_pw_body) = app
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "nope"})),
        )
        .await;
    let (unknown, unknown_body) = app
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "bob@example.com", "password": "nope"})),
        )
        .await;
    assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_pw_body, unknown_body);
}

#[tokio::test]
async fn refresh_tokens_are_single_use() {
    let app = TestApp::new();
    let first = register(&app, "Ada", "ada@example.com").await;

    let (status, second) = refresh(&app, &first["refresh_token"]).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second["refresh_token"], first["refresh_token"]);
    assert!(second["refresh_expires_at"].is_string());

    let (status, body) = refresh(&app, &first["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid refresh token");

    let (status, _) = refresh(&app, &second["refresh_token"]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = refresh(&app, &json!("")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_revokes_and_is_idempotent() {
    let app = TestApp::new();
    let session = register(&app, "Ada", "ada@example.com").await;
    let token = json!({ "refresh_token": session["refresh_token"] });

    let (status, _) = app
        .send("POST", "/auth/logout", None, Some(token.clone()))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = refresh(&app, &session["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send("POST", "/auth/logout", None, Some(token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn logout_all_respects_roles() {
    let app = TestApp::new();
    let ada = register(&app, "Ada", "ada@example.com").await;
    let bob = register(&app, "Bob", "bob@example.com").await;
    let ada_id = ada["user_id"].as_i64().unwrap();
    let bob_id = bob["user_id"].as_i64().unwrap();

    let (status, _) = app.send("POST", "/auth/logout/all", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A user may not end someone else's sessions.
    let (status, _) = app
        .send(
            "POST",
            "/auth/logout/all",
            Some(&app.bearer(ada_id, Role::User)),
            Some(json!({ "user_id": bob_id })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, bob_next) = refresh(&app, &bob["refresh_token"]).await;
    assert_eq!(status, StatusCode::OK);

    // Without a body the caller's own sessions go.
    let (status, _) = app
        .send(
            "POST",
            "/auth/logout/all",
            Some(&app.bearer(ada_id, Role::User)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = refresh(&app, &ada["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // An admin may target anyone.
    let admin = app.store.seed_user("Root", "root@example.com", Role::Admin);
    let (status, _) = app
        .send(
            "POST",
            "/auth/logout/all",
            Some(&app.bearer(admin.id, Role::Admin)),
            Some(json!({ "user_id": bob_id })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = refresh(&app, &bob_next["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_auth_bodies_answer_json_400() {
    let app = TestApp::new();
    for (uri, body) in [
        ("/auth/register", json!({"name": "Ada", "email": 7})),
        ("/auth/login", json!(["ada@example.com", "pw"])),
        ("/auth/refresh", json!({"refresh_token": false})),
        ("/auth/logout", json!("token")),
    ] {
        let (status, resp) = app.send("POST", uri, None, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} answered {resp}");
        assert_eq!(resp["error"], "validation_error");
    }
}
