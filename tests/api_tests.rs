use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use letpot::{AuthenticationInfo, LetPotClient, LetPotError};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct MockApi {
    logins: Arc<Mutex<Vec<HashMap<String, String>>>>,
    device_calls: Arc<Mutex<u32>>,
}

fn token_body(access_token: &str) -> Value {
    let exp = chrono::Utc::now().timestamp() + 3600;
    json!({
        "ok": true,
        "message": "success",
        "data": {
            "token": { "token": access_token, "exp": exp },
            "refreshToken": { "token": "refresh-1", "exp": exp + 86400 },
            "user_id": "user-1"
        }
    })
}

async fn login(State(api): State<MockApi>, Form(form): Form<HashMap<String, String>>) -> Response {
    api.logins.lock().unwrap().push(form.clone());
    let field = |key: &str| form.get(key).cloned().unwrap_or_default();

    match (field("loginType").as_str(), field("email").as_str()) {
        ("EMAIL", "user@example.com") if field("password") == "secret" => {
            Json(token_body("token-1")).into_response()
        }
        ("EMAIL", "locked@example.com") => {
            Json(json!({ "ok": false, "message": "account locked" })).into_response()
        }
        ("REFRESH_TOKEN", _) if field("refresh_token") == "refresh-1" => {
            Json(token_body("token-2")).into_response()
        }
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn devices(State(api): State<MockApi>, headers: HeaderMap) -> Response {
    *api.device_calls.lock().unwrap() += 1;
    let header = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    if header("authorization") == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if header("authorization") == "maintenance" {
        return Json(json!({ "ok": false, "message": "down for maintenance" })).into_response();
    }
    if header("authorization") == "empty" {
        return Json(json!({ "ok": true, "message": "success" })).into_response();
    }
    if !matches!(header("authorization").as_str(), "token-1" | "token-2") || header("uid") != "user-1" {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    Json(json!({
        "ok": true,
        "message": "success",
        "data": [
            { "sn": "LPH21ABCD00001", "name": "Kitchen", "dev_type": "LPH21", "is_online": true, "is_remote": false },
            { "sn": "LPH62ABCD00002", "name": "Office", "dev_type": "LPH62", "is_online": false, "is_remote": true }
        ]
    }))
    .into_response()
}

async fn spawn_api() -> (String, MockApi) {
    let api = MockApi::default();
    let app = Router::new()
        .route("/app/auth/login", post(login))
        .route("/app/devices", get(devices))
        .with_state(api.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/app/"), api)
}

fn client(base_url: &str, auth: Option<AuthenticationInfo>) -> LetPotClient {
    LetPotClient::new(reqwest::Client::new(), auth).with_base_url(base_url)
}

fn stored_auth(access_token: &str, access_expires: i64, refresh_expires: i64) -> AuthenticationInfo {
    let now = chrono::Utc::now().timestamp();
    AuthenticationInfo {
        access_token: access_token.into(),
        access_token_expires: now + access_expires,
        refresh_token: "refresh-1".into(),
        refresh_token_expires: now + refresh_expires,
        user_id: "user-1".into(),
        email: "user@example.com".into(),
    }
}

#[tokio::test]
async fn test_login() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, None);

    let auth = client.login("user@example.com", "secret").await.unwrap();
    assert_eq!(auth.access_token, "token-1");
    assert_eq!(auth.refresh_token, "refresh-1");
    assert_eq!(auth.user_id, "user-1");
    assert_eq!(auth.email, "user@example.com");
    assert!(auth.is_valid());
    assert_eq!(client.auth(), Some(&auth));

    let logins = api.logins.lock().unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0]["loginType"], "EMAIL");
    assert_eq!(logins[0]["refresh_token"], "");
}

#[tokio::test]
async fn test_login_invalid_credentials() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, None);

    let err = client.login("user@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, LetPotError::Authentication(_)));
    assert!(client.auth().is_none());
}

#[tokio::test]
async fn test_login_status_not_ok() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, None);

    let err = client.login("locked@example.com", "secret").await.unwrap_err();
    match err {
        LetPotError::Api(message) => assert_eq!(message, "Status not OK: account locked"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_devices_requires_login() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, None);

    let err = client.get_devices().await.unwrap_err();
    assert!(matches!(err, LetPotError::Authentication(_)));
    assert_eq!(*api.device_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_get_devices() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, None);
    client.login("user@example.com", "secret").await.unwrap();

    let devices = client.get_devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].serial_number, "LPH21ABCD00001");
    assert_eq!(devices[0].name, "Kitchen");
    assert!(devices[0].is_online);
    assert_eq!(devices[1].device_type, "LPH62");
    assert!(devices[1].is_remote);
}

#[tokio::test]
async fn test_get_devices_refreshes_expired_token() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("token-1", -60, 3600)));

    let devices = client.get_devices().await.unwrap();
    assert_eq!(devices.len(), 2);

    let auth = client.auth().unwrap();
    assert_eq!(auth.access_token, "token-2");
    assert_eq!(auth.email, "user@example.com");

    let logins = api.logins.lock().unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0]["loginType"], "REFRESH_TOKEN");
    assert_eq!(logins[0]["refresh_token"], "refresh-1");
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("token-1", -60, -60)));

    let err = client.get_devices().await.unwrap_err();
    assert!(matches!(err, LetPotError::Authentication(_)));
    assert!(api.logins.lock().unwrap().is_empty());
    assert_eq!(*api.device_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_get_devices_rejected_token() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("stale", 3600, 3600)));

    let err = client.get_devices().await.unwrap_err();
    assert!(matches!(err, LetPotError::Authentication(_)));
}

#[tokio::test]
async fn test_get_devices_server_error() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("broken", 3600, 3600)));

    let err = client.get_devices().await.unwrap_err();
    match err {
        LetPotError::Api(message) => assert_eq!(message, "get_devices returned 500: boom"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_devices_status_not_ok() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("maintenance", 3600, 3600)));

    let err = client.get_devices().await.unwrap_err();
    match err {
        LetPotError::Api(message) => assert_eq!(message, "Status not OK: down for maintenance"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_devices_without_data() {
    let (url, _api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("empty", 3600, 3600)));

    let err = client.get_devices().await.unwrap_err();
    match err {
        LetPotError::Api(message) => assert_eq!(message, "Devices response without data"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_devices_with_login_replaces_rejected_token() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("stale", 3600, 3600)));

    let devices = client
        .get_devices_with_login("user@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(client.auth().unwrap().access_token, "token-1");

    let logins = api.logins.lock().unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0]["loginType"], "EMAIL");
    assert_eq!(*api.device_calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_get_devices_with_login_after_refresh_expired() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("token-1", -60, -60)));

    let devices = client
        .get_devices_with_login("user@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(api.logins.lock().unwrap().len(), 1);
    assert_eq!(*api.device_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_get_devices_with_login_keeps_valid_token() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("token-2", 3600, 3600)));

    let devices = client
        .get_devices_with_login("user@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert!(api.logins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_devices_with_login_does_not_retry_api_errors() {
    let (url, api) = spawn_api().await;
    let mut client = client(&url, Some(stored_auth("broken", 3600, 3600)));

    let err = client
        .get_devices_with_login("user@example.com", "secret")
        .await
        .unwrap_err();
    assert!(matches!(err, LetPotError::Api(_)));
    assert!(api.logins.lock().unwrap().is_empty());
}
