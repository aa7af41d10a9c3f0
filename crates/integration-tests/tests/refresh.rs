//! Integration tests for 401 handling and token refresh.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use gatehouse::{ApiError, ApiRequest, MemoryBackend, Notice, Origin, SharedStorage, StorageKey};
use gatehouse_integration_tests::{Tab, me_mock, refresh_mock, seeded_origin, user_json};
use serde_json::{Value, json};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Origin whose storage already holds `at1` / `rt1`.
fn logged_in_origin() -> Origin {
    seeded_origin([
        (StorageKey::AccessToken, "at1"),
        (StorageKey::RefreshToken, "rt1"),
    ])
}

/// `GET /data` answering 401 to `at1` and 200 to `at2`.
async fn mount_data(server: &MockServer, expected_per_token: u64) {
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer at1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(expected_per_token)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer at2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [1, 2, 3] })))
        .expect(expected_per_token)
        .mount(server)
        .await;
}

/// Open a tab on `origin` and restore its session as `at1`.
async fn restored_tab(server: &MockServer, origin: &Origin) -> Tab {
    me_mock("at1", user_json("ada@example.com", &["USER"]))
        .mount(server)
        .await;
    let tab = Tab::open(server, origin);
    tab.session.initialize().await;
    assert!(tab.session.is_authenticated());
    tab
}

// =============================================================================
// Successful refresh
// =============================================================================

#[tokio::test]
async fn test_expired_token_is_refreshed_and_request_replayed() {
    let server = MockServer::start().await;
    mount_data(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .and(header("content-type", "text/plain"))
        .and(body_string("rt1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "at2" })))
        .expect(1)
        .mount(&server)
        .await;

    let origin = logged_in_origin();
    let tab = restored_tab(&server, &origin).await;

    let body: Value = tab.session.client().get_json("/data").await.unwrap();
    assert_eq!(body["items"], json!([1, 2, 3]));

    let store = tab.session.client().store();
    assert_eq!(store.access_token().unwrap().as_deref(), Some("at2"));
    assert_eq!(store.refresh_token().unwrap().as_deref(), Some("rt1"));
    assert!(tab.session.is_authenticated());
    assert!(!tab.session.client().is_refreshing());
    assert!(tab.notices.notices().is_empty());
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mount_data(&server, 3).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "at2" }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let origin = logged_in_origin();
    let tab = restored_tab(&server, &origin).await;
    let client = tab.session.client();

    let (a, b, c) = tokio::join!(
        client.send(ApiRequest::get("/data")),
        client.send(ApiRequest::get("/data")),
        client.send(ApiRequest::get("/data")),
    );
    for response in [a, b, c] {
        let response = response.unwrap();
        assert_eq!(response.status.as_u16(), 200);
    }
    assert!(!client.is_refreshing());
    assert!(!client.is_loading());
}

// =============================================================================
// Failed refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_failure_logs_out_every_waiter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let origin = logged_in_origin();
    let tab = restored_tab(&server, &origin).await;
    let client = tab.session.client();

    let (a, b, c) = tokio::join!(
        client.send(ApiRequest::get("/data")),
        client.send(ApiRequest::get("/data")),
        client.send(ApiRequest::get("/data")),
    );
    for result in [a, b, c] {
        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired(_)), "got {err:?}");
    }

    let session = tab.session.session();
    assert!(session.user.is_none());
    assert!(session.token_id.is_none());
    let store = client.store();
    assert_eq!(store.access_token().unwrap(), None);
    assert_eq!(store.refresh_token().unwrap(), None);
    assert_eq!(tab.notices.count(Notice::Unauthorized), 1);
}

#[tokio::test]
async fn test_missing_refresh_token_fails_without_a_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    refresh_mock("at2").expect(0).mount(&server).await;

    let origin = seeded_origin([(StorageKey::AccessToken, "at1")]);
    let tab = restored_tab(&server, &origin).await;

    let err = tab
        .session
        .client()
        .send(ApiRequest::get("/data"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ApiError::SessionExpired(ref reason) if reason == "no refresh token"),
        "got {err:?}"
    );
    assert!(!tab.session.is_authenticated());
    assert_eq!(tab.session.client().store().access_token().unwrap(), None);
    assert_eq!(tab.notices.count(Notice::Unauthorized), 1);
}

// =============================================================================
// No refresh
// =============================================================================

#[tokio::test]
async fn test_replayed_request_is_not_refreshed_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    refresh_mock("at2").expect(1).mount(&server).await;

    let origin = logged_in_origin();
    let tab = restored_tab(&server, &origin).await;

    let err = tab
        .session
        .client()
        .send(ApiRequest::get("/data"))
        .await
        .unwrap_err();
    assert_eq!(err.status().map(|status| status.as_u16()), Some(401));

    // The refresh itself succeeded, so the session stays
    assert!(tab.session.is_authenticated());
    assert_eq!(
        tab.session.client().store().access_token().unwrap().as_deref(),
        Some("at2")
    );
    assert!(tab.notices.notices().is_empty());
}

#[tokio::test]
async fn test_401_from_auth_endpoints_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    refresh_mock("at2").expect(0).mount(&server).await;

    let origin = logged_in_origin();
    let tab = Tab::open(&server, &origin);
    let err = tab
        .session
        .client()
        .send(ApiRequest::post("/auth/login").json(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Authentication(_)), "got {err:?}");
    assert_eq!(
        tab.session.client().store().access_token().unwrap().as_deref(),
        Some("at1")
    );
}

#[tokio::test]
async fn test_auth_endpoint_is_recognized_in_any_path_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    refresh_mock("at2").expect(0).mount(&server).await;

    let origin = logged_in_origin();
    let tab = Tab::open(&server, &origin);
    for login_path in ["auth/login".to_string(), format!("{}/auth/login", server.uri())] {
        let err = tab
            .session
            .client()
            .send(ApiRequest::post(login_path).json(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)), "got {err:?}");
    }
    assert_eq!(
        tab.session.client().store().access_token().unwrap().as_deref(),
        Some("at1")
    );
    assert!(tab.notices.notices().is_empty());
}

#[tokio::test]
async fn test_other_statuses_pass_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;
    refresh_mock("at2").expect(0).mount(&server).await;

    let storage = SharedStorage::new(MemoryBackend::with_entries([
        (StorageKey::AccessToken, "at1"),
        (StorageKey::RefreshToken, "rt1"),
    ]));
    let tab = Tab::open(&server, &Origin::without_broadcast(storage));
    let err = tab
        .session
        .client()
        .send(ApiRequest::get("/data"))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "HTTP 403 Forbidden: forbidden");
    assert!(!tab.session.client().has_network_error());
}
