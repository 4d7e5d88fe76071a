//! Integration tests for request signing, bodies and error pass-through

use std::time::Duration;

use memoria_core::{
    ApiError, AuthenticatedClient, ClientConfig, CredentialStore, Method, MultipartPart,
    RequestBody, RequestOptions, SessionState,
};
use mockito::{Matcher, Server};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Invite {
    join_code: u32,
}

async fn client_for(server: &Server, access_token: Option<&str>) -> AuthenticatedClient {
    client_with_config(server, ClientConfig::default(), access_token).await
}

async fn client_with_config(
    server: &Server,
    config: ClientConfig,
    access_token: Option<&str>,
) -> AuthenticatedClient {
    let store = CredentialStore::in_memory();
    if let Some(token) = access_token {
        store.set_access_token(token).await.unwrap();
        store.set_refresh_token("refresh-1").await.unwrap();
    }
    let config = ClientConfig {
        base_url: server.url(),
        ..config
    };
    AuthenticatedClient::new(config, store).unwrap()
}

#[tokio::test]
async fn post_sends_bearer_and_json() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    let invite = server
        .mock("POST", "/groups/7/invite")
        .match_header("authorization", "Bearer access")
        .match_header("content-type", "application/json")
        .match_header("accept", "application/json")
        .match_body(Matcher::Json(json!({})))
        .with_status(200)
        .with_body(json!({ "isSuccess": true, "result": { "joinCode": 482913 } }).to_string())
        .expect(1)
        .create_async()
        .await;

    //* When
    let response = client
        .post::<Invite>("/groups/7/invite", json!({}))
        .await
        .unwrap();

    //* Then
    invite.assert_async().await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.into_result().unwrap().join_code, 482913);
}

#[tokio::test]
async fn server_error_passes_through_untouched() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    server
        .mock("GET", "/groups/7/puzzles")
        .with_status(500)
        .with_body("database unavailable")
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    //* When
    let err = client
        .get::<serde_json::Value>("/groups/7/puzzles")
        .await
        .unwrap_err();

    //* Then
    match err {
        ApiError::ServerError { status, body } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "database unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    refresh.assert_async().await;
    assert_eq!(client.store().access_token().await.unwrap(), "access");
    assert_eq!(client.store().refresh_token().await.unwrap(), "refresh-1");
}

#[tokio::test]
async fn client_errors_are_classified_without_refresh() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    server
        .mock("PATCH", "/groups/7/withdraw")
        .with_status(403)
        .with_body("not a member")
        .create_async()
        .await;
    server
        .mock("DELETE", "/puzzles/404")
        .with_status(404)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    //* When
    let forbidden = client
        .patch::<serde_json::Value>("/groups/7/withdraw", json!({}))
        .await
        .unwrap_err();
    let missing = client
        .delete::<serde_json::Value>("/puzzles/404")
        .await
        .unwrap_err();

    //* Then
    assert!(matches!(forbidden, ApiError::AccessDenied(ref body) if body == "not a member"));
    assert_eq!(missing.status(), Some(StatusCode::NOT_FOUND));
    refresh.assert_async().await;
}

#[tokio::test]
async fn api_failure_envelope_is_returned_to_caller() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    server
        .mock("PATCH", "/groups/7/delete")
        .with_status(200)
        .with_body(
            json!({
                "isSuccess": false,
                "code": 3003,
                "message": "only the owner can delete"
            })
            .to_string(),
        )
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    //* When
    let response = client
        .patch::<serde_json::Value>("/groups/7/delete", json!({}))
        .await
        .unwrap();

    //* Then
    assert!(!response.is_success());
    assert_eq!(response.code(), Some(3003));
    assert_eq!(response.message(), Some("only the owner can delete"));
    refresh.assert_async().await;
}

#[tokio::test]
async fn unauthenticated_request_is_unsigned() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, None).await;
    assert_eq!(client.restore().await.unwrap(), SessionState::Unauthenticated);

    let health = server
        .mock("GET", "/health")
        .match_header("authorization", Matcher::Missing)
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    //* When
    let response = client.get::<serde_json::Value>("/health").await.unwrap();

    //* Then
    health.assert_async().await;
    assert!(response.is_success());
    assert!(response.result().is_none());
}

#[tokio::test]
async fn unauthenticated_rejection_is_session_expired() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, None).await;

    server
        .mock("GET", "/groups")
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    //* When
    let err = client.get::<serde_json::Value>("/groups").await.unwrap_err();

    //* Then
    assert!(err.is_session_expired());
    refresh.assert_async().await;
}

#[tokio::test]
async fn upload_uses_configured_multipart_type() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    let upload = server
        .mock("POST", "/groups/7/puzzles")
        .match_header("authorization", "Bearer access")
        .match_header(
            "content-type",
            Matcher::Regex(r"^multipart/form-data; boundary=.+$".to_string()),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("createPuzzleRequest".to_string()),
            Matcher::Regex("Jeju Trip".to_string()),
            Matcher::Regex(r#"filename="trip.jpg""#.to_string()),
        ]))
        .with_status(200)
        .with_body(json!({ "isSuccess": true, "result": { "puzzleIdx": 12 } }).to_string())
        .expect(1)
        .create_async()
        .await;

    let parts = vec![
        MultipartPart::json(
            "createPuzzleRequest",
            &json!({ "title": "Jeju Trip", "puzzleDate": "2024-05-01", "location": "Jeju" }),
        )
        .unwrap(),
        MultipartPart::file("image", b"jpeg bytes".to_vec(), "trip.jpg", "image/jpeg"),
    ];

    //* When
    let response = client
        .upload::<serde_json::Value>("/groups/7/puzzles", parts)
        .await
        .unwrap();

    //* Then
    upload.assert_async().await;
    assert_eq!(response.result().unwrap()["puzzleIdx"], 12);
}

#[tokio::test]
async fn upload_honors_legacy_multipart_type() {
    //* Given
    let mut server = Server::new_async().await;
    let config = ClientConfig {
        multipart_content_type: "multipart/formdata".to_string(),
        ..ClientConfig::default()
    };
    let client = client_with_config(&server, config, Some("access")).await;

    let upload = server
        .mock("POST", "/groups/7/puzzles")
        .match_header(
            "content-type",
            Matcher::Regex(r"^multipart/formdata; boundary=.+$".to_string()),
        )
        .with_status(200)
        .with_body(json!({ "isSuccess": true }).to_string())
        .expect(1)
        .create_async()
        .await;

    //* When
    client
        .upload::<serde_json::Value>(
            "/groups/7/puzzles",
            vec![MultipartPart::text("caption", "hi")],
        )
        .await
        .unwrap();

    //* Then
    upload.assert_async().await;
}

#[tokio::test]
async fn multipart_body_is_rebuilt_for_retry() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("old-access")).await;

    server
        .mock("POST", "/groups/7/puzzles")
        .match_header("authorization", "Bearer old-access")
        .with_status(401)
        .create_async()
        .await;
    server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(
            json!({ "isSuccess": true, "result": { "accessToken": "new-access" } }).to_string(),
        )
        .create_async()
        .await;
    let retried = server
        .mock("POST", "/groups/7/puzzles")
        .match_header("authorization", "Bearer new-access")
        .match_body(Matcher::Regex("day one".to_string()))
        .with_status(200)
        .with_body(json!({ "isSuccess": true }).to_string())
        .expect(1)
        .create_async()
        .await;

    //* When
    let response = client
        .upload::<serde_json::Value>(
            "/groups/7/puzzles",
            vec![MultipartPart::text("caption", "day one")],
        )
        .await
        .unwrap();

    //* Then
    retried.assert_async().await;
    assert!(response.is_success());
}

#[tokio::test]
async fn option_headers_override_defaults() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    let mock = server
        .mock("POST", "/groups/7/notes")
        .match_header("content-type", "text/plain")
        .match_header("x-request-source", "album")
        .with_status(200)
        .with_body(json!({ "isSuccess": true }).to_string())
        .expect(1)
        .create_async()
        .await;

    let options = RequestOptions::new()
        .header("Content-Type", "text/plain")
        .header("X-Request-Source", "album")
        .timeout(Duration::from_secs(5));

    //* When
    let body = RequestBody::json(&json!({ "note": "hello" })).unwrap();
    client
        .send::<serde_json::Value>(Method::Post, "/groups/7/notes", body, options)
        .await
        .unwrap();

    //* Then
    mock.assert_async().await;
}

#[tokio::test]
async fn unparseable_success_body_is_invalid_response() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    server
        .mock("GET", "/groups/7/profile")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    //* When
    let err = client
        .get::<serde_json::Value>("/groups/7/profile")
        .await
        .unwrap_err();

    //* Then
    assert!(matches!(err, ApiError::InvalidResponse(_)));
}

#[tokio::test]
async fn long_error_body_reaches_caller_intact() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    let details = "빈칸을 모두 채워주세요 ".repeat(60);
    let body = json!({ "isSuccess": false, "code": 2015, "message": details }).to_string();
    assert!(body.len() > 500);

    server
        .mock("POST", "/groups/7/puzzles")
        .with_status(400)
        .with_body(&body)
        .create_async()
        .await;

    //* When
    let err = client
        .post::<serde_json::Value>("/groups/7/puzzles", json!({ "title": "" }))
        .await
        .unwrap_err();

    //* Then
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert_eq!(err.body(), Some(body.as_str()));
    let envelope = err.envelope().expect("body should still parse");
    assert_eq!(envelope.code, Some(2015));
    assert_eq!(envelope.message.as_deref(), Some(details.as_str()));
}

#[tokio::test]
async fn multipart_content_type_override_keeps_boundary() {
    //* Given
    let mut server = Server::new_async().await;
    let client = client_for(&server, Some("access")).await;

    let upload = server
        .mock("POST", "/groups/7/puzzles")
        .match_header(
            "content-type",
            Matcher::Regex(r"^multipart/formdata; boundary=.+$".to_string()),
        )
        .with_status(200)
        .with_body(json!({ "isSuccess": true }).to_string())
        .expect(1)
        .create_async()
        .await;

    let options = RequestOptions::new().header("Content-Type", "multipart/formdata");
    let body = RequestBody::Multipart(vec![MultipartPart::text("caption", "hi")]);

    //* When
    client
        .send::<serde_json::Value>(Method::Post, "/groups/7/puzzles", body, options)
        .await
        .unwrap();

    //* Then
    upload.assert_async().await;
}
