//! HTTP surface tests against the full router

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use reelsafe::auth::{PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER};
use reelsafe::upload::{compute_hash, DIGEST_HEADER};

use common::{Harness, CREATOR};

async fn call(
    router: &axum::Router,
    method: Method,
    uri: &str,
    principal: Option<(&str, &str)>,
    body: Body,
    extra: Option<(&str, String)>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = principal {
        builder = builder
            .header(PRINCIPAL_ID_HEADER, id)
            .header(PRINCIPAL_ROLE_HEADER, role);
    }
    if let Some((name, value)) = extra {
        builder = builder.header(name, value);
    }

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn init(router: &axum::Router, total_chunks: i64) -> String {
    let body = json!({
        "totalChunks": total_chunks,
        "destinationKeyHint": "lecture.mp4",
        "contentType": "video/mp4",
        "metadata": {"course": "rust-101"}
    });
    let (status, value) = call(
        router,
        Method::POST,
        "/api/v1/upload/init",
        Some((CREATOR, "creator")),
        Body::from(body.to_string()),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", value);
    value["sessionId"].as_str().unwrap().to_string()
}

async fn put_chunk(
    router: &axum::Router,
    session_id: &str,
    index: &str,
    data: &'static [u8],
    digest: Option<String>,
) -> (StatusCode, Value) {
    call(
        router,
        Method::POST,
        &format!("/api/v1/upload/{}/chunks/{}", session_id, index),
        Some((CREATOR, "creator")),
        Body::from(data),
        digest.map(|d| (DIGEST_HEADER, d)),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new();
    let (status, value) = call(&harness.router(), Method::GET, "/health", None, Body::empty(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "healthy");
}

#[tokio::test]
async fn test_full_upload_over_http() {
    let harness = Harness::new();
    let router = harness.router();
    let session_id = init(&router, 3).await;

    let (status, value) = put_chunk(&router, &session_id, "2", b"cc", Some(compute_hash(b"cc"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["receivedCount"], 1);
    assert_eq!(value["complete"], false);
    assert!(value.get("finalReference").is_none());

    put_chunk(&router, &session_id, "0", b"aa", None).await;

    let (_, status_body) = call(
        &router,
        Method::GET,
        &format!("/api/v1/upload/{}", session_id),
        None,
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status_body["receivedCount"], 2);
    assert_eq!(status_body["state"], "accumulating");

    let (status, value) = put_chunk(&router, &session_id, "1", b"bb", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["complete"], true);
    let reference = value["finalReference"].as_str().unwrap().to_string();

    let object = harness.store.get(&reference).unwrap();
    assert_eq!(&object.data[..], b"aabbcc");
    assert_eq!(object.content_type, "video/mp4");
    assert_eq!(object.metadata["course"], "rust-101");

    // Late duplicate gets the same committed reference
    let (status, value) = put_chunk(&router, &session_id, "1", b"bb", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["finalReference"], reference.as_str());
}

#[tokio::test]
async fn test_digest_mismatch_is_422() {
    let harness = Harness::new();
    let router = harness.router();
    let session_id = init(&router, 2).await;

    let (status, value) = put_chunk(&router, &session_id, "0", b"aa", Some(compute_hash(b"ab"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(value["code"], "CORRUPTED_CHUNK");
    assert_eq!(value["retryable"], true);

    let status_body = harness
        .tracker
        .status(reelsafe::upload::parse_session_id(&session_id).unwrap())
        .await
        .unwrap();
    assert_eq!(status_body.received_count, 0);
}

#[tokio::test]
async fn test_rejects_bad_index_and_session() {
    let harness = Harness::new();
    let router = harness.router();
    let session_id = init(&router, 2).await;

    let (status, value) = put_chunk(&router, &session_id, "5", b"x", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "INDEX_OUT_OF_RANGE");

    let (status, value) = put_chunk(&router, &session_id, "-1", b"x", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "INVALID_ARGUMENT");

    let (status, value) = put_chunk(&router, &uuid::Uuid::new_v4().to_string(), "0", b"x", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(value["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_init_requires_uploading_role() {
    let harness = Harness::new();
    let router = harness.router();
    let body = json!({
        "totalChunks": 1,
        "destinationKeyHint": "a.mp4",
        "contentType": "video/mp4"
    })
    .to_string();

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/v1/upload/init",
        None,
        Body::from(body.clone()),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, value) = call(
        &router,
        Method::POST,
        "/api/v1/upload/init",
        Some(("viewer-1", "viewer")),
        Body::from(body),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_init_rejects_zero_chunks() {
    let harness = Harness::new();
    let body = json!({
        "totalChunks": 0,
        "destinationKeyHint": "a.mp4",
        "contentType": "video/mp4"
    });
    let (status, value) = call(
        &harness.router(),
        Method::POST,
        "/api/v1/upload/init",
        Some((CREATOR, "creator")),
        Body::from(body.to_string()),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_chunk_from_other_principal_is_rejected() {
    let harness = Harness::new();
    let router = harness.router();
    let session_id = init(&router, 1).await;

    let (status, _) = call(
        &router,
        Method::POST,
        &format!("/api/v1/upload/{}/chunks/0", session_id),
        Some(("creator-2", "creator")),
        Body::from("x"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_abandon_releases_session() {
    let harness = Harness::new();
    let router = harness.router();
    let session_id = init(&router, 2).await;
    put_chunk(&router, &session_id, "0", b"aa", None).await;

    let (status, _) = call(
        &router,
        Method::DELETE,
        &format!("/api/v1/upload/{}", session_id),
        Some((CREATOR, "creator")),
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, value) = put_chunk(&router, &session_id, "1", b"bb", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(value["code"], "SESSION_NOT_FOUND");
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_playback_grant_scoped_by_entitlement() {
    let harness = Harness::new();
    let router = harness.router();

    // Commit content linked to a catalog entry
    let body = json!({
        "totalChunks": 1,
        "destinationKeyHint": "lecture.mp4",
        "contentType": "video/mp4",
        "metadata": {"contentId": "lecture-7"}
    });
    let (_, value) = call(
        &router,
        Method::POST,
        "/api/v1/upload/init",
        Some((CREATOR, "creator")),
        Body::from(body.to_string()),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    let session_id = value["sessionId"].as_str().unwrap().to_string();
    let (_, value) = put_chunk(&router, &session_id, "0", b"video", None).await;
    let reference = value["finalReference"].as_str().unwrap().to_string();

    let (status, value) = call(
        &router,
        Method::GET,
        "/api/v1/playback/lecture-7",
        Some(("viewer-1", "viewer")),
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value["code"], "UNAUTHORIZED");

    harness.catalog.grant("viewer-1", "lecture-7").await;
    let (status, value) = call(
        &router,
        Method::GET,
        "/api/v1/playback/lecture-7",
        Some(("viewer-1", "viewer")),
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["encrypted"], false);
    assert!(value.get("key").is_none());

    let url = value["url"].as_str().unwrap();
    assert_ne!(url, reference);
    assert_eq!(&harness.store.resolve(url).unwrap()[..], b"video");

    let (status, value) = call(
        &router,
        Method::GET,
        "/api/v1/playback/unknown",
        Some(("admin-1", "admin")),
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(value["code"], "CONTENT_NOT_FOUND");
}

async fn commit_linked(router: &axum::Router, creator: &str, content_id: &str, data: &'static [u8]) -> String {
    let body = json!({
        "totalChunks": 1,
        "destinationKeyHint": "lecture.mp4",
        "contentType": "video/mp4",
        "metadata": {"contentId": content_id}
    });
    let (status, value) = call(
        router,
        Method::POST,
        "/api/v1/upload/init",
        Some((creator, "creator")),
        Body::from(body.to_string()),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", value);
    let session_id = value["sessionId"].as_str().unwrap().to_string();

    let (status, value) = call(
        router,
        Method::POST,
        &format!("/api/v1/upload/{}/chunks/0", session_id),
        Some((creator, "creator")),
        Body::from(data),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", value);
    value["finalReference"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_other_creator_cannot_replace_linked_content() {
    let harness = Harness::new();
    let router = harness.router();
    harness.catalog.grant("viewer-1", "lecture-7").await;

    commit_linked(&router, CREATOR, "lecture-7", b"original").await;
    let intruder = commit_linked(&router, "creator-2", "lecture-7", b"replacement").await;
    assert!(harness.store.get(&intruder).is_some());

    let (status, value) = call(
        &router,
        Method::GET,
        "/api/v1/playback/lecture-7",
        Some(("viewer-1", "viewer")),
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = value["url"].as_str().unwrap();
    assert_eq!(&harness.store.resolve(url).unwrap()[..], b"original");

    // The owner can still publish a new version
    commit_linked(&router, CREATOR, "lecture-7", b"second cut").await;
    let (_, value) = call(
        &router,
        Method::GET,
        "/api/v1/playback/lecture-7",
        Some(("viewer-1", "viewer")),
        Body::empty(),
        None,
    )
    .await;
    let url = value["url"].as_str().unwrap();
    assert_eq!(&harness.store.resolve(url).unwrap()[..], b"second cut");
}

#[tokio::test]
async fn test_grant_names_cipher_mode_for_encrypted_content() {
    let harness = Harness::new();
    let router = harness.router();
    harness.catalog.set_key("lecture-4", vec![3u8; 32]).await;

    let body = json!({
        "totalChunks": 1,
        "destinationKeyHint": "lecture.mp4",
        "contentType": "video/mp4",
        "metadata": {"contentId": "lecture-4", "encrypted": "true", "cipherMode": "aes-256-cbc"}
    });
    let (_, value) = call(
        &router,
        Method::POST,
        "/api/v1/upload/init",
        Some((CREATOR, "creator")),
        Body::from(body.to_string()),
        Some(("content-type", "application/json".to_string())),
    )
    .await;
    let session_id = value["sessionId"].as_str().unwrap().to_string();
    put_chunk(&router, &session_id, "0", b"0123456789abcdef0123456789abcdef", None).await;

    let (status, value) = call(
        &router,
        Method::GET,
        "/api/v1/playback/lecture-4",
        Some(("admin-1", "admin")),
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["encrypted"], true);
    assert_eq!(value["cipherMode"], "aes-256-cbc");
    assert!(value["key"].is_string());
}
