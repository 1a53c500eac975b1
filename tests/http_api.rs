mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose};
use common::{TestApp, owner};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = drive_store::app(app.state.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body.to_vec())
}

fn json_request(method: &str, uri: &str, user: i64, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, user: i64) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user.to_string())
        .body(Body::empty())
        .unwrap()
}

fn as_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = TestApp::new().await;
    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
    std::fs::create_dir_all(app.state.tree.blobs().root()).unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["checks"]["sqlite"]["ok"], true);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = TestApp::new().await;
    let request = Request::builder().uri("/node").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(as_json(&body)["status"], 401);
}

#[tokio::test]
async fn json_upload_then_download() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);

    let upload = json!({
        "filename": "hello.txt",
        "is_dir": false,
        "data_base64": general_purpose::STANDARD.encode(b"hello world"),
    });
    let (status, _, body) = send(&app, json_request("POST", "/upload", alice, upload)).await;
    assert_eq!(status, StatusCode::OK);
    let body = as_json(&body);
    assert_eq!(body["success"], true);
    assert_eq!(body["name"], "hello.txt");
    let id = body["node_id"].as_i64().unwrap();

    let (status, headers, content) = send(&app, get(&format!("/file/{id}"), alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, b"hello world");
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(headers[header::CONTENT_LENGTH], "11");
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment")
    );

    let (_, headers, _) = send(&app, get(&format!("/file/{id}?inline=1"), alice)).await;
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("inline")
    );

    let (status, _, body) = send(&app, get("/node", alice)).await;
    assert_eq!(status, StatusCode::OK);
    let root = as_json(&body);
    assert_eq!(root["path"], "/");
    assert_eq!(root["children"][0]["name"], "hello.txt");
    assert_eq!(root["children"][0]["size"], 11);
}

#[tokio::test]
async fn multipart_upload_into_directory() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let dir = app
        .state
        .tree
        .upload(alice, None, "docs", true, &[])
        .await
        .unwrap();

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\nnote.md\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"parent_id\"\r\n\r\n{parent}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"note.md\"\r\n\
         Content-Type: text/markdown\r\n\r\n# title\r\n--{b}--\r\n",
        b = boundary,
        parent = dir.id,
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload?upload_id=abc")
        .header("x-user-id", alice.to_string())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let id = as_json(&body)["node_id"].as_i64().unwrap();

    let view = app.state.tree.describe(alice, Some(id)).await.unwrap();
    assert_eq!(view.path, "/docs/note.md");
    assert_eq!(&app.state.tree.read_file(alice, id).await.unwrap()[..], b"# title");
}

#[tokio::test]
async fn errors_carry_codes_and_statuses() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let tree = &app.state.tree;
    let a = tree.upload(alice, None, "a", true, &[]).await.unwrap();
    let b = tree.upload(alice, Some(a.id), "b", true, &[]).await.unwrap();

    let (status, _, body) = send(
        &app,
        json_request("POST", "/move", alice, json!({"src_id": a.id, "dst_id": b.id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(as_json(&body)["code"], "cycle_rejected");

    let upload = json!({"filename": "a", "is_dir": false, "data_base64": ""});
    let (status, _, body) = send(&app, json_request("POST", "/upload", alice, upload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(as_json(&body)["code"], "folder_exists");

    let (status, _, body) = send(&app, get("/node/999999", alice)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(as_json(&body)["code"], "not_found");

    let (status, _, _) = send(
        &app,
        json_request("POST", "/copy", alice, json!({"src_id": a.id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rename_copy_and_delete_over_http() {
    let app = TestApp::new().await;
    let account = app.account("alice").await;
    let alice = owner(&account);
    let tree = &app.state.tree;
    let file = tree.upload(alice, None, "a.txt", false, b"x").await.unwrap();
    let dir = tree.upload(alice, None, "d", true, &[]).await.unwrap();

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/rename",
            alice,
            json!({"src_id": file.id, "new_name": "b.txt"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["name"], "b.txt");

    let (status, _, body) = send(
        &app,
        json_request("POST", "/copy", alice, json!({"src_id": file.id, "dst_id": dir.id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["copied"], 1);

    let (status, _, body) = send(
        &app,
        json_request("POST", "/delete", alice, json!({"src_id": dir.id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["removed"], 2);

    let (status, _, _) = send(
        &app,
        json_request("POST", "/delete", alice, json!({"src_id": account.root_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shared_link_downloads_without_identity() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let file = app
        .state
        .tree
        .upload(alice, None, "pub.txt", false, b"public")
        .await
        .unwrap();

    let (status, _, body) = send(
        &app,
        json_request("POST", "/share", alice, json!({"node_id": file.id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = as_json(&body)["url"].as_str().unwrap().to_string();

    let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
    let (status, _, content) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, b"public");

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/share/{}", file.id))
        .header("x-user-id", alice.to_string())
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = TestApp::with_limit(8).await;
    let alice = owner(&app.account("alice").await);

    let upload = json!({
        "filename": "big.bin",
        "data_base64": general_purpose::STANDARD.encode([7u8; 64]),
    });
    let (status, _, body) = send(&app, json_request("POST", "/upload", alice, upload)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(as_json(&body)["code"], "invalid_request");
    assert_eq!(app.blob_count(), 0);
}

#[tokio::test]
async fn thumbnail_response_headers() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let photo = app
        .state
        .tree
        .upload(alice, None, "p.png", false, &common::png(64, 32))
        .await
        .unwrap();

    let (status, headers, body) = send(&app, get(&format!("/thumbnail/{}", photo.id), alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=86400");
    assert!(headers.contains_key(header::ETAG));
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn account_creation_over_http() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method("POST")
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"username": "carol"}).to_string()))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let account = as_json(&body);
    let id = account["id"].as_i64().unwrap();
    assert!(account["root_id"].as_i64().unwrap() > 0);

    let (status, _, body) = send(&app, get("/me", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["username"], "carol");
}

#[tokio::test]
async fn oversized_multipart_text_field_is_rejected() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\n{name}\r\n--{b}--\r\n",
        b = boundary,
        name = "n".repeat(8 * 1024),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("x-user-id", alice.to_string())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.state.tree.describe(alice, None).await.unwrap().children.is_empty());
}

#[tokio::test]
async fn download_sets_gmt_last_modified() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let file = app
        .state
        .tree
        .upload(alice, None, "a.txt", false, b"x")
        .await
        .unwrap();

    let (_, headers, _) = send(&app, get(&format!("/file/{}", file.id), alice)).await;
    let value = headers[header::LAST_MODIFIED].to_str().unwrap();
    assert!(value.ends_with(" GMT"), "{value}");
}
