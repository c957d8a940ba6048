#![cfg(unix)]

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use evilmsg_core::config::{BuilderConfig, ServerConfig};
use evilmsg_server::builder::{BeaconBuilder, CallbackEndpoint};
use evilmsg_server::routes::{AppState, build_router};
use evilmsg_server::storage::AppDatabase;

/// Writes the `HIT_URL` value into the flavor's archive.
const EMBED_URL: &str = r#"
set -e
mkdir -p agents
printf '%s' "${2#HIT_URL=}" > "agents/$1.zip"
"#;

const FAILING: &str = r#"
echo "cc: /srv/build/agent.c: fatal error" >&2
exit 2
"#;

struct TestApp {
    router: axum::Router,
    db: AppDatabase,
    _build_dir: TempDir,
}

async fn app_with_script(script: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("build.sh");
    std::fs::write(&script_path, script).unwrap();

    let builder_config = BuilderConfig {
        program: PathBuf::from("sh"),
        args: vec![script_path.display().to_string()],
        work_dir: dir.path().to_path_buf(),
        timeout_secs: 10,
    };
    let builder = BeaconBuilder::new(
        &builder_config,
        CallbackEndpoint::new("127.0.0.1", 3000),
        CancellationToken::new(),
    );

    let db = AppDatabase::open_in_memory().await.unwrap();
    let router = build_router(AppState::new(db.clone(), builder), &ServerConfig::default())
        .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 5], 40000))));

    TestApp {
        router,
        db,
        _build_dir: dir,
    }
}

async fn app() -> TestApp {
    app_with_script(EMBED_URL).await
}

impl TestApp {
    /// Send a request and return (status, headers, body bytes).
    async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<(&str, &[u8])>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some((content_type, bytes)) => {
                builder = builder.header("content-type", content_type);
                Body::from(bytes.to_vec())
            }
            None => Body::empty(),
        };
        let resp = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    async fn status(&self, method: &str, uri: &str) -> StatusCode {
        self.send(method, uri, None).await.0
    }

    async fn json_status(&self, method: &str, uri: &str, json: &str) -> StatusCode {
        self.send(method, uri, Some(("application/json", json.as_bytes())))
            .await
            .0
    }

    async fn get_json(&self, uri: &str) -> Value {
        let (status, _, body) = self.send("GET", uri, None).await;
        assert_eq!(status, StatusCode::OK, "GET {uri}");
        serde_json::from_slice(&body).unwrap()
    }

    async fn hit(&self, id: &str, payload: &str) -> StatusCode {
        self.send(
            "POST",
            &format!("/api/hit/{id}"),
            Some(("text/plain", payload.as_bytes())),
        )
        .await
        .0
    }
}

// === Projects ===

#[tokio::test]
async fn end_to_end_hit_lifecycle() {
    let app = app().await;

    assert_eq!(
        app.json_status("PUT", "/api/projects", r#"{"name":"demo"}"#)
            .await,
        StatusCode::OK
    );
    let projects = app.get_json("/api/projects").await;
    assert_eq!(projects[0]["id"], 1);
    assert_eq!(projects[0]["name"], "demo");

    assert_eq!(app.hit("1", "hostname=foo").await, StatusCode::OK);
    assert_eq!(app.status("PATCH", "/api/projects/1").await, StatusCode::OK);
    assert_eq!(app.hit("1", "hostname=bar").await, StatusCode::NOT_FOUND);

    let hits = app.get_json("/api/hit/1").await;
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["ip"], "10.0.0.5");
    assert_eq!(hits[0]["data"], "hostname=foo");
}

#[tokio::test]
async fn project_json_shape() {
    let app = app().await;
    app.json_status("PUT", "/api/projects", r#"{"name":"demo"}"#)
        .await;

    let project = app.get_json("/api/projects/1").await;
    assert_eq!(project["id"], 1);
    assert_eq!(project["name"], "demo");
    assert_eq!(project["status"], "active");
    assert_eq!(project["time_stopped"], Value::Null);
    let created = project["time_created"].as_str().unwrap();
    assert_eq!(created.len(), "2024-01-01 00:00:00".len());

    app.status("PATCH", "/api/projects/1").await;
    let project = app.get_json("/api/projects/1").await;
    assert_eq!(project["status"], "stopped");
    assert!(project["time_stopped"].is_string());
}

#[tokio::test]
async fn empty_name_is_bad_request() {
    let app = app().await;
    assert_eq!(
        app.json_status("PUT", "/api/projects", r#"{"name":"   "}"#)
            .await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.json_status("PUT", "/api/projects", "not json").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(app.get_json("/api/projects").await, Value::Array(vec![]));
}

#[tokio::test]
async fn delete_cascades_to_hits() {
    let app = app().await;
    app.json_status("PUT", "/api/projects", r#"{"name":"doomed"}"#)
        .await;
    app.hit("1", "a").await;
    app.hit("1", "b").await;

    assert_eq!(
        app.json_status("DELETE", "/api/projects", r#"{"id":1}"#)
            .await,
        StatusCode::OK
    );
    assert_eq!(app.status("GET", "/api/projects/1").await, StatusCode::NOT_FOUND);
    assert!(app.db.list_hits(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_validates_id() {
    let app = app().await;
    assert_eq!(
        app.json_status("DELETE", "/api/projects", r#"{"id":0}"#)
            .await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.json_status("DELETE", "/api/projects", r#"{"id":"x"}"#)
            .await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.json_status("DELETE", "/api/projects", r#"{"id":5}"#)
            .await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn malformed_and_unknown_ids() {
    let app = app().await;
    assert_eq!(app.status("GET", "/api/projects/abc").await, StatusCode::BAD_REQUEST);
    assert_eq!(app.status("PATCH", "/api/projects/-1").await, StatusCode::BAD_REQUEST);
    assert_eq!(app.status("GET", "/api/projects/9").await, StatusCode::NOT_FOUND);
    assert_eq!(app.status("PATCH", "/api/projects/9").await, StatusCode::NOT_FOUND);
    assert_eq!(app.status("GET", "/api/hit/9").await, StatusCode::NOT_FOUND);
}

// === Hits ===

#[tokio::test]
async fn hit_rejections_create_no_rows() {
    let app = app().await;
    assert_eq!(app.hit("1%3B%20rm", "x").await, StatusCode::BAD_REQUEST);
    assert_eq!(app.hit("42", "x").await, StatusCode::NOT_FOUND);
    assert!(app.db.list_hits(42).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_hit_is_rejected() {
    let app = app().await;
    app.json_status("PUT", "/api/projects", r#"{"name":"demo"}"#)
        .await;

    let big = "x".repeat(ServerConfig::default().max_hit_bytes + 1);
    assert_eq!(app.hit("1", &big).await, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.db.list_hits(1).await.unwrap().is_empty());
}

// === Beacon downloads ===

#[tokio::test]
async fn download_embeds_callback_url() {
    let app = app().await;
    app.json_status("PUT", "/api/projects", r#"{"name":"demo"}"#)
        .await;

    let (status, headers, body) = app.send("GET", "/api/agent/linux/raw/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/zip");
    assert_eq!(
        headers["content-disposition"],
        r#"attachment; filename="agent_linux_1.zip""#
    );
    assert_eq!(body, b"http://127.0.0.1:3000/api/hit/1");
}

#[tokio::test]
async fn download_rejects_bad_input() {
    let app = app().await;
    app.json_status("PUT", "/api/projects", r#"{"name":"demo"}"#)
        .await;

    assert_eq!(
        app.status("GET", "/api/agent/darwin/raw/1").await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.status("GET", "/api/agent/linux/raw/1x").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.status("GET", "/api/agent/windows/raw/2").await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn build_failure_hides_tool_output() {
    let app = app_with_script(FAILING).await;
    app.json_status("PUT", "/api/projects", r#"{"name":"demo"}"#)
        .await;

    let (status, _, body) = app.send("GET", "/api/agent/linux/raw/1", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8_lossy(&body);
    assert!(!body.contains("/srv/build"), "body leaked tool output: {body}");
}

// === CORS ===

#[tokio::test]
async fn cors_allows_configured_origin() {
    let app = app().await;
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/projects")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "PUT")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:5173"
    );
    assert_eq!(resp.headers()["access-control-allow-credentials"], "true");
}
