//! End-to-end routing through the gateway: rewrites, status mirroring,
//! body forwarding, and the error taxonomy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{any, post};
use axum::{Json, Router};
use serde_json::{json, Value};

mod common;

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "content_type": header("content-type"),
        "forwarded_for": header("x-forwarded-for"),
        "request_id": header("x-request-id"),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn teapot() -> impl IntoResponse {
    (
        StatusCode::IM_A_TEAPOT,
        [("x-upstream", "kettle"), ("content-type", "text/plain")],
        "short and stout",
    )
}

async fn upload(mut multipart: Multipart) -> Json<Value> {
    let mut parts = serde_json::Map::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.unwrap();
        parts.insert(
            name,
            json!({
                "file_name": file_name,
                "content_type": content_type,
                "len": data.len(),
                "text": String::from_utf8_lossy(&data),
            }),
        );
    }
    Json(Value::Object(parts))
}

struct Fleet {
    gateway: String,
    hits: Arc<AtomicUsize>,
    shutdown: fleet_gateway::Shutdown,
}

async fn fleet() -> Fleet {
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = Router::new()
        .route("/api/teapot", any(teapot))
        .route("/api/upload", post(upload))
        .fallback(echo)
        .with_state(hits.clone());
    let echo_addr = common::spawn_upstream(upstream).await;
    let silent_addr = common::spawn_silent_upstream().await;

    let mut assessment = common::service(
        "ai_assessment",
        "/api/ai/assessment",
        echo_addr.port(),
        common::strip("/predict"),
    );
    assessment.methods = vec!["GET".into(), "POST".into()];

    let config = common::test_config(vec![
        common::service("main", "/api/main", echo_addr.port(), common::replace("/api")),
        assessment,
        common::service("down", "/api/down", common::closed_port(), common::strip("/")),
        common::service("slow", "/api/slow", silent_addr.port(), common::strip("/")),
    ]);
    let (addr, shutdown) = common::start_gateway(config).await;

    Fleet {
        gateway: format!("http://{}", addr),
        hits,
        shutdown,
    }
}

#[tokio::test]
async fn rewrites_prefix_and_keeps_query() {
    let fleet = fleet().await;
    let client = common::client();

    let res = client
        .get(format!("{}/api/main/users/7?active=true&page=2", fleet.gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/users/7");
    assert_eq!(body["query"], "active=true&page=2");
    assert_eq!(body["forwarded_for"], "127.0.0.1");

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn bare_prefix_uses_default_path() {
    let fleet = fleet().await;
    let client = common::client();

    for path in ["/api/ai/assessment", "/api/ai/assessment/"] {
        let res = client
            .post(format!("{}{}", fleet.gateway, path))
            .json(&json!({"age": 67}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["path"], "/predict");
        assert_eq!(body["content_type"], "application/json");
        assert_eq!(body["body"], r#"{"age":67}"#);
    }

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn upstream_status_and_headers_are_mirrored() {
    let fleet = fleet().await;
    let res = common::client()
        .delete(format!("{}/api/main/teapot", fleet.gateway))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 418);
    assert_eq!(res.headers()["x-upstream"], "kettle");
    assert_eq!(res.text().await.unwrap(), "short and stout");

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn unknown_path_lists_routes_without_calling_upstreams() {
    let fleet = fleet().await;
    let res = common::client()
        .get(format!("{}/api/unknown/thing", fleet.gateway))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "RouteNotFound");
    let routes: Vec<&str> = body["available_routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap())
        .collect();
    assert!(routes.contains(&"/api/main/*"));
    assert!(routes.contains(&"/api/ai/assessment/*"));
    assert_eq!(fleet.hits.load(Ordering::SeqCst), 0);

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn disallowed_verb_is_rejected_before_forwarding() {
    let fleet = fleet().await;
    let res = common::client()
        .put(format!("{}/api/ai/assessment", fleet.gateway))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 405);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "UnsupportedMethod");
    assert_eq!(fleet.hits.load(Ordering::SeqCst), 0);

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let fleet = fleet().await;
    let res = common::client()
        .post(format!("{}/api/main/users", fleet.gateway))
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "MalformedRequest");
    assert_eq!(fleet.hits.load(Ordering::SeqCst), 0);

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn form_body_is_reencoded() {
    let fleet = fleet().await;
    let res = common::client()
        .patch(format!("{}/api/main/profile", fleet.gateway))
        .form(&[("name", "Ada Lovelace"), ("ward", "4B")])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["method"], "PATCH");
    assert_eq!(body["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(body["body"], "name=Ada+Lovelace&ward=4B");

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn multipart_fields_and_files_are_forwarded() {
    let fleet = fleet().await;
    let scan = reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G', 1, 2, 3])
        .file_name("scan.png")
        .mime_str("image/png")
        .unwrap();
    let form = reqwest::multipart::Form::new()
        .text("patient_id", "42")
        .part("image", scan);

    let res = common::client()
        .post(format!("{}/api/main/upload", fleet.gateway))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["patient_id"]["text"], "42");
    assert_eq!(body["patient_id"]["file_name"], Value::Null);
    assert_eq!(body["image"]["file_name"], "scan.png");
    assert_eq!(body["image"]["content_type"], "image/png");
    assert_eq!(body["image"]["len"], 7);

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn unreachable_upstream_is_503() {
    let fleet = fleet().await;
    let res = common::client()
        .get(format!("{}/api/down/anything", fleet.gateway))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "UpstreamUnavailable");

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn silent_upstream_times_out_with_504() {
    let fleet = fleet().await;
    let start = Instant::now();
    let res = common::client()
        .get(format!("{}/api/slow/report", fleet.gateway))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "UpstreamTimeout");
    assert!(start.elapsed() < Duration::from_secs(5));

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn request_id_is_generated_and_propagated() {
    let fleet = fleet().await;
    let client = common::client();

    let res = client
        .get(format!("{}/api/main/ping", fleet.gateway))
        .send()
        .await
        .unwrap();
    let generated = res.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(!generated.is_empty());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["request_id"], generated.as_str());

    let res = client
        .get(format!("{}/api/main/ping", fleet.gateway))
        .header("x-request-id", "trace-abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-abc");

    fleet.shutdown.trigger();
}

#[tokio::test]
async fn dot_segments_never_reach_the_upstream() {
    let fleet = fleet().await;
    let addr = fleet.gateway.trim_start_matches("http://");

    for path in ["/api/main/../x", "/api/main/%2e%2e/admin", "/api/main/./users"] {
        let reply = common::raw_request(
            addr,
            &format!("GET {} HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n", path),
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 400"), "{path}: {reply}");
        assert!(reply.contains("MalformedRequest"), "{reply}");
    }
    assert_eq!(fleet.hits.load(Ordering::SeqCst), 0);

    fleet.shutdown.trigger();
}
