//! HTTP API handlers driven through the router

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use helpers::*;
use tmon_common::events::EventBus;
use tmon_common::wire::to_ndjson;
use tmon_pipeline::{build_router, AppState};

fn create_test_app(fakes: &Fakes) -> Router {
    let state = AppState::new(&test_config(), fakes.collaborators(), EventBus::new(64));
    build_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Body, content_type: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", content_type)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, method, uri, Body::from(body.to_string()), "application/json").await
}

#[tokio::test]
async fn test_health_endpoint() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);

    let (status, json) = send(&app, "GET", "/health", Body::empty(), "application/json").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "tmon-pipeline");
    assert_eq!(json["active_monitors"], 0);
}

#[tokio::test]
async fn test_monitor_lifecycle() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);
    let request = json!({
        "issue": "brexit",
        "requester": "alice",
        "start": "2024-03-01T00:00:00Z"
    });

    let (status, json) = send_json(&app, "POST", "/monitor", request.clone()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(json["session_id"].is_string());

    let (status, json) = send_json(&app, "POST", "/monitor", request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");

    let (status, json) = send(&app, "GET", "/monitor", Body::empty(), "application/json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["monitors"][0]["issue"], "brexit");
    assert_eq!(json["monitors"][0]["requester"], "alice");

    let (status, json) = send(&app, "DELETE", "/monitor/brexit/alice", Body::empty(), "application/json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "stopped");

    let (status, _) = send(&app, "DELETE", "/monitor/brexit/alice", Body::empty(), "application/json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monitor_request_validation() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);

    let cases = [
        json!({"issue": "", "requester": "alice", "start": "2024-03-01T00:00:00Z"}),
        json!({"issue": "brexit", "requester": "alice", "start": "yesterday"}),
        json!({
            "issue": "brexit",
            "requester": "alice",
            "start": "2024-03-02T00:00:00Z",
            "end": "2024-03-01T00:00:00Z"
        }),
    ];

    for case in cases {
        let (status, json) = send_json(&app, "POST", "/monitor", case.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "request {}", case);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn test_article_ingress_flushes_at_threshold() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);
    let k = key("brexit", "alice");

    let body = to_ndjson(&[article(&k, "a1")]).unwrap();
    let (status, json) = send(&app, "POST", "/articles/brexit/alice", Body::from(body), "application/x-ndjson").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["outcome"], "buffered");
    assert_eq!(json["buffered"], 1);

    let body = to_ndjson(&[article(&k, "a2")]).unwrap();
    let (status, json) = send(&app, "POST", "/articles/brexit/alice", Body::from(body), "application/x-ndjson").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["outcome"], "flushed");
    assert_eq!(json["flushed"], 2);

    assert_eq!(fakes.requester.result_ids(), vec!["a1", "a2"]);
}

#[tokio::test]
async fn test_article_ingress_end_of_stream() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);
    let k = key("brexit", "alice");

    let body = to_ndjson(&[article(&k, "a3")]).unwrap();
    let (status, json) = send(
        &app,
        "POST",
        "/articles/brexit/alice?end_of_stream=true",
        Body::from(body),
        "application/x-ndjson",
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["outcome"], "flushed");
    assert_eq!(json["flushed"], 1);
}

#[tokio::test]
async fn test_article_ingress_rejects_whole_request_on_bad_line() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);
    let k = key("brexit", "alice");

    let mut body = to_ndjson(&[article(&k, "a1")]).unwrap();
    body.push_str("{\"id\": \"a2\"}\n");
    let (status, _) = send(&app, "POST", "/articles/brexit/alice", Body::from(body), "application/x-ndjson").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Article harvested for someone else
    let other = key("brexit", "bob");
    let body = to_ndjson(&[article(&other, "b1")]).unwrap();
    let (status, _) = send(&app, "POST", "/articles/brexit/alice", Body::from(body), "application/x-ndjson").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(fakes.engine.call_count(), 0);
}

#[tokio::test]
async fn test_manual_flush_after_compute_failure() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);
    let k = key("brexit", "alice");

    fakes.engine.set_failures(2);
    let body = to_ndjson(&[article(&k, "a1"), article(&k, "a2")]).unwrap();
    let (_, json) = send(&app, "POST", "/articles/brexit/alice", Body::from(body), "application/x-ndjson").await;
    assert_eq!(json["outcome"], "retained");
    assert_eq!(json["buffered"], 2);
    assert!(json["error"].is_string());

    let (status, json) = send(&app, "POST", "/buffers/brexit/alice/flush", Body::empty(), "application/json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "flushed");
    assert_eq!(json["results"], 2);

    let (status, _) = send(&app, "POST", "/buffers/nobody/here/flush", Body::empty(), "application/json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analysis_over_stored_articles() {
    let fakes = Fakes::new(FakeSource::default());
    let k = key("brexit", "alice");
    fakes.store.seed(&[article(&k, "a1"), article(&k, "a2")]);
    let app = create_test_app(&fakes);

    let (status, json) = send_json(
        &app,
        "POST",
        "/analysis",
        json!({"issue": "brexit", "requester": "alice", "text": "about brexit"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matched"], 2);
    assert_eq!(json["resolved"], 2);
    assert_eq!(json["delivered"], 2);
    assert_eq!(fakes.requester.statuses(), vec!["topics_ready"]);
}

#[tokio::test]
async fn test_analysis_with_no_matches_skips_compute() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);

    let (status, json) = send_json(
        &app,
        "POST",
        "/analysis",
        json!({"issue": "brexit", "requester": "alice", "text": "nothing indexed"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matched"], 0);
    assert_eq!(fakes.engine.call_count(), 0);
}

#[tokio::test]
async fn test_analysis_rejects_empty_text() {
    let fakes = Fakes::new(FakeSource::default());
    let app = create_test_app(&fakes);

    let (status, _) = send_json(
        &app,
        "POST",
        "/analysis",
        json!({"issue": "brexit", "requester": "alice", "text": "  "}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
