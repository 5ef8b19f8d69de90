//! Webhook relay tests against a mock upstream.
//!
//! Tests for:
//! - Basic credential injection
//! - Body handling per method
//! - Status and header relay
//! - Unconfigured and unreachable upstreams

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use wiremock::matchers::{body_json as json_body, header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

/// base64("svc:pw")
const BASIC_AUTH: &str = "Basic c3ZjOnB3";

async fn app_with_upstream(server: &MockServer) -> TestApp {
    let hook = format!("{}/hook", server.uri());
    let test_hook = format!("{}/hook-test", server.uri());
    TestApp::new(&[
        ("WEBHOOK_URL", hook.as_str()),
        ("WEBHOOK_TEST_URL", test_hook.as_str()),
        ("WEBHOOK_USERNAME", "svc"),
        ("WEBHOOK_PASSWORD", "pw"),
    ])
}

#[tokio::test]
async fn test_post_is_relayed_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_matcher("authorization", BASIC_AUTH))
        .and(header_matcher("content-type", "application/json"))
        .and(json_body(json!({ "chatInput": "hello" })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-upstream", "yes")
                .set_body_json(json!({ "output": "hi there" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let cookie = app.login().await;

    let request = Request::builder()
        .method("POST")
        .uri("/proxy/webhook")
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"chatInput":"hello"}"#))
        .unwrap();
    let response = app.request(request).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
    assert_eq!(body_json(response).await, json!({ "output": "hi there" }));
}

#[tokio::test]
async fn test_missing_content_type_defaults_to_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook-test"))
        .and(header_matcher("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let cookie = app.login().await;

    let request = Request::builder()
        .method("POST")
        .uri("/proxy/webhook-test")
        .header(header::COOKIE, &cookie)
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(app.request(request).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_is_relayed_without_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hook"))
        .and(header_matcher("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let cookie = app.login().await;

    let request = Request::builder()
        .method("GET")
        .uri("/proxy/webhook")
        .header(header::COOKIE, &cookie)
        .body(Body::from("ignored"))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "pong");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].body.is_empty());
}

#[tokio::test]
async fn test_upstream_error_status_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "bad input" })))
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let cookie = app.login().await;

    let request = Request::builder()
        .method("POST")
        .uri("/proxy/webhook")
        .header(header::COOKIE, &cookie)
        .body(Body::from("{}"))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "bad input");
}

#[tokio::test]
async fn test_unconfigured_webhook_is_500() {
    let app = TestApp::new(&[]);
    let cookie = app.login().await;

    let request = Request::builder()
        .method("POST")
        .uri("/proxy/webhook")
        .header(header::COOKIE, &cookie)
        .body(Body::from("{}"))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "Webhook URL not configured" })
    );
}

#[tokio::test]
async fn test_unreachable_upstream_is_500() {
    // Nothing listens on the discard port
    let app = TestApp::new(&[("WEBHOOK_URL", "http://127.0.0.1:9/hook")]);
    let cookie = app.login().await;

    let request = Request::builder()
        .method("POST")
        .uri("/proxy/webhook")
        .header(header::COOKIE, &cookie)
        .body(Body::from("{}"))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "Proxy request failed" })
    );
}
