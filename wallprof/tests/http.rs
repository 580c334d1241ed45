// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Behavior of the HTTP profiling handler.

use hyper::{Body, Request, StatusCode};
use wallprof::handler::ProfileHandler;
use wallprof::registry::{FrameTable, TaskRegistry};
use wallprof::Profiler;

fn handler_for(
    registry: &TaskRegistry,
    frames: &FrameTable,
) -> ProfileHandler<impl Fn() -> Profiler> {
    let registry = registry.clone();
    let frames = frames.clone();
    ProfileHandler::new(move || {
        Profiler::new(
            Box::new(registry.snapshotter()),
            Box::new(frames.resolver()),
        )
    })
}

async fn body_bytes(response: hyper::Response<Body>) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body())
        .await
        .expect("body to collect")
        .to_vec()
}

#[tokio::test]
async fn missing_seconds_is_a_bad_request() {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let handler = handler_for(&registry, &frames);

    let req = Request::builder()
        .uri("/")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = String::from_utf8(body_bytes(response).await).expect("utf-8");
    assert!(body.starts_with("bad seconds: :"), "body: {body}");
}

#[tokio::test]
async fn unparsable_seconds_names_the_value_and_reason() {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let handler = handler_for(&registry, &frames);

    let req = Request::builder()
        .uri("/?seconds=abc")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = String::from_utf8(body_bytes(response).await).expect("utf-8");
    assert!(body.starts_with("bad seconds: abc:"), "body: {body}");
}

#[tokio::test]
async fn negative_seconds_are_rejected() {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let handler = handler_for(&registry, &frames);

    let req = Request::builder()
        .uri("/?seconds=-1")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn explicit_pprof_format_is_gzipped() {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let _task = registry.register(frames.stack(&[("serve", "srv.rs", 3)]), None);
    let handler = handler_for(&registry, &frames);

    let req = Request::builder()
        .uri("/?seconds=0&format=pprof")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert_eq!(&body[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn format_defaults_follow_accept_encoding() {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let _task = registry.register(frames.stack(&[("serve", "srv.rs", 3)]), None);
    let handler = handler_for(&registry, &frames);

    let gzip_req = Request::builder()
        .uri("/?seconds=0")
        .header("Accept-Encoding", "gzip")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(gzip_req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert_eq!(&body[..2], &[0x1f, 0x8b], "gzip clients get pprof");

    let plain_req = Request::builder()
        .uri("/?seconds=0")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(plain_req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    // Folded text, possibly empty for a zero-second window, never gzip.
    assert!(body.len() < 2 || &body[..2] != [0x1f, 0x8b]);
}

#[tokio::test]
async fn unknown_format_is_rejected() {
    let registry = TaskRegistry::new();
    let frames = FrameTable::new();
    let handler = handler_for(&registry, &frames);

    let req = Request::builder()
        .uri("/?seconds=0&format=xml")
        .body(Body::empty())
        .expect("request to build");
    let response = handler.handle(req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
