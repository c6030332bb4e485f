//! Budget Tests
//!
//! Byte-budget reservations for bodies, values and scans.

use axum::body::Body;
use axum::http::{Request, StatusCode};

use crate::TestApp;

#[tokio::test]
async fn test_declared_body_over_limit_is_rejected() {
    let app = TestApp::with_config(|builder| builder.max_body_bytes(1024));

    let request = Request::builder()
        .method("PUT")
        .uri("/v0/entity?id=k")
        .header("content-length", "2048")
        .body(Body::from(vec![b'x'; 2048]))
        .unwrap();
    let answer = app.send_request(request).await;

    assert_eq!(answer.status, StatusCode::BAD_REQUEST);
    assert!(answer.is_closing());
    assert_eq!(app.engine.get(b"k").unwrap(), None);
}

#[tokio::test]
async fn test_undeclared_body_over_limit_is_rejected() {
    let app = TestApp::with_config(|builder| builder.max_body_bytes(1024));

    let answer = app.send("PUT", "/v0/entity?id=k", vec![b'x'; 2048]).await;
    assert_eq!(answer.status, StatusCode::BAD_REQUEST);
    assert!(answer.is_closing());
    assert_eq!(app.engine.get(b"k").unwrap(), None);
    assert_eq!(app.governor.stats().buffered_bytes, 0);

    let answer = app.send("PUT", "/v0/entity?id=k", vec![b'x'; 1024]).await;
    assert_eq!(answer.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_bad_content_length_is_rejected() {
    let app = TestApp::new();

    let request = Request::builder()
        .method("PUT")
        .uri("/v0/entity?id=k")
        .header("content-length", "lots")
        .body(Body::from("v"))
        .unwrap();
    let answer = app.send_request(request).await;

    assert_eq!(answer.status, StatusCode::BAD_REQUEST);
    assert!(answer.is_closing());
}

#[tokio::test]
async fn test_put_over_budget_is_shed() {
    let app = TestApp::with_config(|builder| builder.max_body_bytes(1000).max_buffered_bytes(1500));
    let held = app.governor.try_reserve(1000).unwrap();

    let request = Request::builder()
        .method("PUT")
        .uri("/v0/entity?id=k")
        .header("content-length", "1000")
        .body(Body::from(vec![b'x'; 1000]))
        .unwrap();
    let answer = app.send_request(request).await;

    assert_eq!(answer.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(answer.is_closing());
    assert_eq!(app.engine.get(b"k").unwrap(), None);
    assert_eq!(app.governor.stats().rejected, 1);

    drop(held);
    let answer = app.send("PUT", "/v0/entity?id=k", vec![b'x'; 1000]).await;
    assert_eq!(answer.status, StatusCode::CREATED);
    assert_eq!(app.governor.stats().buffered_bytes, 0);
}

#[tokio::test]
async fn test_get_over_budget_is_shed() {
    let app = TestApp::with_config(|builder| builder.max_body_bytes(1000).max_buffered_bytes(1500));
    app.engine.put(b"k", &[b'x'; 1000]).unwrap();
    let held = app.governor.try_reserve(1000).unwrap();

    let answer = app.send("GET", "/v0/entity?id=k", "").await;
    assert_eq!(answer.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(answer.body.is_empty());

    drop(held);
    let answer = app.send("GET", "/v0/entity?id=k", "").await;
    assert_eq!(answer.status, StatusCode::OK);
    assert_eq!(answer.body.len(), 1000);
    assert_eq!(app.governor.stats().buffered_bytes, 0);
}

#[tokio::test]
async fn test_scan_snapshot_is_charged_to_the_budget() {
    let app = TestApp::with_config(|builder| {
        builder
            .memtable_size_limit(1024 * 1024)
            .max_body_bytes(64 * 1024)
            .max_buffered_bytes(256 * 1024)
    });
    let value = vec![b'v'; 10 * 1024];
    for i in 0..30 {
        app.engine.put(format!("k{:02}", i).as_bytes(), &value).unwrap();
    }
    assert!(app.engine.memtable_size() > 256 * 1024);

    // Copying the memtable range would overrun the budget
    let answer = app.send("GET", "/v0/entities?start=k", "").await;
    assert_eq!(answer.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.governor.stats().rejected, 1);
    assert_eq!(app.governor.stats().buffered_bytes, 0);

    // Once on disk the scan streams from SSTables
    app.engine.flush().unwrap();
    let answer = app.send("GET", "/v0/entities?start=k", "").await;
    assert_eq!(answer.status, StatusCode::OK);
    assert_eq!(answer.body.iter().filter(|&&b| b == b'\n').count(), 30);
    assert_eq!(app.governor.stats().buffered_bytes, 0);
}
