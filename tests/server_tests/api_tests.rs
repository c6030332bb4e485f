//! API Tests
//!
//! The entity API over real connections.

use std::time::Duration;

use reqwest::Method;
use tempfile::TempDir;

use crate::{closed_within, connect_raw, send_raw, test_config, TestServer};

async fn start() -> (TempDir, TestServer) {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(test_config(temp.path()).build()).await;
    (temp, server)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_put_get_delete_get() {
    let (_temp, server) = start().await;
    let client = server.client();

    let put = client.request(Method::PUT, "/v0/entity?id=k1", b"v1".to_vec()).await.unwrap();
    assert_eq!(put.status, 201);
    assert!(put.body.is_empty());

    let get = client.request(Method::GET, "/v0/entity?id=k1", Vec::new()).await.unwrap();
    assert_eq!(get.status, 200);
    assert_eq!(&get.body[..], b"v1");

    let delete = client.request(Method::DELETE, "/v0/entity?id=k1", Vec::new()).await.unwrap();
    assert_eq!(delete.status, 202);

    let get = client.request(Method::GET, "/v0/entity?id=k1", Vec::new()).await.unwrap();
    assert_eq!(get.status, 404);
    assert!(get.body.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_round_trips_any_key() {
    let (_temp, server) = start().await;
    let client = server.client();

    let keys: [&[u8]; 5] = [b"plain", b"a b", b"a+b", b"100%", b"\x00\xff/?#&="];
    for key in keys {
        client.put(key, key).await.unwrap();
    }
    for key in keys {
        assert_eq!(client.get(key).await.unwrap().as_deref(), Some(key));
    }

    client.delete(b"a b").await.unwrap();
    assert_eq!(client.get(b"a b").await.unwrap(), None);
    assert_eq!(client.get(b"a+b").await.unwrap().as_deref(), Some(&b"a+b"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_value() {
    let (_temp, server) = start().await;
    let client = server.client();

    let value: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();
    client.put(b"big", &value).await.unwrap();
    assert_eq!(client.get(b"big").await.unwrap().unwrap().to_vec(), value);
    assert_eq!(server.governor.stats().buffered_bytes, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unroutable_request_keeps_connection() {
    let (_temp, server) = start().await;
    let mut stream = connect_raw(server.addr).await;

    let response = send_raw(&mut stream, b"GET /v0/entity HTTP/1.1\r\nHost: t\r\n\r\n").await;
    assert_eq!(response.status, 400);
    assert!(!response.closing);

    let response = send_raw(
        &mut stream,
        b"PUT /v0/entity?id=k HTTP/1.1\r\nHost: t\r\nContent-Length: 1\r\n\r\nv",
    )
    .await;
    assert_eq!(response.status, 201);
    assert_eq!(server.engine().get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_request_closes_connection() {
    let (_temp, server) = start().await;
    let mut stream = connect_raw(server.addr).await;

    let response = send_raw(&mut stream, b"nonsense\r\n\r\n").await;
    assert_eq!(response.status, 400);
    assert!(closed_within(&mut stream, Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_close_honored() {
    let (_temp, server) = start().await;
    let mut stream = connect_raw(server.addr).await;

    let response = send_raw(
        &mut stream,
        b"DELETE /v0/entity?id=k HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(response.status, 202);
    assert!(closed_within(&mut stream, Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_keep_alive_serves_many_requests() {
    let (_temp, server) = start().await;
    let mut stream = connect_raw(server.addr).await;

    for i in 0..10 {
        let raw = format!(
            "PUT /v0/entity?id=k{} HTTP/1.1\r\nHost: t\r\nContent-Length: 1\r\n\r\nv",
            i
        );
        assert_eq!(send_raw(&mut stream, raw.as_bytes()).await.status, 201);
    }
    assert_eq!(server.governor.stats().admitted, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scan_endpoint() {
    let (_temp, server) = start().await;
    let client = server.client();

    for key in ["b", "a", "d", "c", "a b"] {
        client.put(key.as_bytes(), format!("v-{}", key).as_bytes()).await.unwrap();
    }
    client.delete(b"c").await.unwrap();

    let all = client.scan(b"a", None).await.unwrap();
    let keys: Vec<&[u8]> = all.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![&b"a"[..], &b"a b"[..], &b"b"[..], &b"d"[..]]);
    assert_eq!(all[1].1, b"v-a b".to_vec());

    let bounded = client.scan(b"a b", Some(&b"d"[..])).await.unwrap();
    assert_eq!(bounded.len(), 2);

    assert!(client.scan(b"x", None).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scan_spans_flushed_data() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(test_config(temp.path()).memtable_size_limit(4 * 1024).build()).await;
    let client = server.client();

    let value = vec![b'x'; 1000];
    for i in 0..300 {
        client.put(format!("key{:03}", i).as_bytes(), &value).await.unwrap();
    }
    assert!(server.engine().sstable_count() > 0);

    let records = client.scan(b"key", None).await.unwrap();
    assert_eq!(records.len(), 300);
    assert!(records.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(records.iter().all(|(_, v)| v == &value));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_endpoint() {
    let (_temp, server) = start().await;
    assert!(server.client().status().await.unwrap());
}
