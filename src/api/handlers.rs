//! Endpoint handlers
//!
//! Engine calls block, so each one runs on a governor worker.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

use crate::engine::Scan;
use crate::error::{Result, StrataError};
use crate::governor::{BytePermit, Governor};

use super::body::{Permitted, ScanBody, ScanChunk};
use super::extract::{EntityBody, EntityKey};
use super::params::{encode_record, QueryParams};
use super::AppState;

/// A scan chunk is cut once it holds this many encoded bytes
const SCAN_CHUNK_BYTES: usize = 64 * 1024;

/// Chunks produced ahead of the client
const SCAN_CHANNEL_DEPTH: usize = 2;

pub(super) async fn get_entity(
    State(state): State<AppState>,
    EntityKey(key): EntityKey,
) -> Result<Response> {
    let engine = Arc::clone(&state.engine);
    let value = state.governor.run_blocking(move || engine.get(&key)).await?;

    let Some(value) = value else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let permit = reserve(&state.governor, value.len(), "GET response")?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::new(Permitted::new(value, permit)),
    )
        .into_response())
}

pub(super) async fn put_entity(
    State(state): State<AppState>,
    EntityKey(key): EntityKey,
    body: EntityBody,
) -> Result<StatusCode> {
    let engine = Arc::clone(&state.engine);
    state
        .governor
        .run_blocking(move || {
            // Whole body, so its reservation lives until the write is done
            let body = body;
            engine.put(&key, &body.bytes)
        })
        .await?;
    Ok(StatusCode::CREATED)
}

pub(super) async fn delete_entity(
    State(state): State<AppState>,
    EntityKey(key): EntityKey,
) -> Result<StatusCode> {
    let engine = Arc::clone(&state.engine);
    state
        .governor
        .run_blocking(move || engine.delete(&key))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// 200 while the engine takes writes, 503 once it has halted
pub(super) async fn status(State(state): State<AppState>) -> StatusCode {
    if state.engine.is_accepting_writes() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /v0/entities?start=<key>[&end=<key>]`
///
/// One `key=value` line per live record, both percent-encoded. Records
/// are produced in chunks on a worker and streamed as the client reads.
pub(super) async fn scan(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let params = QueryParams::parse(query.as_deref())?;
    let start = params.required("start")?.to_vec();
    let end = params.optional("end").map(<[u8]>::to_vec);

    // The memtable part of the range is copied when the scan opens
    let mut snapshot = reserve(&state.governor, state.engine.memtable_size(), "scan snapshot")?;
    let engine = Arc::clone(&state.engine);
    let scan = state
        .governor
        .run_blocking(move || engine.scan(&start, end.as_deref()))
        .await?;
    snapshot.shrink(scan.snapshot_bytes());

    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_DEPTH);
    tokio::spawn(stream_scan(
        scan,
        snapshot,
        Arc::clone(&state.governor),
        state.request_timeout,
        tx,
    ));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        Body::new(ScanBody::new(rx)),
    )
        .into_response())
}

/// Anything the routes do not know
pub(super) async fn bad_request() -> StatusCode {
    StatusCode::BAD_REQUEST
}

/// Feed `tx` until the scan is done, the client leaves or stops reading
/// for `send_timeout`
async fn stream_scan(
    scan: Scan,
    snapshot: BytePermit,
    governor: Arc<Governor>,
    send_timeout: Duration,
    tx: mpsc::Sender<ScanChunk>,
) {
    let mut snapshot = Some(snapshot);
    let mut remaining = Some(scan);

    while let Some(scan) = remaining.take() {
        let (chunk, rest) = match governor.run_blocking(move || next_chunk(scan)).await {
            Ok(produced) => produced,
            Err(e) => {
                tracing::warn!("Scan aborted: {}", e);
                return;
            }
        };

        // Nothing copied from the memtables outlives an exhausted scan
        if rest.is_none() {
            drop(snapshot.take());
        }

        let chunk = if chunk.is_empty() {
            None
        } else {
            let permit = match reserve(&governor, chunk.len(), "scan chunk") {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::warn!("Scan aborted: {}", e);
                    return;
                }
            };
            Some(ScanChunk::Records(Bytes::from(chunk), permit))
        };

        for message in chunk.into_iter().chain(rest.is_none().then_some(ScanChunk::End)) {
            match tokio::time::timeout(send_timeout, tx.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    tracing::debug!("Scan client went away");
                    return;
                }
                Err(_) => {
                    tracing::debug!("Scan client stopped reading for {:?}", send_timeout);
                    return;
                }
            }
        }

        remaining = rest;
    }
}

/// Encode records until the chunk is full or the scan runs out
fn next_chunk(mut scan: Scan) -> Result<(String, Option<Scan>)> {
    let mut chunk = String::new();
    loop {
        match scan.next() {
            Some(Ok((key, value))) => {
                chunk.push_str(&encode_record(&key, &value));
                if chunk.len() >= SCAN_CHUNK_BYTES {
                    return Ok((chunk, Some(scan)));
                }
            }
            Some(Err(e)) => return Err(e),
            None => return Ok((chunk, None)),
        }
    }
}

fn reserve(governor: &Arc<Governor>, bytes: usize, what: &str) -> Result<BytePermit> {
    governor.try_reserve(bytes).ok_or_else(|| {
        governor.record_rejected();
        StrataError::Overloaded(format!("{} of {} bytes does not fit the byte budget", what, bytes))
    })
}
