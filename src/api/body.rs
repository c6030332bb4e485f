//! Response bodies that hold byte-budget reservations

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use http_body::{Frame, SizeHint};
use tokio::sync::mpsc;

use crate::error::StrataError;
use crate::governor::BytePermit;

/// A buffered body whose reservation is released once the body is dropped
pub struct Permitted {
    inner: Body,
    _permit: BytePermit,
}

impl Permitted {
    pub fn new(inner: impl Into<Body>, permit: BytePermit) -> Self {
        Self {
            inner: inner.into(),
            _permit: permit,
        }
    }
}

impl http_body::Body for Permitted {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// What a scan producer hands to [`ScanBody`]
pub enum ScanChunk {
    /// Encoded records; the permit covers them until they are written out
    Records(Bytes, BytePermit),
    /// The scan finished
    End,
}

/// Streams scan chunks from a producer task
///
/// A producer that goes away without sending [`ScanChunk::End`] (engine
/// error, budget exhausted, client stalled) fails the body, so the client
/// sees a broken response rather than a short one.
pub struct ScanBody {
    rx: mpsc::Receiver<ScanChunk>,
    ended: bool,
}

impl ScanBody {
    pub fn new(rx: mpsc::Receiver<ScanChunk>) -> Self {
        Self { rx, ended: false }
    }
}

impl http_body::Body for ScanBody {
    type Data = Bytes;
    type Error = StrataError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(ScanChunk::Records(bytes, permit))) => {
                drop(permit);
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(ScanChunk::End)) => {
                this.ended = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.ended = true;
                Poll::Ready(Some(Err(StrataError::Internal(
                    "scan ended before its last record".to_string(),
                ))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.ended
    }
}
