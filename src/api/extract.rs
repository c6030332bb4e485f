//! Request extractors for the entity endpoint

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::Response;

use crate::error::StrataError;
use crate::governor::BytePermit;

use super::params::QueryParams;
use super::{closing, AppState};

/// The decoded `id` parameter; missing, empty or undecodable is a 400
#[derive(Debug)]
pub struct EntityKey(pub Vec<u8>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for EntityKey {
    type Rejection = StrataError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let params = QueryParams::parse(parts.uri.query())?;
        Ok(Self(params.required("id")?.to_vec()))
    }
}

/// A PUT body, read in full and charged to the byte budget
///
/// The reservation is taken before the first body byte is read: the
/// declared `Content-Length`, or `max_body_bytes` for a chunked body. The
/// body must arrive within the request timeout. Every rejection closes the
/// connection, since the rest of the body is left unread.
#[derive(Debug)]
pub struct EntityBody {
    pub bytes: Bytes,
    _permit: BytePermit,
}

#[async_trait]
impl FromRequest<AppState> for EntityBody {
    type Rejection = Response;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let declared = match req.headers().get(header::CONTENT_LENGTH) {
            Some(value) => {
                let length = value.to_str().ok().and_then(|v| v.parse::<usize>().ok());
                Some(length.ok_or_else(|| closing(StatusCode::BAD_REQUEST))?)
            }
            None => None,
        };

        if let Some(length) = declared.filter(|&len| len > state.max_body_bytes) {
            tracing::debug!(
                "Body of {} bytes exceeds limit of {}",
                length,
                state.max_body_bytes
            );
            return Err(closing(StatusCode::BAD_REQUEST));
        }

        let wanted = declared.unwrap_or(state.max_body_bytes);
        let Some(mut permit) = state.governor.try_reserve(wanted) else {
            state.governor.record_rejected();
            return Err(closing(StatusCode::SERVICE_UNAVAILABLE));
        };

        let bytes = match tokio::time::timeout(state.request_timeout, Bytes::from_request(req, state))
            .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(rejection)) => {
                tracing::debug!("Unreadable request body: {}", rejection);
                return Err(closing(StatusCode::BAD_REQUEST));
            }
            Err(_) => {
                tracing::debug!(
                    "Request body not complete within {:?}",
                    state.request_timeout
                );
                return Err(closing(StatusCode::BAD_REQUEST));
            }
        };

        permit.shrink(bytes.len());
        Ok(Self {
            bytes,
            _permit: permit,
        })
    }
}
