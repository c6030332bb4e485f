//! HTTP client for the entity API
//!
//! Thin wrapper over `reqwest`; connections are pooled and kept alive.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Method};

use crate::api::params::{decode_records, encode};
use crate::api::{ENTITIES_PATH, ENTITY_PATH, STATUS_PATH};
use crate::error::{Result, StrataError};

/// Status and body of one exchange
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub body: Bytes,
    /// The server announced `Connection: close`
    pub closing: bool,
}

#[derive(Debug, Clone)]
pub struct Client {
    base: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl Client {
    /// Create a client for `addr` (host:port); connects lazily
    pub fn new(addr: impl AsRef<str>) -> Self {
        Self {
            base: format!("http://{}", addr.as_ref()),
            timeout: Duration::from_secs(30),
            http: reqwest::Client::new(),
        }
    }

    /// Deadline for each whole request, response body included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get a value; `Ok(None)` when the key is absent
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let response = self.request(Method::GET, &entity_target(key), Vec::new()).await?;
        match response.status {
            200 => Ok(Some(response.body)),
            404 => Ok(None),
            status => Err(unexpected("GET", status)),
        }
    }

    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let response = self
            .request(Method::PUT, &entity_target(key), value.to_vec())
            .await?;
        match response.status {
            201 => Ok(()),
            status => Err(unexpected("PUT", status)),
        }
    }

    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        let response = self
            .request(Method::DELETE, &entity_target(key), Vec::new())
            .await?;
        match response.status {
            202 => Ok(()),
            status => Err(unexpected("DELETE", status)),
        }
    }

    /// Fetch live records with `start <= key < end`, in key order
    pub async fn scan(&self, start: &[u8], end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut target = format!("{}?start={}", ENTITIES_PATH, encode(start));
        if let Some(end) = end {
            target.push_str(&format!("&end={}", encode(end)));
        }

        let response = self.request(Method::GET, &target, Vec::new()).await?;
        if response.status != 200 {
            return Err(unexpected("SCAN", response.status));
        }
        decode_records(&response.body)
    }

    /// Whether the server accepts writes
    pub async fn status(&self) -> Result<bool> {
        let response = self.request(Method::GET, STATUS_PATH, Vec::new()).await?;
        match response.status {
            200 => Ok(true),
            503 => Ok(false),
            status => Err(unexpected("STATUS", status)),
        }
    }

    /// Send a request for `target` (path and query) and return whatever
    /// the server answered
    pub async fn request(&self, method: Method, target: &str, body: Vec<u8>) -> Result<ClientResponse> {
        let url = format!("{}{}", self.base, target);
        let response = self
            .http
            .request(method, &url)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| StrataError::Network(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        let closing = response
            .headers()
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        let body = response
            .bytes()
            .await
            .map_err(|e| StrataError::Network(format!("reading body of {}: {}", url, e)))?;

        Ok(ClientResponse {
            status,
            body,
            closing,
        })
    }
}

fn entity_target(key: &[u8]) -> String {
    format!("{}?id={}", ENTITY_PATH, encode(key))
}

fn unexpected(operation: &str, status: u16) -> StrataError {
    StrataError::Network(format!("{} answered with status {}", operation, status))
}
