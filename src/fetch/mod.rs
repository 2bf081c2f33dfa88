mod basic;
mod client;
pub mod auth;
#[cfg(test)]
pub(crate) mod mock;

pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

use crate::error::{PollerError, Result};

/// Largest body accepted from a feed endpoint (50 MB).
const MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

/// Issues a GET and returns the raw response body.
///
/// # Errors
///
/// 401/403 map to [`PollerError::Auth`], any other non-success status or
/// transport failure to [`PollerError::Fetch`].
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    headers: HeaderMap,
) -> Result<Bytes> {
    send(client, Method::GET, url, headers, None).await
}

/// Issues a GET and decodes the body as JSON.
pub async fn fetch_json<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    headers: HeaderMap,
) -> Result<serde_json::Value> {
    let bytes = fetch_bytes(client, url, headers).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Sends `body` as JSON with the given method and decodes the JSON reply.
pub async fn send_json<C: HttpClient + ?Sized>(
    client: &C,
    method: Method,
    url: &str,
    mut headers: HeaderMap,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let payload = serde_json::to_vec(body)?;
    let bytes = send(client, method, url, headers, Some(payload)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn send<C: HttpClient + ?Sized>(
    client: &C,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
) -> Result<Bytes> {
    let parsed = Url::parse(url).map_err(|e| PollerError::Config(format!("invalid url '{url}': {e}")))?;
    let mut req = reqwest::Request::new(method, parsed);
    *req.headers_mut() = headers;
    if let Some(body) = body {
        *req.body_mut() = Some(body.into());
    }

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(status_error(url, status, &body));
    }

    let bytes = read_body(resp, url, MAX_BODY_SIZE).await?;
    debug!(url, bytes = bytes.len(), "Response received");
    Ok(bytes)
}

/// Reads the body chunk by chunk, failing as soon as it exceeds `limit`.
async fn read_body(mut resp: reqwest::Response, url: &str, limit: usize) -> Result<Bytes> {
    match resp.content_length() {
        Some(len) if len > limit as u64 => return Err(too_large(url, len, limit)),
        _ => {}
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = resp.chunk().await? {
        let total = buf.len() + chunk.len();
        if total > limit {
            return Err(too_large(url, total as u64, limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn too_large(url: &str, len: u64, limit: usize) -> PollerError {
    PollerError::Fetch(format!("{url}: response too large ({len} bytes, max {limit})"))
}

fn status_error(url: &str, status: StatusCode, body: &str) -> PollerError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("{url}: HTTP {status}: {snippet}");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        PollerError::Auth(message)
    } else {
        PollerError::Fetch(message)
    }
}
