//! Request header assembly for authenticated feeds.
//!
//! Operators configure free-form extra headers per endpoint; the
//! `Authorization` header is layered on top from the token the
//! [`crate::token::TokenManager`] hands out.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::error::{PollerError, Result};

/// How the cached token is presented to the feed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization<'a> {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(&'a str),
    /// `Authorization: Basic <token>`, where the token is already base64 encoded.
    Basic(&'a str),
}

/// Encodes `username:password` for HTTP basic authentication.
pub fn basic_credentials(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{username}:{password}"))
}

/// Builds the header map for one request from the configured extra headers
/// plus the authorization scheme, which always wins over a configured
/// `Authorization` entry.
pub fn build_headers(extra: &HashMap<String, String>, auth: Authorization<'_>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(extra.len() + 1);

    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PollerError::Config(format!("invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| PollerError::Config(format!("invalid value for header '{name}': {e}")))?;
        headers.insert(header_name, header_value);
    }

    let value = match auth {
        Authorization::None => return Ok(headers),
        Authorization::Bearer(token) => format!("Bearer {token}"),
        Authorization::Basic(token) => format!("Basic {token}"),
    };
    let mut header_value = HeaderValue::from_str(&value)
        .map_err(|e| PollerError::Auth(format!("token is not a valid header value: {e}")))?;
    header_value.set_sensitive(true);
    headers.insert(AUTHORIZATION, header_value);

    Ok(headers)
}
