//! Caller identity from the platform security token

use axum::http::HeaderMap;
use warden_common::identity::{JwtService, TokenData};

use crate::error::{Error, Result};

/// Query parameter accepted for WebSocket upgrades, where browsers cannot
/// set headers
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract the token from a query string
pub fn extract_query_token(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value)
        .filter(|t| !t.is_empty())
}

/// Query string with the token parameter removed
///
/// The platform token is never passed on to the environment.
pub fn strip_query_token(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| {
            let key = pair.split_once('=').map_or(*pair, |(key, _)| key);
            !pair.is_empty() && key != TOKEN_QUERY_PARAM
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Validate the caller's platform token
pub fn authenticate(jwt: &JwtService, token: Option<&str>) -> Result<TokenData> {
    let token = token.ok_or_else(|| Error::Unauthorized("missing Authorization header".into()))?;
    Ok(jwt.parse(token)?)
}
