//! Query string and body parsing with engine-compatible semantics.
//!
//! Engine clients send booleans as `1`/`true`/`yes` and repeat keys (`t` on
//! build), so the query is kept as ordered pairs rather than deserialized
//! into a struct. Parse failures become 400 responses with a JSON message.

use crate::error::{DockerError, Result};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Decoded query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(pub Vec<(String, String)>);

#[async_trait]
impl<S> FromRequestParts<S> for Params
where
    S: Send + Sync,
{
    type Rejection = DockerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Ok(Self::parse(parts.uri.query().unwrap_or_default()))
    }
}

impl Params {
    /// Decodes an `application/x-www-form-urlencoded` query.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        )
    }

    /// First value of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value of `key`.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Boolean flag. Absent or empty is false; `0`, `no`, `false` and
    /// `none` are false; anything else is true.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            let v = v.trim().to_ascii_lowercase();
            !matches!(v.as_str(), "" | "0" | "no" | "false" | "none")
        })
    }

    /// Optional unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns a 400 error if the value is present but not a number.
    pub fn uint(&self, key: &str) -> Result<Option<u64>> {
        self.non_empty(key)
            .map(|v| {
                v.parse().map_err(|_| {
                    DockerError::InvalidParameter(format!("invalid value for {key}: {v}"))
                })
            })
            .transpose()
    }

    /// Required unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns a 400 error if the value is missing or not a number.
    pub fn required_uint(&self, key: &str) -> Result<u64> {
        self.uint(key)?
            .ok_or_else(|| DockerError::InvalidParameter(format!("missing parameter: {key}")))
    }

    /// All pairs, for pass-through to the engine.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Parses a JSON request body.
///
/// An empty body yields `T::default()` when `allow_empty` is set.
///
/// # Errors
///
/// Returns a 400 error if the body is empty (and not allowed to be) or
/// not valid JSON for `T`.
pub fn json_body<T>(body: &Bytes, allow_empty: bool) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        if allow_empty {
            return Ok(T::default());
        }
        return Err(DockerError::InvalidParameter(
            "request body is required".to_string(),
        ));
    }
    serde_json::from_slice(body)
        .map_err(|e| DockerError::InvalidParameter(format!("invalid JSON body: {e}")))
}
