// Authentication gate for ingestion requests
//
// A host proves its identity with `Authorization: Bearer <api_key>`. The key
// is resolved against the provisioning store; validity is binary and purely
// store-driven (no expiry, no rotation, no rate limiting).

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use thiserror::Error;

use crate::storage::{StorageError, TelemetryStore};

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("invalid Authorization header format")]
    MalformedHeader,

    #[error("invalid or inactive instance")]
    UnknownCredential,

    #[error("instance lookup failed: {0}")]
    Lookup(#[from] StorageError),
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// A missing header, a different scheme, or an empty token are rejected
/// before the store is consulted.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    if value.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Resolves a bearer token to the provisioned instance it belongs to
pub async fn authenticate(store: &dyn TelemetryStore, token: &str) -> Result<String, AuthError> {
    store
        .find_provisioned_instance(token)
        .await?
        .ok_or(AuthError::UnknownCredential)
}
