//! Caller identity.
//!
//! Sessions are terminated upstream; the session layer forwards the
//! authenticated account id in a trusted header.

use super::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

/// Header carrying the caller's account id.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountId(pub Uuid);

/// Parse the identity header, if present and well formed.
#[must_use]
pub fn account_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

#[async_trait]
impl<S> FromRequestParts<S> for AccountId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        account_from_headers(&parts.headers)
            .map(AccountId)
            .ok_or(ApiError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_account_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        assert_eq!(account_from_headers(&headers), None);

        headers.insert(ACCOUNT_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(account_from_headers(&headers), None);

        headers.insert(
            ACCOUNT_HEADER,
            HeaderValue::from_str(&format!(" {id} ")).unwrap(),
        );
        assert_eq!(account_from_headers(&headers), Some(id));
    }
}
