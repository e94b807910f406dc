use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::GatewayError;

/// Header carrying the caller identity, set by the upstream auth layer.
pub const CALLER_HEADER: &str = "x-user-id";

/// Authenticated caller, as asserted by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
}

impl Caller {
    /// Extract the caller from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, GatewayError> {
        let id = headers
            .get(CALLER_HEADER)
            .ok_or(GatewayError::Unauthenticated)?
            .to_str()
            .map_err(|_| GatewayError::Unauthenticated)?
            .trim();

        if id.is_empty() {
            return Err(GatewayError::Unauthenticated);
        }

        Ok(Self { id: id.to_string() })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CALLER_HEADER, HeaderValue::from_static(" user-42 "));
        let caller = Caller::from_headers(&headers).unwrap();
        assert_eq!(caller.id, "user-42");
    }

    #[test]
    fn test_missing_or_blank_header() {
        let headers = HeaderMap::new();
        assert!(matches!(
            Caller::from_headers(&headers),
            Err(GatewayError::Unauthenticated)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(CALLER_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(
            Caller::from_headers(&headers),
            Err(GatewayError::Unauthenticated)
        ));
    }
}
