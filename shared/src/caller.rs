//! Caller identity as resolved by the upstream auth layer.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::MarketError;

pub const CALLER_HEADER: &str = "x-user-id";

/// Authenticated user making the request.
///
/// The auth gateway in front of the services verifies the session and
/// forwards the user id in the `x-user-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Uuid);

impl Caller {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| MarketError::Unauthorized("missing caller identity".to_string()))?;

        let id = Uuid::parse_str(header.trim())
            .map_err(|_| MarketError::Unauthorized("malformed caller identity".to_string()))?;

        Ok(Caller(id))
    }
}
