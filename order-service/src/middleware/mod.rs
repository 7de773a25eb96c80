//! Request context extraction.
//!
//! The storefront BFF authenticates the shopper and forwards the user id in
//! a header; this service trusts it the way it trusts any internal caller.
//! Webhook routes never use this extractor - the gateway is authenticated
//! by its body signature instead.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Identity of the shopper making the request.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header (required from BFF)"))
            })?;

        let user_id = user_id.parse::<Uuid>().map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("X-User-ID header is not a valid UUID"))
        })?;

        Ok(UserContext { user_id })
    }
}
