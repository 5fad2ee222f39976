use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// UserId extractor for matching-service
///
/// Extracts user_id from the X-User-ID header set by the trusted gateway.
/// All receipts, transactions, groups, and matches are scoped to this id;
/// no handler ever crosses user boundaries.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header (required from gateway)"))
            })?;

        let user_id = Uuid::parse_str(raw)
            .map_err(|_| AppError::AuthError(anyhow::anyhow!("X-User-ID is not a valid UUID")))?;

        // Add to tracing span for observability
        tracing::Span::current().record("user_id", raw);

        Ok(UserId(user_id))
    }
}
