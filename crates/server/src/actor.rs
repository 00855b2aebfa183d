use axum::{extract::FromRequestParts, http::request::Parts};
use shared_types::AppError;

/// Header carrying the authenticated user's id, set by the identity layer
/// in front of this service.
pub const ACTOR_HEADER: &str = "x-user-id";

/// Extractor for the user performing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorId(pub i64);

impl ActorId {
    fn parse(raw: &str) -> Option<i64> {
        raw.trim().parse::<i64>().ok().filter(|id| *id > 0)
    }
}

impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(ACTOR_HEADER) else {
            return Err(AppError::unauthorized("Missing required header: X-User-ID"));
        };
        value
            .to_str()
            .ok()
            .and_then(Self::parse)
            .map(ActorId)
            .ok_or_else(|| AppError::bad_request("X-User-ID must be a positive integer"))
    }
}
