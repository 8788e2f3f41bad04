use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::ServiceError;

/// Header carrying the authenticated caller's e-mail, set by the gateway in
/// front of this service.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// E-mail of the caller. Requests without one are rejected with 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerEmail(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerEmail {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_EMAIL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(|email| CallerEmail(email.to_string()))
            .ok_or_else(|| ServiceError::BadRequest("No user, no responses!".to_string()))
    }
}
