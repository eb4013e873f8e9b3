use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::AppError;
use crate::types::ids::ClientId;

pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// The authenticated caller identity, issued by the auth layer upstream
/// and carried on the `x-client-id` header. Session issuance itself is an
/// external collaborator; this extractor only requires that an identity is
/// present.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub ClientId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client_id = parts
            .headers
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::unauthorized("clientId is required."))?;

        Ok(Self(ClientId::new(client_id)))
    }
}
