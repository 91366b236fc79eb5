//! ---
//! rota_section: "05-networking-external-interfaces"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Request authentication middleware and HTTP surface."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use carerota_security::{PrincipalId, Role, UserRecord};
use serde::Serialize;
use thiserror::Error;

/// Identity attached to a request after the authentication layer succeeds.
///
/// Built solely from the profile store; nothing the client sends besides the
/// bearer token contributes to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    pub user_id: PrincipalId,
    pub role: Role,
    pub facility_id: Option<String>,
}

impl From<&UserRecord> for RequestContext {
    fn from(record: &UserRecord) -> Self {
        Self {
            user_id: record.id.clone(),
            role: record.role,
            facility_id: record.facility_id.clone(),
        }
    }
}

/// Terminal rejection issued by the request pipeline.
///
/// Each variant renders one fixed message; causes within a status class are
/// never distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("Authorization token required")]
    MissingToken,
    /// Invalid, expired, or unverifiable because the provider is down.
    #[error("Invalid token")]
    InvalidToken,
    #[error("User not found or inactive")]
    UserUnavailable,
    #[error("Insufficient permissions")]
    Forbidden,
}

impl AuthRejection {
    /// HTTP status sent for this rejection.
    pub fn status(self) -> StatusCode {
        match self {
            AuthRejection::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Extractor for handlers behind the authentication layer. A missing context
/// is treated as unauthenticated.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or(AuthRejection::MissingToken)
    }
}
