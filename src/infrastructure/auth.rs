use axum::{
    async_trait, extract::FromRequestParts, http::request::Parts, response::IntoResponse, Json,
};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::Role;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::UNAUTHORIZED;
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Actor identity sourced from three untrusted request headers. This is not
/// authentication: spec.md places real authentication out of scope and
/// specifies identity, tenant, and role as headers supplied by an upstream
/// gateway.
#[derive(Clone, Debug)]
pub struct AuthenticatedActor {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthenticatedActor {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedActor
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let company_id = header_uuid(parts, "x-company-id")?;
        let user_id = header_uuid(parts, "x-user-id")?;
        // spec.md §6: X-Role defaults to "employee" when absent.
        let role = match parts.headers.get("x-role") {
            None => Role::Employee,
            Some(_) => header_str(parts, "x-role")?
                .parse::<Role>()
                .map_err(|_| AuthError::InvalidHeader("X-Role"))?,
        };

        Ok(AuthenticatedActor {
            company_id,
            user_id,
            role,
        })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, AuthError> {
    parts
        .headers
        .get(name)
        .ok_or(AuthError::MissingHeader(static_display(name)))?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader(static_display(name)))
}

fn header_uuid(parts: &Parts, name: &'static str) -> Result<Uuid, AuthError> {
    header_str(parts, name)?
        .parse()
        .map_err(|_| AuthError::InvalidHeader(static_display(name)))
}

fn static_display(name: &'static str) -> &'static str {
    match name {
        "x-company-id" => "X-Company-Id",
        "x-user-id" => "X-User-Id",
        "x-role" => "X-Role",
        other => other,
    }
}
