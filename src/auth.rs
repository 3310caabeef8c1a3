use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;

/// Authenticated caller, resolved once per request at the boundary.
///
/// Handlers and services receive this value; nothing below the boundary
/// ever parses token internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

/// Shared token-validation state, cheap to clone into the router state
#[derive(Clone)]
pub struct AuthKeys {
    secret: String,
}

impl AuthKeys {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

/// Boundary rejection: the request never reached the domain layer
#[derive(Debug, PartialEq, Eq)]
pub struct AuthError(pub &'static str);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": "unauthorized", "message": self.0 }
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    token_type: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// Validates an HS256 access token and extracts the caller's user id.
/// Refresh tokens are rejected here; they are only good for reissuing.
pub fn decode_user(token: &str, secret: &str) -> Result<AuthUser, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError("invalid or expired token"))?;

    if data.claims.token_type.as_deref() != Some("access") {
        return Err(AuthError("token is not an access token"));
    }

    let user_id = data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| AuthError("malformed subject claim"))?;

    Ok(AuthUser { user_id })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(AuthError("missing bearer token"))?;

        decode_user(token, &keys.secret)
    }
}
