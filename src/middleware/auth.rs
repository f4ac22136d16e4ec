use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::user::{Role, Viewer};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    /// The caller identity carried by the token, if both claims are well formed.
    pub fn viewer(&self) -> Option<Viewer> {
        let user_id = Uuid::parse_str(&self.sub).ok()?;
        let role = self
            .role
            .as_deref()?
            .trim()
            .to_ascii_lowercase()
            .parse::<Role>()
            .ok()?;
        Some(Viewer::new(user_id, role))
    }
}

fn unauthorized(code: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": code }))).into_response()
}

/// Verifies the HS256 bearer token and makes the caller available to handlers as an
/// `Extension<Viewer>`.
pub async fn require_bearer_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return unauthorized("missing_authorization");
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return unauthorized("bad_authorization");
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return unauthorized("unsupported_scheme");
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims,
        Err(err) => {
            tracing::debug!(error = %err, "rejected bearer token");
            return unauthorized("invalid_token");
        }
    };

    let Some(viewer) = claims.viewer() else {
        return unauthorized("invalid_claims");
    };
    req.extensions_mut().insert(viewer);
    req.extensions_mut().insert(claims);
    next.run(req).await
}
