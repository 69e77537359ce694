//! Bearer-token middleware and the role-based authorization gate.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::auth::jwt::{TokenError, TokenIssuer};
use crate::auth::models::{Claims, Role};
use crate::errors::ApiError;

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const EDITORIAL: &[Role] = &[Role::Admin, Role::Editor];
pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Editor, Role::Viewer];

/// Pure role gate: allowed iff the claims' roles intersect the required set,
/// or the required set is empty (public operation). No store round-trip; the
/// staleness window is bounded by the access-token TTL.
pub fn authorize(claims: &Claims, required: &[Role]) -> bool {
    required.is_empty() || claims.roles.iter().any(|role| required.contains(role))
}

/// Handler-side gate over optionally-present claims. Missing claims map to
/// 401, insufficient roles to 403.
pub fn require(claims: Option<&Claims>, required: &[Role]) -> Result<(), ApiError> {
    let claims = claims.ok_or(ApiError::MissingToken)?;
    if authorize(claims, required) {
        Ok(())
    } else {
        Err(ApiError::InsufficientRole)
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Strict auth middleware: validates the bearer token and stores the claims
/// in request extensions for handlers and the role gate.
pub async fn auth_middleware(
    State(issuer): State<Arc<TokenIssuer>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::MissingToken)?;

    let claims = issuer.verify_access(&token).map_err(|e| match e {
        TokenError::Expired => ApiError::TokenExpired,
        TokenError::Invalid => ApiError::TokenInvalidSignature,
    })?;

    debug!("Authenticated request for subject {}", claims.sub);
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Optional auth middleware: adds claims when a valid token is present but
/// lets anonymous requests through. Used on the catalog surface where reads
/// are public and mutations gate per handler.
pub async fn optional_auth_middleware(
    State(issuer): State<Arc<TokenIssuer>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req) {
        if let Ok(claims) = issuer.verify_access(&token) {
            req.extensions_mut().insert(claims);
        }
    }
    next.run(req).await
}

/// Route-group role gate, layered after `auth_middleware` on admin routes.
pub async fn require_roles(
    required: &'static [Role],
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = req.extensions().get::<Claims>().ok_or(ApiError::MissingToken)?;
    if !authorize(claims, required) {
        return Err(ApiError::InsufficientRole);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with(roles: Vec<Role>) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            roles,
            iss: "profrate".to_string(),
            aud: "profrate-api".to_string(),
            iat: 0,
            exp: usize::MAX,
        }
    }

    #[test]
    fn test_authorize_requires_intersection() {
        let viewer = claims_with(vec![Role::Viewer]);
        assert!(!authorize(&viewer, ADMIN_ONLY));
        assert!(!authorize(&viewer, EDITORIAL));
        assert!(authorize(&viewer, ANY_ROLE));

        let editor = claims_with(vec![Role::Editor]);
        assert!(authorize(&editor, EDITORIAL));
        assert!(!authorize(&editor, ADMIN_ONLY));

        let admin = claims_with(vec![Role::Admin]);
        assert!(authorize(&admin, ADMIN_ONLY));
        assert!(authorize(&admin, EDITORIAL));
    }

    #[test]
    fn test_empty_required_set_is_public() {
        let anonymous_roles = claims_with(vec![]);
        assert!(authorize(&anonymous_roles, &[]));
        let viewer = claims_with(vec![Role::Viewer]);
        assert!(authorize(&viewer, &[]));
    }

    #[test]
    fn test_require_maps_to_error_taxonomy() {
        let viewer = claims_with(vec![Role::Viewer]);

        assert!(matches!(
            require(None, ANY_ROLE),
            Err(ApiError::MissingToken)
        ));
        assert!(matches!(
            require(Some(&viewer), ADMIN_ONLY),
            Err(ApiError::InsufficientRole)
        ));
        assert!(require(Some(&viewer), ANY_ROLE).is_ok());
    }

    #[test]
    fn test_multi_role_user_passes_any_matching_gate() {
        let both = claims_with(vec![Role::Editor, Role::Viewer]);
        assert!(authorize(&both, EDITORIAL));
        assert!(authorize(&both, ANY_ROLE));
        assert!(!authorize(&both, ADMIN_ONLY));
    }
}
