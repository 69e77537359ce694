//! Authentication endpoints: register, login, refresh, logout, me, plus the
//! admin user-management surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{
    jwt::{TokenError, TokenIssuer},
    models::{
        Claims, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, RoleInfo,
        TokenResponse, UpdateUserRequest, User, UserResponse, DEFAULT_REGISTER_ROLE,
    },
    refresh_registry::{RedeemError, RefreshRegistry},
    user_store::UserStore,
};
use crate::errors::ApiError;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub issuer: Arc<TokenIssuer>,
    pub registry: Arc<RefreshRegistry>,
    pub password_min_length: usize,
}

impl AuthState {
    /// Issue a fresh token pair for an active user and record the refresh
    /// token. `family` is `None` for a login (new lineage) and the inherited
    /// lineage root for a rotation.
    fn issue_pair(&self, user: &User, family: Option<Uuid>) -> Result<TokenResponse, ApiError> {
        if !user.active {
            return Err(ApiError::AccountInactive);
        }

        let access = self.issuer.issue_access(user)?;
        let jti = Uuid::new_v4();
        let (refresh, expires_at) = self.issuer.issue_refresh(user.id, jti)?;
        self.registry
            .register(user.id, jti, family.unwrap_or(jti), &refresh, expires_at)?;

        Ok(TokenResponse::bearer(access, refresh))
    }
}

/// Register endpoint - POST /auth/register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    if payload.password.len() < state.password_min_length {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            state.password_min_length
        )));
    }

    if state.user_store.get_user_by_email(email)?.is_some() {
        return Err(ApiError::EmailTaken);
    }

    let user = state
        .user_store
        .create_user(email, &payload.password, &[DEFAULT_REGISTER_ROLE])?;

    info!("✅ Registered user: {}", user.email);

    Ok((StatusCode::CREATED, Json(UserResponse::from_user(&user))))
}

/// Login endpoint - POST /auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let valid = state
        .user_store
        .verify_password(&payload.email, &payload.password)?;
    if !valid {
        warn!("❌ Failed login attempt: {}", payload.email);
        return Err(ApiError::InvalidCredentials);
    }

    let user = state
        .user_store
        .get_user_by_email(&payload.email)?
        .ok_or(ApiError::InvalidCredentials)?;

    let tokens = state.issue_pair(&user, None)?;

    info!("✅ Login successful: {}", user.email);

    Ok(Json(tokens))
}

/// Refresh endpoint - POST /auth/refresh
///
/// Redeems the presented refresh token for a new pair. The old token is
/// atomically revoked; concurrent redemptions of the same token lose with
/// `TokenRevoked`.
pub async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let claims = state
        .issuer
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| match e {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Invalid => ApiError::TokenInvalidSignature,
        })?;

    let record = state
        .registry
        .consume(&payload.refresh_token)
        .map_err(|e| match e {
            RedeemError::NotFound => ApiError::TokenInvalidSignature,
            RedeemError::Revoked => ApiError::TokenRevoked,
            RedeemError::Expired => ApiError::TokenExpired,
            RedeemError::Storage(err) => err.into(),
        })?;

    // Cross-check the signed subject against the registry row.
    if record.user_id.to_string() != claims.sub {
        warn!("Refresh token subject mismatch for record {}", record.id);
        return Err(ApiError::TokenInvalidSignature);
    }

    let user = match state.user_store.get_user_by_id(&record.user_id)? {
        Some(user) if user.active => user,
        _ => {
            // The lineage is dead weight once the account is gone or frozen.
            state.registry.revoke_family(&record.family_id)?;
            return Err(ApiError::AccountInactive);
        }
    };

    // Roles are re-read here, so a role change becomes visible at the next
    // rotation at the latest.
    let tokens = state.issue_pair(&user, Some(record.family_id))?;

    Ok(Json(tokens))
}

/// Logout endpoint - POST /auth/logout (bearer access token required)
pub async fn logout(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<LogoutRequest>,
) -> Result<StatusCode, ApiError> {
    state.registry.revoke(&payload.refresh_token)?;
    info!("👋 Logout for subject {}", claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// Current-user endpoint - GET /auth/me
pub async fn me(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::TokenInvalidSignature)?;
    let user = state
        .user_store
        .get_user_by_id(&user_id)?
        .ok_or(ApiError::NotFound("User"))?;
    if !user.active {
        return Err(ApiError::AccountInactive);
    }
    Ok(Json(UserResponse::from_user(&user)))
}

/// Admin listing - GET /admin/users
pub async fn list_users(
    State(state): State<AuthState>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.user_store.list_users()?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// Admin listing - GET /admin/roles
pub async fn list_roles(State(state): State<AuthState>) -> Result<Json<Vec<RoleInfo>>, ApiError> {
    Ok(Json(state.user_store.list_roles()?))
}

/// Admin update - PUT /admin/users/:id (role assignment, activation toggle)
pub async fn update_user(
    State(state): State<AuthState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .user_store
        .get_user_by_id(&user_id)?
        .ok_or(ApiError::NotFound("User"))?;

    if let Some(roles) = &payload.roles {
        state.user_store.assign_roles(&user.id, roles)?;
        info!("Roles for {} set to {:?}", user.email, roles);
    }
    if let Some(active) = payload.active {
        state.user_store.set_active(&user.id, active)?;
        if !active {
            info!("🔒 Deactivated account {}", user.email);
        }
    }

    let updated = state
        .user_store
        .get_user_by_id(&user_id)?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(UserResponse::from_user(&updated)))
}
