//! HTTP surface assembly.
//!
//! Three auth postures, three routers:
//!   - public auth endpoints (register/login/refresh) with no token checks,
//!   - strictly authenticated endpoints (logout/me and the /admin surface,
//!     the latter additionally behind the admin role gate),
//!   - the catalog surface under optional auth, where reads are anonymous
//!     and mutations gate per handler.

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::{self, Next},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{
    api as auth_api,
    middleware::{auth_middleware, optional_auth_middleware, require_roles, ADMIN_ONLY},
    AuthState, TokenIssuer,
};
use crate::catalog::{api as catalog_api, CatalogState};

#[derive(Clone)]
pub struct AppContext {
    pub auth: AuthState,
    pub catalog: CatalogState,
    pub issuer: Arc<TokenIssuer>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn build_router(ctx: AppContext) -> Router {
    let auth_public = Router::new()
        .route("/auth/register", post(auth_api::register))
        .route("/auth/login", post(auth_api::login))
        .route("/auth/refresh", post(auth_api::refresh))
        .with_state(ctx.auth.clone());

    let auth_protected = Router::new()
        .route("/auth/logout", post(auth_api::logout))
        .route("/auth/me", get(auth_api::me))
        .route_layer(middleware::from_fn_with_state(
            ctx.issuer.clone(),
            auth_middleware,
        ))
        .with_state(ctx.auth.clone());

    // Layer order matters: `auth_middleware` is added last so it runs first
    // and populates the claims the role gate reads.
    let admin_routes = Router::new()
        .route("/admin/users", get(auth_api::list_users))
        .route("/admin/users/:id", put(auth_api::update_user))
        .route("/admin/roles", get(auth_api::list_roles))
        .route_layer(middleware::from_fn(|req: Request, next: Next| {
            require_roles(ADMIN_ONLY, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(
            ctx.issuer.clone(),
            auth_middleware,
        ))
        .with_state(ctx.auth);

    // One router for the whole catalog so every route sees the same optional
    // auth layer; handlers decide what the anonymous case may do.
    let catalog_routes = Router::new()
        .route(
            "/api/teachers",
            get(catalog_api::list_teachers).post(catalog_api::create_teacher),
        )
        .route(
            "/api/teachers/:id",
            get(catalog_api::get_teacher)
                .put(catalog_api::update_teacher)
                .delete(catalog_api::delete_teacher),
        )
        .route(
            "/api/teachers/:id/reviews",
            get(catalog_api::list_teacher_reviews),
        )
        .route(
            "/api/courses",
            get(catalog_api::list_courses).post(catalog_api::create_course),
        )
        .route(
            "/api/courses/:id",
            get(catalog_api::get_course)
                .put(catalog_api::update_course)
                .delete(catalog_api::delete_course),
        )
        .route(
            "/api/reviews",
            get(catalog_api::list_reviews).post(catalog_api::create_review),
        )
        .route("/api/reviews/moderate", post(catalog_api::moderate_review))
        .route(
            "/api/reviews/:id",
            put(catalog_api::update_review).delete(catalog_api::delete_review),
        )
        .route_layer(middleware::from_fn_with_state(
            ctx.issuer,
            optional_auth_middleware,
        ))
        .with_state(ctx.catalog);

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_public)
        .merge(auth_protected)
        .merge(admin_routes)
        .merge(catalog_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
