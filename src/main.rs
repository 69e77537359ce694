//! ProfRate API server entry point.

use std::{env, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use profrate_backend::{
    auth::{models::Role, AuthState, RefreshRegistry, TokenIssuer, UserStore},
    catalog::{CatalogState, CatalogStore},
    config::AuthConfig,
    moderation::LocalModerationClient,
    server::{build_router, AppContext},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 ProfRate backend starting");

    let cfg = AuthConfig::from_env();

    let auth_db_path = env::var("AUTH_DB_PATH").unwrap_or_else(|_| "profrate_auth.db".to_string());
    let catalog_db_path =
        env::var("CATALOG_DB_PATH").unwrap_or_else(|_| "profrate_catalog.db".to_string());

    let user_store = Arc::new(UserStore::new(&auth_db_path)?);
    let issuer = Arc::new(TokenIssuer::new(&cfg));
    let registry = Arc::new(RefreshRegistry::new(
        &auth_db_path,
        cfg.max_sessions_per_user,
        cfg.revoke_family_on_reuse,
    )?);
    info!("🔐 Auth stores initialized at: {auth_db_path}");

    bootstrap_admin(&user_store)?;

    let pruned = registry.prune_expired()?;
    if pruned > 0 {
        info!("🧹 Pruned {pruned} expired refresh tokens");
    }

    let catalog_store = Arc::new(CatalogStore::new(&catalog_db_path)?);
    info!("📚 Catalog store initialized at: {catalog_db_path}");

    let ctx = AppContext {
        auth: AuthState {
            user_store,
            issuer: issuer.clone(),
            registry,
            password_min_length: cfg.password_min_length,
        },
        catalog: CatalogState {
            store: catalog_store,
            moderation: Arc::new(LocalModerationClient::default()),
        },
        issuer,
    };

    let app = build_router(ctx);

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {addr}");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Create the initial admin account when `ADMIN_EMAIL`/`ADMIN_PASSWORD` are
/// set and the account does not exist yet. Registration only ever grants the
/// viewer role, so the first admin has to come from somewhere.
fn bootstrap_admin(user_store: &UserStore) -> Result<()> {
    let (Ok(email), Ok(password)) = (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) else {
        return Ok(());
    };
    if user_store.get_user_by_email(&email)?.is_some() {
        return Ok(());
    }
    user_store.create_user(&email, &password, &[Role::Admin])?;
    info!("👑 Bootstrapped admin account: {email}");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profrate_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
