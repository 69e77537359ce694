//! Authentication: token lifecycle, credential store, and authorization gate.

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod refresh_registry;
pub mod user_store;

pub use api::AuthState;
pub use jwt::TokenIssuer;
pub use middleware::{auth_middleware, optional_auth_middleware};
pub use refresh_registry::RefreshRegistry;
pub use user_store::UserStore;
