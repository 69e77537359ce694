//! ProfRate backend: teacher/course review catalog behind a JWT token
//! lifecycle with rotating, single-use refresh tokens.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod moderation;
pub mod server;
pub mod session;
