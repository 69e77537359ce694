//! Consumer-side session handling: durable token storage and an HTTP client
//! that refreshes expired access tokens transparently.

pub mod client;
pub mod storage;

pub use client::{SessionClient, SessionError, SessionState};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
