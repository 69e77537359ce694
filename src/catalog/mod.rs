//! Catalog domain: teachers, courses, reviews.

pub mod api;
pub mod store;

pub use api::CatalogState;
pub use store::CatalogStore;
