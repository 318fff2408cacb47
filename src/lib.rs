//! Storefront
//!
//! Self-hosted cart and catalog service.
//!
//! ## Features
//! - Product catalog with category, price-range and name filters
//! - Per-user shopping cart with merge-on-add and reduce-quantity semantics
//! - Read-time cart totals in exact decimal arithmetic
//! - Token-resolved callers with owner/staff roles

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod users;

pub use error::{AppError, Result};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
}
