//! Multi-tenant hierarchical file store: per-user node trees over a local
//! blob store, with on-demand thumbnails and public share links.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;

/// The full application router with state attached.
pub fn app(state: state::AppState) -> Router {
    routes::routes::routes().with_state(state)
}
