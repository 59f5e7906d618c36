use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod model;
pub mod repo;
pub mod repo_mongo;
pub mod repo_sql;
pub mod services;

/// Admin-only user management.
pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::admin_routes())
}
