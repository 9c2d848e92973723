use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub mod extractors;
pub mod guards;
pub mod handlers;
pub mod jwt;
pub mod memory;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod repo_types;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::auth_routes(state)
}
