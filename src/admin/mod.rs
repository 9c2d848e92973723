use crate::state::AppState;
use axum::Router;

pub mod handlers;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::admin_routes(state)
}
