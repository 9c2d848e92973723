use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::MessageResponse,
        extractors::AuthUser,
        guards::AccessPolicy,
        middleware::{require, PolicyState},
        repo_types::{Role, User, UserUpdate},
    },
    error::AuthError,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct PendingSuppliers {
    pub suppliers: Vec<User>,
}

#[derive(Debug, Serialize)]
pub struct SupplierApproved {
    pub message: &'static str,
    pub supplier: User,
}

#[derive(Debug, Serialize)]
pub struct UserDeactivated {
    pub message: &'static str,
    pub user: User,
}

/// Every route here requires an active admin.
pub fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/pending-suppliers", get(pending_suppliers))
        .route("/admin/approve-supplier/:id", post(approve_supplier))
        .route("/admin/deactivate-user/:id", post(deactivate_user))
        .route("/admin/revoke-tokens/:id", post(revoke_tokens))
        .route_layer(from_fn_with_state(
            PolicyState::new(state, AccessPolicy::admin()),
            require,
        ))
}

fn parse_user_id(raw: &str) -> Result<i64, AuthError> {
    raw.parse::<i64>()
        .map_err(|_| AuthError::Validation("Invalid user ID".into()))
}

#[instrument(skip_all)]
pub async fn pending_suppliers(
    State(state): State<AppState>,
) -> Result<Json<PendingSuppliers>, AuthError> {
    let suppliers = state.users.list_pending_suppliers().await?;
    Ok(Json(PendingSuppliers { suppliers }))
}

#[instrument(skip(state, admin))]
pub async fn approve_supplier(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SupplierApproved>, AuthError> {
    let id = parse_user_id(&id)?;
    let target = state
        .users
        .get_user_by_id(id)
        .await?
        .ok_or(AuthError::NotFound("User"))?;
    if target.role != Role::Supplier {
        warn!(user_id = id, role = %target.role, "approve on non-supplier");
        return Err(AuthError::Validation("User is not a supplier".into()));
    }

    let supplier = state
        .users
        .update_user(
            id,
            UserUpdate {
                is_approved: Some(true),
                approved_by: Some(admin.id),
                ..Default::default()
            },
        )
        .await?
        .ok_or(AuthError::NotFound("User"))?;

    info!(user_id = id, admin_id = admin.id, "supplier approved");
    Ok(Json(SupplierApproved {
        message: "Supplier approved successfully",
        supplier,
    }))
}

#[instrument(skip(state, admin))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserDeactivated>, AuthError> {
    let id = parse_user_id(&id)?;
    let user = state
        .users
        .update_user(
            id,
            UserUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?
        .ok_or(AuthError::NotFound("User"))?;

    info!(user_id = id, admin_id = admin.id, "user deactivated");
    Ok(Json(UserDeactivated {
        message: "User deactivated successfully",
        user,
    }))
}

#[instrument(skip(state, admin))]
pub async fn revoke_tokens(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AuthError> {
    let id = parse_user_id(&id)?;
    state.tokens.revoke(id).await?;
    info!(user_id = id, admin_id = admin.id, "tokens revoked by admin");
    Ok(Json(MessageResponse {
        message: "User tokens revoked",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_must_be_an_integer() {
        assert_eq!(parse_user_id("42").unwrap(), 42);
        assert!(matches!(parse_user_id("abc"), Err(AuthError::Validation(_))));
    }
}
