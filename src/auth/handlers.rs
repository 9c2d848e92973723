use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest, UserEnvelope},
        extractors::{ApiJson, AuthUser},
        guards::AccessPolicy,
        middleware::{require, PolicyState},
        repo_types::{NewUser, Role, UserUpdate},
    },
    error::AuthError,
    rate_limit::{rate_limit, RouteClass},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!("invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    Ok(email)
}

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let limiters = &state.limiters;
    let authenticated = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route_layer(from_fn_with_state(
            PolicyState::new(state, AccessPolicy::authenticated()),
            require,
        ));

    Router::new()
        .route(
            "/auth/register",
            post(register).layer(from_fn_with_state(
                limiters.gate(RouteClass::Register),
                rate_limit,
            )),
        )
        .route(
            "/auth/login",
            post(login).layer(from_fn_with_state(limiters.gate(RouteClass::Login), rate_limit)),
        )
        .merge(authenticated)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let email = normalize_email(&payload.email)?;

    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if state.users.get_user_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::EmailTaken);
    }

    let role = Role::from(payload.role);
    let password_hash = state.credentials.hash(&payload.password).await?;
    let user = state
        .users
        .create_user(NewUser {
            email,
            password_hash,
            first_name: payload.first_name,
            last_name: payload.last_name,
            role,
            is_approved: role != Role::Supplier,
        })
        .await?;

    let token = state.tokens.issue(&user)?;
    let requires_approval = user.role == Role::Supplier && !user.is_approved;

    info!(user_id = user.id, email = %user.email, role = %user.role, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            user,
            token,
            requires_approval: Some(requires_approval),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let email = normalize_email(&payload.email)?;

    let Some(user) = state.users.get_user_by_email(&email).await? else {
        // Same argon2 cost as a wrong password.
        state.credentials.verify_absent(&payload.password).await?;
        warn!(email = %email, "login unknown email");
        return Err(AuthError::CredentialMismatch);
    };

    if !state
        .credentials
        .verify(&payload.password, &user.password_hash)
        .await?
    {
        warn!(user_id = user.id, "login invalid password");
        return Err(AuthError::CredentialMismatch);
    }

    if let Err(e) = AccessPolicy::authenticated().evaluate(&user) {
        warn!(user_id = user.id, reason = %e, "login refused");
        return Err(e);
    }

    let user = state
        .users
        .update_user(
            user.id,
            UserUpdate {
                last_login: Some(OffsetDateTime::now_utc()),
                ..Default::default()
            },
        )
        .await?
        .ok_or(AuthError::NotFound("User"))?;

    let token = state.tokens.issue(&user)?;

    info!(user_id = user.id, "user logged in");
    Ok(Json(AuthResponse {
        message: "Login successful",
        user,
        token,
        requires_approval: None,
    }))
}

#[instrument(skip_all)]
pub async fn me(AuthUser(user): AuthUser) -> Json<UserEnvelope> {
    Json(UserEnvelope { user })
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, AuthError> {
    state.tokens.revoke(user.id).await?;
    info!(user_id = user.id, "user logged out");
    Ok(Json(MessageResponse {
        message: "Logout successful",
    }))
}
