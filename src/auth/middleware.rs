use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::{extractors::AuthUser, guards::AccessPolicy, jwt::TokenError, repo_types::User};
use crate::{error::AuthError, state::AppState};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolves the request's bearer token to the live user record.
///
/// Every call reads the user from storage: the token alone cannot show
/// whether it was revoked.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;

    let payload = state.tokens.verify(token).map_err(|e| {
        match e {
            TokenError::Expired => warn!("rejected expired token"),
            TokenError::Malformed => warn!("rejected malformed token"),
        }
        AuthError::InvalidToken
    })?;

    let user = match state.users.get_user_by_id(payload.user_id).await? {
        Some(u) if u.token_version == payload.token_version => u,
        Some(u) => {
            warn!(
                user_id = u.id,
                token_version = payload.token_version,
                current_version = u.token_version,
                "rejected revoked token"
            );
            return Err(AuthError::Revoked);
        }
        None => {
            warn!(user_id = payload.user_id, "token for unknown user");
            return Err(AuthError::Revoked);
        }
    };
    Ok(user)
}

/// Middleware state: the app plus the policy guarding this group of routes.
#[derive(Clone)]
pub struct PolicyState {
    pub app: AppState,
    pub policy: AccessPolicy,
}

impl PolicyState {
    pub fn new(app: &AppState, policy: AccessPolicy) -> Self {
        Self {
            app: app.clone(),
            policy,
        }
    }
}

/// Authenticates, runs the guard pipeline, then exposes [`AuthUser`] to handlers.
pub async fn require(
    State(guarded): State<PolicyState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match authenticate(&guarded.app, request.headers()).await {
        Ok(u) => u,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = guarded.policy.evaluate(&user) {
        warn!(user_id = user.id, role = %user.role, reason = %e, "access denied");
        return e.into_response();
    }
    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::{NewUser, Role, UserUpdate};
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    async fn seeded(role: Role, is_approved: bool) -> (AppState, User) {
        let state = AppState::fake();
        let user = state
            .users
            .create_user(NewUser {
                email: format!("{role}@shop.io"),
                password_hash: "x".into(),
                first_name: None,
                last_name: None,
                role,
                is_approved,
            })
            .await
            .unwrap();
        (state, user)
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn missing_header_is_missing_credentials() {
        let (state, _) = seeded(Role::Customer, true).await;
        let err = authenticate(&state, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let (state, _) = seeded(Role::Customer, true).await;
        let err = authenticate(&state, &headers_with("Bearer nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn valid_token_resolves_live_user() {
        let (state, user) = seeded(Role::Customer, true).await;
        let token = state.tokens.issue(&user).unwrap();
        let resolved = authenticate(&state, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_despite_valid_signature() {
        let (state, user) = seeded(Role::Customer, true).await;
        let token = state.tokens.issue(&user).unwrap();
        state.tokens.revoke(user.id).await.unwrap();

        assert!(state.tokens.verify(&token).is_ok());
        let err = authenticate(&state, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Revoked));

        let fresh = state.users.get_user_by_id(user.id).await.unwrap().unwrap();
        let new_token = state.tokens.issue(&fresh).unwrap();
        assert!(authenticate(&state, &headers_with(&format!("Bearer {new_token}")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn supplier_token_works_once_approved() {
        let (state, user) = seeded(Role::Supplier, false).await;
        let token = state.tokens.issue(&user).unwrap();
        let headers = headers_with(&format!("Bearer {token}"));
        let policy = AccessPolicy::authenticated();

        let live = authenticate(&state, &headers).await.unwrap();
        assert!(matches!(policy.evaluate(&live), Err(AuthError::PendingApproval)));

        state
            .users
            .update_user(
                user.id,
                UserUpdate {
                    is_approved: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let live = authenticate(&state, &headers).await.unwrap();
        assert!(policy.evaluate(&live).is_ok());
    }
}
