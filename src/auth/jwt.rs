use std::sync::Arc;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use super::{claims::TokenPayload, repo::UserRepository, repo_types::User};
use crate::{config::JwtConfig, error::AuthError};

/// Why a token failed structural verification. Revocation is decided later,
/// against the live user record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("expired token")]
    Expired,
}

/// Issues, verifies and revokes bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    users: Arc<dyn UserRepository>,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig, users: Arc<dyn UserRepository>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::seconds(cfg.ttl_minutes.saturating_mul(60)),
            users,
        }
    }

    /// Signs a token for `user` under its current revocation epoch.
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let payload = TokenPayload {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            token_version: user.token_version,
            iat: now.unix_timestamp(),
            exp: now
                .checked_add(self.ttl)
                .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("token expiry out of range")))?
                .unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &payload, &self.encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("jwt encode: {e}")))?;
        debug!(user_id = user.id, token_version = user.token_version, "jwt signed");
        Ok(token)
    }

    /// Signature, issuer, audience and expiry only.
    pub fn verify(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.leeway = 0;

        let data = decode::<TokenPayload>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        // The library accepts exp == now; a token is only valid strictly before exp.
        if OffsetDateTime::now_utc().unix_timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        debug!(user_id = data.claims.user_id, "jwt verified");
        Ok(data.claims)
    }

    /// Invalidates every token issued to `user_id` so far.
    pub async fn revoke(&self, user_id: i64) -> Result<(), AuthError> {
        match self.users.increment_token_version(user_id).await? {
            Some(version) => {
                info!(user_id, token_version = version, "tokens revoked");
                Ok(())
            }
            None => Err(AuthError::NotFound("User")),
        }
    }
}
