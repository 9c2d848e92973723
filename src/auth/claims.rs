use serde::{Deserialize, Serialize};

use super::repo_types::Role;

/// JWT payload carried by every bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPayload {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    pub token_version: i32, // revocation epoch at issuance
    pub iat: i64,           // issued at (unix timestamp)
    pub exp: i64,           // expires at (unix timestamp)
    pub iss: String,        // issuer
    pub aud: String,        // audience
}
