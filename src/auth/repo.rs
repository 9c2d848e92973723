use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::auth::repo_types::{NewUser, Role, User, UserRow, UserUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("corrupt user record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence for user accounts.
///
/// Mutations must be durable and visible to the next read from any request
/// before they return.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// `email` must already be normalized (trimmed, lower-case).
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    /// Returns `None` when no user has this id.
    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<Option<User>, StoreError>;

    /// Atomically bumps the revocation epoch, returning the new value.
    async fn increment_token_version(&self, id: i64) -> Result<Option<i32>, StoreError>;

    async fn list_pending_suppliers(&self) -> Result<Vec<User>, StoreError>;
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, is_active, \
     is_approved, approved_by, token_version, last_login, created_at";

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    let id = row.id;
    User::try_from(row).map_err(|reason| StoreError::Corrupt { id, reason })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, role, is_approved)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.role.as_str())
        .bind(new.is_approved)
        .fetch_one(&self.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::EmailTaken
            } else {
                StoreError::Database(e)
            }
        })?;
        into_user(row)
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET is_active = COALESCE($2, is_active),
                is_approved = COALESCE($3, is_approved),
                approved_by = COALESCE($4, approved_by),
                last_login = COALESCE($5, last_login)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.is_active)
        .bind(update.is_approved)
        .bind(update.approved_by)
        .bind(update.last_login)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn increment_token_version(&self, id: i64) -> Result<Option<i32>, StoreError> {
        let version = sqlx::query_scalar::<_, i32>(
            "UPDATE users SET token_version = token_version + 1 WHERE id = $1 RETURNING token_version",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(version)
    }

    async fn list_pending_suppliers(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = $1 AND is_approved = FALSE ORDER BY created_at"
        ))
        .bind(Role::Supplier.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_user).collect()
    }
}
