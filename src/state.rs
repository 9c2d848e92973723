use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::auth::{
    jwt::TokenService,
    memory::InMemoryUserRepository,
    password::CredentialStore,
    repo::{PgUserRepository, UserRepository},
    repo_types::{NewUser, Role},
};
use crate::config::AppConfig;
use crate::rate_limit::RateLimiters;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: TokenService,
    pub credentials: CredentialStore,
    pub limiters: RateLimiters,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserRepository> = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgUserRepository::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory user store, data is lost on restart");
                Arc::new(InMemoryUserRepository::new())
            }
        };

        let state = Self::from_parts(config, users)?;
        state.ensure_bootstrap_admin().await?;
        Ok(state)
    }

    pub fn from_parts(config: Arc<AppConfig>, users: Arc<dyn UserRepository>) -> anyhow::Result<Self> {
        let credentials = CredentialStore::new(&config.password)?;
        let tokens = TokenService::new(&config.jwt, users.clone());
        let limiters = RateLimiters::new(&config.rate_limit);
        Ok(Self {
            config,
            users,
            tokens,
            credentials,
            limiters,
        })
    }

    /// Creates the configured admin account if no user holds that email yet.
    async fn ensure_bootstrap_admin(&self) -> anyhow::Result<()> {
        let Some(admin) = &self.config.bootstrap_admin else {
            return Ok(());
        };
        let email = admin.email.trim().to_lowercase();
        if self.users.get_user_by_email(&email).await?.is_some() {
            return Ok(());
        }
        let password_hash = self.credentials.hash(&admin.password).await?;
        let user = self
            .users
            .create_user(NewUser {
                email,
                password_hash,
                first_name: None,
                last_name: None,
                role: Role::Admin,
                is_approved: true,
            })
            .await?;
        info!(user_id = user.id, email = %user.email, "bootstrap admin created");
        Ok(())
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state with cheap hashing and a fixed secret.
    pub fn fake() -> Self {
        Self::fake_with(|_| {})
    }

    pub fn fake_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        use crate::config::{JwtConfig, PasswordConfig, RateLimitConfig};

        let mut config = AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 60,
            },
            rate_limit: RateLimitConfig::default(),
            password: PasswordConfig {
                m_cost_kib: 1024,
                t_cost: 1,
                p_cost: 1,
                max_concurrency: 2,
            },
            bootstrap_admin: None,
        };
        tweak(&mut config);
        Self::from_parts(Arc::new(config), Arc::new(InMemoryUserRepository::new()))
            .expect("fake state")
    }
}
