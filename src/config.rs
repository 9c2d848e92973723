use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Zero or negative produces tokens that are already expired.
    pub ttl_minutes: i64,
}

/// One fixed window: at most `max_requests` per `window_secs` per client.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl WindowLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub general: WindowLimit,
    pub login: WindowLimit,
    pub register: WindowLimit,
    /// Honour the first `X-Forwarded-For` hop as the client address.
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: WindowLimit {
                max_requests: 100,
                window_secs: 15 * 60,
            },
            login: WindowLimit {
                max_requests: 5,
                window_secs: 15 * 60,
            },
            register: WindowLimit {
                max_requests: 3,
                window_secs: 60 * 60,
            },
            trust_proxy: false,
        }
    }
}

/// Argon2id cost parameters and the size of the hashing worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    pub max_concurrency: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            m_cost_kib: argon2::Params::DEFAULT_M_COST,
            t_cost: argon2::Params::DEFAULT_T_COST,
            p_cost: argon2::Params::DEFAULT_P_COST,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub password: PasswordConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Upper bound on `JWT_TTL_MINUTES` in either direction (ten years).
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());

        let secret = lookup("JWT_SECRET")
            .context("JWT_SECRET must be set; refusing to start without a signing secret")?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET is empty; refusing to start without a signing secret");
        }
        let ttl_minutes: i64 = env_or(&lookup, "JWT_TTL_MINUTES", 60 * 24 * 7)?;
        if ttl_minutes.unsigned_abs() > MAX_TTL_MINUTES.unsigned_abs() {
            bail!("JWT_TTL_MINUTES must be within +/-{MAX_TTL_MINUTES}, got {ttl_minutes}");
        }
        let jwt = JwtConfig {
            secret,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "marketplace".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "marketplace-users".into()),
            ttl_minutes,
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            general: window_from_env(&lookup, "GENERAL", defaults.general)?,
            login: window_from_env(&lookup, "LOGIN", defaults.login)?,
            register: window_from_env(&lookup, "REGISTER", defaults.register)?,
            trust_proxy: env_or(&lookup, "TRUST_PROXY", false)?,
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            m_cost_kib: env_or(&lookup, "ARGON2_M_COST", defaults.m_cost_kib)?,
            t_cost: env_or(&lookup, "ARGON2_T_COST", defaults.t_cost)?,
            p_cost: env_or(&lookup, "ARGON2_P_COST", defaults.p_cost)?,
            max_concurrency: env_or(
                &lookup,
                "PASSWORD_HASH_CONCURRENCY",
                defaults.max_concurrency,
            )?,
        };
        if password.max_concurrency == 0 {
            bail!("PASSWORD_HASH_CONCURRENCY must be at least 1");
        }

        let bootstrap_admin = match (lookup("ADMIN_EMAIL"), lookup("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            _ => bail!("ADMIN_EMAIL and ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            database_url,
            jwt,
            rate_limit,
            password,
            bootstrap_admin,
        })
    }
}

fn window_from_env(
    lookup: &impl Fn(&str) -> Option<String>,
    class: &str,
    default: WindowLimit,
) -> anyhow::Result<WindowLimit> {
    Ok(WindowLimit {
        max_requests: env_or(lookup, &format!("RATE_LIMIT_{class}_MAX"), default.max_requests)?,
        window_secs: env_or(
            lookup,
            &format!("RATE_LIMIT_{class}_WINDOW_SECS"),
            default.window_secs,
        )?,
    })
}

/// Reads `key`, falling back to `default` when unset. A set but unparsable
/// value is an error rather than a silent fallback.
fn env_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        None => Ok(default),
    }
}
