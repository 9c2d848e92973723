use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{error, warn};

use crate::{config::PasswordConfig, error::AuthError};

/// Argon2id hashing on tokio's blocking pool, with at most
/// `max_concurrency` computations in flight.
#[derive(Clone)]
pub struct CredentialStore {
    params: Params,
    permits: Arc<Semaphore>,
    decoy: Arc<OnceCell<String>>,
}

impl CredentialStore {
    pub fn new(cfg: &PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.m_cost_kib, cfg.t_cost, cfg.p_cost, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self {
            params,
            permits: Arc::new(Semaphore::new(cfg.max_concurrency.max(1))),
            decoy: Arc::new(OnceCell::new()),
        })
    }

    /// Owned by the blocking task until the argon2 work ends, even if the
    /// awaiting request is dropped.
    async fn permit(&self) -> anyhow::Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .context("password worker pool closed")
    }

    /// Salted one-way digest in PHC string format.
    pub async fn hash(&self, plain: &str) -> Result<String, AuthError> {
        let plain = plain.to_owned();
        let params = self.params.clone();
        let permit = self.permit().await?;

        let hashed = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let salt = SaltString::generate(&mut OsRng);
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(plain.as_bytes(), &salt)
                .map(|h| h.to_string())
        })
        .await
        .context("password hashing task failed")?;

        hashed.map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AuthError::Internal(anyhow::anyhow!("argon2 hash_password: {e}"))
        })
    }

    /// `Ok(false)` on mismatch and on a digest that does not parse.
    pub async fn verify(&self, plain: &str, digest: &str) -> Result<bool, AuthError> {
        let plain = plain.to_owned();
        let digest = digest.to_owned();
        let permit = self.permit().await?;

        let ok = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let parsed = match PasswordHash::new(&digest) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "stored password digest is malformed");
                    return false;
                }
            };
            // Cost parameters are read back from the digest itself.
            Argon2::default()
                .verify_password(plain.as_bytes(), &parsed)
                .is_ok()
        })
        .await
        .context("password verification task failed")?;
        Ok(ok)
    }

    /// Spends the same argon2 work as [`Self::verify`] for an account that
    /// does not exist, then reports a mismatch.
    pub async fn verify_absent(&self, plain: &str) -> Result<bool, AuthError> {
        let decoy = self
            .decoy
            .get_or_try_init(|| self.hash("decoy-password-for-unknown-accounts"))
            .await?;
        self.verify(plain, decoy).await?;
        Ok(false)
    }
}

#[cfg(test)]
impl CredentialStore {
    pub(crate) fn decoy_ready(&self) -> bool {
        self.decoy.initialized()
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> CredentialStore {
    CredentialStore::new(&PasswordConfig {
        m_cost_kib: 1024,
        t_cost: 1,
        p_cost: 1,
        max_concurrency: 2,
    })
    .expect("cheap argon2 params")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify_roundtrip() {
        let store = test_store();
        let password = "Secur3P@ssw0rd!";
        let hash = store.hash(password).await.expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(store.verify(password, &hash).await.expect("verify should succeed"));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let store = test_store();
        let hash = store.hash("correct-horse-battery-staple").await.unwrap();
        assert!(!store.verify("wrong-password", &hash).await.expect("verify should not error"));
    }

    #[tokio::test]
    async fn same_password_hashes_differently() {
        let store = test_store();
        let a = store.hash("repeat-me-please").await.unwrap();
        let b = store.hash("repeat-me-please").await.unwrap();
        assert_ne!(a, b);
        assert!(store.verify("repeat-me-please", &a).await.unwrap());
        assert!(store.verify("repeat-me-please", &b).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_digest_is_a_mismatch_not_an_error() {
        let store = test_store();
        let ok = store
            .verify("anything", "not-a-valid-hash")
            .await
            .expect("malformed digest must not error");
        assert!(!ok);
    }

    #[tokio::test]
    async fn absent_account_never_matches_and_reuses_decoy() {
        let store = test_store();
        assert!(!store.verify_absent("decoy-password-for-unknown-accounts").await.unwrap());
        let first = store.decoy.get().cloned().expect("decoy built");
        assert!(!store.verify_absent("anything").await.unwrap());
        assert_eq!(store.decoy.get(), Some(&first));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn permit_outlives_a_dropped_caller() {
        let store = CredentialStore::new(&PasswordConfig {
            m_cost_kib: 64 * 1024,
            t_cost: 3,
            p_cost: 1,
            max_concurrency: 1,
        })
        .unwrap();

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.hash("slow-enough-to-abort").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task.abort();
        let _ = task.await;
        assert_eq!(store.permits.available_permits(), 0);

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
        while store.permits.available_permits() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "permit never released");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn invalid_params_are_rejected() {
        let err = CredentialStore::new(&PasswordConfig {
            m_cost_kib: 1,
            t_cost: 0,
            p_cost: 1,
            max_concurrency: 1,
        });
        assert!(err.is_err());
    }
}
