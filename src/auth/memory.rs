use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::auth::repo::{StoreError, UserRepository};
use crate::auth::repo_types::{NewUser, Role, User, UserUpdate};

/// Process-local user store for development runs without `DATABASE_URL`
/// and for tests. Every operation takes the lock once, so mutations are
/// atomic and immediately visible.
#[derive(Default)]
pub struct InMemoryUserRepository {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        if inner.users.values().any(|u| u.email == new.email) {
            return Err(StoreError::EmailTaken);
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            role: new.role,
            is_active: true,
            is_approved: new.is_approved,
            approved_by: None,
            token_version: 0,
            last_login: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write();
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = update.is_active {
            user.is_active = v;
        }
        if let Some(v) = update.is_approved {
            user.is_approved = v;
        }
        if let Some(v) = update.approved_by {
            user.approved_by = Some(v);
        }
        if let Some(v) = update.last_login {
            user.last_login = Some(v);
        }
        Ok(Some(user.clone()))
    }

    async fn increment_token_version(&self, id: i64) -> Result<Option<i32>, StoreError> {
        let mut inner = self.inner.write();
        Ok(inner.users.get_mut(&id).map(|u| {
            u.token_version += 1;
            u.token_version
        }))
    }

    async fn list_pending_suppliers(&self) -> Result<Vec<User>, StoreError> {
        let mut pending: Vec<User> = self
            .inner
            .read()
            .users
            .values()
            .filter(|u| u.role == Role::Supplier && !u.is_approved)
            .cloned()
            .collect();
        pending.sort_by_key(|u| u.id);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            first_name: None,
            last_name: None,
            role,
            is_approved: role != Role::Supplier,
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_epoch_zero() {
        let repo = InMemoryUserRepository::new();
        let a = repo.create_user(new_user("a@x.io", Role::Customer)).await.unwrap();
        let b = repo.create_user(new_user("b@x.io", Role::Admin)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.token_version, 0);
        assert!(a.is_active);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let repo = InMemoryUserRepository::new();
        repo.create_user(new_user("a@x.io", Role::Customer)).await.unwrap();
        let err = repo
            .create_user(new_user("a@x.io", Role::Supplier))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));
    }

    #[tokio::test]
    async fn increment_is_visible_to_next_read() {
        let repo = InMemoryUserRepository::new();
        let u = repo.create_user(new_user("a@x.io", Role::Customer)).await.unwrap();
        assert_eq!(repo.increment_token_version(u.id).await.unwrap(), Some(1));
        assert_eq!(repo.increment_token_version(u.id).await.unwrap(), Some(2));
        let live = repo.get_user_by_id(u.id).await.unwrap().unwrap();
        assert_eq!(live.token_version, 2);
        assert_eq!(repo.increment_token_version(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_update_leaves_other_fields() {
        let repo = InMemoryUserRepository::new();
        let u = repo.create_user(new_user("s@x.io", Role::Supplier)).await.unwrap();
        let updated = repo
            .update_user(
                u.id,
                UserUpdate {
                    is_approved: Some(true),
                    approved_by: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.is_approved);
        assert!(updated.is_active);
        assert_eq!(updated.approved_by, Some(1));
        assert!(repo.update_user(404, UserUpdate::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_suppliers_excludes_approved_and_other_roles() {
        let repo = InMemoryUserRepository::new();
        let s1 = repo.create_user(new_user("s1@x.io", Role::Supplier)).await.unwrap();
        let s2 = repo.create_user(new_user("s2@x.io", Role::Supplier)).await.unwrap();
        repo.create_user(new_user("c@x.io", Role::Customer)).await.unwrap();
        repo.update_user(
            s2.id,
            UserUpdate {
                is_approved: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let pending = repo.list_pending_suppliers().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, s1.id);
    }
}
