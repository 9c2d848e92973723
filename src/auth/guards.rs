//! Account and role checks applied to an authenticated user.
//!
//! Guards are pure: no IO, no panics. The live user record has already been
//! loaded and its revocation epoch checked by the time they run.

use std::sync::Arc;

use super::repo_types::{Role, User};
use crate::error::AuthError;

#[derive(Debug)]
pub enum Decision {
    Allow,
    Deny(AuthError),
}

pub trait Guard: Send + Sync {
    fn evaluate(&self, user: &User) -> Decision;
}

/// Deactivated accounts are blocked permanently.
pub struct ActiveAccountGuard;

impl Guard for ActiveAccountGuard {
    fn evaluate(&self, user: &User) -> Decision {
        if user.is_active {
            Decision::Allow
        } else {
            Decision::Deny(AuthError::Deactivated)
        }
    }
}

/// Suppliers stay blocked until an admin approves them.
pub struct SupplierApprovalGuard;

impl Guard for SupplierApprovalGuard {
    fn evaluate(&self, user: &User) -> Decision {
        if user.role == Role::Supplier && !user.is_approved {
            Decision::Deny(AuthError::PendingApproval)
        } else {
            Decision::Allow
        }
    }
}

pub struct RoleGuard {
    allowed: Vec<Role>,
}

impl RoleGuard {
    pub fn new(allowed: &[Role]) -> Self {
        Self {
            allowed: allowed.to_vec(),
        }
    }
}

impl Guard for RoleGuard {
    fn evaluate(&self, user: &User) -> Decision {
        if self.allowed.contains(&user.role) {
            Decision::Allow
        } else {
            Decision::Deny(AuthError::Forbidden)
        }
    }
}

/// Ordered guard pipeline; the first denial wins.
#[derive(Clone)]
pub struct AccessPolicy {
    guards: Arc<Vec<Box<dyn Guard>>>,
}

impl AccessPolicy {
    fn account_guards() -> Vec<Box<dyn Guard>> {
        vec![Box::new(ActiveAccountGuard), Box::new(SupplierApprovalGuard)]
    }

    /// Any active, approved account.
    pub fn authenticated() -> Self {
        Self {
            guards: Arc::new(Self::account_guards()),
        }
    }

    /// Account checks followed by role membership in `allowed`.
    pub fn roles(allowed: &[Role]) -> Self {
        let mut guards = Self::account_guards();
        guards.push(Box::new(RoleGuard::new(allowed)));
        Self {
            guards: Arc::new(guards),
        }
    }

    pub fn admin() -> Self {
        Self::roles(&[Role::Admin])
    }

    pub fn evaluate(&self, user: &User) -> Result<(), AuthError> {
        for guard in self.guards.iter() {
            if let Decision::Deny(reason) = guard.evaluate(user) {
                return Err(reason);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_user(role: Role) -> User {
    User {
        id: 1,
        email: "someone@shop.io".into(),
        password_hash: String::new(),
        first_name: None,
        last_name: None,
        role,
        is_active: true,
        is_approved: true,
        approved_by: None,
        token_version: 0,
        last_login: None,
        created_at: time::OffsetDateTime::UNIX_EPOCH,
    }
}
