//! Capability checks for privileged fund operations.

use crate::core::asset::Account;
use crate::core::error::{FundError, FundResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May unpause at any time.
    Admin,
    /// May pause and rebalance.
    FundManager,
    /// May replace the constituent set.
    Rebalancer,
}

/// Answers whether an account holds a role. Injected into each fund.
pub trait AccessPolicy: Send + Sync {
    fn has_role(&self, account: &Account, role: Role) -> bool;
}

/// In-memory role table.
#[derive(Debug, Default, Clone)]
pub struct RoleRegistry {
    grants: HashMap<Role, HashSet<Account>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, role: Role, account: Account) -> &mut Self {
        self.grants.entry(role).or_default().insert(account);
        self
    }

    pub fn revoke(&mut self, role: Role, account: &Account) {
        if let Some(accounts) = self.grants.get_mut(&role) {
            accounts.remove(account);
        }
    }
}

impl AccessPolicy for RoleRegistry {
    fn has_role(&self, account: &Account, role: Role) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|accounts| accounts.contains(account))
    }
}

/// Managers and admins may drive pause and rebalance operations.
pub fn require_manager(policy: &dyn AccessPolicy, caller: &Account) -> FundResult<()> {
    if policy.has_role(caller, Role::FundManager) || policy.has_role(caller, Role::Admin) {
        Ok(())
    } else {
        Err(FundError::Unauthorized(caller.to_string()))
    }
}

pub fn require_rebalancer(policy: &dyn AccessPolicy, caller: &Account) -> FundResult<()> {
    if policy.has_role(caller, Role::Rebalancer) {
        Ok(())
    } else {
        Err(FundError::NotRebalancer(caller.to_string()))
    }
}
