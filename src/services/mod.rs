//! Business services. Every user-facing operation takes an explicit
//! [`UserContext`] resolved by the auth layer.

pub mod carts;
pub mod catalog;
pub mod favorites;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod profiles;
pub mod reviews;
pub mod slug;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated caller on whose behalf a service call runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Uuid,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            roles: Vec::new(),
        }
    }

    pub fn with_roles(user_id: Uuid, roles: Vec<String>) -> Self {
        Self { user_id, roles }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Normalizes 1-based page numbers
pub(crate) fn page_index(page: u64) -> u64 {
    page.max(1) - 1
}
