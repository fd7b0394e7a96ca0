//! User directory adapter
//!
//! The directory is owned by another service. The ledger only needs
//! `resolve_role`, and role strings are parsed here, at the boundary, so the
//! engine never sees anything but [`Role`].

use crate::{
    types::{Identity, Role, UserId},
    Error, Result,
};
use async_trait::async_trait;
use dashmap::DashMap;

/// Resolves a caller to a role
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up a user, `NotFound` if unknown
    async fn resolve_role(&self, id: UserId) -> Result<Identity>;
}

/// In-memory directory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: DashMap<UserId, Role>,
}

impl MemoryDirectory {
    /// Create empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with a typed role
    pub fn insert(&self, id: UserId, role: Role) {
        self.users.insert(id, role);
    }

    /// Register a user from a raw directory record.
    ///
    /// Unrecognized role strings are rejected and nothing is stored.
    pub fn insert_raw(&self, id: i64, role: &str) -> Result<Identity> {
        let id = UserId::new(id);
        id.validate()?;
        let role: Role = role.parse()?;
        self.users.insert(id, role);
        Ok(Identity { id, role })
    }

    /// Number of users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn resolve_role(&self, id: UserId) -> Result<Identity> {
        self.users
            .get(&id)
            .map(|entry| Identity {
                id,
                role: *entry.value(),
            })
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_known_user() {
        let directory = MemoryDirectory::new();
        directory.insert(UserId::new(1), Role::Teacher);

        let identity = directory.resolve_role(UserId::new(1)).await.unwrap();
        assert_eq!(identity.role, Role::Teacher);
    }

    #[tokio::test]
    async fn test_resolve_unknown_user() {
        let directory = MemoryDirectory::new();
        let err = directory.resolve_role(UserId::new(9)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_insert_raw_rejects_unknown_role() {
        let directory = MemoryDirectory::new();

        let identity = directory.insert_raw(5, "student").unwrap();
        assert_eq!(identity.role, Role::Student);

        assert!(directory.insert_raw(6, "principal").is_err());
        assert!(directory.insert_raw(0, "student").is_err());
        assert_eq!(directory.len(), 1);
    }
}
