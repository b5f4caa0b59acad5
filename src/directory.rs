//! Read-only lookups against the hosted record store: organizations by slug
//! and role rows by user.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DirectoryError;
use crate::identity::RoleAssignment;

/// A tenant. Resolved by the slug in the first path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub subscription_plan: Option<String>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub max_branches: Option<i64>,
    pub status: String,
}

impl Organization {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Organization>, DirectoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Organization>, DirectoryError>;

    /// Known tenants, for the development tenant switcher.
    async fn list(&self, limit: usize) -> Result<Vec<Organization>, DirectoryError>;
}

#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn roles_for(&self, user_id: &str) -> Result<Vec<RoleAssignment>, DirectoryError>;

    /// Forget anything remembered about `user_id`'s roles.
    async fn invalidate(&self, _user_id: &str) {}
}

/// In-memory directory fed from the `directory` config section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticDirectory {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub roles: Vec<RoleAssignment>,
}

#[async_trait]
impl OrganizationDirectory for StaticDirectory {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Organization>, DirectoryError> {
        Ok(self.organizations.iter().find(|o| o.slug == slug).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Organization>, DirectoryError> {
        Ok(self.organizations.iter().find(|o| o.id == id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Organization>, DirectoryError> {
        Ok(self.organizations.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl RoleDirectory for StaticDirectory {
    async fn roles_for(&self, user_id: &str) -> Result<Vec<RoleAssignment>, DirectoryError> {
        Ok(self
            .roles
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Caches slug and role lookups so concurrent navigations share a single
/// request per key. Misses are cached; errors are not.
pub struct CachedDirectory<D> {
    inner: Arc<D>,
    by_slug: Cache<String, Option<Organization>>,
    roles: Cache<String, Arc<Vec<RoleAssignment>>>,
}

impl<D> CachedDirectory<D>
where
    D: OrganizationDirectory + RoleDirectory + 'static,
{
    pub fn new(inner: Arc<D>, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            by_slug: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            roles: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl<D> OrganizationDirectory for CachedDirectory<D>
where
    D: OrganizationDirectory + RoleDirectory + 'static,
{
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Organization>, DirectoryError> {
        let inner = Arc::clone(&self.inner);
        let key = slug.to_string();
        self.by_slug
            .try_get_with(key.clone(), async move { inner.find_by_slug(&key).await })
            .await
            .map_err(|e| (*e).clone())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Organization>, DirectoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Organization>, DirectoryError> {
        self.inner.list(limit).await
    }
}

#[async_trait]
impl<D> RoleDirectory for CachedDirectory<D>
where
    D: OrganizationDirectory + RoleDirectory + 'static,
{
    async fn roles_for(&self, user_id: &str) -> Result<Vec<RoleAssignment>, DirectoryError> {
        let inner = Arc::clone(&self.inner);
        let key = user_id.to_string();
        let rows = self
            .roles
            .try_get_with(key.clone(), async move {
                inner.roles_for(&key).await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())?;
        Ok(rows.as_ref().clone())
    }

    /// Drop cached role rows for a user, e.g. when they sign in again.
    async fn invalidate(&self, user_id: &str) {
        self.roles.invalidate(user_id).await;
    }
}
