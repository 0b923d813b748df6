//! Shared permit pools for one install run

use crate::limits::{IntoResourceLimits, ResourceAvailability, ResourceLimits};
use crate::semaphore::{acquire_semaphore_permit, create_semaphore};
use nmx_errors::Error;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Owner of the build, link and fetch semaphores
#[derive(Debug, Clone)]
pub struct ResourceManager {
    limits: ResourceLimits,
    build: Arc<Semaphore>,
    link: Arc<Semaphore>,
    fetch: Arc<Semaphore>,
}

impl ResourceManager {
    #[must_use]
    pub fn new(limits: impl IntoResourceLimits) -> Self {
        let limits = limits.into_resource_limits();
        Self {
            build: create_semaphore(limits.concurrent_builds),
            link: create_semaphore(limits.concurrent_links),
            fetch: create_semaphore(limits.concurrent_fetches),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Semaphore bounding lifecycle builds
    #[must_use]
    pub fn build_semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.build)
    }

    /// Semaphore bounding symlink creation
    #[must_use]
    pub fn link_semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.link)
    }

    /// Semaphore bounding fetch and import
    #[must_use]
    pub fn fetch_semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.fetch)
    }

    /// # Errors
    ///
    /// Returns an error if the semaphore has been closed.
    pub async fn acquire_build_permit(&self) -> Result<OwnedSemaphorePermit, Error> {
        acquire_semaphore_permit(self.build_semaphore(), "build").await
    }

    /// # Errors
    ///
    /// Returns an error if the semaphore has been closed.
    pub async fn acquire_link_permit(&self) -> Result<OwnedSemaphorePermit, Error> {
        acquire_semaphore_permit(self.link_semaphore(), "link").await
    }

    /// # Errors
    ///
    /// Returns an error if the semaphore has been closed.
    pub async fn acquire_fetch_permit(&self) -> Result<OwnedSemaphorePermit, Error> {
        acquire_semaphore_permit(self.fetch_semaphore(), "fetch").await
    }

    /// Currently available permits
    #[must_use]
    pub fn availability(&self) -> ResourceAvailability {
        ResourceAvailability {
            build: self.build.available_permits(),
            link: self.link.available_permits(),
            fetch: self.fetch.available_permits(),
        }
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::try_acquire_semaphore_permit;

    #[tokio::test]
    async fn test_permits_are_returned_on_drop() {
        let manager = ResourceManager::new(ResourceLimits::for_testing());
        let limits = manager.limits().clone();

        let first = manager.acquire_build_permit().await.unwrap();
        let second = manager.acquire_build_permit().await.unwrap();
        assert_eq!(manager.availability().build, 0);
        assert!(try_acquire_semaphore_permit(&manager.build_semaphore())
            .unwrap()
            .is_none());

        drop(first);
        drop(second);
        assert!(manager.availability().all_available(&limits));
    }

    #[tokio::test]
    async fn test_closed_semaphore_is_a_concurrency_error() {
        let manager = ResourceManager::default();
        manager.link_semaphore().close();
        let err = manager.acquire_link_permit().await.unwrap_err();
        assert!(err.to_string().contains("link"));
    }

    #[test]
    fn test_limits_from_config() {
        let mut config = nmx_config::Config::default();
        config.build.child_concurrency = 3;
        let manager = ResourceManager::new(&config);
        assert_eq!(manager.limits().concurrent_builds, 3);
        assert_eq!(manager.limits().concurrent_links, 32);
    }
}
