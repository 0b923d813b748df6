//! Resource limit configuration and availability tracking

use nmx_config::Config;
use serde::{Deserialize, Serialize};

/// Resource limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of lifecycle builds running at once
    pub concurrent_builds: usize,
    /// Maximum number of in-flight symlink operations
    pub concurrent_links: usize,
    /// Maximum number of concurrent fetch/import operations
    pub concurrent_fetches: usize,
}

impl ResourceLimits {
    /// Create resource limits for testing (lower limits)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            concurrent_builds: 2,
            concurrent_links: 4,
            concurrent_fetches: 2,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            concurrent_builds: 4,
            concurrent_links: 32,
            concurrent_fetches: 16,
        }
    }
}

/// Trait for converting configurations to resource limits
pub trait IntoResourceLimits {
    /// Convert this configuration into `ResourceLimits`
    fn into_resource_limits(self) -> ResourceLimits;
}

impl IntoResourceLimits for &Config {
    fn into_resource_limits(self) -> ResourceLimits {
        ResourceLimits {
            concurrent_builds: self.build.child_concurrency.max(1),
            concurrent_links: self.resources.link_concurrency.max(1),
            concurrent_fetches: self.resources.fetch_concurrency.max(1),
        }
    }
}

impl IntoResourceLimits for ResourceLimits {
    fn into_resource_limits(self) -> ResourceLimits {
        self
    }
}

/// Resource availability information
#[derive(Debug, Clone)]
pub struct ResourceAvailability {
    pub build: usize,
    pub link: usize,
    pub fetch: usize,
}

impl ResourceAvailability {
    /// Check if all resources are fully available
    #[must_use]
    pub fn all_available(&self, limits: &ResourceLimits) -> bool {
        self.build >= limits.concurrent_builds
            && self.link >= limits.concurrent_links
            && self.fetch >= limits.concurrent_fetches
    }
}
