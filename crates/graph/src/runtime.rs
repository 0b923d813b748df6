//! Identity of the runtime packages are installed for

use nmx_config::RuntimeConfig;

/// Platform, architecture and engine the install targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub platform: String,
    pub arch: String,
    pub libc: Option<String>,
    pub node_version: String,
}

impl RuntimeIdentity {
    /// Engine name prefix of every dependency state key
    #[must_use]
    pub fn engine_name(&self) -> String {
        format!("{};{};node{}", self.platform, self.arch, self.node_major())
    }

    #[must_use]
    pub fn node_major(&self) -> &str {
        let version = self.node_version.trim_start_matches('v');
        version.split('.').next().unwrap_or(version)
    }

    /// Parsed Node.js version, if it is valid semver
    #[must_use]
    pub fn node_semver(&self) -> Option<semver::Version> {
        semver::Version::parse(self.node_version.trim_start_matches('v')).ok()
    }
}

impl From<&RuntimeConfig> for RuntimeIdentity {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            arch: config.arch.clone(),
            libc: config.libc.clone(),
            node_version: config.node_version.clone(),
        }
    }
}

impl Default for RuntimeIdentity {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}
