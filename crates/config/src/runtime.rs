//! Host runtime description used for installability checks and state keys

use serde::{Deserialize, Serialize};

/// Target runtime the install is prepared for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_node_version")]
    pub node_version: String,
    #[serde(default = "host_platform")]
    pub platform: String,
    #[serde(default = "host_arch")]
    pub arch: String,
    #[serde(default = "host_libc")]
    pub libc: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_version: default_node_version(),
            platform: host_platform(),
            arch: host_arch(),
            libc: host_libc(),
        }
    }
}

impl RuntimeConfig {
    /// Major component of the configured Node.js version
    #[must_use]
    pub fn node_major(&self) -> &str {
        let version = self.node_version.trim_start_matches('v');
        version.split('.').next().unwrap_or(version)
    }
}

fn default_node_version() -> String {
    "20.0.0".to_string()
}

fn host_platform() -> String {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
    .to_string()
}

fn host_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    }
    .to_string()
}

fn host_libc() -> Option<String> {
    if cfg!(target_os = "linux") {
        if cfg!(target_env = "musl") {
            Some("musl".to_string())
        } else {
            Some("glibc".to_string())
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_major() {
        let mut runtime = RuntimeConfig::default();
        assert_eq!(runtime.node_major(), "20");
        runtime.node_version = "v18.19.1".to_string();
        assert_eq!(runtime.node_major(), "18");
    }

    #[test]
    fn test_host_names_use_npm_spelling() {
        let runtime = RuntimeConfig::default();
        assert_ne!(runtime.platform, "macos");
        assert_ne!(runtime.arch, "x86_64");
        assert_ne!(runtime.arch, "aarch64");
    }
}
