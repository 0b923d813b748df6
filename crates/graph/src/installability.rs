//! Platform and engine compatibility checks

use crate::RuntimeIdentity;
use nmx_events::SkipReason;
use nmx_types::PlatformRequirements;
use semver::{Version, VersionReq};
use std::collections::BTreeMap;

/// What a package declares about where it can run
#[derive(Debug, Clone, Copy)]
pub struct InstallabilityRequest<'a> {
    pub package_id: &'a str,
    pub engines: &'a BTreeMap<String, String>,
    pub platform: &'a PlatformRequirements,
}

/// Why a package cannot be installed on the current runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incompatibility {
    pub reason: SkipReason,
    pub wanted: String,
    pub current: String,
}

/// Decides whether a package can run on the target runtime
pub trait InstallabilityChecker: Send + Sync {
    /// `None` when compatible
    fn check(
        &self,
        request: &InstallabilityRequest<'_>,
        runtime: &RuntimeIdentity,
    ) -> Option<Incompatibility>;
}

/// Default checker for `os`/`cpu`/`libc` lists and `engines.node` ranges
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformChecker;

impl InstallabilityChecker for PlatformChecker {
    fn check(
        &self,
        request: &InstallabilityRequest<'_>,
        runtime: &RuntimeIdentity,
    ) -> Option<Incompatibility> {
        let platform = request.platform;
        let libc_ok = match &runtime.libc {
            Some(libc) => list_allows(&platform.libc, libc),
            None => true,
        };
        if !list_allows(&platform.os, &runtime.platform)
            || !list_allows(&platform.cpu, &runtime.arch)
            || !libc_ok
        {
            return Some(Incompatibility {
                reason: SkipReason::UnsupportedPlatform,
                wanted: format!(
                    "os={:?} cpu={:?} libc={:?}",
                    platform.os, platform.cpu, platform.libc
                ),
                current: format!(
                    "os={} cpu={} libc={}",
                    runtime.platform,
                    runtime.arch,
                    runtime.libc.as_deref().unwrap_or("unknown")
                ),
            });
        }

        let wanted_node = request.engines.get("node")?;
        let current = runtime.node_semver()?;
        if range_satisfied(wanted_node, &current) {
            None
        } else {
            Some(Incompatibility {
                reason: SkipReason::UnsupportedEngine,
                wanted: wanted_node.clone(),
                current: runtime.node_version.clone(),
            })
        }
    }
}

/// Match a value against an npm-style list with `!` negations
///
/// An empty list or a sole `any` entry allows everything; a list made
/// only of negations allows everything not negated.
fn list_allows(list: &[String], value: &str) -> bool {
    if list.is_empty() || (list.len() == 1 && list[0] == "any") {
        return true;
    }
    let mut matched = false;
    let mut negations = 0;
    for entry in list {
        if let Some(negated) = entry.strip_prefix('!') {
            if negated == value {
                return false;
            }
            negations += 1;
        } else {
            matched = matched || entry == value;
        }
    }
    matched || negations == list.len()
}

/// Whether `version` satisfies an npm range; unparseable ranges are accepted
fn range_satisfied(range: &str, version: &Version) -> bool {
    match parse_npm_range(range) {
        Some(alternatives) => alternatives.iter().any(|req| req.matches(version)),
        None => true,
    }
}

/// Translate an npm range (`||` alternatives, space-separated comparators,
/// hyphen ranges) into semver requirements
fn parse_npm_range(range: &str) -> Option<Vec<VersionReq>> {
    range
        .split("||")
        .map(|alternative| {
            let tokens: Vec<&str> = alternative.split_whitespace().collect();
            let normalized = match tokens.as_slice() {
                [] | ["*" | "x" | "X"] => "*".to_string(),
                [low, "-", high] => format!(">={low}, <={high}"),
                _ => join_comparators(&tokens),
            };
            VersionReq::parse(&normalized).ok()
        })
        .collect()
}

fn join_comparators(tokens: &[&str]) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => comparators.push(format!("{op}{token}")),
            None => comparators.push(bare_version(token)),
        }
    }
    comparators.join(", ")
}

/// A bare npm version is exact when complete and a tilde range when partial
fn bare_version(token: &str) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    let numeric = parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    match (numeric, parts.len()) {
        (true, 3) => format!("={token}"),
        (true, _) => format!("~{token}"),
        _ => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> RuntimeIdentity {
        RuntimeIdentity {
            platform: "linux".into(),
            arch: "x64".into(),
            libc: Some("glibc".into()),
            node_version: "18.17.0".into(),
        }
    }

    fn check(engines: &[(&str, &str)], platform: PlatformRequirements) -> Option<Incompatibility> {
        let engines: BTreeMap<String, String> = engines
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PlatformChecker.check(
            &InstallabilityRequest {
                package_id: "pkg@1.0.0",
                engines: &engines,
                platform: &platform,
            },
            &runtime(),
        )
    }

    fn list(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_list_semantics() {
        assert!(list_allows(&list(&[]), "linux"));
        assert!(list_allows(&list(&["any"]), "linux"));
        assert!(list_allows(&list(&["darwin", "linux"]), "linux"));
        assert!(!list_allows(&list(&["darwin"]), "linux"));
        assert!(list_allows(&list(&["!win32"]), "linux"));
        assert!(!list_allows(&list(&["!linux"]), "linux"));
    }

    #[test]
    fn test_platform_mismatch() {
        let result = check(
            &[],
            PlatformRequirements {
                os: list(&["darwin"]),
                ..PlatformRequirements::default()
            },
        );
        assert_eq!(result.unwrap().reason, SkipReason::UnsupportedPlatform);

        let musl_only = check(
            &[],
            PlatformRequirements {
                libc: list(&["musl"]),
                ..PlatformRequirements::default()
            },
        );
        assert!(musl_only.is_some());
    }

    #[test]
    fn test_engine_ranges() {
        let none = PlatformRequirements::default;
        assert!(check(&[("node", ">=16")], none()).is_none());
        assert!(check(&[("node", ">= 12.22.0 < 13 || >=14")], none()).is_none());
        assert!(check(&[("node", "^14 || ^16")], none()).is_some());
        assert!(check(&[("node", "16.0.0 - 18.20.0")], none()).is_none());
        assert_eq!(
            check(&[("node", ">=20")], none()).unwrap().reason,
            SkipReason::UnsupportedEngine
        );
        assert!(check(&[("node", "18.17.0")], none()).is_none());
        assert!(check(&[("node", "18.16.0")], none()).is_some());
        assert!(check(&[("node", "18")], none()).is_none());
        assert!(check(&[("node", "not a range")], none()).is_none());
        assert!(check(&[("npm", ">=99")], none()).is_none());
    }
}
