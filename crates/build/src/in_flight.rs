//! Deduplication of concurrent builds of one package

use dashmap::DashMap;
use nmx_errors::Error;
use nmx_types::DepPath;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

type Completion = Arc<OnceCell<Result<BuiltPackage, Error>>>;

/// What one build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    /// Directory holding the built output
    pub dir: PathBuf,
    /// Lifecycle scripts ran
    pub ran_scripts: bool,
    /// A patch was applied
    pub patched: bool,
    /// Scripts were withheld by the build policy
    pub ignored: bool,
    /// Scripts were disabled globally
    pub scripts_disabled: bool,
    /// Cache key the side effects were uploaded under
    pub side_effects_key: Option<String>,
}

impl BuiltPackage {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            ran_scripts: false,
            patched: false,
            ignored: false,
            scripts_disabled: false,
            side_effects_key: None,
        }
    }

    /// The package counts as built and need not be revisited
    #[must_use]
    pub fn is_built(&self) -> bool {
        !self.ignored && !self.scripts_disabled
    }
}

/// Completion signals keyed by package identity
///
/// The first caller for a key runs the build; every later caller awaits
/// the same completion and receives what was built.
#[derive(Debug, Default)]
pub struct InFlightBuilds {
    completions: DashMap<DepPath, Completion>,
}

/// Result of [`InFlightBuilds::run_once`]
#[derive(Debug, Clone)]
pub struct SharedBuild {
    pub output: BuiltPackage,
    /// Whether this caller executed the build
    pub executed: bool,
}

impl InFlightBuilds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `build` unless another caller already did for `key`
    ///
    /// # Errors
    ///
    /// Returns the build's error to every caller sharing it.
    pub async fn run_once<F, Fut>(&self, key: &DepPath, build: F) -> Result<SharedBuild, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BuiltPackage, Error>>,
    {
        let completion = self
            .completions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut executed = false;
        let result = completion
            .get_or_init(|| {
                executed = true;
                build()
            })
            .await;
        let output = result.clone()?;
        Ok(SharedBuild { output, executed })
    }

    /// Whether a build for `key` has completed
    #[must_use]
    pub fn is_complete(&self, key: &DepPath) -> bool {
        self.completions
            .get(key)
            .is_some_and(|completion| completion.initialized())
    }

    pub fn clear(&self) {
        self.completions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_build() {
        let builds = Arc::new(InFlightBuilds::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let key = DepPath::new("native@1.0.0");

        let mut handles = Vec::new();
        for i in 0..3 {
            let builds = Arc::clone(&builds);
            let runs = Arc::clone(&runs);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                builds
                    .run_once(&key, || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(BuiltPackage::new(PathBuf::from(format!("/location/{i}"))))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut executed = 0;
        let mut dirs = Vec::new();
        for handle in handles {
            let shared = handle.await.unwrap();
            executed += usize::from(shared.executed);
            dirs.push(shared.output.dir);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(executed, 1);
        assert!(dirs.windows(2).all(|w| w[0] == w[1]));
        assert!(builds.is_complete(&key));
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let builds = InFlightBuilds::new();
        let key = DepPath::new("broken@1.0.0");
        let first = builds
            .run_once(&key, || async { Err(Error::internal("boom")) })
            .await;
        let second = builds
            .run_once(&key, || async { Ok(BuiltPackage::new(PathBuf::from("/never"))) })
            .await;
        assert!(first.is_err());
        assert!(second.is_err());
    }
}
