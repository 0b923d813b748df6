//! Hoist pattern matching

use globset::{Glob, GlobMatcher};
use nmx_errors::{ConfigError, Error};
use nmx_types::HoistKind;

/// Ordered glob patterns where a leading `!` negates
///
/// The last pattern matching an alias decides. When no pattern matches,
/// the alias is accepted only if every pattern is a negation. An empty
/// pattern list matches nothing.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    patterns: Vec<(GlobMatcher, bool)>,
    only_negations: bool,
}

impl PatternMatcher {
    /// Compile patterns
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a malformed glob.
    pub fn new<S: AsRef<str>>(field: &str, patterns: &[S]) -> Result<Self, Error> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            let (negated, glob) = match pattern.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, pattern),
            };
            let matcher = Glob::new(glob)
                .map_err(|e| ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{pattern}: {e}"),
                })?
                .compile_matcher();
            compiled.push((matcher, negated));
        }
        let only_negations = !compiled.is_empty() && compiled.iter().all(|(_, negated)| *negated);
        Ok(Self {
            patterns: compiled,
            only_negations,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn matches(&self, alias: &str) -> bool {
        self.patterns
            .iter()
            .rev()
            .find(|(matcher, _)| matcher.is_match(alias))
            .map_or(self.only_negations, |(_, negated)| !negated)
    }
}

/// Public and private hoist patterns together
#[derive(Debug, Clone)]
pub struct HoistMatchers {
    public: PatternMatcher,
    private: PatternMatcher,
}

impl HoistMatchers {
    /// # Errors
    ///
    /// Returns an error if any pattern is not a valid glob.
    pub fn new<S: AsRef<str>>(public: &[S], private: &[S]) -> Result<Self, Error> {
        Ok(Self {
            public: PatternMatcher::new("hoist.public_hoist_pattern", public)?,
            private: PatternMatcher::new("hoist.hoist_pattern", private)?,
        })
    }

    /// Matchers for the `[hoist]` configuration section
    ///
    /// Disabled hoisting yields matchers that classify nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured pattern is not a valid glob.
    pub fn from_config(config: &nmx_config::HoistConfig) -> Result<Self, Error> {
        if config.enabled {
            Self::new(&config.public_hoist_pattern, &config.hoist_pattern)
        } else {
            Self::new::<&str>(&[], &[])
        }
    }

    /// Visibility tier for an alias; public patterns take precedence
    #[must_use]
    pub fn classify(&self, alias: &str) -> Option<HoistKind> {
        if self.public.matches(alias) {
            Some(HoistKind::Public)
        } else if self.private.matches(alias) {
            Some(HoistKind::Private)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.public.is_empty() && self.private.is_empty()
    }
}
