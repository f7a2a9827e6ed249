// src/interception/rule.rs
//! URL matching rules
//!
//! A rule is an immutable predicate over the request URL. Patterns are
//! validated when the rule is built; evaluation failures (and panics inside
//! custom predicates) count as "no match" so a broken rule only ever skips
//! its provider.

use crate::utils::errors::{InterceptError, MatchEvaluationError, Result};
use glob::Pattern as GlobPattern;
use regex::Regex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Predicate over a request URL
pub trait Rule: Send + Sync + fmt::Debug {
    /// Test the whole candidate string against this rule
    fn evaluate(&self, candidate: &str) -> std::result::Result<bool, MatchEvaluationError>;
}

/// Evaluate `rule`, collapsing any failure into "no match"
pub fn matches(rule: &dyn Rule, candidate: &str) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(candidate))) {
        Ok(Ok(matched)) => matched,
        Ok(Err(e)) => {
            debug!("Rule {:?} failed on {}: {}", rule, candidate, e);
            false
        }
        Err(_) => {
            warn!("Rule {:?} panicked while matching {}", rule, candidate);
            false
        }
    }
}

/// Whole-string regular expression
#[derive(Clone)]
pub struct RegexRule {
    pattern: String,
    regex: Regex,
}

impl RegexRule {
    /// Compile `pattern`; it must match the entire URL, not a substring
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            InterceptError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self { pattern, regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for RegexRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegexRule({})", self.pattern)
    }
}

impl Rule for RegexRule {
    fn evaluate(&self, candidate: &str) -> std::result::Result<bool, MatchEvaluationError> {
        Ok(self.regex.is_match(candidate))
    }
}

/// Literal URL equality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactRule(pub String);

impl ExactRule {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

impl Rule for ExactRule {
    fn evaluate(&self, candidate: &str) -> std::result::Result<bool, MatchEvaluationError> {
        Ok(self.0 == candidate)
    }
}

/// Shell-style glob (`https://api.example.com/users/*`)
#[derive(Debug, Clone)]
pub struct GlobRule(GlobPattern);

impl GlobRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let compiled = GlobPattern::new(pattern).map_err(|e| InterceptError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self(compiled))
    }
}

impl Rule for GlobRule {
    fn evaluate(&self, candidate: &str) -> std::result::Result<bool, MatchEvaluationError> {
        Ok(self.0.matches(candidate))
    }
}

/// Matches every URL
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyRule;

impl Rule for AnyRule {
    fn evaluate(&self, _candidate: &str) -> std::result::Result<bool, MatchEvaluationError> {
        Ok(true)
    }
}

/// Closure-backed rule
pub struct FnRule<F> {
    name: String,
    predicate: F,
}

impl<F> FnRule<F>
where
    F: Fn(&str) -> std::result::Result<bool, MatchEvaluationError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> fmt::Debug for FnRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnRule({})", self.name)
    }
}

impl<F> Rule for FnRule<F>
where
    F: Fn(&str) -> std::result::Result<bool, MatchEvaluationError> + Send + Sync,
{
    fn evaluate(&self, candidate: &str) -> std::result::Result<bool, MatchEvaluationError> {
        (self.predicate)(candidate)
    }
}
