//! Scenario collaborator interfaces
//!
//! The core never walks a script database or spawns SIPp itself. It goes
//! through these traits:
//! - [`ScenarioDiscovery`] finds scenarios under a path (lazily)
//! - [`Scenario`] runs one scenario with a timeout and pass-through options
//! - [`ScenarioFilter`] lets callers reject candidates during a walk
//!
//! [`sipp::SippDiscovery`] is the filesystem implementation.

pub mod sipp;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::config::HarnessConfig;
use crate::error::HarnessError;

/// Pass-through invocation options, keyed by option name.
pub type Options = BTreeMap<String, Value>;

/// Kinds of scenario failure a test body can declare as expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The scenario did not finish before its timeout.
    Timeout,
    /// An agent exited with a non-zero status.
    ExitStatus,
    /// An agent could not be started.
    Spawn,
    /// The scenario was aborted by a collaborator.
    Aborted,
    /// A scenario-level check failed.
    Assertion,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::ExitStatus => write!(f, "exit status"),
            FailureKind::Spawn => write!(f, "spawn failure"),
            FailureKind::Aborted => write!(f, "aborted"),
            FailureKind::Assertion => write!(f, "assertion"),
        }
    }
}

/// A failed scenario invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ScenarioError {
    kind: FailureKind,
    message: String,
}

impl ScenarioError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A runnable protocol scenario.
///
/// Every test case owns its own instance. `clone_box` exists so a case that is
/// multiplied by further parametrization gets a copy instead of a shared one.
pub trait Scenario: Send {
    /// Directory the scenario was loaded from.
    fn dirpath(&self) -> &Path;

    /// Human-readable listing of the commands `run` would execute.
    fn pformat_cmds(&self) -> String;

    /// Run the scenario to completion or until `timeout` elapses.
    fn run(&mut self, timeout: Duration, options: &Options) -> Result<(), ScenarioError>;

    fn clone_box(&self) -> Box<dyn Scenario>;
}

impl Clone for Box<dyn Scenario> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("dirpath", &self.dirpath()).finish()
    }
}

/// Flags forwarded to a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Defer building agent commands until the scenario is first used.
    pub deferred_construction: bool,
    /// Let the scenario pick local sockets on its own.
    pub autolocalsocks: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            deferred_construction: true,
            autolocalsocks: false,
        }
    }
}

/// Predicate that can drop candidates during discovery.
pub trait ScenarioFilter: Send + Sync {
    /// Returns `true` when the candidate at `path` must be skipped.
    fn reject(&self, path: &Path) -> bool;
}

impl fmt::Debug for dyn ScenarioFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScenarioFilter")
    }
}

/// Rejects candidates whose path matches an expression anchored at the start.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    expr: String,
    regex: Regex,
}

impl PatternFilter {
    pub fn new(expr: &str) -> Result<Self, HarnessError> {
        let regex = Regex::new(&format!("^(?:{})", expr)).map_err(|source| HarnessError::InvalidPattern {
            expr: expr.to_string(),
            source,
        })?;
        Ok(Self {
            expr: expr.to_string(),
            regex,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl ScenarioFilter for PatternFilter {
    fn reject(&self, path: &Path) -> bool {
        self.regex.is_match(&path.to_string_lossy())
    }
}

/// Lazy sequence of discovered `(path, scenario)` pairs.
pub type Walk<'a> = Box<dyn Iterator<Item = Result<(PathBuf, Box<dyn Scenario>), HarnessError>> + 'a>;

/// Finds scenarios on disk (or anywhere else).
pub trait ScenarioDiscovery: Send + Sync {
    /// Default scenario database root, if this collaborator knows one.
    fn collect_default_root(&self, _config: &HarnessConfig) -> Option<PathBuf> {
        None
    }

    /// The synthetic scenario used when a test names no scenario node.
    fn default_scenario(&self, opts: WalkOptions) -> Box<dyn Scenario>;

    /// Walk `path`, yielding every scenario no filter rejects.
    ///
    /// Implementations must construct scenarios as the iterator advances.
    fn walk<'a>(
        &'a self,
        path: &Path,
        filters: &'a [Arc<dyn ScenarioFilter>],
        opts: WalkOptions,
    ) -> Result<Walk<'a>, HarnessError>;
}

/// `true` when any filter rejects `path`.
pub fn rejected(filters: &[Arc<dyn ScenarioFilter>], path: &Path) -> bool {
    filters.iter().any(|f| f.reject(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_anchored_at_start() {
        let filter = PatternFilter::new("refer/attended").unwrap();
        assert!(filter.reject(Path::new("refer/attended_2call_multi_xfer")));
        assert!(!filter.reject(Path::new("scripts/refer/attended_2call_multi_xfer")));
    }

    #[test]
    fn test_pattern_alternation_stays_anchored() {
        let filter = PatternFilter::new("a|b").unwrap();
        assert!(filter.reject(Path::new("b/x")));
        assert!(!filter.reject(Path::new("x/b")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = PatternFilter::new("(unclosed").unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPattern { ref expr, .. } if expr == "(unclosed"));
    }

    #[test]
    fn test_failure_kind_display() {
        let err = ScenarioError::new(FailureKind::Spawn, "no such file");
        assert_eq!(err.to_string(), "spawn failure: no such file");
        assert_eq!(err.kind(), FailureKind::Spawn);
    }

    #[test]
    fn test_rejected_checks_every_filter() {
        let filters: Vec<Arc<dyn ScenarioFilter>> = vec![
            Arc::new(PatternFilter::new("x").unwrap()),
            Arc::new(PatternFilter::new("y").unwrap()),
        ];
        assert!(rejected(&filters, Path::new("y/1")));
        assert!(!rejected(&filters, Path::new("z/1")));
    }
}
