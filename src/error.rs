//! Error taxonomy for discovery, synthesis and execution.
//!
//! [`HarnessError`] covers everything the core can report. Protocol violations
//! are programming errors in a test body and are reported as internal errors
//! by the runner; expectation mismatches and scenario failures are ordinary
//! test failures.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::scenario::{FailureKind, ScenarioError};

/// Where to read about installing SIPp.
pub const SIPP_DOCS_URL: &str = "https://sipp.readthedocs.io/en/latest/installation.html";

/// Errors produced while collecting or running scenario tests.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(
        "No SIPp scenarios could be found under {}\nThe test '{function}' has asked for scen_node '{node}' under scen_root '{}'",
        .search_path.display(),
        .root.display()
    )]
    Discovery {
        search_path: PathBuf,
        function: String,
        node: String,
        root: PathBuf,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("expected scenario to fail with {expected}, {}", describe_outcome(.actual))]
    ExpectationMismatch {
        expected: FailureKind,
        actual: Option<ScenarioError>,
    },

    #[error("scenario failed: {0}")]
    ScenarioFailure(#[source] ScenarioError),

    #[error(transparent)]
    MissingDependency(#[from] SippNotFound),

    #[error("invalid exclude_expr '{expr}': {source}")]
    InvalidPattern {
        expr: String,
        #[source]
        source: regex::Error,
    },

    #[error("fixture '{name}' not found (requested by '{requested_by}')")]
    UnknownFixture { name: String, requested_by: String },

    #[error("fixture '{name}' failed: {message}")]
    Fixture { name: String, message: String },

    #[error("cannot parametrize '{function}': {message}")]
    Parametrize { function: String, message: String },

    #[error("{0}")]
    TestFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Internal errors are bugs in a test body rather than scenario outcomes.
    pub fn is_internal(&self) -> bool {
        matches!(self, HarnessError::Protocol(_))
    }
}

fn describe_outcome(actual: &Option<ScenarioError>) -> String {
    match actual {
        Some(err) => format!("but it failed with {}", err),
        None => "but it succeeded".to_string(),
    }
}

/// The two-phase body contract was broken.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("generator didn't yield")]
    DidNotYield,
    #[error("generator didn't stop")]
    DidNotStop,
}

/// The SIPp binary could not be resolved on `PATH`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Could not find a suitable SIPp binary. Is it installed properly?")]
pub struct SippNotFound {
    /// Name or path that was probed.
    pub binary: String,
}

impl Diagnostic for SippNotFound {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new("sipp::binary_not_found"))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new("install SIPp or point --sipp-binary at an executable"))
    }

    fn url<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(SIPP_DOCS_URL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_message_names_everything() {
        let err = HarnessError::Discovery {
            search_path: PathBuf::from("refer"),
            function: "test_sipp".to_string(),
            node: "refer".to_string(),
            root: PathBuf::new(),
        };
        insta::assert_snapshot!(err.to_string(), @r"
        No SIPp scenarios could be found under refer
        The test 'test_sipp' has asked for scen_node 'refer' under scen_root ''
        ");
    }

    #[test]
    fn test_mismatch_without_failure() {
        let err = HarnessError::ExpectationMismatch {
            expected: FailureKind::Timeout,
            actual: None,
        };
        assert_eq!(err.to_string(), "expected scenario to fail with timeout, but it succeeded");
    }

    #[test]
    fn test_mismatch_with_other_failure() {
        let err = HarnessError::ExpectationMismatch {
            expected: FailureKind::Timeout,
            actual: Some(ScenarioError::new(FailureKind::ExitStatus, "uac exited with 1")),
        };
        assert_eq!(
            err.to_string(),
            "expected scenario to fail with timeout, but it failed with exit status: uac exited with 1"
        );
    }

    #[test]
    fn test_protocol_violations_are_internal() {
        assert!(HarnessError::from(ProtocolViolation::DidNotStop).is_internal());
        assert!(!HarnessError::ScenarioFailure(ScenarioError::new(FailureKind::Aborted, "x")).is_internal());
    }

    #[test]
    fn test_sipp_not_found_diagnostic() {
        let err = SippNotFound {
            binary: "sipp".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Could not find a suitable SIPp binary. Is it installed properly?"
        );
        let url = err.url().map(|u| u.to_string());
        assert_eq!(url.as_deref(), Some(SIPP_DOCS_URL));
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("sipp::binary_not_found"));
    }
}
