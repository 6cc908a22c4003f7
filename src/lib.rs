#![forbid(unsafe_code)]
//! SIPp scenario test harness
//!
//! Discovers SIPp scenarios in a scenario database and runs each one as a
//! parametrized test case. A test declared with [`descriptor::sipp_test`] (or
//! [`descriptor::declare`]) is expanded at collection time into one item per
//! scenario found under its node, identified by the scenario's path relative
//! to the search directory. Tests without a node run against a single
//! default scenario.
//!
//! The pieces, bottom-up:
//!
//! - [`scenario`]: discovery, filter and scenario traits, plus the filesystem
//!   implementation in [`scenario::sipp`]
//! - [`locator`] and [`planner`]: turn settings into scenario cases
//! - [`descriptor`] and [`synth`]: declared tests and their expansion
//! - [`dispatch`]: the two-phase body protocol around one scenario run
//! - [`guard`]: the missing-binary check
//! - [`host`]: modules, fixtures, collection and the session runner
//! - [`cli`]: the `sipp-test` binary
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Test bodies**: panics raised by a test body or a scenario are caught per item and reported as failures; the
//!   body's teardown half still runs.

pub mod cli;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod host;
pub mod locator;
pub mod planner;
pub mod scenario;
pub mod settings;
pub mod synth;

pub use config::HarnessConfig;
pub use context::RunContext;
pub use descriptor::{Suspend, TestArgs, TestBody, TwoPhase, declare, sipp_test};
pub use error::{HarnessError, ProtocolViolation, SippNotFound};
pub use hooks::{CaseInfo, HookRegistry, SippHooks};
pub use host::runner::{Session, TestResult};
pub use host::{Class, Marker, Module, PlainTest};
pub use scenario::{FailureKind, Scenario, ScenarioDiscovery, ScenarioError, ScenarioFilter};
pub use settings::SippConf;
