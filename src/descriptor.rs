//! Scenario test descriptors
//!
//! A [`SippTest`] stands in for a user test body until collection expands it
//! into one item per scenario. It carries the declaration-time configuration
//! (scenario node, settings) and any markers attached to it, in whatever order
//! they were attached.
//!
//! ## Body protocol
//!
//! The test function returns a fresh [`TestBody`] per case. The dispatcher
//! calls [`TestBody::prime`] once before the scenario runs and
//! [`TestBody::resume`] once after it, no matter how the scenario ended.
//! `prime` must suspend (optionally declaring the failure kind the scenario is
//! expected to end with) and `resume` must complete.
//!
//! ```rust,no_run
//! use sipp_harness::descriptor::{sipp_test, TwoPhase};
//! use sipp_harness::scenario::FailureKind;
//!
//! let plain = sipp_test("test_call", TwoPhase::new);
//! let failing = sipp_test("test_rejected", || TwoPhase::expecting(FailureKind::ExitStatus))
//!     .scen_node("refer");
//! # let _ = (plain, failing);
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HarnessError;
use crate::host::Marker;
use crate::host::metafunc::Metafunc;
use crate::planner;
use crate::scenario::{FailureKind, Options, Scenario};
use crate::settings::SippConf;

/// Conventional receiver argument of class-scoped tests.
pub const SELF_ARG: &str = "self";

/// Where a body stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspend {
    /// Suspended, optionally declaring the expected failure kind.
    Yielded(Option<FailureKind>),
    /// Ran to completion.
    Completed,
}

/// Arguments visible to a test body.
pub struct TestArgs<'a> {
    values: &'a Options,
    scenario: Option<&'a mut Box<dyn Scenario>>,
}

impl<'a> TestArgs<'a> {
    pub fn new(values: &'a Options, scenario: Option<&'a mut Box<dyn Scenario>>) -> Self {
        Self { values, scenario }
    }

    /// Value of a requested fixture.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Options {
        self.values
    }

    /// The bound scenario, when the test requested `sippscen`.
    pub fn scenario(&mut self) -> Option<&mut Box<dyn Scenario>> {
        self.scenario.as_deref_mut()
    }
}

/// Two-phase test body driven by the dispatcher.
pub trait TestBody: Send {
    /// Setup half. Must return [`Suspend::Yielded`].
    fn prime(&mut self, args: &mut TestArgs<'_>) -> Suspend;

    /// Teardown half. Must return [`Suspend::Completed`].
    fn resume(&mut self, args: &mut TestArgs<'_>) -> Suspend;
}

type Phase = Box<dyn FnOnce(&mut TestArgs<'_>) + Send>;

/// Body built from optional setup/teardown closures and an expectation.
#[derive(Default)]
pub struct TwoPhase {
    expectation: Option<FailureKind>,
    setup: Option<Phase>,
    teardown: Option<Phase>,
}

impl TwoPhase {
    /// Suspend without expectation; the scenario must succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The scenario must fail with exactly `kind`.
    pub fn expecting(kind: FailureKind) -> Self {
        Self {
            expectation: Some(kind),
            ..Self::default()
        }
    }

    /// Runs before the scenario.
    pub fn setup(mut self, f: impl FnOnce(&mut TestArgs<'_>) + Send + 'static) -> Self {
        self.setup = Some(Box::new(f));
        self
    }

    /// Runs after the scenario, even when it failed.
    pub fn teardown(mut self, f: impl FnOnce(&mut TestArgs<'_>) + Send + 'static) -> Self {
        self.teardown = Some(Box::new(f));
        self
    }
}

impl TestBody for TwoPhase {
    fn prime(&mut self, args: &mut TestArgs<'_>) -> Suspend {
        if let Some(setup) = self.setup.take() {
            setup(args);
        }
        Suspend::Yielded(self.expectation)
    }

    fn resume(&mut self, args: &mut TestArgs<'_>) -> Suspend {
        if let Some(teardown) = self.teardown.take() {
            teardown(args);
        }
        Suspend::Completed
    }
}

/// Produces a fresh body for every case.
pub type TestFn = Arc<dyn Fn() -> Box<dyn TestBody> + Send + Sync>;

/// Introspection surface the host needs from a declared test.
pub trait Introspect {
    fn name(&self) -> &str;
    fn markers(&self) -> &[Marker];
    fn argnames(&self) -> &[String];
}

/// A declared scenario test, expanded at collection time.
#[derive(Clone)]
pub struct SippTest {
    name: String,
    function: TestFn,
    argnames: Vec<String>,
    scen_node: Option<String>,
    settings: SippConf,
    markers: Vec<Marker>,
}

impl fmt::Debug for SippTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SippTest")
            .field("name", &self.name)
            .field("argnames", &self.argnames)
            .field("scen_node", &self.scen_node)
            .field("settings", &self.settings)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

/// Declare a scenario test with no configuration.
pub fn sipp_test<F, B>(name: &str, function: F) -> SippTest
where
    F: Fn() -> B + Send + Sync + 'static,
    B: TestBody + 'static,
{
    declare(None, SippConf::default()).wrap(name, function)
}

/// Declare a scenario test with a node and settings, then [`Declaration::wrap`]
/// the body.
pub fn declare(scen_node: Option<&str>, settings: SippConf) -> Declaration {
    Declaration {
        scen_node: scen_node.map(str::to_string),
        settings,
    }
}

/// Configuration waiting for its test function.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    scen_node: Option<String>,
    settings: SippConf,
}

impl Declaration {
    pub fn wrap<F, B>(self, name: &str, function: F) -> SippTest
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: TestBody + 'static,
    {
        SippTest {
            name: name.to_string(),
            function: Arc::new(move || Box::new(function()) as Box<dyn TestBody>),
            argnames: Vec::new(),
            scen_node: self.scen_node,
            settings: self.settings,
            markers: Vec::new(),
        }
    }
}

impl SippTest {
    pub fn new<F, B>(name: &str, function: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: TestBody + 'static,
    {
        sipp_test(name, function)
    }

    pub fn scen_node(mut self, node: impl Into<String>) -> Self {
        self.scen_node = Some(node.into());
        self
    }

    /// Overlay declaration-time settings.
    pub fn settings(mut self, settings: SippConf) -> Self {
        self.settings = self.settings.merge(&settings);
        self
    }

    /// Request a fixture (or `sippscen`, or `self`).
    pub fn arg(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.argnames.contains(&name) {
            self.argnames.push(name);
        }
        self
    }

    pub fn mark(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn requested_node(&self) -> Option<&str> {
        self.scen_node.as_deref().filter(|n| !n.is_empty())
    }

    pub fn declared_settings(&self) -> &SippConf {
        &self.settings
    }

    /// Call the test function for a fresh body.
    pub fn call(&self) -> Box<dyn TestBody> {
        (self.function)()
    }

    /// Register this test's scenarios on `metafunc`.
    pub fn generate_tests(&self, metafunc: &mut Metafunc<'_>) -> Result<(), HarnessError> {
        planner::generate_sipp_tests(metafunc, self.requested_node(), &self.settings)
    }
}

impl Introspect for SippTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn markers(&self) -> &[Marker] {
        &self.markers
    }

    fn argnames(&self) -> &[String] {
        &self.argnames
    }
}
